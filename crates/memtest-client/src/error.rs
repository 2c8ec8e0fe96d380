//! 同步器错误类型

use memtest_driver::{ErrorKind, TestError};
use memtest_instrument::{AdapterError, DeviceError};
use memtest_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// 同步会话错误
///
/// 清理步骤完成后原样返回，不改写。
#[derive(Error, Debug)]
pub enum SyncError {
    /// 测量线程未在超时内就绪
    #[error("Measurement worker did not signal readiness within {0:?}")]
    ReadinessTimeout(Duration),

    /// 时间表的第一个区间就超出测量时长
    #[error("Firing schedule does not fit: first interval ends at {first_end_s} s, duration is {duration_s} s")]
    ScheduleOverrun { first_end_s: f64, duration_s: f64 },

    /// 资源正被另一会话占用
    #[error("Another synchronized session holds the {0}")]
    Busy(&'static str),

    /// 会话被取消
    #[error("Synchronized session cancelled")]
    Cancelled,

    /// 请求参数无效
    #[error("Invalid sync request: {0}")]
    Parameter(#[from] ProtocolError),

    /// 适配器无法执行定时读取
    #[error("Adapter for {0} cannot run a timed read")]
    Unsupported(memtest_instrument::Backend),

    /// 测量线程失败
    #[error("Measurement failed: {0}")]
    Measurement(#[from] AdapterError),

    /// 激光驱动失败
    #[error("Laser failed: {0}")]
    Laser(#[source] DeviceError),

    /// 测量线程 panic
    #[error("Measurement worker panicked")]
    WorkerPanicked,

    /// 路由层错误（租用适配器、参数规范化）
    #[error(transparent)]
    Router(#[from] TestError),
}

impl SyncError {
    /// 错误类别
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::ReadinessTimeout(_) | SyncError::ScheduleOverrun { .. } => ErrorKind::Timing,
            SyncError::Busy(_) => ErrorKind::Busy,
            SyncError::Cancelled => ErrorKind::Cancelled,
            SyncError::Parameter(_) => ErrorKind::Parameter,
            SyncError::Unsupported(_) => ErrorKind::Capability,
            SyncError::Measurement(e) => match e {
                AdapterError::Aborted => ErrorKind::Cancelled,
                AdapterError::Parameter(_) | AdapterError::PointLimit(_) => ErrorKind::Parameter,
                AdapterError::Connection { .. } | AdapterError::NotConnected => ErrorKind::Connection,
                AdapterError::NotImplemented(_) => ErrorKind::Configuration,
                AdapterError::Device(_) => ErrorKind::Hardware,
            },
            SyncError::Laser(_) | SyncError::WorkerPanicked => ErrorKind::Hardware,
            SyncError::Router(e) => e.kind(),
        }
    }

    /// `(类别, 消息)`，供边界层展示
    pub fn report(&self) -> (ErrorKind, String) {
        (self.kind(), self.to_string())
    }
}
