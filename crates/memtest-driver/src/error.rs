//! 路由层错误类型定义

use memtest_instrument::{AdapterError, Backend};
use memtest_protocol::{Operation, ParamBag, ProtocolError};
use std::fmt;
use thiserror::Error;

/// 错误类别
///
/// 边界层（CLI、上层应用）只需要按类别处理；消息用于展示。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 连接时设备不可达
    Connection,
    /// 当前后端不支持该操作
    Capability,
    /// 输入无效（可安全重试）
    Parameter,
    /// 就绪超时或时间表无法容纳
    Timing,
    /// 设备执行失败
    Hardware,
    /// 资源正被另一会话占用
    Busy,
    /// 适配器/注册表配置错误
    Configuration,
    /// 用户取消
    Cancelled,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Capability => "capability",
            ErrorKind::Parameter => "parameter",
            ErrorKind::Timing => "timing",
            ErrorKind::Hardware => "hardware",
            ErrorKind::Busy => "busy",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 路由层错误类型
#[derive(Error, Debug)]
pub enum TestError {
    /// 连接失败
    #[error("Failed to connect to '{address}': {source}")]
    Connection {
        address: String,
        #[source]
        source: AdapterError,
    },

    /// 尚未连接任何系统
    #[error("No system connected")]
    NotConnected,

    /// 地址无法识别为任何已知后端
    #[error("Cannot determine instrument backend from address '{0}'")]
    UnknownAddress(String),

    /// 当前后端不支持该操作
    #[error("Operation '{operation}' is not supported on {backend}: {reason}")]
    Capability {
        backend: Backend,
        operation: Operation,
        reason: String,
    },

    /// 注册表声明支持但适配器没有实现
    #[error("Adapter for {backend} is registered for '{operation}' but does not implement it")]
    MissingOperation {
        backend: Backend,
        operation: Operation,
    },

    /// 参数错误
    #[error("Invalid parameters: {0}")]
    Parameter(#[from] ProtocolError),

    /// 设备执行失败（不重试）
    #[error("Hardware error during '{operation}' with {params}: {source}")]
    Hardware {
        operation: Operation,
        params: ParamBag,
        #[source]
        source: AdapterError,
    },

    /// 适配器返回的结果形状不合法
    #[error("Malformed result from '{operation}': {source}")]
    ResultShape {
        operation: Operation,
        #[source]
        source: ProtocolError,
    },

    /// 另一个测试正在运行
    #[error("System is busy with another test")]
    Busy,

    /// 工厂创建适配器失败
    #[error("Failed to create adapter for {backend}: {reason}")]
    Factory { backend: Backend, reason: String },
}

impl TestError {
    /// 错误类别
    pub fn kind(&self) -> ErrorKind {
        match self {
            TestError::Connection { .. } | TestError::NotConnected => ErrorKind::Connection,
            TestError::UnknownAddress(_) | TestError::Parameter(_) => ErrorKind::Parameter,
            TestError::Capability { .. } => ErrorKind::Capability,
            TestError::MissingOperation { .. } | TestError::Factory { .. } => {
                ErrorKind::Configuration
            },
            TestError::Hardware { .. } | TestError::ResultShape { .. } => ErrorKind::Hardware,
            TestError::Busy => ErrorKind::Busy,
        }
    }

    /// `(类别, 消息)`，供边界层展示
    pub fn report(&self) -> (ErrorKind, String) {
        (self.kind(), self.to_string())
    }
}
