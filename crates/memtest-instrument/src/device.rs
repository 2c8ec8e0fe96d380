//! 设备原语
//!
//! 厂商驱动对象以不透明的同步原语形式被调用，各自有延迟和错误类型。
//! 适配器只通过这些 trait 访问硬件。

use std::time::Duration;
use thiserror::Error;

/// 设备错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    Unknown,
    NotFound,
    Timeout,
    Io,
    InvalidResponse,
    Interlock,
    Busy,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    pub message: String,
}

impl DeviceError {
    pub fn new(kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// 是否为连接层面的致命错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            DeviceErrorKind::NotFound | DeviceErrorKind::Interlock
        )
    }
}

impl From<String> for DeviceError {
    fn from(message: String) -> Self {
        Self::new(DeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for DeviceError {
    fn from(message: &str) -> Self {
        Self::new(DeviceErrorKind::Unknown, message)
    }
}

/// 单次读取结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// 电压（V）
    pub voltage: f64,
    /// 电流（A）
    pub current: f64,
}

/// 源表原语（SMU/PMU 通道）
///
/// 每个调用都是一次完整的总线往返，可能阻塞到适配器配置的超时时间，
/// 且不能在中途安全打断。
pub trait SourceMeter: Send {
    /// 打开到设备的会话
    fn open(&mut self, address: &str, timeout: Duration) -> Result<(), DeviceError>;

    /// 关闭会话
    fn close(&mut self) -> Result<(), DeviceError>;

    /// `*IDN?`
    fn idn(&mut self) -> Result<String, DeviceError>;

    /// 施加直流偏置并打开输出
    fn apply_bias(&mut self, voltage: f64, current_limit: f64) -> Result<(), DeviceError>;

    /// 在当前偏置下读取一次
    fn read_once(&mut self) -> Result<Reading, DeviceError>;

    /// 输出单个脉冲，结束后回到 `base_voltage`
    fn pulse(
        &mut self,
        amplitude: f64,
        width_s: f64,
        base_voltage: f64,
        current_limit: f64,
    ) -> Result<(), DeviceError>;

    /// 关闭输出（安全状态）
    fn output_off(&mut self) -> Result<(), DeviceError>;
}

impl<T: SourceMeter + ?Sized> SourceMeter for Box<T> {
    fn open(&mut self, address: &str, timeout: Duration) -> Result<(), DeviceError> {
        (**self).open(address, timeout)
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        (**self).close()
    }

    fn idn(&mut self) -> Result<String, DeviceError> {
        (**self).idn()
    }

    fn apply_bias(&mut self, voltage: f64, current_limit: f64) -> Result<(), DeviceError> {
        (**self).apply_bias(voltage, current_limit)
    }

    fn read_once(&mut self) -> Result<Reading, DeviceError> {
        (**self).read_once()
    }

    fn pulse(
        &mut self,
        amplitude: f64,
        width_s: f64,
        base_voltage: f64,
        current_limit: f64,
    ) -> Result<(), DeviceError> {
        (**self).pulse(amplitude, width_s, base_voltage, current_limit)
    }

    fn output_off(&mut self) -> Result<(), DeviceError> {
        (**self).output_off()
    }
}

/// 激光触发原语
///
/// 与电学通道独立计时；没有硬件触发线，由同步器在软件中开关。
pub trait LaserDriver: Send {
    /// 打开/关闭激光输出
    fn fire(&mut self, enable: bool) -> Result<(), DeviceError>;

    /// 强制关闭（清理路径使用）
    fn off(&mut self) -> Result<(), DeviceError> {
        self.fire(false)
    }
}

impl<T: LaserDriver + ?Sized> LaserDriver for Box<T> {
    fn fire(&mut self, enable: bool) -> Result<(), DeviceError> {
        (**self).fire(enable)
    }

    fn off(&mut self) -> Result<(), DeviceError> {
        (**self).off()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_display() {
        let err = DeviceError::new(DeviceErrorKind::Timeout, "no reply to *IDN?");
        assert_eq!(err.to_string(), "Timeout: no reply to *IDN?");
        assert!(!err.is_fatal());
        assert!(DeviceError::new(DeviceErrorKind::Interlock, "open").is_fatal());
        let err: DeviceError = "boom".into();
        assert_eq!(err.kind, DeviceErrorKind::Unknown);
    }
}
