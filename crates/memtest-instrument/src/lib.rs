//! # Memtest Instrument Layer
//!
//! 仪器硬件抽象层，为两个不兼容的仪器家族提供统一的适配器接口：
//!
//! - **后端 A**：TSP 脚本化 SMU（Keithley 2450 类），[`Tsp2450Adapter`]
//! - **后端 B**：KXCI 脚本化 PMU/SMU 主机（Keithley 4200A 类），[`Kxci4200Adapter`]
//!
//! 厂商命令编码不在本层范围内：适配器通过不透明的同步原语
//! （[`SourceMeter`]、[`LaserDriver`]）访问设备。
//!
//! 能力注册表 [`CapabilityRegistry`] 是静态表：`(后端, 操作) → 支持/不支持`。
//! 适配器可能实现了某个方法但注册表仍标记为不支持（分阶段上线），
//! 因此任何操作在调用前都必须先查注册表。

mod adapter;
pub mod device;
mod kxci;
mod ops;
pub mod registry;
mod sequence;
pub mod timing;
mod tsp;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use adapter::{ConnectOptions, InstrumentAdapter};
pub use device::{DeviceError, DeviceErrorKind, LaserDriver, Reading, SourceMeter};
pub use kxci::Kxci4200Adapter;
pub use registry::{Acquisition, Capability, CapabilityRegistry, RegistryBuilder};
pub use timing::{CancelToken, Clock, MonotonicClock, SimulatedClock};
pub use tsp::Tsp2450Adapter;

use memtest_protocol::{HardwareLimits, Operation, ProtocolError, TimeUnit};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 仪器后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Backend {
    /// 后端 A：TSP 脚本化 SMU（Keithley 2450 类）
    Tsp2450,
    /// 后端 B：KXCI 脚本化 PMU/SMU 主机（Keithley 4200A 类）
    Kxci4200,
}

impl Backend {
    /// 全部后端
    pub const ALL: [Backend; 2] = [Backend::Tsp2450, Backend::Kxci4200];

    /// 后端标识
    pub const fn as_str(self) -> &'static str {
        match self {
            Backend::Tsp2450 => "keithley2450",
            Backend::Kxci4200 => "keithley4200a",
        }
    }

    /// 人类可读的系统名
    pub const fn system_name(self) -> &'static str {
        match self {
            Backend::Tsp2450 => "Keithley 2450 (TSP)",
            Backend::Kxci4200 => "Keithley 4200A-SCS (KXCI)",
        }
    }

    /// 参数的后端约定时间单位
    ///
    /// 内部一律为秒；后端 B 的旧版 KXCI 用户库函数以微秒接收脉宽类参数。
    pub fn canonical_unit(self, param: &str) -> TimeUnit {
        match (self, param) {
            (Backend::Kxci4200, "pulse_width" | "on_duration" | "off_duration") => {
                TimeUnit::Microseconds
            },
            _ => TimeUnit::Seconds,
        }
    }

    /// 后端默认硬件限制
    pub const fn default_limits(self) -> HardwareLimits {
        match self {
            Backend::Tsp2450 => HardwareLimits {
                min_pulse_width: 50e-6,
                max_pulse_width: 10.0,
                min_voltage: -200.0,
                max_voltage: 200.0,
                min_current_limit: 1e-9,
                max_current_limit: 1.05,
                max_points: 250_000,
                min_sampling_rate: 0.1,
                max_measurement_time: 86_400.0,
            },
            Backend::Kxci4200 => HardwareLimits {
                min_pulse_width: 60e-9,
                max_pulse_width: 1.0,
                min_voltage: -40.0,
                max_voltage: 40.0,
                min_current_limit: 100e-9,
                max_current_limit: 0.8,
                max_points: 1_000_000,
                min_sampling_rate: 1_000.0,
                max_measurement_time: 40.0,
            },
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keithley2450" | "2450" | "tsp" | "a" => Ok(Backend::Tsp2450),
            "keithley4200a" | "4200a" | "4200" | "kxci" | "b" => Ok(Backend::Kxci4200),
            other => Err(ProtocolError::InvalidParameter {
                name: "backend".to_string(),
                reason: format!("unknown backend '{other}'"),
            }),
        }
    }
}

/// 适配器错误类型
#[derive(Error, Debug)]
pub enum AdapterError {
    /// 连接失败（地址不可达、设备未响应）
    #[error("Connection to '{address}' failed: {reason}")]
    Connection {
        /// 地址
        address: String,
        /// 原因
        reason: String,
    },

    /// 未连接
    #[error("Adapter is not connected")]
    NotConnected,

    /// 适配器没有实现该操作（配置错误，而非能力缺口）
    #[error("Operation '{0}' is not implemented by this adapter")]
    NotImplemented(Operation),

    /// 参数错误
    #[error("Parameter error: {0}")]
    Parameter(#[from] ProtocolError),

    /// 采样点数超过后端上限
    #[error("Measurement exceeds the backend point limit ({0} points)")]
    PointLimit(usize),

    /// 设备原语错误
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// 测量被中止（会话取消或编排线程退出）
    #[error("Measurement aborted")]
    Aborted,
}
