//! # Memtest Protocol
//!
//! 忆阻器脉冲测试的数据模型（无硬件依赖）
//!
//! ## 模块
//!
//! - `units`: 时间单位（ns/µs/ms/s）与换算
//! - `limits`: 各后端的硬件限制 `HardwareLimits`
//! - `request`: 测试请求 `TestRequest`、操作名 `Operation`、参数包 `ParamBag`
//! - `result`: 标准结果 `TestResult`
//! - `schedule`: 脉冲模式调度器（`PatternSpec` → `FiringSchedule`）
//!
//! ## 层次
//!
//! ```text
//! memtest-client (同步器) / memtest-driver (路由)
//!     ↓
//! memtest-instrument (适配器 + 能力注册表)
//!     ↓
//! memtest-protocol (本 crate：纯数据 + 纯函数)
//! ```

pub mod limits;
pub mod request;
pub mod result;
pub mod schedule;
pub mod units;

// 重新导出常用类型
pub use limits::{HardwareLimits, LimitCheck};
pub use request::{Operation, ParamBag, ParamValue, TestRequest};
pub use result::{
    DEFAULT_RESISTANCE_SENTINEL, DEFAULT_ZERO_CURRENT_EPSILON, Series, TestResult, resistance,
};
pub use schedule::{DEFAULT_MIN_SEGMENT_S, FireInterval, FiringSchedule, PatternSpec};
pub use units::{TimeUnit, duration_from_seconds, parse_time};

use thiserror::Error;

/// 协议层错误类型
///
/// 全部属于"参数错误"类别：在任何设备状态改变之前产生，修正输入后可安全重试。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// 脉冲模式字符串无效（空、全零或含非 0/1 字符）
    #[error("Invalid pulse pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// 原始模式字符串
        pattern: String,
        /// 原因
        reason: String,
    },

    /// 参数值无效
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// 参数名
        name: String,
        /// 原因
        reason: String,
    },

    /// 缺少必需参数
    #[error("Missing required parameter '{0}'")]
    MissingParameter(String),

    /// 参数类型不匹配
    #[error("Parameter '{name}' has wrong type: expected {expected}")]
    TypeMismatch {
        /// 参数名
        name: String,
        /// 期望类型
        expected: &'static str,
    },

    /// 时间参数单位与后端约定不一致
    #[error("Parameter '{name}' is in {found}, backend expects {expected}")]
    UnitMismatch {
        /// 参数名
        name: String,
        /// 后端约定单位
        expected: TimeUnit,
        /// 实际单位
        found: TimeUnit,
    },

    /// 未知操作名
    #[error("Unknown operation '{0}'")]
    UnknownOperation(String),

    /// 未知时间单位
    #[error("Unknown time unit '{0}' (expected ns, us, ms or s)")]
    UnknownUnit(String),

    /// 结果序列长度不一致
    #[error(
        "Result series length mismatch: timestamps={timestamps}, voltages={voltages}, currents={currents}"
    )]
    LengthMismatch {
        /// timestamps 长度
        timestamps: usize,
        /// voltages 长度
        voltages: usize,
        /// currents 长度
        currents: usize,
    },
}
