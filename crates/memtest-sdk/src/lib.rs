//! Memtest SDK - 忆阻器脉冲测试自动化
//!
//! 为两类不兼容的仪器（TSP 脚本化 SMU、KXCI 脚本化 PMU/SMU 主机）提供统一的
//! 测试入口，并在没有硬件触发线的情况下把激光与电测量对齐到同一个时间零点。
//!
//! # 架构设计
//!
//! 从底层到高层：
//!
//! - **协议层** (`protocol`): 参数、单位、硬件限制、测试结果、激光时间表
//! - **仪器层** (`instrument`): 适配器 trait、能力注册表、设备原语、时钟
//! - **路由层** (`driver`): 后端探测、能力检查、参数/结果规范化
//! - **同步层** (`client`): 软件时钟同步器、对齐诊断、校准估计
//! - **工具** (`tools`): TOML 配置、统计
//!
//! # 快速开始
//!
//! ```rust
//! use memtest_sdk::prelude::*;
//! ```
//!
//! 单个测试走路由器：
//!
//! ```no_run
//! use memtest_sdk::prelude::*;
//! # fn demo(router: &SystemRouter) -> Result<(), TestError> {
//! let request = TestRequest::new(
//!     Operation::PulseReadRepeat,
//!     ParamBag::new()
//!         .with("pulse_voltage", 1.5)
//!         .with_time("pulse_width", 100.0, TimeUnit::Microseconds)
//!         .with("read_voltage", 0.2)
//!         .with("num_cycles", 10_i64),
//! );
//! let result = router.run_test(&request)?;
//! println!("{} samples", result.len());
//! # Ok(())
//! # }
//! ```

pub mod prelude;

mod logging;

pub use memtest_client as client;
pub use memtest_driver as driver;
pub use memtest_instrument as instrument;
pub use memtest_protocol as protocol;
pub use memtest_tools as tools;

pub use logging::{DEFAULT_LOG_FILTER, init_logger, try_init_logger};

// --- 常用类型 ---

pub use memtest_protocol::{
    FireInterval, FiringSchedule, HardwareLimits, Operation, ParamBag, ParamValue, PatternSpec,
    ProtocolError, TestRequest, TestResult, TimeUnit,
};

pub use memtest_instrument::{
    AdapterError, Backend, CancelToken, CapabilityRegistry, Clock, InstrumentAdapter,
    LaserDriver, MonotonicClock, SourceMeter,
};

pub use memtest_driver::{BackendOverride, ErrorKind, SystemRouter, SystemRouterBuilder, TestError};

pub use memtest_client::{
    SyncError, SyncProtocol, SyncRequest, SyncSession, SyncState, Synchronizer,
    SynchronizerBuilder,
};

pub use memtest_tools::MemtestConfig;
