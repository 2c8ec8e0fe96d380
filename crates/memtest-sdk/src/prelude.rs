//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use memtest_sdk::prelude::*;
//! ```

// 请求与结果
pub use crate::protocol::{
    Operation, ParamBag, ParamValue, PatternSpec, TestRequest, TestResult, TimeUnit,
};

// 仪器层（常用 Trait）
pub use crate::instrument::{Backend, CancelToken, Clock, InstrumentAdapter, LaserDriver};

// 路由与同步
pub use crate::client::{
    SyncProtocol, SyncRequest, SyncSession, SyncState, Synchronizer, SynchronizerBuilder,
};
pub use crate::driver::{BackendOverride, SystemRouter, SystemRouterBuilder};

// 配置
pub use crate::tools::MemtestConfig;

// 错误类型
pub use crate::client::SyncError;
pub use crate::driver::{ErrorKind, TestError};
pub use crate::protocol::ProtocolError;
