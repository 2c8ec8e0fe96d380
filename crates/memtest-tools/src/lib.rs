//! # Memtest Tools - 共享配置与统计
//!
//! **依赖原则**: 只依赖 `memtest-protocol`，不依赖任何硬件层
//!
//! ## 包含模块
//!
//! - `config` - TOML 运行配置（`[sync]`、`[scheduler]`、`[router]`）
//! - `statistics` - 基线/阈值穿越等纯函数（可选）
//!
//! ## Feature Flags
//!
//! - `default` - 无默认 features
//! - `full` - 启用所有功能（包含 statistics）
//! - `statistics` - 启用统计模块

pub mod config;

#[cfg(feature = "statistics")]
pub mod statistics;

pub use config::{MemtestConfig, RouterSection, SchedulerSection, SyncSection};
