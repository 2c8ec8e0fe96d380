//! 路由层
//!
//! 本模块把调用方的测试请求路由到当前连接的仪器后端，包括：
//! - 按地址探测后端（可显式覆盖）
//! - 能力检查（注册表为准，失败时零设备调用）
//! - 参数规范化（时间单位换算、硬件限值钳位/拒绝）
//! - 结果规范化（等长校验、`V / I` 电阻重算）
//! - 错误分类（[`ErrorKind`]）
//!
//! # 使用场景
//!
//! 单个测试直接调用 [`SystemRouter::run_test`]；需要与激光同步的测量通过
//! [`SystemRouter::lease`] 独占适配器后交给同步器。

mod builder;
mod detect;
mod error;
mod normalize;
mod router;

#[cfg(feature = "mock")]
pub use builder::mock_factory;
pub use builder::{AdapterFactory, RouterSettings, SystemRouterBuilder};
pub use detect::{BackendOverride, detect_backend, resolve_backend};
pub use error::{ErrorKind, TestError};
pub use normalize::{normalize_params, normalize_result};
pub use router::{AdapterLease, SystemRouter};
