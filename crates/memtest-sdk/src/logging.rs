//! 日志初始化
//!
//! 所有 crate 通过 `tracing` 宏记录日志；这里安装 fmt subscriber，并把 `log`
//! crate 的记录桥接进来（设备驱动库常用 `log`）。

use tracing_subscriber::EnvFilter;

/// `RUST_LOG` 未设置时使用的过滤器
pub const DEFAULT_LOG_FILTER: &str = "memtest=info";

/// 安装全局日志 subscriber
///
/// `RUST_LOG` 优先；否则使用 `default_filter`。已安装过时返回错误。
pub fn try_init_logger(default_filter: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;
    tracing_log::LogTracer::init()?;
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// 按默认过滤器安装日志，重复调用是无害的
pub fn init_logger() {
    if let Err(e) = try_init_logger(DEFAULT_LOG_FILTER) {
        tracing::debug!("Logger already initialised: {}", e);
    }
}
