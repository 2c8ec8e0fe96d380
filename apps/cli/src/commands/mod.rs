//! 命令定义和实现

pub mod calibrate;
pub mod capabilities;
pub mod config;
pub mod detect;
pub mod run;
pub mod schedule;
pub mod sync;

pub use calibrate::CalibrateCommand;
pub use capabilities::CapabilitiesCommand;
pub use config::ConfigCommand;
pub use detect::DetectCommand;
pub use run::RunCommand;
pub use schedule::ScheduleCommand;
pub use sync::SyncCommand;

use anyhow::{Context, Result};
use memtest_sdk::ErrorKind;
use serde::Serialize;

/// 以 JSON 输出到 stdout
pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{text}");
    Ok(())
}

/// 带类别前缀的错误，如 `[capability] ...`
pub(crate) fn classified(kind: ErrorKind, message: String) -> anyhow::Error {
    anyhow::anyhow!("[{kind}] {message}")
}
