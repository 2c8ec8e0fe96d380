//! detect 命令

use super::{classified, print_json};
use anyhow::Result;
use clap::Args;
use memtest_sdk::driver::detect_backend;
use serde_json::json;

#[derive(Args, Debug)]
pub struct DetectCommand {
    /// 仪器地址（VISA 资源名、`ip:port` 等）
    pub address: String,
}

impl DetectCommand {
    pub fn execute(&self) -> Result<()> {
        let backend =
            detect_backend(&self.address).map_err(|e| classified(e.kind(), e.to_string()))?;
        print_json(&json!({
            "address": self.address,
            "backend": backend.as_str(),
            "system": backend.system_name(),
        }))
    }
}
