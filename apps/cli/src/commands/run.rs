//! run 命令
//!
//! 连接 → 执行一个测试 → 断开。当前构建只带 Mock 硬件。

use super::{classified, config, print_json};
use crate::params::parse_params;
use anyhow::{Result, bail};
use clap::Args;
use memtest_sdk::driver::mock_factory;
use memtest_sdk::{Backend, BackendOverride, Operation, SystemRouterBuilder, TestRequest};
use serde_json::json;
use std::path::Path;

#[derive(Args, Debug)]
pub struct RunCommand {
    /// 操作名（如 `pulse_read_repeat`）
    pub operation: Operation,

    /// 仪器地址
    #[arg(short, long)]
    pub address: String,

    /// 强制后端（跳过地址探测）
    #[arg(short, long)]
    pub backend: Option<Backend>,

    /// 参数 `name=value`，可重复
    #[arg(short = 'P', long = "param")]
    pub params: Vec<String>,

    /// 使用 Mock 硬件
    #[arg(long)]
    pub mock: bool,
}

impl RunCommand {
    pub fn execute(&self, config_path: &Path) -> Result<()> {
        if !self.mock {
            bail!("No hardware driver is linked into this build; pass --mock");
        }
        let config = config::load(config_path)?;
        let request = TestRequest::new(self.operation, parse_params(&self.params)?);

        let router = SystemRouterBuilder::new()
            .factory(mock_factory())
            .router_config(&config.router)
            .build();
        let selection = self.backend.map_or(BackendOverride::Auto, BackendOverride::Force);
        let backend = router
            .connect(&self.address, selection)
            .map_err(|e| classified(e.kind(), e.to_string()))?;

        let outcome = router.run_test(&request);
        if let Err(e) = router.disconnect() {
            tracing::warn!("Disconnect failed: {}", e);
        }
        let result = outcome.map_err(|e| classified(e.kind(), e.to_string()))?;

        print_json(&json!({
            "backend": backend.as_str(),
            "operation": self.operation.as_str(),
            "samples": result.len(),
            "result": result.into_map(),
        }))
    }
}
