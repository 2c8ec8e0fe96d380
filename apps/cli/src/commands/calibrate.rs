//! calibrate 命令
//!
//! 读取 `run`/`sync` 输出的 JSON（或任何带 `timestamps` 与 `resistances`
//! 数组的对象），估计第一个脉冲的时间偏移。

use super::{config, print_json};
use crate::params::parse_seconds;
use anyhow::{Context, Result};
use clap::Args;
use memtest_sdk::client::suggest_offset;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct CalibrateCommand {
    /// 结果 JSON 文件
    pub file: PathBuf,

    /// 期望的第一个脉冲时刻
    #[arg(short, long, value_parser = parse_seconds)]
    pub desired: f64,

    /// 相对阈值（覆盖配置）
    #[arg(short, long)]
    pub threshold: Option<f64>,

    /// 基线采样数（覆盖配置）
    #[arg(short, long)]
    pub baseline: Option<usize>,
}

#[derive(Deserialize)]
struct Series {
    timestamps: Vec<f64>,
    resistances: Vec<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Input {
    /// `run`/`sync` 的输出：序列在 `result` 下
    Wrapped { result: Series },
    Plain(Series),
}

impl CalibrateCommand {
    pub fn execute(&self, config_path: &Path) -> Result<()> {
        let config = config::load(config_path)?;
        let text = std::fs::read_to_string(&self.file)
            .with_context(|| format!("Failed to read {}", self.file.display()))?;
        let input: Input = serde_json::from_str(&text).with_context(|| {
            format!(
                "{} has no 'timestamps'/'resistances' arrays",
                self.file.display()
            )
        })?;
        let series = match input {
            Input::Wrapped { result } => result,
            Input::Plain(series) => series,
        };

        let suggestion = suggest_offset(
            &series.timestamps,
            &series.resistances,
            self.desired,
            self.threshold.unwrap_or(config.sync.relative_threshold),
            self.baseline.unwrap_or(config.sync.baseline_samples),
        );
        match suggestion {
            Some(s) => print_json(&json!({
                "observed_time_s": s.observed_time_s,
                "desired_time_s": s.desired_time_s,
                "offset_s": s.offset_s,
            })),
            None => {
                tracing::warn!("No transition found relative to the baseline");
                print_json(&serde_json::Value::Null)
            },
        }
    }
}
