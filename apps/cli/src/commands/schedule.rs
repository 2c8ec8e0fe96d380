//! schedule 命令
//!
//! 只计算时间表，不接触任何设备。

use super::{classified, config, print_json};
use crate::params::parse_seconds;
use anyhow::Result;
use clap::Args;
use memtest_sdk::PatternSpec;
use memtest_sdk::client::fit_schedule;
use memtest_sdk::driver::ErrorKind;
use serde_json::json;
use std::path::Path;

/// 激光时间表参数（`schedule` 与 `sync` 共用）
#[derive(Args, Debug, Clone)]
pub struct PatternArgs {
    /// 开关模式，如 `1011`
    #[arg(short, long)]
    pub pattern: String,

    /// 每个槽位的开段时长（`100ms`、`50us`；无单位为秒）
    #[arg(long = "on", value_parser = parse_seconds)]
    pub on_duration: f64,

    /// 每个槽位的关段时长
    #[arg(long = "off", value_parser = parse_seconds)]
    pub off_duration: f64,

    /// 模式重复次数
    #[arg(short, long, default_value_t = 1)]
    pub repeats: usize,

    /// 两次重复之间的间隔（0 表示等于模式时长）
    #[arg(long, value_parser = parse_seconds, default_value = "0")]
    pub gap: f64,

    /// 第一个槽位相对 t0 的延迟
    #[arg(long, value_parser = parse_seconds, default_value = "0")]
    pub start_delay: f64,
}

impl PatternArgs {
    pub fn spec(&self) -> PatternSpec {
        PatternSpec::new(self.pattern.clone(), self.on_duration, self.off_duration)
            .with_repeats(self.repeats)
            .with_gap(self.gap)
            .with_start_delay(self.start_delay)
    }
}

#[derive(Args, Debug)]
pub struct ScheduleCommand {
    #[command(flatten)]
    pub pattern: PatternArgs,

    /// 按测量时长截断
    #[arg(short, long, value_parser = parse_seconds)]
    pub duration: Option<f64>,
}

impl ScheduleCommand {
    pub fn execute(&self, config_path: &Path) -> Result<()> {
        let config = config::load(config_path)?;
        let schedule = self
            .pattern
            .spec()
            .build(config.scheduler.min_segment_s)
            .map_err(|e| classified(ErrorKind::Parameter, e.to_string()))?;
        let schedule = match self.duration {
            Some(duration) => fit_schedule(&schedule, duration)
                .map_err(|e| classified(e.kind(), e.to_string()))?,
            None => schedule,
        };

        print_json(&json!({
            "intervals": schedule.intervals(),
            "span_s": schedule.span_s(),
        }))
    }
}
