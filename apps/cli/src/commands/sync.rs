//! sync 命令
//!
//! 激光时间表与定时读取同步运行。Mock 激光与 Mock 源表共享光照标志，
//! 因此输出的电阻序列能看到每个激光区间。Ctrl+C 取消会话。

use super::schedule::PatternArgs;
use super::{classified, config, print_json};
use crate::params::parse_seconds;
use anyhow::{Result, bail};
use clap::Args;
use memtest_sdk::instrument::mock::{MockLaser, MockSourceMeter};
use memtest_sdk::instrument::{ConnectOptions, Tsp2450Adapter};
use memtest_sdk::{
    CancelToken, InstrumentAdapter, SyncProtocol, SyncRequest, SynchronizerBuilder,
};
use serde_json::json;
use std::path::Path;

#[derive(Args, Debug)]
pub struct SyncCommand {
    #[command(flatten)]
    pub pattern: PatternArgs,

    /// 测量时长（自 t0 起）
    #[arg(short, long, value_parser = parse_seconds)]
    pub duration: f64,

    /// 采样间隔
    #[arg(short, long, value_parser = parse_seconds, default_value = "10ms")]
    pub interval: f64,

    /// 读取偏置（V）
    #[arg(long, default_value_t = 0.2)]
    pub read_voltage: f64,

    /// 限流（A）
    #[arg(long, default_value_t = 1e-3)]
    pub clim: f64,

    /// 强制 Protocol B（固定等待后估计 t0）
    #[arg(long)]
    pub fallback: bool,

    /// Protocol B 初始化等待（覆盖配置）
    #[arg(long, value_parser = parse_seconds)]
    pub init_time: Option<f64>,

    /// 使用 Mock 硬件
    #[arg(long)]
    pub mock: bool,
}

impl SyncCommand {
    pub fn execute(&self, config_path: &Path) -> Result<()> {
        if !self.mock {
            bail!("No hardware driver is linked into this build; pass --mock");
        }
        let config = config::load(config_path)?;

        let cancel = CancelToken::new();
        let handler_token = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nReceived interrupt signal. Cancelling session...");
            handler_token.cancel();
        })?;

        let mut laser = MockLaser::new();
        let mut adapter = Tsp2450Adapter::new(
            MockSourceMeter::new().with_illumination(laser.illumination()),
        );
        adapter.connect("USB0::MOCK::INSTR", &ConnectOptions::default())?;

        let protocol = if self.fallback {
            SyncProtocol::Fallback
        } else {
            SyncProtocol::Auto
        };
        let mut builder = SynchronizerBuilder::new()
            .sync_config(&config.sync)
            .scheduler_config(&config.scheduler)
            .router_config(&config.router)
            .protocol(protocol);
        if let Some(init) = self.init_time {
            builder = builder.init_time(init);
        }
        let sync = builder.build();

        let request = SyncRequest::new(self.pattern.spec(), self.duration, self.interval)
            .with_read_voltage(self.read_voltage)
            .with_clim(self.clim);
        let outcome = sync.run_laser_and_read(&mut adapter, &mut laser, &request, &cancel);
        if let Err(e) = adapter.disconnect() {
            tracing::warn!("Disconnect failed: {}", e);
        }
        let session = outcome.map_err(|e| classified(e.kind(), e.to_string()))?;

        let suggestion = session.suggest_offset(
            None,
            config.sync.relative_threshold,
            config.sync.baseline_samples,
        );
        let alignment = session.alignment.as_ref().map(|report| {
            json!({
                "baseline_ohm": report.baseline,
                "tolerance_s": report.tolerance_s,
                "misaligned": report.misaligned(),
                "max_abs_error_s": report.max_abs_error_s(),
            })
        });

        print_json(&json!({
            "protocol": session.protocol.to_string(),
            "duration_s": session.duration_s,
            "sample_interval_s": session.sample_interval_s,
            "schedule": session.schedule.intervals(),
            "fired": session.fired,
            "alignment": alignment,
            "calibration": suggestion.map(|s| json!({
                "observed_time_s": s.observed_time_s,
                "desired_time_s": s.desired_time_s,
                "offset_s": s.offset_s,
            })),
            "samples": session.result.len(),
            "result": session.result.into_map(),
        }))
    }
}
