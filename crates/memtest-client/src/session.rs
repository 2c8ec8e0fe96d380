//! 同步会话的数据类型

use crate::calibration::{AlignmentReport, CalibrationSuggestion, suggest_offset};
use memtest_protocol::{
    FireInterval, FiringSchedule, Operation, ParamBag, PatternSpec, TestRequest, TestResult,
    TimeUnit,
};
use std::fmt;
use std::time::Instant;

/// 同步协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncProtocol {
    /// 适配器支持两阶段启动时用 Protocol A，否则 Protocol B
    #[default]
    Auto,
    /// Protocol A：就绪信号之后再设定 t0
    TwoPhase,
    /// Protocol B：固定等待 `init_time_s` 后估计 t0
    Fallback,
}

impl fmt::Display for SyncProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncProtocol::Auto => "auto",
            SyncProtocol::TwoPhase => "two-phase",
            SyncProtocol::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

/// 同步器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Idle,
    /// 测量线程已启动，等待就绪
    Armed,
    /// t0 已设定，正在执行时间表
    Running,
    /// 时间表执行完毕，等待测量线程结束
    Collecting,
    Done,
    Failed,
}

/// 同步测量请求
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    /// 读取偏置（V）
    pub read_voltage: f64,
    /// 测量时长（s，自 t0 起）
    pub duration_s: f64,
    /// 采样间隔（s）
    pub sample_interval_s: f64,
    /// 限流（A）
    pub clim: f64,
    /// 激光时间表
    pub pattern: PatternSpec,
}

impl SyncRequest {
    pub fn new(pattern: PatternSpec, duration_s: f64, sample_interval_s: f64) -> Self {
        Self {
            read_voltage: 0.2,
            duration_s,
            sample_interval_s,
            clim: 1e-3,
            pattern,
        }
    }

    pub fn with_read_voltage(mut self, read_voltage: f64) -> Self {
        self.read_voltage = read_voltage;
        self
    }

    pub fn with_clim(mut self, clim: f64) -> Self {
        self.clim = clim;
        self
    }

    /// 对应的定时读取请求（交给路由层规范化）
    pub fn timed_read_request(&self) -> TestRequest {
        TestRequest::new(
            Operation::TimedRead,
            ParamBag::new()
                .with("read_voltage", self.read_voltage)
                .with_time("duration", self.duration_s, TimeUnit::Seconds)
                .with_time("sample_interval", self.sample_interval_s, TimeUnit::Seconds)
                .with("clim", self.clim),
        )
    }
}

/// 一次同步会话的结果
#[derive(Debug, Clone)]
pub struct SyncSession {
    /// 时间零点（单调时钟）
    ///
    /// Protocol B 下为估计值：设备开始采样后再等 `init_time` 得到。
    pub t0: Instant,
    /// 测量时长（s）
    pub duration_s: f64,
    /// 采样间隔（s）
    pub sample_interval_s: f64,
    /// 实际使用的协议（`TwoPhase` 或 `Fallback`）
    pub protocol: SyncProtocol,
    /// 测量结果
    ///
    /// Protocol A 下时间戳相对 t0；Protocol B 下相对设备自己的采样起点，
    /// 比 t0 早约一个 `init_time`，两者的差由 `alignment` 诊断。
    pub result: TestResult,
    /// 实际执行的计划时间表
    ///
    /// 先按测量时长截断；运行中若激光迟滞导致剩余区间放不进窗口，
    /// 只保留已发射的前缀，与 `fired` 一一对应。
    pub schedule: FiringSchedule,
    /// 实测的激光开关时刻（相对 t0）
    pub fired: Vec<FireInterval>,
    /// 对齐诊断（仅 Protocol B）
    pub alignment: Option<AlignmentReport>,
}

impl SyncSession {
    /// 基于本次结果的电阻序列估计校准偏移
    ///
    /// `desired_first_pulse_s` 缺省为计划中第一个区间的起点。
    pub fn suggest_offset(
        &self,
        desired_first_pulse_s: Option<f64>,
        threshold: f64,
        baseline_samples: usize,
    ) -> Option<CalibrationSuggestion> {
        let desired = desired_first_pulse_s.or_else(|| self.schedule.starts().first().copied())?;
        suggest_offset(
            &self.result.timestamps,
            &self.result.resistances,
            desired,
            threshold,
            baseline_samples,
        )
    }
}
