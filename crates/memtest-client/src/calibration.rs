//! 对齐诊断与校准估计
//!
//! 两者都只做观测：基线取前若干个采样的中位数，第一个相对基线变化超过阈值的
//! 采样视为"观测到的脉冲时刻"。找不到变化是合法结果（返回 `None`），不是错误。

use memtest_protocol::FiringSchedule;
use memtest_tools::statistics::{baseline, first_crossing};
use tracing::{debug, warn};

/// 基线默认采样数
pub const DEFAULT_BASELINE_SAMPLES: usize = 10;

/// 默认相对阈值
pub const DEFAULT_RELATIVE_THRESHOLD: f64 = 0.1;

/// 校准建议
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSuggestion {
    /// 观测到的第一次变化时刻（s）
    pub observed_time_s: f64,
    /// 期望的第一次脉冲时刻（s）
    pub desired_time_s: f64,
    /// `desired − observed`
    pub offset_s: f64,
}

/// 估计校准偏移
pub fn suggest_offset(
    timestamps: &[f64],
    values: &[f64],
    desired_first_pulse_s: f64,
    threshold: f64,
    baseline_samples: usize,
) -> Option<CalibrationSuggestion> {
    let n = timestamps.len().min(values.len());
    let base = baseline(&values[..n], baseline_samples)?;
    let index = first_crossing(&values[..n], base, threshold, 0)?;
    let observed_time_s = timestamps[index];
    Some(CalibrationSuggestion {
        observed_time_s,
        desired_time_s: desired_first_pulse_s,
        offset_s: desired_first_pulse_s - observed_time_s,
    })
}

/// 单个区间的对齐结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentEntry {
    /// 计划起点（s）
    pub interval_start_s: f64,
    /// 观测到的变化时刻（s），窗口内无变化时为 `None`
    pub observed_s: Option<f64>,
    /// `observed − start`
    pub timing_error_s: Option<f64>,
    /// 误差超过容差
    pub exceeds_tolerance: bool,
}

/// 对齐诊断报告
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlignmentReport {
    /// 基线电阻（Ω）；采样不足时为 `None`
    pub baseline: Option<f64>,
    /// 容差（s）
    pub tolerance_s: f64,
    pub entries: Vec<AlignmentEntry>,
}

impl AlignmentReport {
    /// 超出容差的区间数
    pub fn misaligned(&self) -> usize {
        self.entries.iter().filter(|e| e.exceeds_tolerance).count()
    }

    /// 观测误差的最大绝对值
    pub fn max_abs_error_s(&self) -> Option<f64> {
        self.entries
            .iter()
            .filter_map(|e| e.timing_error_s)
            .map(f64::abs)
            .reduce(f64::max)
    }
}

/// 对齐诊断参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentCheck {
    pub relative_threshold: f64,
    pub baseline_samples: usize,
    /// 容差 = 该倍数 × 采样间隔
    pub tolerance_factor: f64,
}

impl Default for AlignmentCheck {
    fn default() -> Self {
        Self {
            relative_threshold: DEFAULT_RELATIVE_THRESHOLD,
            baseline_samples: DEFAULT_BASELINE_SAMPLES,
            tolerance_factor: 2.0,
        }
    }
}

impl AlignmentCheck {
    /// 对每个已执行区间在其窗口内寻找第一个变化
    ///
    /// 窗口两端取到相邻区间的中点（首尾区间分别延伸到序列两端）。
    /// 只记录告警，从不修改结果。
    pub fn run(
        &self,
        timestamps: &[f64],
        resistances: &[f64],
        schedule: &FiringSchedule,
        sample_interval_s: f64,
    ) -> AlignmentReport {
        let tolerance_s = self.tolerance_factor * sample_interval_s;
        let n = timestamps.len().min(resistances.len());
        let (timestamps, resistances) = (&timestamps[..n], &resistances[..n]);
        let base = baseline(resistances, self.baseline_samples);

        let intervals = schedule.intervals();
        let mut entries = Vec::with_capacity(intervals.len());
        for (i, interval) in intervals.iter().enumerate() {
            let lo = match i.checked_sub(1).map(|p| intervals[p]) {
                Some(prev) => (prev.end_s + interval.start_s) / 2.0,
                None => f64::NEG_INFINITY,
            };
            let hi = match intervals.get(i + 1) {
                Some(next) => (interval.end_s + next.start_s) / 2.0,
                None => f64::INFINITY,
            };

            let observed_s = base.and_then(|base| {
                let from = timestamps.partition_point(|t| *t < lo);
                first_crossing(resistances, base, self.relative_threshold, from)
                    .map(|k| timestamps[k])
                    .filter(|t| *t < hi)
            });
            let timing_error_s = observed_s.map(|t| t - interval.start_s);
            let exceeds_tolerance = timing_error_s.is_some_and(|e| e.abs() > tolerance_s);

            match timing_error_s {
                Some(error) if exceeds_tolerance => warn!(
                    "Laser interval at {:.4} s observed at {:.4} s (error {:+.4} s exceeds {:.4} s)",
                    interval.start_s,
                    interval.start_s + error,
                    error,
                    tolerance_s
                ),
                Some(error) => debug!(
                    "Laser interval at {:.4} s aligned within {:+.4} s",
                    interval.start_s, error
                ),
                None => debug!("No response found for laser interval at {:.4} s", interval.start_s),
            }

            entries.push(AlignmentEntry {
                interval_start_s: interval.start_s,
                observed_s,
                timing_error_s,
                exceeds_tolerance,
            });
        }

        AlignmentReport {
            baseline: base,
            tolerance_s,
            entries,
        }
    }
}
