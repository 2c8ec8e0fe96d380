//! 脉冲模式调度器
//!
//! 把紧凑的模式描述（二进制开关串、重复次数、周期、间隔）展开为相对 t0 的
//! 绝对触发区间列表。电脉冲串与激光触发串使用同一算法，区别只在于由哪个
//! 物理通道消费这些区间。
//!
//! # 算法
//!
//! ```text
//! period           = on + off
//! pattern_duration = len(pattern) × period
//! gap              = inter_repeat_gap，为 0 时取一个完整模式时长
//! repeat_start(r)  = start_delay + r × (pattern_duration + gap)
//! 对 pattern[i] == '1'： (repeat_start + i × period, … + on)
//! ```
//!
//! # 示例
//!
//! ```rust
//! use memtest_protocol::PatternSpec;
//!
//! let spec = PatternSpec::new("1011", 0.1, 0.1).with_repeats(2);
//! let schedule = spec.build(0.0).unwrap();
//! assert_eq!(schedule.len(), 6);
//! ```

use crate::ProtocolError;
use tracing::warn;

/// 默认最小段时长（s）
///
/// 与 PMU 波形段的硬件最小时长一致。
pub const DEFAULT_MIN_SEGMENT_S: f64 = 20e-9;

/// 模式描述（调用方提供）
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PatternSpec {
    /// `{0,1}` 上的二进制串，长度即槽位数
    pub pattern: String,
    /// 导通时长（s）
    pub on_duration_s: f64,
    /// 关断时长（s）
    pub off_duration_s: f64,
    /// 重复次数（≥ 1）
    pub repeat_count: usize,
    /// 两次重复之间的间隔（s），0 表示一个完整模式时长
    pub inter_repeat_gap_s: f64,
    /// 槽位 0 相对 t0 的偏移（s）
    pub start_delay_s: f64,
}

impl PatternSpec {
    /// 创建单次重复、无延迟的模式描述
    pub fn new(pattern: impl Into<String>, on_duration_s: f64, off_duration_s: f64) -> Self {
        Self {
            pattern: pattern.into(),
            on_duration_s,
            off_duration_s,
            repeat_count: 1,
            inter_repeat_gap_s: 0.0,
            start_delay_s: 0.0,
        }
    }

    /// 设置重复次数
    pub fn with_repeats(mut self, repeat_count: usize) -> Self {
        self.repeat_count = repeat_count;
        self
    }

    /// 设置重复间隔
    pub fn with_gap(mut self, inter_repeat_gap_s: f64) -> Self {
        self.inter_repeat_gap_s = inter_repeat_gap_s;
        self
    }

    /// 设置起始延迟
    pub fn with_start_delay(mut self, start_delay_s: f64) -> Self {
        self.start_delay_s = start_delay_s;
        self
    }

    /// 模式中 '1' 的个数
    pub fn active_slots(&self) -> usize {
        self.pattern.chars().filter(|&c| c == '1').count()
    }

    /// 展开为触发区间
    ///
    /// `min_segment_s`：硬件最小段时长。`on`/`off` 低于该值时抬高到该值并记录警告。
    ///
    /// # 错误
    ///
    /// - 模式为空、全零或含非 0/1 字符
    /// - `repeat_count == 0`
    /// - 时长为负或非有限值
    pub fn build(&self, min_segment_s: f64) -> Result<FiringSchedule, ProtocolError> {
        self.validate()?;

        let on = clamp_segment("on_duration", self.on_duration_s, min_segment_s);
        let off = clamp_segment("off_duration", self.off_duration_s, min_segment_s);

        let period = on + off;
        let slots = self.pattern.chars().count();
        let pattern_duration = slots as f64 * period;
        let gap = if self.inter_repeat_gap_s == 0.0 {
            pattern_duration
        } else {
            self.inter_repeat_gap_s
        };

        let mut intervals = Vec::with_capacity(self.repeat_count * self.active_slots());
        for r in 0..self.repeat_count {
            let repeat_start = self.start_delay_s + r as f64 * (pattern_duration + gap);
            for (i, c) in self.pattern.chars().enumerate() {
                if c == '1' {
                    let start = repeat_start + i as f64 * period;
                    intervals.push(FireInterval {
                        start_s: start,
                        end_s: start + on,
                    });
                }
            }
        }

        Ok(FiringSchedule { intervals })
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        let invalid_pattern = |reason: &str| ProtocolError::InvalidPattern {
            pattern: self.pattern.clone(),
            reason: reason.to_string(),
        };

        if self.pattern.is_empty() {
            return Err(invalid_pattern("pattern is empty"));
        }
        if let Some(c) = self.pattern.chars().find(|c| *c != '0' && *c != '1') {
            return Err(invalid_pattern(&format!("unexpected character '{c}'")));
        }
        if self.active_slots() == 0 {
            return Err(invalid_pattern("pattern has no '1' slots"));
        }
        if self.repeat_count == 0 {
            return Err(ProtocolError::InvalidParameter {
                name: "repeat_count".to_string(),
                reason: "must be >= 1".to_string(),
            });
        }

        for (name, value) in [
            ("on_duration", self.on_duration_s),
            ("off_duration", self.off_duration_s),
            ("inter_repeat_gap", self.inter_repeat_gap_s),
            ("start_delay", self.start_delay_s),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ProtocolError::InvalidParameter {
                    name: name.to_string(),
                    reason: format!("must be a finite value >= 0 (got {value})"),
                });
            }
        }
        Ok(())
    }
}

fn clamp_segment(name: &str, value: f64, min_segment_s: f64) -> f64 {
    if value < min_segment_s {
        warn!(
            "{} {:e}s is below the minimum segment time {:e}s, clamping",
            name, value, min_segment_s
        );
        min_segment_s
    } else {
        value
    }
}

/// 单个触发区间（相对 t0，单位 s）
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FireInterval {
    /// 开始偏移
    pub start_s: f64,
    /// 结束偏移（≥ start_s）
    pub end_s: f64,
}

impl FireInterval {
    /// 区间长度
    pub fn duration_s(&self) -> f64 {
        self.end_s - self.start_s
    }
}

/// 触发计划
///
/// 有序、开始时间单调不减，创建后不可变；截断会产生新的计划。
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FiringSchedule {
    intervals: Vec<FireInterval>,
}

impl FiringSchedule {
    /// 空计划
    pub fn empty() -> Self {
        Self::default()
    }

    /// 区间切片
    pub fn intervals(&self) -> &[FireInterval] {
        &self.intervals
    }

    /// 区间个数
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// 遍历区间
    pub fn iter(&self) -> std::slice::Iter<'_, FireInterval> {
        self.intervals.iter()
    }

    /// 最后一个区间的结束偏移
    pub fn span_s(&self) -> f64 {
        self.intervals.last().map(|i| i.end_s).unwrap_or(0.0)
    }

    /// 所有区间的开始偏移
    pub fn starts(&self) -> Vec<f64> {
        self.intervals.iter().map(|i| i.start_s).collect()
    }

    /// 截断到给定时长内
    ///
    /// 保留结束时间不超过 `duration_s` 的前缀；一旦某个区间超出，后续区间全部丢弃。
    pub fn truncated(&self, duration_s: f64) -> FiringSchedule {
        let intervals = self
            .intervals
            .iter()
            .take_while(|i| i.end_s <= duration_s)
            .copied()
            .collect();
        FiringSchedule { intervals }
    }

    /// 由已执行的区间前缀构造计划
    pub fn prefix(&self, count: usize) -> FiringSchedule {
        FiringSchedule {
            intervals: self.intervals[..count.min(self.intervals.len())].to_vec(),
        }
    }
}

impl<'a> IntoIterator for &'a FiringSchedule {
    type Item = &'a FireInterval;
    type IntoIter = std::slice::Iter<'a, FireInterval>;

    fn into_iter(self) -> Self::IntoIter {
        self.intervals.iter()
    }
}
