//! # 信号统计
//!
//! 同步对齐诊断与校准估计使用的纯函数（可选模块）
//!
//! 需要启用 `statistics` feature：
//! ```toml
//! memtest-tools = { workspace = true, features = ["statistics"] }
//! ```

use statrs::statistics::{Data, Median, Statistics};

/// 有限值的中位数（NaN/∞ 被忽略；无有限值时返回 `None`）
pub fn median(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    Some(Data::new(finite).median())
}

/// 基线：前 `samples` 个采样的中位数
pub fn baseline(values: &[f64], samples: usize) -> Option<f64> {
    let n = samples.min(values.len());
    median(&values[..n])
}

/// 相对基线的变化量 `|v − baseline| / |baseline|`
///
/// 基线为 0 时返回 `None`。
pub fn relative_change(value: f64, baseline: f64) -> Option<f64> {
    if baseline == 0.0 || !baseline.is_finite() {
        return None;
    }
    Some((value - baseline).abs() / baseline.abs())
}

/// 第一个相对变化超过 `threshold` 的采样下标（从 `from` 开始搜索）
pub fn first_crossing(values: &[f64], baseline: f64, threshold: f64, from: usize) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, v)| relative_change(**v, baseline).is_some_and(|c| c > threshold))
        .map(|(i, _)| i)
}

/// 序列摘要
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesSummary {
    /// 有限值个数
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

impl SeriesSummary {
    /// 计算摘要；无有限值时返回 `None`
    pub fn calculate(values: &[f64]) -> Option<Self> {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return None;
        }
        let std_dev = if finite.len() > 1 {
            Statistics::std_dev(finite.iter())
        } else {
            0.0
        };
        Some(Self {
            count: finite.len(),
            mean: Statistics::mean(finite.iter()),
            std_dev,
            min: Statistics::min(finite.iter()),
            max: Statistics::max(finite.iter()),
            median: Data::new(finite).median(),
        })
    }
}
