//! 标准测试结果
//!
//! 每个 `TestRequest` 产生一个 `TestResult`，按值返回。必需序列
//! `timestamps`/`voltages`/`currents`/`resistances` 等长；可选的操作专属序列
//! （`phase`、`cycle_number`、`operation`、`pulse_widths` 等）存放在 `extras`。

use crate::ProtocolError;
use std::collections::BTreeMap;

/// 电流接近零时电阻的默认哨兵值（Ω）
pub const DEFAULT_RESISTANCE_SENTINEL: f64 = 1e12;

/// 判定"电流为零"的默认阈值（A）
pub const DEFAULT_ZERO_CURRENT_EPSILON: f64 = 1e-15;

/// 可选序列
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Series {
    /// 数值序列
    Float(Vec<f64>),
    /// 文本序列（如 `phase`）
    Text(Vec<String>),
}

impl Series {
    /// 序列长度
    pub fn len(&self) -> usize {
        match self {
            Series::Float(v) => v.len(),
            Series::Text(v) => v.len(),
        }
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 数值视图
    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            Series::Float(v) => Some(v),
            Series::Text(_) => None,
        }
    }

    /// 文本视图
    pub fn as_texts(&self) -> Option<&[String]> {
        match self {
            Series::Text(v) => Some(v),
            Series::Float(_) => None,
        }
    }
}

/// 由 `V / I` 计算电阻
///
/// - `|I| < epsilon`：返回带符号的哨兵值（`V == 0` 时取正哨兵），不报错
/// - 任一输入为 NaN：返回 NaN
pub fn resistance(voltage: f64, current: f64, epsilon: f64, sentinel: f64) -> f64 {
    if voltage.is_nan() || current.is_nan() {
        return f64::NAN;
    }
    if current.abs() < epsilon {
        return if voltage < 0.0 { -sentinel } else { sentinel };
    }
    voltage / current
}

/// 标准测试结果
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TestResult {
    /// 相对测量起点的时间戳（s）
    pub timestamps: Vec<f64>,
    /// 电压（V）
    pub voltages: Vec<f64>,
    /// 电流（A）
    pub currents: Vec<f64>,
    /// 电阻（Ω）
    pub resistances: Vec<f64>,
    /// 操作专属序列
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub extras: BTreeMap<String, Series>,
}

impl TestResult {
    /// 空结果
    pub fn new() -> Self {
        Self::default()
    }

    /// 预分配容量
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            timestamps: Vec::with_capacity(capacity),
            voltages: Vec::with_capacity(capacity),
            currents: Vec::with_capacity(capacity),
            resistances: Vec::with_capacity(capacity),
            extras: BTreeMap::new(),
        }
    }

    /// 追加一个采样点（电阻按默认规则计算）
    pub fn push_sample(&mut self, timestamp: f64, voltage: f64, current: f64) {
        self.timestamps.push(timestamp);
        self.voltages.push(voltage);
        self.currents.push(current);
        self.resistances.push(resistance(
            voltage,
            current,
            DEFAULT_ZERO_CURRENT_EPSILON,
            DEFAULT_RESISTANCE_SENTINEL,
        ));
    }

    /// 向数值型可选序列追加一个值
    ///
    /// 如果同名序列已是文本型，该值以文本形式追加。
    pub fn push_float(&mut self, key: &str, value: f64) {
        match self
            .extras
            .entry(key.to_string())
            .or_insert_with(|| Series::Float(Vec::new()))
        {
            Series::Float(v) => v.push(value),
            Series::Text(v) => v.push(value.to_string()),
        }
    }

    /// 向文本型可选序列追加一个值
    pub fn push_text(&mut self, key: &str, value: impl Into<String>) {
        match self
            .extras
            .entry(key.to_string())
            .or_insert_with(|| Series::Text(Vec::new()))
        {
            Series::Text(v) => v.push(value.into()),
            Series::Float(v) => {
                tracing::warn!("Series '{}' is numeric, dropping text value", key);
                v.push(f64::NAN)
            },
        }
    }

    /// 读取可选序列
    pub fn extra(&self, key: &str) -> Option<&Series> {
        self.extras.get(key)
    }

    /// 采样点数
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// 校验必需序列等长
    pub fn check_lengths(&self) -> Result<(), ProtocolError> {
        let (t, v, i) = (
            self.timestamps.len(),
            self.voltages.len(),
            self.currents.len(),
        );
        if t == v && v == i {
            Ok(())
        } else {
            Err(ProtocolError::LengthMismatch {
                timestamps: t,
                voltages: v,
                currents: i,
            })
        }
    }

    /// 按 `V / I` 重新计算电阻序列
    pub fn recompute_resistances(&mut self, epsilon: f64, sentinel: f64) {
        self.resistances = self
            .voltages
            .iter()
            .zip(&self.currents)
            .map(|(&v, &i)| resistance(v, i, epsilon, sentinel))
            .collect();
    }

    /// 展开为扁平映射：必需序列与可选序列同级
    pub fn into_map(self) -> BTreeMap<String, Series> {
        let mut map = self.extras;
        map.insert("timestamps".to_string(), Series::Float(self.timestamps));
        map.insert("voltages".to_string(), Series::Float(self.voltages));
        map.insert("currents".to_string(), Series::Float(self.currents));
        map.insert("resistances".to_string(), Series::Float(self.resistances));
        map
    }

    /// 第一个时间戳不早于 `t` 的采样点下标
    pub fn index_at_or_after(&self, t: f64) -> Option<usize> {
        self.timestamps.iter().position(|&ts| ts >= t)
    }
}
