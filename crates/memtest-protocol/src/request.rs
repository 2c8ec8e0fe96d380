//! 测试请求
//!
//! `TestRequest` = 操作名（能力注册表的键）+ 参数包。参数包中的时间参数
//! 带单位标记（`ParamValue::Time`），其余参数不带单位。

use crate::ProtocolError;
use crate::units::TimeUnit;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 命名测试操作
///
/// 字符串键为 snake_case，与能力注册表、CLI 子命令一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Operation {
    /// 脉冲-读取循环
    PulseReadRepeat,
    /// 多脉冲后读取
    MultiPulseThenRead,
    /// 增强/抑制循环（SET 阶梯 + RESET 阶梯）
    PotentiationDepressionCycle,
    /// 脉宽扫描，每个脉宽后读取
    WidthSweepWithReads,
    /// 电压幅值扫描
    VoltageAmplitudeSweep,
    /// 耐久性测试（SET/RESET 交替）
    EnduranceTest,
    /// 保持特性测试（单脉冲后定时读取）
    RetentionTest,
    /// 按二进制模式输出的脉冲串
    PulseTrain,
    /// 连续定时读取（同步器使用的测量通道）
    TimedRead,
}

impl Operation {
    /// 全部操作
    pub const ALL: [Operation; 9] = [
        Operation::PulseReadRepeat,
        Operation::MultiPulseThenRead,
        Operation::PotentiationDepressionCycle,
        Operation::WidthSweepWithReads,
        Operation::VoltageAmplitudeSweep,
        Operation::EnduranceTest,
        Operation::RetentionTest,
        Operation::PulseTrain,
        Operation::TimedRead,
    ];

    /// 注册表键
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::PulseReadRepeat => "pulse_read_repeat",
            Operation::MultiPulseThenRead => "multi_pulse_then_read",
            Operation::PotentiationDepressionCycle => "potentiation_depression_cycle",
            Operation::WidthSweepWithReads => "width_sweep_with_reads",
            Operation::VoltageAmplitudeSweep => "voltage_amplitude_sweep",
            Operation::EnduranceTest => "endurance_test",
            Operation::RetentionTest => "retention_test",
            Operation::PulseTrain => "pulse_train",
            Operation::TimedRead => "timed_read",
        }
    }

    /// 该操作中带时间单位的参数名
    pub const fn time_params(self) -> &'static [&'static str] {
        match self {
            Operation::PulseReadRepeat => &["pulse_width", "delay_between"],
            Operation::MultiPulseThenRead => &["pulse_width", "delay_between_pulses"],
            Operation::PotentiationDepressionCycle => &["pulse_width"],
            Operation::WidthSweepWithReads => &[],
            Operation::VoltageAmplitudeSweep => &["pulse_width"],
            Operation::EnduranceTest => &["pulse_width"],
            Operation::RetentionTest => &["pulse_width", "read_interval"],
            Operation::PulseTrain => &["on_duration", "off_duration", "inter_repeat_gap"],
            Operation::TimedRead => &["duration", "sample_interval"],
        }
    }

    /// 参数是否带时间单位
    pub fn is_time_param(self, name: &str) -> bool {
        self.time_params().contains(&name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s.trim())
            .ok_or_else(|| ProtocolError::UnknownOperation(s.to_string()))
    }
}

/// 参数值
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum ParamValue {
    /// 带单位的时间值
    Time {
        /// 数值
        value: f64,
        /// 单位
        unit: TimeUnit,
    },
    /// 布尔
    Bool(bool),
    /// 整数
    Int(i64),
    /// 浮点
    Float(f64),
    /// 字符串
    Str(String),
}

impl ParamValue {
    /// 构造时间值
    pub fn time(value: f64, unit: TimeUnit) -> Self {
        ParamValue::Time { value, unit }
    }

    /// 是否带单位
    pub fn is_unit_bearing(&self) -> bool {
        matches!(self, ParamValue::Time { .. })
    }

    /// 数值视图（Float/Int/Time 的原始数值）
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Time { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// 换算为秒
    ///
    /// 无单位的数值按秒解释。
    pub fn as_seconds(&self) -> Option<f64> {
        match self {
            ParamValue::Time { value, unit } => Some(unit.to_seconds(*value)),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Time { value, unit } => write!(f, "{value}{unit}"),
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Str(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

/// 参数包（名称 → 值）
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ParamBag {
    values: BTreeMap<String, ParamValue>,
}

impl ParamBag {
    /// 空参数包
    pub fn new() -> Self {
        Self::default()
    }

    /// 链式插入
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// 链式插入时间参数
    pub fn with_time(self, name: impl Into<String>, value: f64, unit: TimeUnit) -> Self {
        self.with(name, ParamValue::time(value, unit))
    }

    /// 插入（覆盖同名参数）
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(name.into(), value.into());
    }

    /// 读取原始值
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// 是否包含参数
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// 遍历参数
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// 参数个数
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 读取浮点参数（接受 Float/Int）
    pub fn float(&self, name: &str) -> Result<f64, ProtocolError> {
        match self.values.get(name) {
            None => Err(ProtocolError::MissingParameter(name.to_string())),
            Some(ParamValue::Float(v)) => Ok(*v),
            Some(ParamValue::Int(v)) => Ok(*v as f64),
            Some(_) => Err(ProtocolError::TypeMismatch {
                name: name.to_string(),
                expected: "float",
            }),
        }
    }

    /// 读取浮点参数，缺省时使用默认值
    pub fn float_or(&self, name: &str, default: f64) -> Result<f64, ProtocolError> {
        if self.contains(name) {
            self.float(name)
        } else {
            Ok(default)
        }
    }

    /// 读取非负计数参数（接受 Int 或整数值的 Float）
    pub fn count(&self, name: &str) -> Result<usize, ProtocolError> {
        let invalid = |reason: &str| ProtocolError::InvalidParameter {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        match self.values.get(name) {
            None => Err(ProtocolError::MissingParameter(name.to_string())),
            Some(ParamValue::Int(v)) => usize::try_from(*v).map_err(|_| invalid("must be >= 0")),
            Some(ParamValue::Float(v)) if v.fract() == 0.0 && *v >= 0.0 => Ok(*v as usize),
            Some(ParamValue::Float(_)) => Err(invalid("must be a non-negative integer")),
            Some(_) => Err(ProtocolError::TypeMismatch {
                name: name.to_string(),
                expected: "integer",
            }),
        }
    }

    /// 读取计数参数，缺省时使用默认值
    pub fn count_or(&self, name: &str, default: usize) -> Result<usize, ProtocolError> {
        if self.contains(name) {
            self.count(name)
        } else {
            Ok(default)
        }
    }

    /// 读取字符串参数
    pub fn string(&self, name: &str) -> Result<&str, ProtocolError> {
        match self.values.get(name) {
            None => Err(ProtocolError::MissingParameter(name.to_string())),
            Some(ParamValue::Str(v)) => Ok(v.as_str()),
            Some(_) => Err(ProtocolError::TypeMismatch {
                name: name.to_string(),
                expected: "string",
            }),
        }
    }

    /// 读取布尔参数，缺省时使用默认值
    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool, ProtocolError> {
        match self.values.get(name) {
            None => Ok(default),
            Some(ParamValue::Bool(v)) => Ok(*v),
            Some(_) => Err(ProtocolError::TypeMismatch {
                name: name.to_string(),
                expected: "bool",
            }),
        }
    }

    /// 按后端约定单位读取时间参数
    ///
    /// 路由层已把时间参数换算为后端约定单位；此处只接受单位完全一致的值，
    /// 不做任何隐式换算。无单位数值仅在约定单位为秒时接受。
    pub fn time_in(&self, name: &str, expected: TimeUnit) -> Result<f64, ProtocolError> {
        match self.values.get(name) {
            None => Err(ProtocolError::MissingParameter(name.to_string())),
            Some(ParamValue::Time { value, unit }) if *unit == expected => Ok(*value),
            Some(ParamValue::Time { unit, .. }) => Err(ProtocolError::UnitMismatch {
                name: name.to_string(),
                expected,
                found: *unit,
            }),
            Some(ParamValue::Float(v)) if expected == TimeUnit::Seconds => Ok(*v),
            Some(ParamValue::Int(v)) if expected == TimeUnit::Seconds => Ok(*v as f64),
            Some(ParamValue::Float(_)) | Some(ParamValue::Int(_)) => {
                Err(ProtocolError::UnitMismatch {
                    name: name.to_string(),
                    expected,
                    found: TimeUnit::Seconds,
                })
            },
            Some(_) => Err(ProtocolError::TypeMismatch {
                name: name.to_string(),
                expected: "time",
            }),
        }
    }

    /// 按约定单位读取时间参数，缺省时使用默认值（默认值以约定单位给出）
    pub fn time_in_or(
        &self,
        name: &str,
        expected: TimeUnit,
        default: f64,
    ) -> Result<f64, ProtocolError> {
        if self.contains(name) {
            self.time_in(name, expected)
        } else {
            Ok(default)
        }
    }
}

impl fmt::Display for ParamBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for ParamBag {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut bag = ParamBag::new();
        for (k, v) in iter {
            bag.insert(k, v);
        }
        bag
    }
}

/// 测试请求
///
/// 每次调用创建一次，分派后不可变（路由层在规范化副本上工作）。
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TestRequest {
    /// 操作名
    pub operation: Operation,
    /// 参数包
    pub params: ParamBag,
}

impl TestRequest {
    /// 创建请求
    pub fn new(operation: Operation, params: ParamBag) -> Self {
        Self { operation, params }
    }
}
