//! 时间单位
//!
//! 调用方以显示单位（ns/µs/ms/s）给出时间参数，路由层按后端约定换算。
//! 内部一律以秒为标准单位，部分旧版后端调用约定为微秒。

use crate::ProtocolError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 时间单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimeUnit {
    /// 纳秒
    #[cfg_attr(feature = "serde", serde(rename = "ns"))]
    Nanoseconds,
    /// 微秒
    #[cfg_attr(feature = "serde", serde(rename = "us"))]
    Microseconds,
    /// 毫秒
    #[cfg_attr(feature = "serde", serde(rename = "ms"))]
    Milliseconds,
    /// 秒（标准单位）
    #[cfg_attr(feature = "serde", serde(rename = "s"))]
    Seconds,
}

impl TimeUnit {
    /// 全部单位
    pub const ALL: [TimeUnit; 4] = [
        TimeUnit::Nanoseconds,
        TimeUnit::Microseconds,
        TimeUnit::Milliseconds,
        TimeUnit::Seconds,
    ];

    /// 1 个该单位等于多少秒
    #[inline]
    pub const fn seconds_per_unit(self) -> f64 {
        match self {
            TimeUnit::Nanoseconds => 1e-9,
            TimeUnit::Microseconds => 1e-6,
            TimeUnit::Milliseconds => 1e-3,
            TimeUnit::Seconds => 1.0,
        }
    }

    /// 1 秒等于多少个该单位
    ///
    /// 与 `seconds_per_unit` 分开给出整数倍率，避免 `1.0 / 1e-9` 引入的舍入误差。
    #[inline]
    const fn units_per_second(self) -> f64 {
        match self {
            TimeUnit::Nanoseconds => 1e9,
            TimeUnit::Microseconds => 1e6,
            TimeUnit::Milliseconds => 1e3,
            TimeUnit::Seconds => 1.0,
        }
    }

    /// 换算为秒
    #[inline]
    pub fn to_seconds(self, value: f64) -> f64 {
        match self {
            TimeUnit::Seconds => value,
            _ => value / self.units_per_second(),
        }
    }

    /// 从秒换算为该单位
    #[inline]
    pub fn from_seconds(self, seconds: f64) -> f64 {
        match self {
            TimeUnit::Seconds => seconds,
            _ => seconds * self.units_per_second(),
        }
    }

    /// 在两个单位之间换算
    ///
    /// 单位相同时原样返回，保证对已是目标单位的值不做二次换算。
    pub fn convert(value: f64, from: TimeUnit, to: TimeUnit) -> f64 {
        if from == to {
            return value;
        }
        to.from_seconds(from.to_seconds(value))
    }

    /// 单位符号
    pub const fn symbol(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "us",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for TimeUnit {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ns" => Ok(TimeUnit::Nanoseconds),
            "us" | "µs" | "μs" => Ok(TimeUnit::Microseconds),
            "ms" => Ok(TimeUnit::Milliseconds),
            "s" => Ok(TimeUnit::Seconds),
            other => Err(ProtocolError::UnknownUnit(other.to_string())),
        }
    }
}

/// 秒数转为 [`Duration`]
///
/// 负数、非有限值或超出 `Duration` 表示范围时返回参数错误。
pub fn duration_from_seconds(name: &str, seconds: f64) -> Result<Duration, ProtocolError> {
    Duration::try_from_secs_f64(seconds).map_err(|_| ProtocolError::InvalidParameter {
        name: name.to_string(),
        reason: format!("{seconds} s is not a representable duration"),
    })
}

/// 解析带单位的时间字符串，如 `"100us"`、`"1.5 ms"`、`"2"`（无单位视为秒）
pub fn parse_time(text: &str) -> Result<(f64, TimeUnit), ProtocolError> {
    let text = text.trim();
    // 单位是结尾的字母部分（"1e-3s" 中的 'e' 属于数字）
    let split = text
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphabetic())
        .last()
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| ProtocolError::InvalidParameter {
            name: text.to_string(),
            reason: "not a number".to_string(),
        })?;
    let unit = if unit.trim().is_empty() {
        TimeUnit::Seconds
    } else {
        unit.parse()?
    };
    Ok((value, unit))
}
