//! 硬件限制
//!
//! 每个后端在适配器构造时给出一份不可变的 `HardwareLimits`，路由层据此
//! 钳位安全参数、拒绝不安全参数。

/// 后端硬件限制（不可变）
///
/// 序列化后的键名与外部接口约定一致：
/// `min_pulse_width`, `max_pulse_width`, `min_voltage`, `max_voltage`,
/// `min_current_limit`, `max_current_limit`, `max_points`,
/// `min_sampling_rate`, `max_measurement_time`。
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HardwareLimits {
    /// 最小脉宽（s）
    pub min_pulse_width: f64,
    /// 最大脉宽（s）
    pub max_pulse_width: f64,
    /// 最小电压（V）
    pub min_voltage: f64,
    /// 最大电压（V）
    pub max_voltage: f64,
    /// 最小限流（A）
    pub min_current_limit: f64,
    /// 最大限流（A）
    pub max_current_limit: f64,
    /// 单次测量最大采样点数
    pub max_points: usize,
    /// 最低采样率（Sa/s）
    pub min_sampling_rate: f64,
    /// 单次测量最长时间（s）
    pub max_measurement_time: f64,
}

/// 单个参数相对限制的判定结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitCheck {
    /// 在范围内
    Within,
    /// 超出范围但可安全钳位到给定值
    Clamped(f64),
    /// 超出范围且不安全，必须拒绝
    Rejected,
}

impl HardwareLimits {
    /// 检查脉宽（s）
    ///
    /// 低于最小值时抬高到最小值（硬件最小段时长约束）；超过最大值则拒绝。
    pub fn check_pulse_width(&self, width_s: f64) -> LimitCheck {
        if !width_s.is_finite() || width_s < 0.0 || width_s > self.max_pulse_width {
            LimitCheck::Rejected
        } else if width_s < self.min_pulse_width {
            LimitCheck::Clamped(self.min_pulse_width)
        } else {
            LimitCheck::Within
        }
    }

    /// 检查电压（V）
    ///
    /// 电压越界可能损坏器件，一律拒绝而不钳位。
    pub fn check_voltage(&self, voltage: f64) -> LimitCheck {
        if voltage.is_finite() && voltage >= self.min_voltage && voltage <= self.max_voltage {
            LimitCheck::Within
        } else {
            LimitCheck::Rejected
        }
    }

    /// 检查限流（A）
    ///
    /// 限流值钳位到 `[min_current_limit, max_current_limit]`。
    pub fn check_current_limit(&self, limit_a: f64) -> LimitCheck {
        if !limit_a.is_finite() || limit_a <= 0.0 {
            LimitCheck::Rejected
        } else if limit_a > self.max_current_limit {
            LimitCheck::Clamped(self.max_current_limit)
        } else if limit_a < self.min_current_limit {
            LimitCheck::Clamped(self.min_current_limit)
        } else {
            LimitCheck::Within
        }
    }

    /// 检查测量时长（s）
    pub fn check_measurement_time(&self, duration_s: f64) -> LimitCheck {
        if duration_s.is_finite() && duration_s > 0.0 && duration_s <= self.max_measurement_time {
            LimitCheck::Within
        } else {
            LimitCheck::Rejected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> HardwareLimits {
        HardwareLimits {
            min_pulse_width: 1e-6,
            max_pulse_width: 1.0,
            min_voltage: -10.0,
            max_voltage: 10.0,
            min_current_limit: 1e-9,
            max_current_limit: 0.1,
            max_points: 1000,
            min_sampling_rate: 1.0,
            max_measurement_time: 60.0,
        }
    }

    #[test]
    fn test_pulse_width_checks() {
        let l = limits();
        assert_eq!(l.check_pulse_width(1e-3), LimitCheck::Within);
        assert_eq!(l.check_pulse_width(1e-9), LimitCheck::Clamped(1e-6));
        assert_eq!(l.check_pulse_width(2.0), LimitCheck::Rejected);
        assert_eq!(l.check_pulse_width(-1e-3), LimitCheck::Rejected);
        assert_eq!(l.check_pulse_width(f64::NAN), LimitCheck::Rejected);
    }

    #[test]
    fn test_voltage_is_never_clamped() {
        let l = limits();
        assert_eq!(l.check_voltage(-10.0), LimitCheck::Within);
        assert_eq!(l.check_voltage(10.5), LimitCheck::Rejected);
        assert_eq!(l.check_voltage(f64::INFINITY), LimitCheck::Rejected);
    }

    #[test]
    fn test_current_limit_clamped_both_sides() {
        let l = limits();
        assert_eq!(l.check_current_limit(1e-3), LimitCheck::Within);
        assert_eq!(l.check_current_limit(1.0), LimitCheck::Clamped(0.1));
        assert_eq!(l.check_current_limit(1e-12), LimitCheck::Clamped(1e-9));
        assert_eq!(l.check_current_limit(0.0), LimitCheck::Rejected);
    }

    #[test]
    fn test_measurement_time() {
        let l = limits();
        assert_eq!(l.check_measurement_time(10.0), LimitCheck::Within);
        assert_eq!(l.check_measurement_time(0.0), LimitCheck::Rejected);
        assert_eq!(l.check_measurement_time(61.0), LimitCheck::Rejected);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serialized_key_names() {
        let value = serde_json::to_value(limits()).unwrap();
        let object = value.as_object().unwrap();
        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            [
                "max_current_limit",
                "max_measurement_time",
                "max_points",
                "max_pulse_width",
                "max_voltage",
                "min_current_limit",
                "min_pulse_width",
                "min_sampling_rate",
                "min_voltage",
            ]
        );
        let back: HardwareLimits = serde_json::from_value(value).unwrap();
        assert_eq!(back, limits());
    }
}
