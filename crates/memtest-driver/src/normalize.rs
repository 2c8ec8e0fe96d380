//! 参数与结果规范化
//!
//! 参数：时间值换算为目标后端的约定单位，再对照 `HardwareLimits` 检查；
//! 可安全修正的值钳位并告警，不安全的值拒绝。换算之前就已是约定单位的值
//! 原样通过（幂等）。
//!
//! 结果：必需序列等长校验，电阻按 `V / I` 重算。

use crate::builder::RouterSettings;
use crate::error::TestError;
use memtest_instrument::Backend;
use memtest_protocol::{
    HardwareLimits, LimitCheck, Operation, ParamBag, ParamValue, ProtocolError, TestRequest,
    TestResult, TimeUnit,
};
use tracing::warn;

/// 按脉宽规则检查的时间参数
const PULSE_WIDTH_PARAMS: [&str; 2] = ["pulse_width", "on_duration"];

fn rejected(name: &str, reason: impl Into<String>) -> TestError {
    TestError::Parameter(ProtocolError::InvalidParameter {
        name: name.to_string(),
        reason: reason.into(),
    })
}

/// 规范化请求参数，返回新的参数包
pub fn normalize_params(
    request: &TestRequest,
    backend: Backend,
    limits: &HardwareLimits,
) -> Result<ParamBag, TestError> {
    let operation = request.operation;
    let mut normalized = ParamBag::new();

    for (name, value) in request.params.iter() {
        let value = match value {
            ParamValue::Time { value, unit } => {
                normalize_time(operation, name, *value, *unit, backend, limits)?
            },
            // 无单位的时间参数按秒解释
            ParamValue::Float(_) | ParamValue::Int(_) if operation.is_time_param(name) => {
                let seconds = value.as_seconds().unwrap_or(f64::NAN);
                normalize_time(operation, name, seconds, TimeUnit::Seconds, backend, limits)?
            },
            ParamValue::Float(_) | ParamValue::Int(_) => {
                let number = value.as_f64().unwrap_or(f64::NAN);
                match check_electrical(name, number, limits)? {
                    Some(clamped) => ParamValue::Float(clamped),
                    None => value.clone(),
                }
            },
            other => other.clone(),
        };
        normalized.insert(name, value);
    }
    Ok(normalized)
}

fn normalize_time(
    operation: Operation,
    name: &str,
    value: f64,
    unit: TimeUnit,
    backend: Backend,
    limits: &HardwareLimits,
) -> Result<ParamValue, TestError> {
    if !value.is_finite() || value < 0.0 {
        return Err(rejected(name, format!("{value}{unit} is not a valid duration")));
    }
    let canonical = backend.canonical_unit(name);
    let seconds = unit.to_seconds(value);

    let check = if PULSE_WIDTH_PARAMS.contains(&name) {
        limits.check_pulse_width(seconds)
    } else if name == "duration" && operation == Operation::TimedRead {
        limits.check_measurement_time(seconds)
    } else {
        LimitCheck::Within
    };

    match check {
        LimitCheck::Within => Ok(ParamValue::time(
            TimeUnit::convert(value, unit, canonical),
            canonical,
        )),
        LimitCheck::Clamped(clamped_s) => {
            warn!(
                "{}: {} = {}{} clamped to {:e} s ({})",
                operation, name, value, unit, clamped_s, backend
            );
            Ok(ParamValue::time(canonical.from_seconds(clamped_s), canonical))
        },
        LimitCheck::Rejected => Err(rejected(
            name,
            format!("{value}{unit} exceeds the {backend} limits"),
        )),
    }
}

/// 检查电压与限流；返回钳位后的值（无需修正时为 `None`）
fn check_electrical(name: &str, value: f64, limits: &HardwareLimits) -> Result<Option<f64>, TestError> {
    if name.ends_with("_voltage") {
        return match limits.check_voltage(value) {
            LimitCheck::Rejected => Err(rejected(
                name,
                format!(
                    "{value} V is outside [{}, {}] V",
                    limits.min_voltage, limits.max_voltage
                ),
            )),
            _ => Ok(None),
        };
    }
    if name == "clim" {
        return match limits.check_current_limit(value) {
            LimitCheck::Within => Ok(None),
            LimitCheck::Clamped(clamped) => {
                warn!("clim = {:e} A clamped to {:e} A", value, clamped);
                Ok(Some(clamped))
            },
            LimitCheck::Rejected => Err(rejected(name, format!("{value} A is not a valid compliance"))),
        };
    }
    Ok(None)
}

/// 规范化结果
pub fn normalize_result(
    operation: Operation,
    mut result: TestResult,
    settings: &RouterSettings,
) -> Result<TestResult, TestError> {
    result
        .check_lengths()
        .map_err(|source| TestError::ResultShape { operation, source })?;
    result.recompute_resistances(
        settings.zero_current_epsilon_a,
        settings.resistance_sentinel_ohm,
    );
    Ok(result)
}
