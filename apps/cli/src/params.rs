//! 命令行参数解析
//!
//! `--param name=value` 的取值规则：
//!
//! - `true` / `false` → 布尔
//! - 整数 → 整数，其余数字 → 浮点
//! - 数字加时间单位（`100us`、`1.5ms`）→ 带单位的时间
//! - 引号包围（`pattern="1011"`）或其他文本 → 字符串

use anyhow::{Result, bail};
use memtest_sdk::protocol::{ParamBag, ParamValue, parse_time};

/// 解析单个参数值
pub fn parse_value(raw: &str) -> ParamValue {
    let raw = raw.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = raw.strip_prefix(quote).and_then(|s| s.strip_suffix(quote)) {
            return ParamValue::Str(inner.to_string());
        }
    }
    match raw {
        "true" => return ParamValue::Bool(true),
        "false" => return ParamValue::Bool(false),
        _ => {},
    }
    if let Ok(v) = raw.parse::<i64>() {
        return ParamValue::Int(v);
    }
    if let Ok(v) = raw.parse::<f64>() {
        return ParamValue::Float(v);
    }
    match parse_time(raw) {
        Ok((value, unit)) => ParamValue::time(value, unit),
        Err(_) => ParamValue::Str(raw.to_string()),
    }
}

/// 解析 `name=value` 列表
pub fn parse_params(pairs: &[String]) -> Result<ParamBag> {
    let mut bag = ParamBag::new();
    for pair in pairs {
        let Some((name, value)) = pair.split_once('=') else {
            bail!("Parameter '{pair}' must be written as name=value");
        };
        let name = name.trim();
        if name.is_empty() {
            bail!("Parameter '{pair}' has an empty name");
        }
        bag.insert(name, parse_value(value));
    }
    Ok(bag)
}

/// clap 取值解析：时间参数（无单位视为秒）
pub fn parse_seconds(raw: &str) -> Result<f64, String> {
    let (value, unit) = parse_time(raw).map_err(|e| e.to_string())?;
    Ok(unit.to_seconds(value))
}
