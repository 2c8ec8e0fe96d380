//! 后端探测
//!
//! 地址到后端的映射是启发式的，按顺序匹配：
//!
//! 1. 型号标记（`2450`、`2400`、`2401`、`keithley2450`、`tsp`）→ 后端 A
//! 2. `a.b.c.d:port`（四段 0–255、数字端口）或 `4200` 标记 → 后端 B
//! 3. `GPIB…`/`USB…` 前缀（不区分大小写）→ 后端 A
//!
//! 其余地址报参数错误。显式的 [`BackendOverride`] 跳过探测。

use crate::error::TestError;
use memtest_instrument::Backend;
use std::net::SocketAddrV4;

const TSP_MODEL_TOKENS: [&str; 5] = ["keithley2450", "2450", "2400", "2401", "tsp"];
const KXCI_MODEL_TOKENS: [&str; 1] = ["4200"];
const TSP_BUS_PREFIXES: [&str; 2] = ["gpib", "usb"];

/// 后端选择
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendOverride {
    /// 按地址自动探测（默认）
    #[default]
    Auto,
    /// 强制使用指定后端
    Force(Backend),
}

impl From<Backend> for BackendOverride {
    fn from(backend: Backend) -> Self {
        BackendOverride::Force(backend)
    }
}

/// 按地址探测后端
pub fn detect_backend(address: &str) -> Result<Backend, TestError> {
    let normalized = address.trim().to_ascii_lowercase();

    if TSP_MODEL_TOKENS.iter().any(|t| normalized.contains(t)) {
        return Ok(Backend::Tsp2450);
    }
    if normalized.parse::<SocketAddrV4>().is_ok()
        || KXCI_MODEL_TOKENS.iter().any(|t| normalized.contains(t))
    {
        return Ok(Backend::Kxci4200);
    }
    if TSP_BUS_PREFIXES.iter().any(|p| normalized.starts_with(p)) {
        return Ok(Backend::Tsp2450);
    }
    Err(TestError::UnknownAddress(address.to_string()))
}

/// 应用覆盖后的后端
pub fn resolve_backend(address: &str, selection: BackendOverride) -> Result<Backend, TestError> {
    match selection {
        BackendOverride::Force(backend) => Ok(backend),
        BackendOverride::Auto => detect_backend(address),
    }
}
