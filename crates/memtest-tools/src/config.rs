//! # 运行配置
//!
//! TOML 配置文件，三个段：
//!
//! ```toml
//! [sync]
//! readiness_timeout_ms = 5000
//! init_time_s = 0.5
//! relative_threshold = 0.1
//! baseline_samples = 10
//! alignment_tolerance_factor = 2.0
//!
//! [scheduler]
//! min_segment_s = 2e-8
//!
//! [router]
//! resistance_sentinel_ohm = 1e12
//! zero_current_epsilon_a = 1e-15
//! ```
//!
//! 缺省的键取默认值。

use anyhow::{Context, Result, bail};
use memtest_protocol::{DEFAULT_MIN_SEGMENT_S, DEFAULT_RESISTANCE_SENTINEL, DEFAULT_ZERO_CURRENT_EPSILON};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemtestConfig {
    /// 同步器
    pub sync: SyncSection,
    /// 调度器
    pub scheduler: SchedulerSection,
    /// 路由
    pub router: RouterSection,
}

/// `[sync]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Protocol A 等待就绪信号的超时（ms）
    pub readiness_timeout_ms: u64,
    /// Protocol B 的固定初始化等待（s），使用时钳位到 [0, 5]
    pub init_time_s: f64,
    /// 对齐诊断与校准的相对变化阈值
    pub relative_threshold: f64,
    /// 基线取前 N 个采样的中位数
    pub baseline_samples: usize,
    /// 对齐误差超过 `factor × sample_interval` 时告警
    pub alignment_tolerance_factor: f64,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            readiness_timeout_ms: 5_000,
            init_time_s: 0.5,
            relative_threshold: 0.1,
            baseline_samples: 10,
            alignment_tolerance_factor: 2.0,
        }
    }
}

/// `[scheduler]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// 最小段时长（s）
    pub min_segment_s: f64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            min_segment_s: DEFAULT_MIN_SEGMENT_S,
        }
    }
}

/// `[router]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    /// 电流为零时的电阻哨兵值（Ω）
    pub resistance_sentinel_ohm: f64,
    /// 判定电流为零的阈值（A）
    pub zero_current_epsilon_a: f64,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            resistance_sentinel_ohm: DEFAULT_RESISTANCE_SENTINEL,
            zero_current_epsilon_a: DEFAULT_ZERO_CURRENT_EPSILON,
        }
    }
}

impl MemtestConfig {
    /// 从 TOML 文本解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: MemtestConfig = toml::from_str(content).context("Invalid config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// 序列化为 TOML 文本
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// 从文件加载
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load config file {}", path.display()))
    }

    /// 文件存在时加载，否则返回默认配置
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// 保存到文件（自动创建父目录）
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, self.to_toml_string()?)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    /// 校验取值范围
    pub fn validate(&self) -> Result<()> {
        let sync = &self.sync;
        if sync.readiness_timeout_ms == 0 {
            bail!("sync.readiness_timeout_ms must be positive");
        }
        if !sync.init_time_s.is_finite() || sync.init_time_s < 0.0 {
            bail!("sync.init_time_s must be a non-negative number");
        }
        if !(sync.relative_threshold > 0.0 && sync.relative_threshold < 1.0) {
            bail!("sync.relative_threshold must be in (0, 1)");
        }
        if sync.baseline_samples == 0 {
            bail!("sync.baseline_samples must be at least 1");
        }
        if !(sync.alignment_tolerance_factor > 0.0) {
            bail!("sync.alignment_tolerance_factor must be positive");
        }
        if !(self.scheduler.min_segment_s >= 0.0) {
            bail!("scheduler.min_segment_s must be non-negative");
        }
        if !(self.router.resistance_sentinel_ohm > 0.0) {
            bail!("router.resistance_sentinel_ohm must be positive");
        }
        if !(self.router.zero_current_epsilon_a > 0.0) {
            bail!("router.zero_current_epsilon_a must be positive");
        }
        Ok(())
    }

    /// 读取 `section.key` 形式的单个键
    pub fn get(&self, key: &str) -> Result<String> {
        let value = toml::Value::try_from(self).context("Failed to serialize config")?;
        let (section, field) = split_key(key)?;
        match value.get(section).and_then(|s| s.get(field)) {
            Some(toml::Value::String(s)) => Ok(s.clone()),
            Some(v) => Ok(v.to_string()),
            None => bail!("Unknown config key '{key}'"),
        }
    }

    /// 设置 `section.key` 形式的单个键；新值按原有类型解析
    pub fn set(&mut self, key: &str, raw: &str) -> Result<()> {
        let mut value = toml::Value::try_from(&*self).context("Failed to serialize config")?;
        let (section, field) = split_key(key)?;
        let slot = value
            .get_mut(section)
            .and_then(|s| s.get_mut(field))
            .with_context(|| format!("Unknown config key '{key}'"))?;

        let raw = raw.trim();
        let replacement = match &*slot {
            toml::Value::Integer(_) => toml::Value::Integer(
                raw.parse()
                    .with_context(|| format!("'{key}' expects an integer, got '{raw}'"))?,
            ),
            toml::Value::Float(_) => toml::Value::Float(
                raw.parse()
                    .with_context(|| format!("'{key}' expects a number, got '{raw}'"))?,
            ),
            toml::Value::Boolean(_) => toml::Value::Boolean(
                raw.parse()
                    .with_context(|| format!("'{key}' expects true/false, got '{raw}'"))?,
            ),
            _ => toml::Value::String(raw.to_string()),
        };
        *slot = replacement;

        let updated: MemtestConfig = value.try_into().context("Invalid config value")?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

fn split_key(key: &str) -> Result<(&str, &str)> {
    match key.split_once('.') {
        Some((section, field)) if !section.is_empty() && !field.is_empty() => {
            Ok((section, field))
        },
        _ => bail!("Config key must look like 'section.key', got '{key}'"),
    }
}
