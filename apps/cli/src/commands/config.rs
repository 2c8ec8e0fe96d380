//! 配置管理命令

use anyhow::{Context, Result};
use clap::Subcommand;
use memtest_tools::MemtestConfig;
use std::path::{Path, PathBuf};

/// 默认配置文件：`<config_dir>/memtest/config.toml`
pub fn default_config_file() -> Result<PathBuf> {
    let mut path = dirs::config_dir().context("Cannot determine the user config directory")?;
    path.push("memtest");
    path.push("config.toml");
    Ok(path)
}

/// 加载配置（文件不存在时用默认值）
pub fn load(path: &Path) -> Result<MemtestConfig> {
    MemtestConfig::load_or_default(path)
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 设置配置项（如 `sync.init_time_s 0.8`）
    Set {
        /// `section.key`
        key: String,
        /// 新值
        value: String,
    },

    /// 获取配置项；不给键时输出整个文件
    Get {
        /// `section.key`
        key: Option<String>,
    },

    /// 输出配置文件路径
    Path,
}

impl ConfigCommand {
    pub fn execute(self, path: &Path) -> Result<()> {
        match self {
            ConfigCommand::Set { key, value } => {
                let mut config = load(path)?;
                config.set(&key, &value)?;
                config.save(path)?;
                tracing::info!("{} = {} saved to {}", key, value, path.display());
                println!("{}", config.get(&key)?);
            },
            ConfigCommand::Get { key: Some(key) } => {
                println!("{}", load(path)?.get(&key)?);
            },
            ConfigCommand::Get { key: None } => {
                print!("{}", load(path)?.to_toml_string()?);
            },
            ConfigCommand::Path => println!("{}", path.display()),
        }
        Ok(())
    }
}
