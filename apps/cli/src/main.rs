//! # Memtest CLI
//!
//! Command-line interface for memristor pulse testing.
//!
//! ```bash
//! # 查看后端支持的操作
//! memtest-cli capabilities --backend keithley4200a
//!
//! # 计算激光时间表
//! memtest-cli schedule --pattern 1011 --on 100ms --off 100ms --repeats 2
//!
//! # 在 Mock 硬件上执行一个测试
//! memtest-cli run pulse_read_repeat --address 192.168.0.10:8888 --mock \
//!     --param pulse_voltage=1.5 --param pulse_width=100us --param num_cycles=10
//!
//! # 激光 + 定时读取同步测量（Ctrl+C 取消）
//! memtest-cli sync --pattern 101 --on 200ms --off 200ms --duration 2s --mock
//! ```
//!
//! 结果以 JSON 输出到 stdout，日志输出到 stderr（`RUST_LOG` 控制级别）。

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod params;

use commands::{
    CalibrateCommand, CapabilitiesCommand, ConfigCommand, DetectCommand, RunCommand,
    ScheduleCommand, SyncCommand,
};

/// Memtest CLI - 忆阻器脉冲测试命令行工具
#[derive(Parser, Debug)]
#[command(name = "memtest-cli")]
#[command(about = "Command-line interface for memristor pulse testing", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件（默认 <config_dir>/memtest/config.toml）
    #[arg(long, global = true, env = "MEMTEST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 按地址探测后端
    Detect {
        #[command(flatten)]
        args: DetectCommand,
    },

    /// 列出能力注册表
    Capabilities {
        #[command(flatten)]
        args: CapabilitiesCommand,
    },

    /// 计算激光时间表
    Schedule {
        #[command(flatten)]
        args: ScheduleCommand,
    },

    /// 执行一个测试
    Run {
        #[command(flatten)]
        args: RunCommand,
    },

    /// 激光与定时读取同步测量
    Sync {
        #[command(flatten)]
        args: SyncCommand,
    },

    /// 从测量结果估计校准偏移
    Calibrate {
        #[command(flatten)]
        args: CalibrateCommand,
    },
}

fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialise logging: {e}");
    }

    let cli = Cli::parse();
    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("memtest_cli=info".parse()?),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

fn execute(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => commands::config::default_config_file()?,
    };

    match cli.command {
        Commands::Config(cmd) => cmd.execute(&config_path),
        Commands::Detect { args } => args.execute(),
        Commands::Capabilities { args } => args.execute(),
        Commands::Schedule { args } => args.execute(&config_path),
        Commands::Run { args } => args.execute(&config_path),
        Commands::Sync { args } => args.execute(&config_path),
        Commands::Calibrate { args } => args.execute(&config_path),
    }
}
