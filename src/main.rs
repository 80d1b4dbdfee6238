mod cli;
mod logger;
mod pipelines;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use colored::*;

/// CLI 主入口
///
/// - 负责参数解析与日志初始化
/// - 捕获顶层错误并格式化输出
/// - 调度各子命令流水线
fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init(cli.verbose, cli.quiet);

    // 捕获顶层错误，避免展示 Rust 栈信息
    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "[ERROR]".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}

/// 按子命令分发到对应流水线
fn run(cli: Cli) -> Result<()> {
    let root = cli.root;
    match cli.command {
        Commands::Build { mode } => pipelines::execute_build_pipeline(&root, mode.as_deref()),
        Commands::Dev {
            mode,
            host,
            port,
            on_disk,
        } => pipelines::execute_dev_pipeline(&root, mode.as_deref(), &host, port, on_disk),
        Commands::Mode { token } => pipelines::execute_mode_pipeline(&root, token.as_deref()),
        Commands::Shim { mode, output } => {
            pipelines::execute_shim_pipeline(&root, mode.as_deref(), output.as_deref())
        }
        Commands::Check => pipelines::execute_check_pipeline(&root),
    }
}
