use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// `wasmode` 的命令行接口，负责解析全局参数与子命令
#[derive(Parser)]
#[command(name = "wasmode", author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 项目根目录，即 wasmode.toml 所在位置
    #[arg(long, short = 'C', global = true, default_value = ".")]
    pub root: PathBuf,

    /// 详细日志 (-v) 或追踪日志 (-vv)
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// 静默模式：仅输出错误
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

/// 所有支持的子命令
#[derive(Subcommand)]
pub enum Commands {
    /// 编译 WebAssembly 客户端到输出目录
    Build {
        /// 构建前切换到的模式快捷键（如 L、M、S）
        #[arg(short, long)]
        mode: Option<String>,
    },

    /// 启动开发服务器：源码变更时重新编译，并从标准输入读取模式切换
    Dev {
        /// 启动时切换到的模式快捷键
        #[arg(short, long)]
        mode: Option<String>,

        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(short, long, default_value_t = 8080)]
        port: u16,

        /// 将产物写入磁盘，而非保存在内存中
        #[arg(long, default_value_t = false)]
        on_disk: bool,
    },

    /// 显示当前模式，或切换到 TOKEN 指定的模式并重新编译
    Mode {
        /// 模式快捷键（如 L、M、S）
        token: Option<String>,
    },

    /// 输出或写入 wasm_exec.js 运行时胶水脚本
    Shim {
        /// 为指定模式生成，而非当前模式
        #[arg(short, long)]
        mode: Option<String>,

        /// 写入该文件而非标准输出
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 检查 Go 与 TinyGo 工具链是否可用
    Check,
}
