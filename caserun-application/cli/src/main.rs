//! CaseRun CLI 应用

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "caserun")]
#[command(about = "CaseRun - 测试用例执行引擎", long_about = None)]
#[command(version)]
struct Cli {
    /// 日志级别 (也可用 RUST_LOG 指定过滤规则)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 执行测试用例
    Run(RunArgs),

    /// 执行结果管理
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },

    /// 配置管理
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// 用例定义文件 (.yaml/.yml/.json)
    suite: String,

    /// 测试名称
    #[arg(long)]
    test: String,

    /// 用例名称
    #[arg(long)]
    testcase: String,

    /// 国家
    #[arg(long)]
    country: String,

    /// 环境
    #[arg(long, default_value = "")]
    environment: String,

    /// 被测系统
    #[arg(long, default_value = "")]
    system: String,

    /// 不保存执行结果到数据库
    #[arg(long)]
    no_store: bool,

    /// 输出格式 (text/json/yaml)
    #[arg(short = 'f', long, default_value = "text")]
    format: String,
}

#[derive(Subcommand)]
pub enum ReportAction {
    /// 列出执行结果
    List {
        /// 测试名称过滤
        #[arg(long)]
        test: Option<String>,

        /// 用例名称过滤
        #[arg(long)]
        testcase: Option<String>,

        /// 国家过滤
        #[arg(long)]
        country: Option<String>,

        /// 返回码过滤 (OK/KO/FA/CA ...)
        #[arg(long)]
        code: Option<String>,

        /// 显示数量
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// 显示执行结果详情
    Show {
        /// 执行结果 ID
        id: i64,
    },

    /// 删除执行结果
    Delete {
        /// 执行结果 ID
        id: i64,
    },

    /// 用例通过率统计
    Stats {
        /// 测试名称
        #[arg(long)]
        test: String,

        /// 用例名称
        #[arg(long)]
        testcase: String,

        /// 统计天数
        #[arg(short, long, default_value = "7")]
        days: i32,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// 显示当前生效的配置
    Show {
        /// 输出格式 (toml/yaml/json)
        #[arg(short = 'f', long, default_value = "toml")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("CaseRun CLI 启动");

    // 处理命令
    match cli.command {
        Commands::Run(args) => {
            let passed = commands::run::handle(args).await?;
            if !passed {
                std::process::exit(1);
            }
        }
        Commands::Report { action } => commands::report::handle(action).await?,
        Commands::Config { action } => commands::config::handle(action).await?,
    }

    Ok(())
}
