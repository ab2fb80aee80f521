//! Run 命令处理

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use caserun_executor::{
    EngineConfig, ExecutionOrchestrator, FileDefinitionStore, LocalActionExecutor, LogResultSink,
    ResultSink, RunRequest, StorageResultSink,
};
use caserun_property::PropertyResolver;
use caserun_storage::{Storage, StorageManager};

use super::output::print_execution;

/// 执行一个用例，返回是否通过
pub async fn handle(args: crate::RunArgs) -> Result<bool> {
    let config = EngineConfig::load().context("加载配置失败")?;

    // 加载用例定义
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.set_message(format!("加载用例定义: {}", args.suite));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let store = Arc::new(
        FileDefinitionStore::from_file(&args.suite)
            .with_context(|| format!("加载用例定义失败: {}", args.suite))?,
    );
    let testcases = store.testcases().await;

    spinner.finish_with_message(format!(
        "{} 用例定义加载成功: {} 个用例",
        "✓".green().bold(),
        testcases.len().to_string().yellow()
    ));

    let resolver = Arc::new(
        PropertyResolver::new(store.clone())
            .with_max_chain_depth(config.property.max_chain_depth),
    );

    let sink: Arc<dyn ResultSink> = if config.database.enabled && !args.no_store {
        let manager = StorageManager::open(&config.database.storage_options())
            .await
            .context("初始化数据库失败")?;
        Arc::new(StorageResultSink::new(Arc::new(Storage::from_manager(
            &manager,
        ))))
    } else {
        Arc::new(LogResultSink)
    };

    let orchestrator = ExecutionOrchestrator::new(
        store,
        resolver,
        Arc::new(LocalActionExecutor::new()),
    )
    .with_config(config.engine.clone())
    .with_sink(sink);

    // Ctrl-C 取消执行
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，取消执行");
            ctrl_c.cancel();
        }
    });

    let request = RunRequest::new(&args.test, &args.testcase, &args.country)
        .with_environment(&args.environment)
        .with_system(&args.system);

    println!("\n{}\n", "开始执行用例...".bold());
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.set_message(format!("执行 {}/{}", args.test, args.testcase));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let execution = orchestrator.run(request, cancel).await;

    spinner.finish_and_clear();

    match args.format.as_str() {
        "json" => println!("{}", execution.to_json()?),
        "yaml" => println!("{}", execution.to_yaml()?),
        _ => print_execution(&execution),
    }

    Ok(execution.passed())
}
