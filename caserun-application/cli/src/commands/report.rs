//! 执行结果管理命令

use anyhow::{Context, Result};
use chrono::Local;
use colored::Colorize;

use caserun_executor::EngineConfig;
use caserun_storage::{ReportFilter, Storage, StorageManager};

use super::output::colored_code;

pub async fn handle(action: crate::ReportAction) -> Result<()> {
    let config = EngineConfig::load().context("加载配置失败")?;
    let manager = StorageManager::open(&config.database.storage_options())
        .await
        .context("初始化数据库失败")?;
    let storage = Storage::from_manager(&manager);

    match action {
        crate::ReportAction::List {
            test,
            testcase,
            country,
            code,
            limit,
        } => {
            let filter = ReportFilter {
                test,
                testcase,
                country,
                return_code: code,
                limit: Some(limit),
                ..Default::default()
            };
            list_reports(&storage, &filter).await
        }
        crate::ReportAction::Show { id } => show_report(&storage, id).await,
        crate::ReportAction::Delete { id } => delete_report(&storage, id).await,
        crate::ReportAction::Stats {
            test,
            testcase,
            days,
        } => show_stats(&storage, &test, &testcase, days).await,
    }
}

async fn list_reports(storage: &Storage, filter: &ReportFilter) -> Result<()> {
    let reports = storage.reports().list(filter).await?;

    if reports.is_empty() {
        println!("\n{} 没有找到执行结果", "ℹ".yellow());
        return Ok(());
    }

    let total = storage.reports().count(filter).await?;
    println!(
        "\n{} 找到 {} 个执行结果 (显示 {} 个):\n",
        "✓".green(),
        total,
        reports.len()
    );

    // 表头
    println!(
        "{:<6} {:<30} {:<6} {:<20} {:<6} {:<10} {:<10}",
        "ID".bold(),
        "用例".bold(),
        "国家".bold(),
        "执行时间".bold(),
        "结果".bold(),
        "步骤".bold(),
        "耗时".bold()
    );
    println!("{}", "-".repeat(96));

    for report in reports {
        let time_str = report
            .start_time
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let steps_str = format!("{}/{}", report.ok_count, report.total_steps);

        println!(
            "{:<6} {:<30} {:<6} {:<20} {:<6} {:<10} {:<10}",
            report.id,
            format!("{}/{}", report.test, report.testcase),
            report.country,
            time_str,
            colored_code(&report.return_code),
            steps_str,
            format!("{:.2}s", report.duration_ms as f64 / 1000.0)
        );
    }

    Ok(())
}

async fn show_report(storage: &Storage, id: i64) -> Result<()> {
    let Some(report) = storage.reports().get_by_id(id).await? else {
        println!("\n{} 未找到执行结果 ID: {}", "✗".red(), id);
        return Ok(());
    };
    let steps = storage.reports().get_steps(id).await?;

    println!("\n{} 执行结果详情\n", "📊".cyan());
    println!("  ID: {}", report.id);
    println!("  执行 ID: {}", report.execution_id.bright_black());
    println!("  用例: {}/{}", report.test, report.testcase.yellow());
    if let Some(desc) = &report.description {
        println!("  描述: {}", desc);
    }
    println!("  国家: {}", report.country);
    if !report.environment.is_empty() {
        println!("  环境: {}", report.environment);
    }
    println!("  结果: {}", colored_code(&report.return_code).bold());
    println!("  信息: {}", report.message);
    println!(
        "  开始时间: {}",
        report
            .start_time
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
    );
    println!("  总耗时: {:.2} 秒", report.duration_ms as f64 / 1000.0);

    println!("\n  步骤统计:");
    println!("    总步骤数: {}", report.total_steps);
    println!("    成功: {}", report.ok_count.to_string().green());
    println!("    失败: {}", report.failed_count.to_string().red());
    println!("    未执行: {}", report.not_executed_count);

    if !steps.is_empty() {
        println!("\n  步骤详情:\n");

        for step in steps {
            let pad = "  ".repeat(step.depth as usize);
            let library = match (&step.library_test, &step.library_testcase) {
                (Some(test), Some(testcase)) => format!(" -> {}/{}", test, testcase),
                _ => String::new(),
            };

            println!(
                "    {}[{}] {}/{} 步骤 {} #{}{}: {}",
                pad,
                colored_code(&step.return_code),
                step.test,
                step.testcase,
                step.step_id,
                step.loop_index,
                library.cyan(),
                step.description
            );
            if step.return_code != "OK" && !step.message.is_empty() {
                println!("    {}    {}", pad, step.message.bright_black());
            }
        }
    }

    Ok(())
}

async fn delete_report(storage: &Storage, id: i64) -> Result<()> {
    storage.reports().delete(id).await?;
    println!("\n{} 执行结果 {} 已删除", "✓".green(), id);
    Ok(())
}

async fn show_stats(storage: &Storage, test: &str, testcase: &str, days: i32) -> Result<()> {
    let success_rate = storage
        .reports()
        .get_success_rate(test, testcase, days)
        .await?;

    println!("\n{} 用例统计: {}/{}\n", "📈".cyan(), test, testcase.yellow());
    println!("  时间范围: 最近 {} 天", days);
    println!("  通过率: {:.2}%", success_rate);

    Ok(())
}
