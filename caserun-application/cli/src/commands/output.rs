//! CLI 通用输出格式化模块

use caserun_executor::{ReturnCode, StepExecution, TestCaseExecution};
use colored::{ColoredString, Colorize};

/// 按返回码着色
pub fn colored_code(code: &str) -> ColoredString {
    match code {
        "OK" => code.green(),
        "WE" => code.yellow(),
        "KO" | "FA" | "CA" => code.red(),
        "NA" | "NE" => code.bright_black(),
        _ => code.normal(),
    }
}

/// 打印完整执行结果
pub fn print_execution(execution: &TestCaseExecution) {
    println!("\n{}", "=".repeat(60));
    println!("{}", "执行结果".bold());
    println!("{}", "=".repeat(60));
    println!("  用例: {}/{}", execution.test, execution.testcase.yellow());
    if let Some(desc) = &execution.description {
        println!("  描述: {}", desc.bright_black());
    }
    println!("  国家: {}", execution.country);
    if !execution.environment.is_empty() {
        println!("  环境: {}", execution.environment);
    }
    println!("  执行 ID: {}", execution.execution_id.bright_black());
    println!("  结果: {}", colored_code(execution.code.as_str()).bold());
    println!("  信息: {}", execution.message);
    println!("  总耗时: {:.2} 秒", execution.duration_ms() as f64 / 1000.0);

    if !execution.steps.is_empty() {
        println!("\n  步骤详情:\n");
        for step in &execution.steps {
            print_step(step, 2);
        }
    }
    println!();
}

fn print_step(step: &StepExecution, indent: usize) {
    let pad = " ".repeat(indent);
    let library = step
        .library
        .as_ref()
        .map(|l| format!(" -> {}/{}", l.test, l.testcase))
        .unwrap_or_default();

    println!(
        "{}[{}] 步骤 {} #{}{}: {}",
        pad,
        colored_code(step.code.as_str()),
        step.step_id,
        step.index,
        library.cyan(),
        step.description
    );
    if step.code != ReturnCode::Ok && !step.message.is_empty() {
        println!("{}    {}", pad, step.message.bright_black());
    }

    for action in &step.actions {
        println!(
            "{}    [{}] 动作 {} {}",
            pad,
            colored_code(action.code.as_str()),
            action.action_id,
            action.action
        );
        if action.code.is_failure() {
            println!("{}        {}", pad, action.message.red());
        }
        for control in &action.controls {
            println!(
                "{}        [{}] 控制 {} {}",
                pad,
                colored_code(control.code.as_str()),
                control.control_id,
                control.control
            );
            if control.code.is_failure() {
                println!("{}            {}", pad, control.message.red());
            }
        }
    }

    for child in &step.children {
        print_step(child, indent + 4);
    }
}
