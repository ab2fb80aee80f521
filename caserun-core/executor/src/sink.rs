//! 执行结果输出
//!
//! 引擎不重试输出失败，失败只记录日志，不影响执行结论。

use async_trait::async_trait;
use caserun_storage::{ExecutionRunRecord, StepExecutionRecord, Storage};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::execution::TestCaseExecution;
use crate::return_code::ReturnCode;
use crate::Result;

/// 执行结果输出 (只写)
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn publish(&self, execution: &TestCaseExecution) -> Result<()>;
}

/// 把执行摘要写入日志
#[derive(Debug, Clone, Default)]
pub struct LogResultSink;

#[async_trait]
impl ResultSink for LogResultSink {
    async fn publish(&self, execution: &TestCaseExecution) -> Result<()> {
        info!(
            "用例 {}/{} [{}]: {} - {} ({}ms)",
            execution.test,
            execution.testcase,
            execution.country,
            execution.code,
            execution.message,
            execution.duration_ms()
        );
        for (depth, step) in execution.flatten_steps() {
            debug!(
                "{}步骤 {}/{} #{} 第 {} 次: {} {}",
                "  ".repeat(depth),
                step.test,
                step.testcase,
                step.step_id,
                step.index,
                step.code,
                step.message
            );
        }
        Ok(())
    }
}

/// 把执行结果保存到数据库
pub struct StorageResultSink {
    storage: Arc<Storage>,
}

impl StorageResultSink {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ResultSink for StorageResultSink {
    async fn publish(&self, execution: &TestCaseExecution) -> Result<()> {
        let run = run_record(execution)?;
        let steps = step_records(execution);

        let run_id = self.storage.reports().create(&run, &steps).await?;
        info!(
            "执行结果已保存: run_id={}, execution_id={}, {} 条步骤记录",
            run_id,
            execution.execution_id,
            steps.len()
        );
        Ok(())
    }
}

/// 转换为数据库记录 (完整结果树以 JSON 保存)
pub fn run_record(execution: &TestCaseExecution) -> Result<ExecutionRunRecord> {
    Ok(ExecutionRunRecord {
        id: 0, // 数据库自动生成
        execution_id: execution.execution_id.clone(),
        test: execution.test.clone(),
        testcase: execution.testcase.clone(),
        description: execution.description.clone(),
        country: execution.country.clone(),
        environment: execution.environment.clone(),
        system: execution.system.clone(),
        start_time: execution.start,
        end_time: execution.end,
        duration_ms: execution.duration_ms(),
        return_code: execution.code.as_str().to_string(),
        message: execution.message.clone(),
        total_steps: execution.steps.len() as i32,
        ok_count: execution.count(ReturnCode::Ok) as i32,
        failed_count: execution
            .steps
            .iter()
            .filter(|s| s.code.is_failure())
            .count() as i32,
        not_executed_count: execution.count(ReturnCode::NotExecuted) as i32,
        report: Some(execution.to_json()?),
        created_at: Utc::now(),
    })
}

/// 按执行顺序展开步骤树
pub fn step_records(execution: &TestCaseExecution) -> Vec<StepExecutionRecord> {
    execution
        .flatten_steps()
        .into_iter()
        .enumerate()
        .map(|(position, (depth, step))| StepExecutionRecord {
            id: 0,
            run_id: 0,
            position: position as i32,
            depth: depth as i32,
            test: step.test.clone(),
            testcase: step.testcase.clone(),
            step_id: step.step_id as i64,
            loop_index: step.index as i32,
            sort: step.sort,
            description: step.description.clone(),
            library_test: step.library.as_ref().map(|l| l.test.clone()),
            library_testcase: step.library.as_ref().map(|l| l.testcase.clone()),
            condition_operator: step.condition.operator.as_str().to_string(),
            return_code: step.code.as_str().to_string(),
            message: step.message.clone(),
            start_time: step.start,
            end_time: step.end,
            full_end_time: step.full_end,
            action_count: step.actions.len() as i32,
        })
        .collect()
}
