use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 执行结果数据库模型 (一次用例执行)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionRunRecord {
    pub id: i64,
    pub execution_id: String,
    pub test: String,
    pub testcase: String,
    pub description: Option<String>,
    pub country: String,
    pub environment: String,
    pub system: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub return_code: String, // OK / WE / KO / FA / CA ...
    pub message: String,
    pub total_steps: i32,
    pub ok_count: i32,
    pub failed_count: i32,
    pub not_executed_count: i32,
    pub report: Option<String>, // 完整结果树 (JSON)
    pub created_at: DateTime<Utc>,
}

impl ExecutionRunRecord {
    pub fn passed(&self) -> bool {
        self.return_code == "OK"
    }
}

/// 步骤执行数据库模型
///
/// 步骤树按执行顺序展开，`depth` 为库步骤嵌套层级。
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StepExecutionRecord {
    pub id: i64,
    pub run_id: i64,
    pub position: i32,
    pub depth: i32,
    pub test: String,
    pub testcase: String,
    pub step_id: i64,
    pub loop_index: i32,
    pub sort: i32,
    pub description: String,
    pub library_test: Option<String>,
    pub library_testcase: Option<String>,
    pub condition_operator: String,
    pub return_code: String,
    pub message: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub full_end_time: DateTime<Utc>,
    pub action_count: i32,
}

/// 执行结果查询过滤器
#[derive(Debug, Default, Clone)]
pub struct ReportFilter {
    pub test: Option<String>,
    pub testcase: Option<String>,
    pub country: Option<String>,
    pub return_code: Option<String>,
    pub start_time_from: Option<DateTime<Utc>>,
    pub start_time_to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
