use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::models::{ExecutionRunRecord, ReportFilter, StepExecutionRecord};

const RUN_COLUMNS: &str = r#"
    id, execution_id, test, testcase, description, country, environment, system,
    start_time, end_time, duration_ms, return_code, message,
    total_steps, ok_count, failed_count, not_executed_count, report, created_at
"#;

const STEP_COLUMNS: &str = r#"
    id, run_id, position, depth, test, testcase, step_id, loop_index, sort, description,
    library_test, library_testcase, condition_operator, return_code, message,
    start_time, end_time, full_end_time, action_count
"#;

/// 执行结果仓储
pub struct ReportRepository {
    pool: SqlitePool,
}

impl ReportRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 保存一次执行及其展开的步骤 (同一事务)
    pub async fn create(
        &self,
        run: &ExecutionRunRecord,
        steps: &[StepExecutionRecord],
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO execution_runs
            (execution_id, test, testcase, description, country, environment, system,
             start_time, end_time, duration_ms, return_code, message,
             total_steps, ok_count, failed_count, not_executed_count, report, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.execution_id)
        .bind(&run.test)
        .bind(&run.testcase)
        .bind(&run.description)
        .bind(&run.country)
        .bind(&run.environment)
        .bind(&run.system)
        .bind(run.start_time)
        .bind(run.end_time)
        .bind(run.duration_ms)
        .bind(&run.return_code)
        .bind(&run.message)
        .bind(run.total_steps)
        .bind(run.ok_count)
        .bind(run.failed_count)
        .bind(run.not_executed_count)
        .bind(&run.report)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        let run_id = result.last_insert_rowid();

        for step in steps {
            Self::insert_step(&mut tx, run_id, step).await?;
        }

        tx.commit().await?;
        debug!(
            "Created execution run {} ({} steps) with ID: {}",
            run.execution_id,
            steps.len(),
            run_id
        );

        Ok(run_id)
    }

    async fn insert_step(
        tx: &mut Transaction<'_, Sqlite>,
        run_id: i64,
        step: &StepExecutionRecord,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO step_executions
            (run_id, position, depth, test, testcase, step_id, loop_index, sort, description,
             library_test, library_testcase, condition_operator, return_code, message,
             start_time, end_time, full_end_time, action_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id)
        .bind(step.position)
        .bind(step.depth)
        .bind(&step.test)
        .bind(&step.testcase)
        .bind(step.step_id)
        .bind(step.loop_index)
        .bind(step.sort)
        .bind(&step.description)
        .bind(&step.library_test)
        .bind(&step.library_testcase)
        .bind(&step.condition_operator)
        .bind(&step.return_code)
        .bind(&step.message)
        .bind(step.start_time)
        .bind(step.end_time)
        .bind(step.full_end_time)
        .bind(step.action_count)
        .execute(&mut **tx)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// 根据ID获取执行结果
    pub async fn get_by_id(&self, id: i64) -> Result<Option<ExecutionRunRecord>> {
        let query = format!("SELECT {} FROM execution_runs WHERE id = ?", RUN_COLUMNS);
        let run = sqlx::query_as::<_, ExecutionRunRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(run)
    }

    /// 根据执行 ID (UUID) 获取执行结果
    pub async fn get_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionRunRecord>> {
        let query = format!(
            "SELECT {} FROM execution_runs WHERE execution_id = ?",
            RUN_COLUMNS
        );
        let run = sqlx::query_as::<_, ExecutionRunRecord>(&query)
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(run)
    }

    /// 获取执行结果的所有步骤 (按执行顺序)
    pub async fn get_steps(&self, run_id: i64) -> Result<Vec<StepExecutionRecord>> {
        let query = format!(
            "SELECT {} FROM step_executions WHERE run_id = ? ORDER BY position ASC",
            STEP_COLUMNS
        );
        let steps = sqlx::query_as::<_, StepExecutionRecord>(&query)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(steps)
    }

    /// 查询执行结果列表
    pub async fn list(&self, filter: &ReportFilter) -> Result<Vec<ExecutionRunRecord>> {
        let mut query = format!("SELECT {} FROM execution_runs WHERE 1=1", RUN_COLUMNS);
        let bindings = Self::push_conditions(&mut query, filter);

        query.push_str(" ORDER BY start_time DESC, id DESC");

        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {}", limit));
            if let Some(offset) = filter.offset {
                query.push_str(&format!(" OFFSET {}", offset));
            }
        }

        let mut sql_query = sqlx::query_as::<_, ExecutionRunRecord>(&query);

        for binding in &bindings {
            sql_query = sql_query.bind(binding);
        }
        if let Some(start_from) = filter.start_time_from {
            sql_query = sql_query.bind(start_from);
        }
        if let Some(start_to) = filter.start_time_to {
            sql_query = sql_query.bind(start_to);
        }

        let runs = sql_query.fetch_all(&self.pool).await?;

        Ok(runs)
    }

    /// 获取执行结果总数
    pub async fn count(&self, filter: &ReportFilter) -> Result<i64> {
        let mut query = String::from("SELECT COUNT(*) FROM execution_runs WHERE 1=1");
        let bindings = Self::push_conditions(&mut query, filter);

        let mut sql_query = sqlx::query_as::<_, (i64,)>(&query);

        for binding in &bindings {
            sql_query = sql_query.bind(binding);
        }
        if let Some(start_from) = filter.start_time_from {
            sql_query = sql_query.bind(start_from);
        }
        if let Some(start_to) = filter.start_time_to {
            sql_query = sql_query.bind(start_to);
        }

        let (count,) = sql_query.fetch_one(&self.pool).await?;

        Ok(count)
    }

    /// 拼接过滤条件，返回字符串绑定值 (时间条件始终排在最后)
    fn push_conditions(query: &mut String, filter: &ReportFilter) -> Vec<String> {
        let mut bindings = Vec::new();

        if let Some(test) = &filter.test {
            query.push_str(" AND test = ?");
            bindings.push(test.clone());
        }
        if let Some(testcase) = &filter.testcase {
            query.push_str(" AND testcase = ?");
            bindings.push(testcase.clone());
        }
        if let Some(country) = &filter.country {
            query.push_str(" AND country = ?");
            bindings.push(country.clone());
        }
        if let Some(code) = &filter.return_code {
            query.push_str(" AND return_code = ?");
            bindings.push(code.clone());
        }
        if filter.start_time_from.is_some() {
            query.push_str(" AND start_time >= ?");
        }
        if filter.start_time_to.is_some() {
            query.push_str(" AND start_time <= ?");
        }

        bindings
    }

    /// 删除执行结果 (连同步骤)
    pub async fn delete(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM step_executions WHERE run_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM execution_runs WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("Execution run {} not found", id)));
        }

        tx.commit().await?;
        debug!("Deleted execution run {}", id);

        Ok(())
    }

    /// 获取用例最近若干天的通过率 (百分比)
    pub async fn get_success_rate(&self, test: &str, testcase: &str, days: i32) -> Result<f64> {
        let start_time = Utc::now() - chrono::Duration::days(days as i64);

        let result: (Option<f64>,) = sqlx::query_as(
            r#"
            SELECT CAST(SUM(CASE WHEN return_code = 'OK' THEN 1 ELSE 0 END) AS REAL) / COUNT(*) * 100
            FROM execution_runs
            WHERE test = ? AND testcase = ? AND start_time >= ?
            "#,
        )
        .bind(test)
        .bind(testcase)
        .bind(start_time)
        .fetch_one(&self.pool)
        .await?;

        Ok(result.0.unwrap_or(0.0))
    }
}
