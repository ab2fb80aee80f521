//! 用例执行编排
//!
//! 按排序执行用例的步骤并汇总结果。无论成功、失败还是中止，
//! 每次执行都返回一棵完整的结果树。

use caserun_property::PropertyResolver;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::action::ActionExecutor;
use crate::config::ExecutionConfig;
use crate::context::ExecutionContext;
use crate::definition::StepDefinition;
use crate::execution::{StepExecution, TestCaseExecution};
use crate::return_code::ReturnCode;
use crate::sink::ResultSink;
use crate::step::StepRunner;
use crate::store::DefinitionStore;
use crate::{ExecutorError, Result};

/// 一次执行请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub test: String,
    pub testcase: String,
    pub country: String,
    pub environment: String,
    pub system: String,
}

impl RunRequest {
    pub fn new(
        test: impl Into<String>,
        testcase: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            test: test.into(),
            testcase: testcase.into(),
            country: country.into(),
            environment: String::new(),
            system: String::new(),
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }
}

/// 用例执行编排器
///
/// 属性解析器 (及其缓存) 可在多个编排器之间共享；
/// 每次 [`run`](Self::run) 独占一个新的执行上下文。
pub struct ExecutionOrchestrator {
    store: Arc<dyn DefinitionStore>,
    resolver: Arc<PropertyResolver>,
    executor: Arc<dyn ActionExecutor>,
    sink: Option<Arc<dyn ResultSink>>,
    config: ExecutionConfig,
}

impl ExecutionOrchestrator {
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        resolver: Arc<PropertyResolver>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            store,
            resolver,
            executor,
            sink: None,
            config: ExecutionConfig::default(),
        }
    }

    /// 设置结果输出
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 设置执行配置
    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<PropertyResolver> {
        &self.resolver
    }

    /// 执行一个用例
    pub async fn run(&self, request: RunRequest, cancel: CancellationToken) -> TestCaseExecution {
        let mut ctx = ExecutionContext::new(
            &request.test,
            &request.testcase,
            &request.country,
            &request.environment,
            &request.system,
            cancel,
        );
        info!(
            "开始执行用例 {}/{} (国家 {}, 环境 {}, 执行 ID {})",
            request.test,
            request.testcase,
            request.country,
            request.environment,
            ctx.execution_id()
        );

        let start = Utc::now();
        let mut execution = TestCaseExecution {
            execution_id: ctx.execution_id().to_string(),
            test: request.test.clone(),
            testcase: request.testcase.clone(),
            description: None,
            country: request.country.clone(),
            environment: request.environment.clone(),
            system: request.system.clone(),
            start,
            end: start,
            code: ReturnCode::Pending,
            message: String::new(),
            steps: Vec::new(),
        };

        let runner = StepRunner::new(
            self.store.as_ref(),
            &self.resolver,
            self.executor.as_ref(),
            &self.config,
        );

        match self.prepare(&runner, &mut ctx, &request).await {
            Ok((description, steps)) => {
                execution.description = description;
                self.run_steps(&runner, &steps, &mut ctx, &mut execution).await;
            }
            Err(e) => {
                error!("用例 {}/{} 无法执行: {}", request.test, request.testcase, e);
                execution.code = ReturnCode::Aborted;
                execution.message = e.to_string();
            }
        }
        execution.end = Utc::now();

        info!(
            "用例执行完成: {}/{} - {} ({}ms)",
            execution.test,
            execution.testcase,
            execution.code,
            execution.duration_ms()
        );

        // 输出结果 (失败不影响执行结论)
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.publish(&execution).await {
                warn!("输出执行结果失败: {}", e);
            }
        }

        execution
    }

    async fn prepare(
        &self,
        runner: &StepRunner<'_>,
        ctx: &mut ExecutionContext,
        request: &RunRequest,
    ) -> Result<(Option<String>, Vec<StepDefinition>)> {
        let description = self
            .store
            .get_description(&request.test, &request.testcase)
            .await?;
        let steps = self
            .store
            .get_steps(&request.test, &request.testcase)
            .await?;
        runner.load_properties(ctx).await?;
        Ok((description, steps))
    }

    async fn run_steps(
        &self,
        runner: &StepRunner<'_>,
        steps: &[StepDefinition],
        ctx: &mut ExecutionContext,
        execution: &mut TestCaseExecution,
    ) {
        let mut abort: Option<ExecutorError> = None;

        for step in steps {
            if abort.is_some() {
                execution.steps.push(StepExecution::not_executed(
                    &execution.test,
                    &execution.testcase,
                    step,
                    "执行已中止，步骤未执行",
                ));
                continue;
            }
            if ctx.is_stopped() {
                execution.steps.push(StepExecution::not_executed(
                    &execution.test,
                    &execution.testcase,
                    step,
                    "执行已停止，步骤未执行",
                ));
                continue;
            }

            match runner.run(step, ctx).await {
                Ok(records) => execution.steps.extend(records),
                Err(e) => {
                    error!("步骤 {} 中止执行: {}", step.step_id, e);
                    execution.steps.push(StepExecution::aborted(
                        &execution.test,
                        &execution.testcase,
                        step,
                        &e.to_string(),
                    ));
                    abort = Some(e);
                }
            }
        }

        match abort {
            Some(e) => {
                execution.code = ReturnCode::Aborted;
                execution.message = e.to_string();
            }
            None => {
                let code = ReturnCode::aggregate(
                    execution
                        .steps
                        .iter()
                        .filter(|s| !s.is_skipped())
                        .map(|s| s.code),
                );
                let detail = execution
                    .steps
                    .iter()
                    .find(|s| s.code == code && code != ReturnCode::Ok)
                    .map(|s| format!("步骤 {}: {}", s.step_id, s.message));

                execution.code = code;
                execution.message = match (detail, ctx.is_stopped()) {
                    (Some(detail), true) => format!("致命失败，执行已停止 ({})", detail),
                    (Some(detail), false) => detail,
                    (None, _) => "执行成功".to_string(),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalActionExecutor;
    use crate::store::FileDefinitionStore;

    const SUITE: &str = r#"
testcases:
  - test: T1
    testcase: TC1
    description: 两个步骤
    steps:
      - stepId: 1
        sort: 2
        actions:
          - actionId: 1
            action: doNothing
      - stepId: 2
        sort: 1
        condition:
          operator: never
        actions:
          - actionId: 1
            action: doNothing
"#;

    fn orchestrator() -> ExecutionOrchestrator {
        let store = Arc::new(FileDefinitionStore::from_yaml_str(SUITE).unwrap());
        let resolver = Arc::new(PropertyResolver::new(store.clone()));
        ExecutionOrchestrator::new(store, resolver, Arc::new(LocalActionExecutor::new()))
    }

    #[tokio::test]
    async fn test_run_in_sort_order() {
        let execution = orchestrator()
            .run(RunRequest::new("T1", "TC1", "FR"), CancellationToken::new())
            .await;

        assert_eq!(execution.code, ReturnCode::Ok);
        assert_eq!(execution.description.as_deref(), Some("两个步骤"));
        assert_eq!(
            execution.steps.iter().map(|s| s.step_id).collect::<Vec<_>>(),
            vec![2, 1]
        );
        assert_eq!(execution.steps[0].code, ReturnCode::NotApplicable);
        assert!(execution.start <= execution.end);
    }

    #[tokio::test]
    async fn test_unknown_testcase_still_returns_result() {
        let execution = orchestrator()
            .run(
                RunRequest::new("T1", "MISSING", "FR").with_environment("QA"),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(execution.code, ReturnCode::Aborted);
        assert!(execution.steps.is_empty());
        assert!(execution.message.contains("MISSING"));
        assert_eq!(execution.environment, "QA");
    }
}
