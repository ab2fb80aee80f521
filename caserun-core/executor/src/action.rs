//! 动作执行
//!
//! 动作本身 (网页点击 / 接口调用 / SQL 等) 由外部的 [`ActionExecutor`] 完成，
//! 这里只负责判断是否执行、替换参数、处理超时与取消，以及执行动作的控制。

use async_trait::async_trait;
use caserun_property::PropertyResolver;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::control::ControlRunner;
use crate::definition::{ActionDefinition, ConditionOption, ControlDefinition};
use crate::execution::{ActionExecution, ControlExecution};
use crate::return_code::ReturnCode;
use crate::substitution::{check_condition, substitute, substitute_options};
use crate::{ExecutorError, Result};

/// 传递给动作执行器的请求 (参数均已替换)
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub action: String,
    pub value1: String,
    pub value2: String,
    pub value3: String,
    pub options: Vec<ConditionOption>,

    pub country: String,
    pub environment: String,
    pub system: String,
}

/// 动作执行器的返回
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub code: ReturnCode,
    pub message: String,

    /// 动作产生的值，供控制与 outputVariable 使用
    pub value: Option<String>,
}

impl ActionOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            code: ReturnCode::Ok,
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// 外部动作执行器
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// 执行一个动作
    ///
    /// 返回 `Err` 表示执行器本身失败，按动作的 fatal 标志记为 FA 或 KO。
    async fn execute(&self, request: &ActionRequest) -> Result<ActionOutcome>;
}

/// 动作执行器 (含控制)
pub struct ActionRunner<'a> {
    resolver: &'a PropertyResolver,
    executor: &'a dyn ActionExecutor,
    action_timeout: Duration,
}

impl<'a> ActionRunner<'a> {
    pub fn new(resolver: &'a PropertyResolver, executor: &'a dyn ActionExecutor) -> Self {
        Self {
            resolver,
            executor,
            action_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, action_timeout: Duration) -> Self {
        self.action_timeout = action_timeout;
        self
    }

    /// 执行一个动作及其控制
    ///
    /// 动作与控制的失败只体现在返回码上；配置错误与取消返回 `Err`。
    pub async fn run(
        &self,
        action: &ActionDefinition,
        controls: &[ControlDefinition],
        ctx: &mut ExecutionContext,
    ) -> Result<ActionExecution> {
        let mut record = ActionExecution::start(action);

        // 1. 执行条件
        match check_condition(&action.condition, &mut record.condition, ctx, self.resolver, None)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("动作 {} 条件不满足，跳过", action.action_id);
                record.finish(ReturnCode::NotApplicable, "条件不满足，未执行");
                return Ok(record);
            }
            Err(e) if e.is_abort() => return Err(e),
            Err(e) => {
                record.finish(ReturnCode::Fail, e.to_string());
                return Ok(record);
            }
        }

        // 2. 替换参数
        let request = match self.build_request(action, ctx).await {
            Ok(request) => request,
            Err(e) if e.is_abort() => return Err(e),
            Err(e) => {
                warn!("动作 {} 参数替换失败: {}", action.action_id, e);
                record.finish(self.failure_code(action), e.to_string());
                record.stop = action.fatal;
                self.skip_controls(&mut record, controls, "动作失败，控制未执行");
                return Ok(record);
            }
        };
        record.value1 = request.value1.clone();
        record.value2 = request.value2.clone();
        record.value3 = request.value3.clone();
        record.options = request.options.clone();

        // 3. 调用执行器
        info!("执行动作 {}: {}", action.action_id, action.action);
        let outcome = self.invoke(action, &request, ctx).await?;
        record.value = outcome.value.clone();
        record.finish(outcome.code, outcome.message);

        if record.code.is_failure() {
            record.stop = record.code == ReturnCode::Fatal;
            self.skip_controls(&mut record, controls, "动作失败，控制未执行");
            return Ok(record);
        }

        if let (Some(name), Some(value)) = (&action.output_variable, &record.value) {
            debug!("变量 {} = '{}'", name, value);
            ctx.set_variable(name.clone(), value.clone());
        }

        // 4. 控制
        self.run_controls(&mut record, controls, ctx).await?;

        let own = record.code;
        record.code = ReturnCode::aggregate(
            std::iter::once(own).chain(record.controls.iter().map(|c| c.code)),
        );
        record.stop = record.controls.iter().any(|c| c.stop) || record.code == ReturnCode::Fatal;
        if record.code != own {
            if let Some(failed) = record.controls.iter().find(|c| c.code == record.code) {
                record.message = failed.message.clone();
            }
        }
        record.end = chrono::Utc::now();

        Ok(record)
    }

    async fn invoke(
        &self,
        action: &ActionDefinition,
        request: &ActionRequest,
        ctx: &ExecutionContext,
    ) -> Result<ActionOutcome> {
        let cancel = ctx.cancel_token().clone();

        tokio::select! {
            _ = cancel.cancelled() => {
                warn!("动作 {} 执行时收到取消信号", action.action_id);
                Err(ExecutorError::Cancelled)
            }
            result = timeout(self.action_timeout, self.executor.execute(request)) => {
                match result {
                    Ok(Ok(outcome)) => Ok(outcome),
                    Ok(Err(e)) if e.is_abort() => Err(e),
                    Ok(Err(e)) => {
                        warn!("动作 {} 执行失败: {}", action.action_id, e);
                        Ok(self.failed_outcome(action, e.to_string()))
                    }
                    Err(_) => {
                        let message = format!(
                            "动作执行超时 ({}s): {}",
                            self.action_timeout.as_secs(),
                            action.action
                        );
                        warn!("动作 {} {}", action.action_id, message);
                        Ok(self.failed_outcome(action, message))
                    }
                }
            }
        }
    }

    async fn run_controls(
        &self,
        record: &mut ActionExecution,
        controls: &[ControlDefinition],
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let runner = ControlRunner::new(self.resolver);
        let produced = record.value.clone();

        let mut halted = false;
        for control in controls {
            if halted {
                record.controls.push(ControlExecution::not_executed(
                    control,
                    "前序控制致命失败，未执行",
                ));
                continue;
            }

            let result = runner.run(control, produced.as_deref(), ctx).await?;
            debug!(
                "控制 {} ({}) 结果: {}",
                control.control_id, result.control, result.code
            );
            halted = result.stop;
            record.controls.push(result);
        }

        Ok(())
    }

    fn skip_controls(
        &self,
        record: &mut ActionExecution,
        controls: &[ControlDefinition],
        reason: &str,
    ) {
        record.controls.extend(
            controls
                .iter()
                .map(|c| ControlExecution::not_executed(c, reason)),
        );
    }

    fn failure_code(&self, action: &ActionDefinition) -> ReturnCode {
        if action.fatal {
            ReturnCode::Fatal
        } else {
            ReturnCode::Fail
        }
    }

    fn failed_outcome(&self, action: &ActionDefinition, message: String) -> ActionOutcome {
        ActionOutcome {
            code: self.failure_code(action),
            message,
            value: None,
        }
    }

    async fn build_request(
        &self,
        action: &ActionDefinition,
        ctx: &mut ExecutionContext,
    ) -> Result<ActionRequest> {
        Ok(ActionRequest {
            action: action.action.clone(),
            value1: substitute(&action.value1, ctx, self.resolver, None).await?,
            value2: substitute(&action.value2, ctx, self.resolver, None).await?,
            value3: substitute(&action.value3, ctx, self.resolver, None).await?,
            options: substitute_options(&action.options, ctx, self.resolver, None).await?,
            country: ctx.country.clone(),
            environment: ctx.environment.clone(),
            system: ctx.system.clone(),
        })
    }
}
