//! 步骤执行
//!
//! 单个步骤的状态流转:
//! `PENDING → CONDITION_CHECK → {SKIPPED | RUNNING} → {LOOPING | DONE}`
//!
//! 库步骤在新的调用栈帧中递归执行被引用用例的步骤，调用层级有上限，
//! 超过上限时以 [`ExecutorError::CircularLibraryCall`] 中止整个执行。

use caserun_property::PropertyResolver;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, error, info, warn};

use crate::action::{ActionExecutor, ActionRunner};
use crate::config::{ExecutionConfig, StopPolicy};
use crate::context::{ExecutionContext, Frame};
use crate::definition::{LibraryStepRef, StepDefinition};
use crate::execution::{ActionExecution, StepExecution};
use crate::return_code::ReturnCode;
use crate::store::DefinitionStore;
use crate::substitution::check_condition;
use crate::{ExecutorError, Result};

type StepsFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<StepExecution>>> + Send + 'a>>;

/// 步骤执行器
pub struct StepRunner<'a> {
    store: &'a dyn DefinitionStore,
    resolver: &'a PropertyResolver,
    executor: &'a dyn ActionExecutor,
    config: &'a ExecutionConfig,
}

impl<'a> StepRunner<'a> {
    pub fn new(
        store: &'a dyn DefinitionStore,
        resolver: &'a PropertyResolver,
        executor: &'a dyn ActionExecutor,
        config: &'a ExecutionConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            executor,
            config,
        }
    }

    /// 登记当前用例可解析的属性 (每个用例只加载一次)
    pub async fn load_properties(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let frame = ctx.current().clone();
        if ctx.has_defined_properties(&frame.test, &frame.testcase) {
            return Ok(());
        }

        let names = self
            .resolver
            .defined_properties(&frame.test, &frame.testcase, &ctx.country)
            .await?;
        debug!("用例 {} 定义了 {} 个属性", frame.label(), names.len());
        ctx.set_defined_properties(&frame.test, &frame.testcase, names);
        Ok(())
    }

    /// 执行一个步骤 (含循环)
    ///
    /// 每次循环生成一条记录，序号从 1 开始。条件不满足时只返回一条 NA 记录。
    pub async fn run(
        &self,
        step: &StepDefinition,
        ctx: &mut ExecutionContext,
    ) -> Result<Vec<StepExecution>> {
        let frame = ctx.current().clone();
        let expected = step.loop_kind.expected();
        let max = self.config.max_loop_iterations;

        let mut records: Vec<StepExecution> = Vec::new();
        let mut index = 1;

        loop {
            if ctx.is_cancelled() {
                return Err(ExecutorError::Cancelled);
            }

            ctx.set_step_index(index);
            let mut record = StepExecution::start(&frame.test, &frame.testcase, step, index);

            // CONDITION_CHECK
            if index > 1 || step.loop_kind.checks_before_first() {
                match check_condition(
                    &step.condition,
                    &mut record.condition,
                    ctx,
                    self.resolver,
                    None,
                )
                .await
                {
                    Ok(result) if result == expected => {}
                    Ok(_) => {
                        if index == 1 {
                            info!("步骤 {} 条件不满足，跳过", step.step_id);
                            record.finish(ReturnCode::NotApplicable, "条件不满足，步骤跳过");
                            records.push(record);
                        } else {
                            debug!("步骤 {} 循环结束，共 {} 次", step.step_id, index - 1);
                        }
                        break;
                    }
                    Err(e) if e.is_abort() => return Err(e),
                    Err(e) => {
                        warn!("步骤 {} 条件判断出错: {}", step.step_id, e);
                        record.finish(ReturnCode::Fail, e.to_string());
                        records.push(record);
                        break;
                    }
                }
            }

            // RUNNING
            info!(
                "执行步骤 {}/{} (第 {} 次): {}",
                frame.label(),
                step.step_id,
                index,
                step.description
            );
            self.execute(step, ctx, &mut record).await?;
            debug!("步骤 {} 结果: {}", step.step_id, record.code);

            if record.stop && self.config.stop_policy == StopPolicy::StopOnFatal {
                warn!("步骤 {} 致命失败，停止后续执行", step.step_id);
                ctx.request_stop();
            }

            let halted = ctx.is_stopped();
            records.push(record);

            // LOOPING
            if !step.loop_kind.repeats() || halted {
                break;
            }
            if index >= max {
                warn!("步骤 {} 达到最大循环次数 {}", step.step_id, max);
                if let Some(last) = records.last_mut() {
                    last.message = format!("{} (达到最大循环次数 {})", last.message, max);
                }
                break;
            }
            index += 1;
        }

        Ok(records)
    }

    /// 依次执行当前用例的步骤
    ///
    /// `only` 指定时只执行该步骤号。停止标志生效后剩余步骤记为 NE。
    pub fn run_steps<'b>(
        &'b self,
        only: Option<u32>,
        ctx: &'b mut ExecutionContext,
    ) -> StepsFuture<'b> {
        Box::pin(async move {
            let frame = ctx.current().clone();
            let mut steps = self.store.get_steps(&frame.test, &frame.testcase).await?;
            if let Some(step_id) = only {
                steps.retain(|s| s.step_id == step_id);
                if steps.is_empty() {
                    return Err(ExecutorError::Configuration(format!(
                        "库步骤不存在: {} 步骤 {}",
                        frame.label(),
                        step_id
                    )));
                }
            }

            let mut records = Vec::new();
            for step in &steps {
                if ctx.is_stopped() {
                    records.push(StepExecution::not_executed(
                        &frame.test,
                        &frame.testcase,
                        step,
                        "执行已停止，步骤未执行",
                    ));
                    continue;
                }
                records.extend(self.run(step, ctx).await?);
            }

            Ok(records)
        })
    }

    async fn execute(
        &self,
        step: &StepDefinition,
        ctx: &mut ExecutionContext,
        record: &mut StepExecution,
    ) -> Result<()> {
        match &step.library {
            Some(library) => self.run_library(library, ctx, record).await,
            None => self.run_actions(step, ctx, record).await,
        }
    }

    async fn run_library(
        &self,
        library: &LibraryStepRef,
        ctx: &mut ExecutionContext,
        record: &mut StepExecution,
    ) -> Result<()> {
        let target = Frame::new(&library.test, &library.testcase);
        let depth = ctx.depth() + 1;
        if depth > self.config.max_library_depth {
            let path = format!("{} -> {}", ctx.call_path(), target.label());
            error!(
                "库步骤调用层级 {} 超过上限 {}: {}",
                depth, self.config.max_library_depth, path
            );
            return Err(ExecutorError::CircularLibraryCall {
                max: self.config.max_library_depth,
                path,
            });
        }

        record.mark_library_call(library);
        info!(
            "步骤 {} 调用库步骤 {} (层级 {})",
            record.step_id,
            target.label(),
            depth
        );

        ctx.push_frame(target);
        let result = match self.load_properties(ctx).await {
            Ok(()) => self.run_steps(library.step, ctx).await,
            Err(e) => Err(e),
        };
        ctx.pop_frame();
        let children = result?;

        let code = ReturnCode::aggregate(children.iter().map(|c| c.code));
        let message = children
            .iter()
            .find(|c| c.code == code && c.code != ReturnCode::Ok)
            .map(|c| c.message.clone())
            .unwrap_or_else(|| format!("库步骤 {}/{} 执行完成", library.test, library.testcase));
        record.stop = children.iter().any(|c| c.stop) || code == ReturnCode::Fatal;
        record.children = children;
        record.finish(code, message);

        Ok(())
    }

    async fn run_actions(
        &self,
        step: &StepDefinition,
        ctx: &mut ExecutionContext,
        record: &mut StepExecution,
    ) -> Result<()> {
        let frame = ctx.current().clone();
        let actions = self
            .store
            .get_actions(&frame.test, &frame.testcase, step.step_id)
            .await?;
        let runner = ActionRunner::new(self.resolver, self.executor)
            .with_timeout(self.config.action_timeout());
        let halt_on_stop = self.config.stop_policy == StopPolicy::StopOnFatal;

        let mut halted = false;
        for action in &actions {
            if halted {
                record.actions.push(ActionExecution::not_executed(
                    action,
                    "前序动作致命失败，未执行",
                ));
                continue;
            }

            let controls = self
                .store
                .get_controls(&frame.test, &frame.testcase, step.step_id, action.action_id)
                .await?;
            let result = runner.run(action, &controls, ctx).await?;
            debug!(
                "动作 {} ({}) 结果: {}",
                action.action_id, action.action, result.code
            );
            halted = result.stop && halt_on_stop;
            record.actions.push(result);
        }

        let code = ReturnCode::aggregate(record.actions.iter().map(|a| a.code));
        let message = record
            .actions
            .iter()
            .find(|a| a.code == code && a.code != ReturnCode::Ok)
            .map(|a| a.message.clone())
            .unwrap_or_else(|| "步骤执行完成".to_string());
        record.stop = record.actions.iter().any(|a| a.stop) || code == ReturnCode::Fatal;
        record.finish(code, message);

        Ok(())
    }
}
