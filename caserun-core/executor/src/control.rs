//! 控制 (断言) 执行

use caserun_property::PropertyResolver;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::condition::{evaluate, ConditionOperator};
use crate::context::ExecutionContext;
use crate::definition::{ConditionOption, ControlDefinition};
use crate::execution::ControlExecution;
use crate::return_code::ReturnCode;
use crate::substitution::{check_condition, substitute, substitute_options};
use crate::{ExecutorError, Result};

/// 控制类型，每种类型对应一个条件操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlType {
    VerifyStringEqual,
    VerifyStringDifferent,
    VerifyStringGreater,
    VerifyStringMinor,
    VerifyStringContains,
    VerifyStringNotContains,
    VerifyStringMatchRegex,
    VerifyStringEmpty,
    VerifyStringNotEmpty,
    VerifyNumericEquals,
    VerifyNumericDifferent,
    VerifyNumericGreater,
    VerifyNumericGreaterOrEqual,
    VerifyNumericMinor,
    VerifyNumericMinorOrEqual,
    VerifyPropertyExist,
}

impl ControlType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlType::VerifyStringEqual => "verifyStringEqual",
            ControlType::VerifyStringDifferent => "verifyStringDifferent",
            ControlType::VerifyStringGreater => "verifyStringGreater",
            ControlType::VerifyStringMinor => "verifyStringMinor",
            ControlType::VerifyStringContains => "verifyStringContains",
            ControlType::VerifyStringNotContains => "verifyStringNotContains",
            ControlType::VerifyStringMatchRegex => "verifyStringMatchRegex",
            ControlType::VerifyStringEmpty => "verifyStringEmpty",
            ControlType::VerifyStringNotEmpty => "verifyStringNotEmpty",
            ControlType::VerifyNumericEquals => "verifyNumericEquals",
            ControlType::VerifyNumericDifferent => "verifyNumericDifferent",
            ControlType::VerifyNumericGreater => "verifyNumericGreater",
            ControlType::VerifyNumericGreaterOrEqual => "verifyNumericGreaterOrEqual",
            ControlType::VerifyNumericMinor => "verifyNumericMinor",
            ControlType::VerifyNumericMinorOrEqual => "verifyNumericMinorOrEqual",
            ControlType::VerifyPropertyExist => "verifyPropertyExist",
        }
    }

    pub fn operator(&self) -> ConditionOperator {
        match self {
            ControlType::VerifyStringEqual => ConditionOperator::IfStringEqual,
            ControlType::VerifyStringDifferent => ConditionOperator::IfStringDifferent,
            ControlType::VerifyStringGreater => ConditionOperator::IfStringGreater,
            ControlType::VerifyStringMinor => ConditionOperator::IfStringMinor,
            ControlType::VerifyStringContains => ConditionOperator::IfStringContains,
            ControlType::VerifyStringNotContains => ConditionOperator::IfStringNotContains,
            ControlType::VerifyStringMatchRegex => ConditionOperator::IfStringMatchRegex,
            ControlType::VerifyStringEmpty => ConditionOperator::IfStringEmpty,
            ControlType::VerifyStringNotEmpty => ConditionOperator::IfStringNotEmpty,
            ControlType::VerifyNumericEquals => ConditionOperator::IfNumericEqual,
            ControlType::VerifyNumericDifferent => ConditionOperator::IfNumericDifferent,
            ControlType::VerifyNumericGreater => ConditionOperator::IfNumericGreater,
            ControlType::VerifyNumericGreaterOrEqual => ConditionOperator::IfNumericGreaterOrEqual,
            ControlType::VerifyNumericMinor => ConditionOperator::IfNumericMinor,
            ControlType::VerifyNumericMinorOrEqual => ConditionOperator::IfNumericMinorOrEqual,
            ControlType::VerifyPropertyExist => ConditionOperator::IfPropertyExist,
        }
    }
}

/// 控制执行器
pub struct ControlRunner<'a> {
    resolver: &'a PropertyResolver,
}

impl<'a> ControlRunner<'a> {
    pub fn new(resolver: &'a PropertyResolver) -> Self {
        Self { resolver }
    }

    /// 执行一个控制
    ///
    /// 校验失败只体现在返回码上；只有中止类错误 (配置错误 / 取消) 返回 `Err`。
    pub async fn run(
        &self,
        control: &ControlDefinition,
        produced: Option<&str>,
        ctx: &mut ExecutionContext,
    ) -> Result<ControlExecution> {
        let mut record = ControlExecution::start(control);

        // 1. 控制自身的执行条件
        match check_condition(
            &control.condition,
            &mut record.condition,
            ctx,
            self.resolver,
            produced,
        )
        .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("控制 {} 条件不满足，跳过", control.control_id);
                record.finish(ReturnCode::NotApplicable, "条件不满足，未执行");
                return Ok(record);
            }
            Err(e) if e.is_abort() => return Err(e),
            Err(e) => {
                record.finish(ReturnCode::Fail, e.to_string());
                return Ok(record);
            }
        }

        // 2. 替换操作数，value1 为空时使用动作产生的值
        let resolved = match self.resolve_operands(control, produced, ctx).await {
            Ok(values) => values,
            Err(e) if e.is_abort() => return Err(e),
            Err(e) => {
                record.finish(self.failure_code(control), e.to_string());
                record.stop = control.fatal;
                return Ok(record);
            }
        };
        let (v1, v2, v3, options) = resolved;
        record.value1 = v1;
        record.value2 = v2;
        record.value3 = v3;
        record.options = options;

        // 3. 判断
        let operator = control.control.operator();
        match evaluate(
            operator,
            [
                record.value1.as_str(),
                record.value2.as_str(),
                record.value3.as_str(),
            ],
            &record.options,
            ctx,
        ) {
            Ok(true) => {
                let message = format!(
                    "{} 通过: '{}' / '{}'",
                    control.control.as_str(),
                    record.value1,
                    record.value2
                );
                record.finish(ReturnCode::Ok, message);
            }
            Ok(false) => {
                let failure = ExecutorError::ControlFailure(format!(
                    "{} 不满足: '{}' / '{}'",
                    control.control.as_str(),
                    record.value1,
                    record.value2
                ));
                warn!("控制 {} {}", control.control_id, failure);
                record.finish(self.failure_code(control), failure.to_string());
                record.stop = control.fatal;
            }
            Err(e) => {
                warn!("控制 {} 判断出错: {}", control.control_id, e);
                record.finish(ReturnCode::Fail, e.to_string());
            }
        }

        Ok(record)
    }

    fn failure_code(&self, control: &ControlDefinition) -> ReturnCode {
        if control.fatal {
            ReturnCode::Fatal
        } else {
            ReturnCode::Fail
        }
    }

    async fn resolve_operands(
        &self,
        control: &ControlDefinition,
        produced: Option<&str>,
        ctx: &mut ExecutionContext,
    ) -> Result<(String, String, String, Vec<ConditionOption>)> {
        let v1 = if control.value1.is_empty() {
            produced.unwrap_or_default().to_string()
        } else {
            substitute(&control.value1, ctx, self.resolver, produced).await?
        };
        let v2 = substitute(&control.value2, ctx, self.resolver, produced).await?;
        let v3 = substitute(&control.value3, ctx, self.resolver, produced).await?;
        let options = substitute_options(&control.options, ctx, self.resolver, produced).await?;

        Ok((v1, v2, v3, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Condition;
    use async_trait::async_trait;
    use caserun_property::{PropertyDefinition, PropertyDefinitionStore};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct NoDefs;

    #[async_trait]
    impl PropertyDefinitionStore for NoDefs {
        async fn property_definitions(
            &self,
            _test: &str,
            _testcase: &str,
        ) -> caserun_property::Result<Vec<PropertyDefinition>> {
            Ok(vec![])
        }

        async fn rename_data_lib(&self, _old: &str, _new: &str) -> caserun_property::Result<usize> {
            Ok(0)
        }
    }

    fn control(kind: ControlType, v1: &str, v2: &str, fatal: bool) -> ControlDefinition {
        ControlDefinition {
            control_id: 1,
            sort: 1,
            description: String::new(),
            control: kind,
            value1: v1.into(),
            value2: v2.into(),
            value3: String::new(),
            options: vec![],
            condition: Condition::default(),
            fatal,
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("T1", "TC1", "FR", "QA", "WEB", CancellationToken::new())
    }

    #[tokio::test]
    async fn test_pass_uses_produced_value() {
        let resolver = PropertyResolver::new(Arc::new(NoDefs));
        let runner = ControlRunner::new(&resolver);
        let mut ctx = ctx();

        let record = runner
            .run(
                &control(ControlType::VerifyStringContains, "", "shop", false),
                Some("https://shop.fr"),
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(record.code, ReturnCode::Ok);
        assert_eq!(record.value1, "https://shop.fr");
        assert!(!record.stop);
    }

    #[tokio::test]
    async fn test_fatal_failure_sets_stop() {
        let resolver = PropertyResolver::new(Arc::new(NoDefs));
        let runner = ControlRunner::new(&resolver);
        let mut ctx = ctx();

        let record = runner
            .run(
                &control(ControlType::VerifyNumericEquals, "%action.value%", "200", true),
                Some("500"),
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(record.code, ReturnCode::Fatal);
        assert!(record.stop);

        let record = runner
            .run(
                &control(ControlType::VerifyNumericEquals, "500", "200", false),
                None,
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(record.code, ReturnCode::Fail);
        assert!(!record.stop);
    }

    #[tokio::test]
    async fn test_condition_false_is_not_applicable() {
        let resolver = PropertyResolver::new(Arc::new(NoDefs));
        let runner = ControlRunner::new(&resolver);
        let mut ctx = ctx();

        let mut def = control(ControlType::VerifyStringEqual, "a", "b", true);
        def.condition = Condition::new(ConditionOperator::Never);

        let record = runner.run(&def, None, &mut ctx).await.unwrap();
        assert_eq!(record.code, ReturnCode::NotApplicable);
        assert!(!record.stop);
    }

    #[tokio::test]
    async fn test_evaluation_error_is_fail() {
        let resolver = PropertyResolver::new(Arc::new(NoDefs));
        let runner = ControlRunner::new(&resolver);
        let mut ctx = ctx();

        let record = runner
            .run(
                &control(ControlType::VerifyNumericGreater, "abc", "1", true),
                None,
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(record.code, ReturnCode::Fail);
        assert!(!record.stop);
    }

    #[tokio::test]
    async fn test_unknown_property_aborts() {
        let resolver = PropertyResolver::new(Arc::new(NoDefs));
        let runner = ControlRunner::new(&resolver);
        let mut ctx = ctx();

        let err = runner
            .run(
                &control(ControlType::VerifyStringEqual, "%property.NOPE%", "x", false),
                None,
                &mut ctx,
            )
            .await
            .unwrap_err();
        assert!(err.is_abort());
    }

    #[test]
    fn test_control_type_mapping() {
        let kind: ControlType = serde_json::from_str("\"verifyNumericEquals\"").unwrap();
        assert_eq!(kind.operator(), ConditionOperator::IfNumericEqual);
        assert_eq!(
            ControlType::VerifyPropertyExist.operator(),
            ConditionOperator::IfPropertyExist
        );
    }
}
