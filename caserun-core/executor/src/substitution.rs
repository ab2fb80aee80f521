//! 占位符替换
//!
//! 支持的占位符:
//! - `%property.NAME%`: 通过属性解析器取值，同一次执行内只解析一次
//! - `%variable.NAME%`: 之前动作通过 outputVariable 产生的变量
//! - `%system.COUNTRY|ENVIRONMENT|SYSTEM|TEST|TESTCASE|STEP_INDEX|EXECUTION_ID%`
//! - `%action.value%`: 当前动作产生的值 (仅控制可用)
//!
//! 未定义的属性是配置错误；未知的变量和系统占位符原样保留。

use caserun_property::{PropertyRequest, PropertyResolver};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use crate::condition::{evaluate, ConditionOperator};
use crate::context::ExecutionContext;
use crate::definition::{Condition, ConditionOption};
use crate::execution::ConditionRecord;
use crate::{ExecutorError, Result};

static PLACEHOLDER: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();

fn placeholder_regex() -> Result<&'static Regex> {
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"%(property|variable|system|action)\.([^%\s]+)%"))
        .as_ref()
        .map_err(|e| ExecutorError::Configuration(format!("占位符表达式无效: {}", e)))
}

/// 解析出的占位符 (位置与内容)
struct Placeholder {
    start: usize,
    end: usize,
    kind: String,
    name: String,
}

fn scan(text: &str) -> Result<Vec<Placeholder>> {
    if !text.contains('%') {
        return Ok(Vec::new());
    }

    Ok(placeholder_regex()?
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(Placeholder {
                start: whole.start(),
                end: whole.end(),
                kind: caps.get(1)?.as_str().to_string(),
                name: caps.get(2)?.as_str().to_string(),
            })
        })
        .collect())
}

/// 替换文本中的全部占位符
pub async fn substitute(
    text: &str,
    ctx: &mut ExecutionContext,
    resolver: &PropertyResolver,
    action_value: Option<&str>,
) -> Result<String> {
    let placeholders = scan(text)?;
    if placeholders.is_empty() {
        return Ok(text.to_string());
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for p in placeholders {
        out.push_str(&text[cursor..p.start]);
        let replacement = if p.kind == "property" {
            Some(resolve_property(&p.name, ctx, resolver).await?)
        } else {
            lookup_local(&p.kind, &p.name, ctx, action_value)
        };
        match replacement {
            Some(value) => out.push_str(&value),
            None => out.push_str(&text[p.start..p.end]),
        }
        cursor = p.end;
    }
    out.push_str(&text[cursor..]);

    Ok(out)
}

/// 只替换变量 / 系统 / 动作占位符，属性占位符原样保留
pub fn substitute_local(
    text: &str,
    ctx: &ExecutionContext,
    action_value: Option<&str>,
) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for p in scan(text)? {
        out.push_str(&text[cursor..p.start]);
        match lookup_local(&p.kind, &p.name, ctx, action_value) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&text[p.start..p.end]),
        }
        cursor = p.end;
    }
    out.push_str(&text[cursor..]);

    Ok(out)
}

/// 替换条件选项中的值
pub async fn substitute_options(
    options: &[ConditionOption],
    ctx: &mut ExecutionContext,
    resolver: &PropertyResolver,
    action_value: Option<&str>,
) -> Result<Vec<ConditionOption>> {
    let mut resolved = Vec::with_capacity(options.len());
    for option in options {
        resolved.push(ConditionOption {
            option: option.option.clone(),
            act: option.act.clone(),
            value: substitute(&option.value, ctx, resolver, action_value).await?,
        });
    }
    Ok(resolved)
}

/// 判断执行条件
///
/// 先替换条件的操作数与选项并写入条件记录，再交给条件判断。`always` 不做替换。
pub async fn check_condition(
    condition: &Condition,
    record: &mut ConditionRecord,
    ctx: &mut ExecutionContext,
    resolver: &PropertyResolver,
    action_value: Option<&str>,
) -> Result<bool> {
    if condition.operator == ConditionOperator::Always {
        return Ok(true);
    }

    record.value1 = substitute(&condition.value1, ctx, resolver, action_value).await?;
    record.value2 = substitute(&condition.value2, ctx, resolver, action_value).await?;
    record.value3 = substitute(&condition.value3, ctx, resolver, action_value).await?;
    record.options = substitute_options(&condition.options, ctx, resolver, action_value).await?;

    Ok(evaluate(
        condition.operator,
        [
            record.value1.as_str(),
            record.value2.as_str(),
            record.value3.as_str(),
        ],
        &record.options,
        ctx,
    )?)
}

fn lookup_local(
    kind: &str,
    name: &str,
    ctx: &ExecutionContext,
    action_value: Option<&str>,
) -> Option<String> {
    match kind {
        "variable" => ctx.variable(name).map(str::to_string),
        "system" => match name {
            "COUNTRY" => Some(ctx.country.clone()),
            "ENVIRONMENT" => Some(ctx.environment.clone()),
            "SYSTEM" => Some(ctx.system.clone()),
            "TEST" => Some(ctx.current().test.clone()),
            "TESTCASE" => Some(ctx.current().testcase.clone()),
            "STEP_INDEX" => Some(ctx.step_index().to_string()),
            "EXECUTION_ID" => Some(ctx.execution_id().to_string()),
            _ => None,
        },
        "action" if name == "value" => action_value.map(str::to_string),
        _ => None,
    }
}

/// 解析属性占位符
///
/// 同一次执行内复用首次解析的值；缓存时间为 0 的属性每次使用都重新取值
/// (例如循环中轮询的易变数据)。
async fn resolve_property(
    name: &str,
    ctx: &mut ExecutionContext,
    resolver: &PropertyResolver,
) -> Result<String> {
    let scope = ctx.property_scope(name).cloned().ok_or_else(|| {
        ExecutorError::Configuration(format!(
            "属性未定义: {} (用例 {}, 国家 {})",
            name,
            ctx.call_path(),
            ctx.country
        ))
    })?;

    if let Some(value) = ctx.memoized_property(&scope, name) {
        return Ok(value.to_string());
    }

    let request = PropertyRequest::new(&scope.test, &scope.testcase, &ctx.country, name);
    let resolved = resolver.resolve(request, ctx.cancel_token()).await?;
    let value = substitute_local(&resolved.value, ctx, None)?;

    debug!(
        "属性 {} 解析为 '{}' (作用域 {}, 尝试 {} 次)",
        name,
        value,
        scope.label(),
        resolved.attempts
    );
    if resolved.cache_expire > 0 {
        ctx.memoize_property(&scope, name, value.clone());
    }

    Ok(value)
}
