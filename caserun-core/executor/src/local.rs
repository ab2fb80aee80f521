//! 内置动作执行器
//!
//! 只实现不依赖外部系统的引擎级动作:
//! - `doNothing`: 直接成功
//! - `wait`: 等待 value1 毫秒
//! - `calculateProperty`: 产生 value1 (通常为 `%property.X%`)
//! - `setVariable`: 产生 value2 (为空时使用 value1)

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::action::{ActionExecutor, ActionOutcome, ActionRequest};
use crate::{ExecutorError, Result};

#[derive(Debug, Clone, Default)]
pub struct LocalActionExecutor;

impl LocalActionExecutor {
    pub fn new() -> Self {
        Self
    }

    /// 支持的动作
    pub fn supported_actions() -> &'static [&'static str] {
        &["doNothing", "wait", "calculateProperty", "setVariable"]
    }
}

#[async_trait]
impl ActionExecutor for LocalActionExecutor {
    async fn execute(&self, request: &ActionRequest) -> Result<ActionOutcome> {
        match request.action.as_str() {
            "doNothing" => Ok(ActionOutcome::ok("无操作")),

            "wait" => {
                let millis: u64 = request.value1.trim().parse().map_err(|_| {
                    ExecutorError::ActionExecution(format!(
                        "wait 的等待时间无效: '{}'",
                        request.value1
                    ))
                })?;
                debug!("等待 {} 毫秒", millis);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(ActionOutcome::ok(format!("等待 {} 毫秒", millis)))
            }

            "calculateProperty" => Ok(ActionOutcome::ok("属性已计算").with_value(&request.value1)),

            "setVariable" => {
                let value = if request.value2.is_empty() {
                    &request.value1
                } else {
                    &request.value2
                };
                Ok(ActionOutcome::ok("变量已设置").with_value(value.as_str()))
            }

            other => Err(ExecutorError::ActionExecution(format!(
                "不支持的动作: {} (支持: {})",
                other,
                Self::supported_actions().join(", ")
            ))),
        }
    }
}
