//! CaseRun 执行器
//!
//! 测试用例执行引擎: 步骤 / 动作 / 控制的遍历、条件与循环、
//! 库步骤递归调用以及结果汇总。

pub mod action;
pub mod condition;
pub mod config;
pub mod context;
pub mod control;
pub mod definition;
pub mod execution;
pub mod local;
pub mod orchestrator;
pub mod return_code;
pub mod sink;
pub mod step;
pub mod store;
pub mod substitution;

pub use action::{ActionExecutor, ActionOutcome, ActionRequest, ActionRunner};
pub use condition::{evaluate, ConditionError, ConditionOperator};
pub use config::{
    DatabaseConfig, EngineConfig, EnvironmentConfig, ExecutionConfig, PropertyConfig, StopPolicy,
};
pub use context::{ExecutionContext, Frame};
pub use control::{ControlRunner, ControlType};
pub use definition::{
    ActionDefinition, Condition, ConditionOption, ControlDefinition, LibraryStepRef, LoopKind,
    StepDefinition, Suite, TestCaseDefinition,
};
pub use execution::{
    ActionExecution, ConditionRecord, ControlExecution, LibraryCall, StepExecution,
    TestCaseExecution,
};
pub use local::LocalActionExecutor;
pub use orchestrator::{ExecutionOrchestrator, RunRequest};
pub use return_code::ReturnCode;
pub use sink::{LogResultSink, ResultSink, StorageResultSink};
pub use step::StepRunner;
pub use store::{DefinitionStore, FileDefinitionStore};

use caserun_property::PropertyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    /// 缺失或无效的定义，中止整个执行
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 属性取值重试耗尽，降级为所属动作失败
    #[error("属性解析失败: {0}")]
    PropertyResolution(String),

    /// 库步骤调用层级超过上限，中止整个执行
    #[error("库步骤调用层级超过上限 {max}: {path}")]
    CircularLibraryCall { max: usize, path: String },

    #[error("动作执行失败: {0}")]
    ActionExecution(String),

    #[error("控制校验失败: {0}")]
    ControlFailure(String),

    /// 条件无法判断 (非数值操作数 / 无效正则)，记为所属记录失败
    #[error("条件判断失败: {0}")]
    Condition(#[from] condition::ConditionError),

    #[error("执行已取消")]
    Cancelled,

    #[error("数据库错误: {0}")]
    Storage(#[from] caserun_storage::StorageError),

    #[error("序列化错误: {0}")]
    Serde(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutorError {
    /// 是否中止整个执行 (其余错误只记录在执行记录中)
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            ExecutorError::Configuration(_)
                | ExecutorError::CircularLibraryCall { .. }
                | ExecutorError::Cancelled
        )
    }
}

impl From<PropertyError> for ExecutorError {
    fn from(e: PropertyError) -> Self {
        match e {
            PropertyError::Cancelled(_) => ExecutorError::Cancelled,
            PropertyError::ResolutionFailed { .. } => {
                ExecutorError::PropertyResolution(e.to_string())
            }
            other => ExecutorError::Configuration(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
