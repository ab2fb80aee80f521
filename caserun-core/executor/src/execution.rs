//! 执行记录
//!
//! 每次执行都生成一棵结果树: 用例 → 步骤 (含库步骤的嵌套步骤) → 动作 → 控制。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::condition::ConditionOperator;
use crate::definition::{
    ActionDefinition, Condition, ConditionOption, ControlDefinition, LibraryStepRef, LoopKind,
    StepDefinition,
};
use crate::return_code::ReturnCode;
use crate::{ExecutorError, Result};

/// 条件记录 (配置值与替换后的值)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionRecord {
    pub operator: ConditionOperator,

    pub value1_init: String,
    pub value2_init: String,
    pub value3_init: String,

    pub value1: String,
    pub value2: String,
    pub value3: String,

    pub options: Vec<ConditionOption>,
}

impl ConditionRecord {
    pub fn from_definition(condition: &Condition) -> Self {
        Self {
            operator: condition.operator,
            value1_init: condition.value1.clone(),
            value2_init: condition.value2.clone(),
            value3_init: condition.value3.clone(),
            value1: condition.value1.clone(),
            value2: condition.value2.clone(),
            value3: condition.value3.clone(),
            options: condition.options.clone(),
        }
    }
}

/// 控制执行记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlExecution {
    pub control_id: u32,
    pub sort: i32,
    pub description: String,
    pub control: String,

    pub value1_init: String,
    pub value2_init: String,
    pub value3_init: String,
    pub value1: String,
    pub value2: String,
    pub value3: String,
    pub options: Vec<ConditionOption>,

    pub condition: ConditionRecord,

    pub fatal: bool,

    /// 致命失败，要求停止后续执行
    pub stop: bool,

    pub code: ReturnCode,
    pub message: String,

    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ControlExecution {
    pub fn start(control: &ControlDefinition) -> Self {
        let now = Utc::now();
        Self {
            control_id: control.control_id,
            sort: control.sort,
            description: control.description.clone(),
            control: control.control.as_str().to_string(),
            value1_init: control.value1.clone(),
            value2_init: control.value2.clone(),
            value3_init: control.value3.clone(),
            value1: control.value1.clone(),
            value2: control.value2.clone(),
            value3: control.value3.clone(),
            options: control.options.clone(),
            condition: ConditionRecord::from_definition(&control.condition),
            fatal: control.fatal,
            stop: false,
            code: ReturnCode::Pending,
            message: String::new(),
            start: now,
            end: now,
        }
    }

    pub fn not_executed(control: &ControlDefinition, reason: &str) -> Self {
        let mut record = Self::start(control);
        record.finish(ReturnCode::NotExecuted, reason);
        record
    }

    pub fn finish(&mut self, code: ReturnCode, message: impl Into<String>) {
        self.code = code;
        self.message = message.into();
        self.end = Utc::now();
    }
}

/// 动作执行记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionExecution {
    pub action_id: u32,
    pub sort: i32,
    pub description: String,
    pub action: String,

    pub value1_init: String,
    pub value2_init: String,
    pub value3_init: String,
    pub value1: String,
    pub value2: String,
    pub value3: String,
    pub options: Vec<ConditionOption>,

    pub condition: ConditionRecord,

    pub fatal: bool,

    /// 动作或其控制的致命失败，要求停止后续执行
    pub stop: bool,

    pub code: ReturnCode,
    pub message: String,

    /// 动作产生的值
    pub value: Option<String>,

    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,

    pub controls: Vec<ControlExecution>,
}

impl ActionExecution {
    pub fn start(action: &ActionDefinition) -> Self {
        let now = Utc::now();
        Self {
            action_id: action.action_id,
            sort: action.sort,
            description: action.description.clone(),
            action: action.action.clone(),
            value1_init: action.value1.clone(),
            value2_init: action.value2.clone(),
            value3_init: action.value3.clone(),
            value1: action.value1.clone(),
            value2: action.value2.clone(),
            value3: action.value3.clone(),
            options: action.options.clone(),
            condition: ConditionRecord::from_definition(&action.condition),
            fatal: action.fatal,
            stop: false,
            code: ReturnCode::Pending,
            message: String::new(),
            value: None,
            start: now,
            end: now,
            controls: Vec::new(),
        }
    }

    pub fn not_executed(action: &ActionDefinition, reason: &str) -> Self {
        let mut record = Self::start(action);
        record.finish(ReturnCode::NotExecuted, reason);
        record
    }

    pub fn finish(&mut self, code: ReturnCode, message: impl Into<String>) {
        self.code = code;
        self.message = message.into();
        self.end = Utc::now();
    }
}

/// 库步骤调用信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryCall {
    pub test: String,
    pub testcase: String,

    /// 被调用用例中的步骤号
    pub step: Option<u32>,

    /// 发起调用的步骤号
    pub caller_step: u32,
}

/// 步骤执行记录
///
/// 时间满足 `full_start <= start <= end <= full_end`，
/// 只有库步骤的 `full_end` 会覆盖整个嵌套执行。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub test: String,
    pub testcase: String,
    pub step_id: u32,

    /// 循环序号，从 1 开始
    pub index: u32,
    pub sort: i32,
    pub description: String,

    pub condition: ConditionRecord,

    #[serde(rename = "loop")]
    pub loop_kind: LoopKind,

    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub full_start: DateTime<Utc>,
    pub full_end: DateTime<Utc>,

    pub code: ReturnCode,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<LibraryCall>,

    pub stop: bool,

    pub actions: Vec<ActionExecution>,

    /// 库步骤展开的嵌套步骤
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StepExecution>,
}

impl StepExecution {
    pub fn start(test: &str, testcase: &str, step: &StepDefinition, index: u32) -> Self {
        let now = Utc::now();
        Self {
            test: test.to_string(),
            testcase: testcase.to_string(),
            step_id: step.step_id,
            index,
            sort: step.sort,
            description: step.description.clone(),
            condition: ConditionRecord::from_definition(&step.condition),
            loop_kind: step.loop_kind,
            start: now,
            end: now,
            full_start: now,
            full_end: now,
            code: ReturnCode::Pending,
            message: String::new(),
            library: None,
            stop: false,
            actions: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn not_executed(test: &str, testcase: &str, step: &StepDefinition, reason: &str) -> Self {
        let mut record = Self::start(test, testcase, step, 1);
        record.finish(ReturnCode::NotExecuted, reason);
        record
    }

    /// 中止的步骤: 不保留任何子记录
    pub fn aborted(test: &str, testcase: &str, step: &StepDefinition, reason: &str) -> Self {
        let mut record = Self::start(test, testcase, step, 1);
        record.finish(ReturnCode::Aborted, reason);
        record
    }

    pub fn mark_library_call(&mut self, library: &LibraryStepRef) {
        self.library = Some(LibraryCall {
            test: library.test.clone(),
            testcase: library.testcase.clone(),
            step: library.step,
            caller_step: self.step_id,
        });
        self.end = Utc::now();
    }

    /// 结束步骤，普通步骤的 end 与 full_end 相同
    pub fn finish(&mut self, code: ReturnCode, message: impl Into<String>) {
        let now = Utc::now();
        self.code = code;
        self.message = message.into();
        if self.library.is_none() {
            self.end = now;
        }
        self.full_end = now;
    }

    pub fn is_library_call(&self) -> bool {
        self.library.is_some()
    }

    /// 是否被跳过 (不参与汇总)
    pub fn is_skipped(&self) -> bool {
        matches!(
            self.code,
            ReturnCode::NotApplicable | ReturnCode::NotExecuted
        )
    }

    /// 按执行顺序遍历自身与所有嵌套步骤，附带嵌套层级
    pub fn walk(&self) -> Vec<(usize, &StepExecution)> {
        let mut out = Vec::new();
        self.walk_into(0, &mut out);
        out
    }

    fn walk_into<'a>(&'a self, depth: usize, out: &mut Vec<(usize, &'a StepExecution)>) {
        out.push((depth, self));
        for child in &self.children {
            child.walk_into(depth + 1, out);
        }
    }
}

/// 用例执行结果 (顶层)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseExecution {
    pub execution_id: String,

    pub test: String,
    pub testcase: String,
    pub description: Option<String>,

    pub country: String,
    pub environment: String,
    pub system: String,

    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,

    pub code: ReturnCode,
    pub message: String,

    pub steps: Vec<StepExecution>,
}

impl TestCaseExecution {
    pub fn passed(&self) -> bool {
        self.code == ReturnCode::Ok
    }

    pub fn duration_ms(&self) -> i64 {
        (self.end - self.start).num_milliseconds()
    }

    /// 统计顶层步骤中指定返回码的数量
    pub fn count(&self, code: ReturnCode) -> usize {
        self.steps.iter().filter(|s| s.code == code).count()
    }

    /// 展开整棵步骤树 (执行顺序)
    pub fn flatten_steps(&self) -> Vec<(usize, &StepExecution)> {
        self.steps.iter().flat_map(|s| s.walk()).collect()
    }

    /// 导出为 JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ExecutorError::Serde(e.to_string()))
    }

    /// 导出为 YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ExecutorError::Serde(e.to_string()))
    }
}
