//! 测试用例定义

use caserun_property::PropertyDefinition;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::condition::ConditionOperator;
use crate::control::ControlType;
use crate::{ExecutorError, Result};

/// 条件选项 (随执行记录保存并传递给动作执行器)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionOption {
    #[serde(default)]
    pub option: String,

    #[serde(default)]
    pub act: String,

    #[serde(default)]
    pub value: String,
}

/// 执行条件
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub operator: ConditionOperator,

    #[serde(default)]
    pub value1: String,

    #[serde(default)]
    pub value2: String,

    #[serde(default)]
    pub value3: String,

    #[serde(default)]
    pub options: Vec<ConditionOption>,
}

impl Condition {
    pub fn new(operator: ConditionOperator) -> Self {
        Self {
            operator,
            ..Default::default()
        }
    }

    pub fn with_values(
        mut self,
        value1: impl Into<String>,
        value2: impl Into<String>,
        value3: impl Into<String>,
    ) -> Self {
        self.value1 = value1.into();
        self.value2 = value2.into();
        self.value3 = value3.into();
        self
    }
}

/// 步骤循环方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum LoopKind {
    /// 条件为真时执行一次 (默认)
    #[default]
    OnceIfConditionTrue,
    /// 条件为假时执行一次
    OnceIfConditionFalse,
    /// 先执行，条件为真时继续
    DoWhileConditionTrue,
    /// 先执行，条件为假时继续
    DoWhileConditionFalse,
    /// 条件为真时执行，再次判断
    WhileConditionTrueDo,
    /// 条件为假时执行，再次判断
    WhileConditionFalseDo,
}

impl LoopKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopKind::OnceIfConditionTrue => "onceIfConditionTrue",
            LoopKind::OnceIfConditionFalse => "onceIfConditionFalse",
            LoopKind::DoWhileConditionTrue => "doWhileConditionTrue",
            LoopKind::DoWhileConditionFalse => "doWhileConditionFalse",
            LoopKind::WhileConditionTrueDo => "whileConditionTrueDo",
            LoopKind::WhileConditionFalseDo => "whileConditionFalseDo",
        }
    }

    /// 条件需要得到的结果
    pub fn expected(&self) -> bool {
        matches!(
            self,
            LoopKind::OnceIfConditionTrue
                | LoopKind::DoWhileConditionTrue
                | LoopKind::WhileConditionTrueDo
        )
    }

    /// 是否可重复执行
    pub fn repeats(&self) -> bool {
        !matches!(
            self,
            LoopKind::OnceIfConditionTrue | LoopKind::OnceIfConditionFalse
        )
    }

    /// 第一次执行前是否判断条件
    pub fn checks_before_first(&self) -> bool {
        !matches!(
            self,
            LoopKind::DoWhileConditionTrue | LoopKind::DoWhileConditionFalse
        )
    }
}

/// 库步骤引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryStepRef {
    pub test: String,

    pub testcase: String,

    /// 被调用用例中的步骤号，为空时执行全部步骤
    #[serde(default)]
    pub step: Option<u32>,
}

/// 控制 (断言) 定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlDefinition {
    pub control_id: u32,

    #[serde(default)]
    pub sort: i32,

    #[serde(default)]
    pub description: String,

    pub control: ControlType,

    #[serde(default)]
    pub value1: String,

    #[serde(default)]
    pub value2: String,

    #[serde(default)]
    pub value3: String,

    #[serde(default)]
    pub options: Vec<ConditionOption>,

    #[serde(default)]
    pub condition: Condition,

    /// 失败时是否停止后续执行
    #[serde(default)]
    pub fatal: bool,
}

/// 动作定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefinition {
    pub action_id: u32,

    #[serde(default)]
    pub sort: i32,

    #[serde(default)]
    pub description: String,

    /// 动作类型 (由动作执行器解释)
    pub action: String,

    #[serde(default)]
    pub value1: String,

    #[serde(default)]
    pub value2: String,

    #[serde(default)]
    pub value3: String,

    #[serde(default)]
    pub options: Vec<ConditionOption>,

    #[serde(default)]
    pub condition: Condition,

    /// 执行器失败时是否记为致命
    #[serde(default)]
    pub fatal: bool,

    /// 动作产生的值绑定到的变量名
    #[serde(default)]
    pub output_variable: Option<String>,

    #[serde(default)]
    pub controls: Vec<ControlDefinition>,
}

/// 步骤定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub step_id: u32,

    #[serde(default)]
    pub sort: i32,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub condition: Condition,

    #[serde(default, rename = "loop")]
    pub loop_kind: LoopKind,

    /// 库步骤引用 (存在时不执行自身的动作)
    #[serde(default)]
    pub library: Option<LibraryStepRef>,

    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
}

/// 测试用例定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseDefinition {
    pub test: String,

    pub testcase: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub steps: Vec<StepDefinition>,

    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
}

/// 用例集 (用例文件的顶层结构)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suite {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    pub testcases: Vec<TestCaseDefinition>,
}

impl Suite {
    /// 根据扩展名加载用例文件 (yaml / yml / json)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            Some("json") => Self::from_json_str(&content),
            _ => Err(ExecutorError::Configuration(format!(
                "不支持的用例文件格式: {}",
                path.display()
            ))),
        }
    }

    /// 从 YAML 字符串加载用例集
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| ExecutorError::Serde(e.to_string()))
    }

    /// 从 JSON 字符串加载用例集
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ExecutorError::Serde(e.to_string()))
    }

    /// 导出为 YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ExecutorError::Serde(e.to_string()))
    }

    /// 导出为 JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ExecutorError::Serde(e.to_string()))
    }

    /// 校验用例集: 同一用例内步骤号 / 动作号 / 控制号不得重复
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for tc in &self.testcases {
            if !seen.insert((tc.test.as_str(), tc.testcase.as_str())) {
                return Err(ExecutorError::Configuration(format!(
                    "用例重复定义: {}/{}",
                    tc.test, tc.testcase
                )));
            }

            let mut steps = std::collections::HashSet::new();
            for step in &tc.steps {
                if !steps.insert(step.step_id) {
                    return Err(ExecutorError::Configuration(format!(
                        "用例 {}/{} 的步骤号重复: {}",
                        tc.test, tc.testcase, step.step_id
                    )));
                }

                let mut actions = std::collections::HashSet::new();
                for action in &step.actions {
                    if !actions.insert(action.action_id) {
                        return Err(ExecutorError::Configuration(format!(
                            "用例 {}/{} 步骤 {} 的动作号重复: {}",
                            tc.test, tc.testcase, step.step_id, action.action_id
                        )));
                    }

                    let mut controls = std::collections::HashSet::new();
                    for control in &action.controls {
                        if !controls.insert(control.control_id) {
                            return Err(ExecutorError::Configuration(format!(
                                "用例 {}/{} 步骤 {} 动作 {} 的控制号重复: {}",
                                tc.test,
                                tc.testcase,
                                step.step_id,
                                action.action_id,
                                control.control_id
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
