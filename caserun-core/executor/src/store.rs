//! 用例定义存储
//!
//! 引擎只读取定义；[`FileDefinitionStore`] 从 YAML / JSON 用例文件加载，
//! 同时作为属性定义存储供属性解析器使用。

use async_trait::async_trait;
use caserun_property::{PropertyDefinition, PropertyDefinitionStore, PropertyError, PropertyNature};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::info;

use crate::definition::{
    ActionDefinition, ControlDefinition, StepDefinition, Suite, TestCaseDefinition,
};
use crate::{ExecutorError, Result};

/// 用例定义存储 (只读)
///
/// 返回的步骤 / 动作 / 控制均已按 (sort, id) 排序。
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// 用例描述，用例不存在时返回配置错误
    async fn get_description(&self, test: &str, testcase: &str) -> Result<Option<String>>;

    async fn get_steps(&self, test: &str, testcase: &str) -> Result<Vec<StepDefinition>>;

    async fn get_actions(
        &self,
        test: &str,
        testcase: &str,
        step_id: u32,
    ) -> Result<Vec<ActionDefinition>>;

    async fn get_controls(
        &self,
        test: &str,
        testcase: &str,
        step_id: u32,
        action_id: u32,
    ) -> Result<Vec<ControlDefinition>>;
}

/// 基于用例文件的定义存储
pub struct FileDefinitionStore {
    suite: RwLock<Suite>,
}

impl FileDefinitionStore {
    pub fn new(mut suite: Suite) -> Result<Self> {
        suite.validate()?;

        // 用例文件中的属性可省略 test/testcase
        for tc in &mut suite.testcases {
            for property in &mut tc.properties {
                if property.test.is_empty() {
                    property.test = tc.test.clone();
                }
                if property.testcase.is_empty() {
                    property.testcase = tc.testcase.clone();
                }
            }
        }

        info!(
            "加载用例集 {}: {} 个用例",
            suite.name.as_deref().unwrap_or("-"),
            suite.testcases.len()
        );
        Ok(Self {
            suite: RwLock::new(suite),
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(Suite::from_file(path)?)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Self::new(Suite::from_yaml_str(yaml)?)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::new(Suite::from_json_str(json)?)
    }

    /// 列出所有 (test, testcase)
    pub async fn testcases(&self) -> Vec<(String, String)> {
        self.suite
            .read()
            .await
            .testcases
            .iter()
            .map(|tc| (tc.test.clone(), tc.testcase.clone()))
            .collect()
    }

    async fn with_testcase<T, F>(&self, test: &str, testcase: &str, f: F) -> Result<T>
    where
        F: FnOnce(&TestCaseDefinition) -> Result<T>,
    {
        let suite = self.suite.read().await;
        let tc = suite
            .testcases
            .iter()
            .find(|tc| tc.test == test && tc.testcase == testcase)
            .ok_or_else(|| {
                ExecutorError::Configuration(format!("用例不存在: {}/{}", test, testcase))
            })?;
        f(tc)
    }
}

fn find_step(tc: &TestCaseDefinition, step_id: u32) -> Result<&StepDefinition> {
    tc.steps
        .iter()
        .find(|s| s.step_id == step_id)
        .ok_or_else(|| {
            ExecutorError::Configuration(format!(
                "步骤不存在: {}/{} 步骤 {}",
                tc.test, tc.testcase, step_id
            ))
        })
}

#[async_trait]
impl DefinitionStore for FileDefinitionStore {
    async fn get_description(&self, test: &str, testcase: &str) -> Result<Option<String>> {
        self.with_testcase(test, testcase, |tc| Ok(tc.description.clone()))
            .await
    }

    async fn get_steps(&self, test: &str, testcase: &str) -> Result<Vec<StepDefinition>> {
        self.with_testcase(test, testcase, |tc| {
            let mut steps = tc.steps.clone();
            steps.sort_by_key(|s| (s.sort, s.step_id));
            Ok(steps)
        })
        .await
    }

    async fn get_actions(
        &self,
        test: &str,
        testcase: &str,
        step_id: u32,
    ) -> Result<Vec<ActionDefinition>> {
        self.with_testcase(test, testcase, |tc| {
            let mut actions = find_step(tc, step_id)?.actions.clone();
            actions.sort_by_key(|a| (a.sort, a.action_id));
            Ok(actions)
        })
        .await
    }

    async fn get_controls(
        &self,
        test: &str,
        testcase: &str,
        step_id: u32,
        action_id: u32,
    ) -> Result<Vec<ControlDefinition>> {
        self.with_testcase(test, testcase, |tc| {
            let action = find_step(tc, step_id)?
                .actions
                .iter()
                .find(|a| a.action_id == action_id)
                .ok_or_else(|| {
                    ExecutorError::Configuration(format!(
                        "动作不存在: {}/{} 步骤 {} 动作 {}",
                        test, testcase, step_id, action_id
                    ))
                })?;
            let mut controls = action.controls.clone();
            controls.sort_by_key(|c| (c.sort, c.control_id));
            Ok(controls)
        })
        .await
    }
}

#[async_trait]
impl PropertyDefinitionStore for FileDefinitionStore {
    async fn property_definitions(
        &self,
        test: &str,
        testcase: &str,
    ) -> caserun_property::Result<Vec<PropertyDefinition>> {
        let suite = self.suite.read().await;
        let tc = suite
            .testcases
            .iter()
            .find(|tc| tc.test == test && tc.testcase == testcase)
            .ok_or_else(|| PropertyError::Store(format!("用例不存在: {}/{}", test, testcase)))?;
        Ok(tc.properties.clone())
    }

    async fn rename_data_lib(&self, old: &str, new: &str) -> caserun_property::Result<usize> {
        let mut suite = self.suite.write().await;
        let mut count = 0;
        for property in suite
            .testcases
            .iter_mut()
            .flat_map(|tc| tc.properties.iter_mut())
            .filter(|p| p.nature == PropertyNature::DataLib && p.value1 == old)
        {
            property.value1 = new.to_string();
            count += 1;
        }
        Ok(count)
    }
}
