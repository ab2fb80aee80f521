//! 执行上下文
//!
//! 一次用例执行独占的可变状态: 国家 / 环境 / 系统、库步骤调用栈、
//! 动作产生的变量、已解析属性的缓存以及停止标志。

use std::collections::{BTreeSet, HashMap};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 调用栈帧 (顶层用例或一次库步骤调用)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub test: String,
    pub testcase: String,
}

impl Frame {
    pub fn new(test: impl Into<String>, testcase: impl Into<String>) -> Self {
        Self {
            test: test.into(),
            testcase: testcase.into(),
        }
    }

    pub fn label(&self) -> String {
        format!("{}/{}", self.test, self.testcase)
    }
}

type Scope = (String, String);

pub struct ExecutionContext {
    execution_id: String,

    pub country: String,
    pub environment: String,
    pub system: String,

    /// 调用栈，第一个元素为顶层用例
    frames: Vec<Frame>,

    /// 当前步骤的循环序号
    step_index: u32,

    variables: HashMap<String, String>,

    /// 本次执行内已解析的属性值 (按作用域与属性名)
    properties: HashMap<(String, String, String), String>,

    /// 各作用域下已定义的属性名
    defined: HashMap<Scope, BTreeSet<String>>,

    stopped: bool,

    cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(
        test: impl Into<String>,
        testcase: impl Into<String>,
        country: impl Into<String>,
        environment: impl Into<String>,
        system: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            country: country.into(),
            environment: environment.into(),
            system: system.into(),
            frames: vec![Frame::new(test, testcase)],
            step_index: 0,
            variables: HashMap::new(),
            properties: HashMap::new(),
            defined: HashMap::new(),
            stopped: false,
            cancel,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    // ============================================
    // 调用栈
    // ============================================

    /// 顶层用例
    pub fn root(&self) -> &Frame {
        &self.frames[0]
    }

    /// 当前正在执行的用例 (库步骤内为被调用的用例)
    pub fn current(&self) -> &Frame {
        self.frames.last().unwrap_or(&self.frames[0])
    }

    /// 库步骤调用深度，顶层为 0
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    /// 调用路径，例如 `T1/TC1 -> LIB/Login`
    pub fn call_path(&self) -> String {
        self.frames
            .iter()
            .map(Frame::label)
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    pub fn step_index(&self) -> u32 {
        self.step_index
    }

    pub fn set_step_index(&mut self, index: u32) {
        self.step_index = index;
    }

    // ============================================
    // 变量
    // ============================================

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn variables(&self) -> &HashMap<String, String> {
        &self.variables
    }

    // ============================================
    // 属性
    // ============================================

    /// 登记某个用例下已定义的属性名
    pub fn set_defined_properties<I>(&mut self, test: &str, testcase: &str, names: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.defined
            .insert((test.to_string(), testcase.to_string()), names.into_iter().collect());
    }

    pub fn has_defined_properties(&self, test: &str, testcase: &str) -> bool {
        self.defined
            .contains_key(&(test.to_string(), testcase.to_string()))
    }

    /// 属性的解析作用域: 顶层用例的定义优先，其次为当前用例
    pub fn property_scope(&self, name: &str) -> Option<&Frame> {
        [self.root(), self.current()].into_iter().find(|frame| {
            self.defined
                .get(&(frame.test.clone(), frame.testcase.clone()))
                .map(|names| names.contains(name))
                .unwrap_or(false)
        })
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property_scope(name).is_some()
    }

    pub fn memoized_property(&self, scope: &Frame, name: &str) -> Option<&str> {
        self.properties
            .get(&(scope.test.clone(), scope.testcase.clone(), name.to_string()))
            .map(String::as_str)
    }

    pub fn memoize_property(&mut self, scope: &Frame, name: &str, value: impl Into<String>) {
        self.properties.insert(
            (scope.test.clone(), scope.testcase.clone(), name.to_string()),
            value.into(),
        );
    }

    // ============================================
    // 停止与取消
    // ============================================

    /// 设置停止标志，后续步骤不再执行
    pub fn request_stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("T1", "TC1", "FR", "QA", "WEB", CancellationToken::new())
    }

    #[test]
    fn test_frames_and_call_path() {
        let mut ctx = ctx();
        assert_eq!(ctx.depth(), 0);
        ctx.push_frame(Frame::new("LIB", "Login"));
        assert_eq!(ctx.depth(), 1);
        assert_eq!(ctx.current().testcase, "Login");
        assert_eq!(ctx.call_path(), "T1/TC1 -> LIB/Login");

        assert!(ctx.pop_frame().is_some());
        assert!(ctx.pop_frame().is_none());
        assert_eq!(ctx.current().testcase, "TC1");
    }

    #[test]
    fn test_property_scope_prefers_root() {
        let mut ctx = ctx();
        ctx.set_defined_properties("T1", "TC1", ["USER".to_string()]);
        ctx.set_defined_properties("LIB", "Login", ["USER".to_string(), "PASSWORD".to_string()]);
        ctx.push_frame(Frame::new("LIB", "Login"));

        assert_eq!(ctx.property_scope("USER").unwrap().testcase, "TC1");
        assert_eq!(ctx.property_scope("PASSWORD").unwrap().testcase, "Login");
        assert!(!ctx.has_property("MISSING"));
    }

    #[test]
    fn test_variables_and_memo() {
        let mut ctx = ctx();
        ctx.set_variable("orderId", "42");
        assert_eq!(ctx.variable("orderId"), Some("42"));

        let scope = ctx.root().clone();
        assert!(ctx.memoized_property(&scope, "P").is_none());
        ctx.memoize_property(&scope, "P", "v");
        assert_eq!(ctx.memoized_property(&scope, "P"), Some("v"));
    }

    #[test]
    fn test_stop_flag() {
        let mut ctx = ctx();
        assert!(!ctx.is_stopped());
        ctx.request_stop();
        assert!(ctx.is_stopped());
        assert!(!ctx.execution_id().is_empty());
    }
}
