//! 属性数据源与定义存储接口

use async_trait::async_trait;

use crate::{PropertyDefinition, Result};

/// 数据源取值错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// 暂时性错误，可重试
    Transient(String),
    /// 永久性错误，立即失败
    Permanent(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Transient(msg) => write!(f, "暂时性错误: {}", msg),
            FetchError::Permanent(msg) => write!(f, "{}", msg),
        }
    }
}

/// 一次数据源请求
#[derive(Debug, Clone)]
pub struct SourceRequest<'a> {
    pub definition: &'a PropertyDefinition,
    pub country: &'a str,
    pub args: &'a [String],
}

/// 外部数据源 (SQL / 服务 / 测试数据库)
///
/// 返回的每一行是一个候选值，解析器取第一行。
#[async_trait]
pub trait PropertySource: Send + Sync {
    async fn fetch(&self, request: SourceRequest<'_>) -> std::result::Result<Vec<String>, FetchError>;
}

/// 属性定义存储
#[async_trait]
pub trait PropertyDefinitionStore: Send + Sync {
    /// 获取 test/testcase 自身的属性定义 (不包含依赖用例的定义)
    async fn property_definitions(
        &self,
        test: &str,
        testcase: &str,
    ) -> Result<Vec<PropertyDefinition>>;

    /// 将所有 value1 == old 的测试数据库属性改写为 new，返回改写数量
    async fn rename_data_lib(&self, old: &str, new: &str) -> Result<usize>;
}
