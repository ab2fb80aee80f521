//! CaseRun 属性解析器
//!
//! 按 (test, testcase, country, property) 解析属性值:
//! - 国家精确匹配优先于通配国家 (空字符串)
//! - 按解析参数分键缓存，带过期时间
//! - 易变数据源的有限次重试
//! - 数据库批量重命名时按前缀失效缓存

pub mod cache;
pub mod definition;
pub mod resolver;
pub mod source;

pub use cache::{PropertyCache, ResolutionKey, ResolvedProperty, SlotGuard};
pub use definition::{select_definition, PropertyDefinition, PropertyNature};
pub use resolver::{PropertyRequest, PropertyResolver, DEFAULT_MAX_CHAIN_DEPTH};
pub use source::{FetchError, PropertyDefinitionStore, PropertySource, SourceRequest};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PropertyError {
    #[error("属性未定义: {property} (test={test}, testcase={testcase}, country={country})")]
    NotFound {
        test: String,
        testcase: String,
        country: String,
        property: String,
    },

    #[error("属性定义无效: {0}")]
    InvalidDefinition(String),

    #[error("属性 {property} 解析失败 (共尝试 {attempts} 次): {reason}")]
    ResolutionFailed {
        property: String,
        attempts: u32,
        reason: String,
    },

    #[error("属性解析已取消: {0}")]
    Cancelled(String),

    #[error("属性定义存储错误: {0}")]
    Store(String),
}

impl PropertyError {
    /// 是否属于配置类错误 (缺失或无效的定义)，此类错误会中止整个执行
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PropertyError::NotFound { .. }
                | PropertyError::InvalidDefinition(_)
                | PropertyError::Store(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PropertyError>;
