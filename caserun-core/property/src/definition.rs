//! 属性定义

use serde::{Deserialize, Serialize};

/// 属性取值方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PropertyNature {
    /// 静态值 (直接使用 value1)
    #[default]
    Static,
    /// 引用另一个属性 (value1 为属性名)
    Property,
    /// SQL 查询 (database 为数据源，value1 为查询语句)
    Sql,
    /// 外部服务调用 (database 为服务名，value1 为请求)
    Service,
    /// 测试数据库 (value1 为数据库条目名)
    DataLib,
}

impl PropertyNature {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyNature::Static => "static",
            PropertyNature::Property => "property",
            PropertyNature::Sql => "sql",
            PropertyNature::Service => "service",
            PropertyNature::DataLib => "dataLib",
        }
    }

    /// 是否需要外部数据源
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            PropertyNature::Sql | PropertyNature::Service | PropertyNature::DataLib
        )
    }
}

/// 属性定义 (外部拥有，对引擎只读)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDefinition {
    /// 所属测试 (在用例文件中可省略，由所属用例补全)
    #[serde(default)]
    pub test: String,

    #[serde(default)]
    pub testcase: String,

    /// 国家 (空字符串表示通配所有国家)
    #[serde(default)]
    pub country: String,

    /// 属性名
    pub property: String,

    #[serde(default)]
    pub description: Option<String>,

    /// 原始类型标签 (仅用于报告)
    #[serde(default, rename = "type")]
    pub kind: Option<String>,

    /// 数据源定位 (数据库/服务名)
    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub value1: String,

    #[serde(default)]
    pub value2: String,

    /// 期望值长度 (0 表示不限制)
    #[serde(default)]
    pub length: usize,

    /// 行数限制 (0 表示不限制)
    #[serde(default)]
    pub row_limit: usize,

    #[serde(default)]
    pub nature: PropertyNature,

    /// 缓存过期时间（秒），0 表示不缓存
    #[serde(default)]
    pub cache_expire: u64,

    /// 重试次数
    #[serde(default)]
    pub retry_nb: u32,

    /// 重试间隔（毫秒）
    #[serde(default)]
    pub retry_period: u64,

    /// 同名定义之间的排序 (数值越小越优先)
    #[serde(default)]
    pub rank: i32,
}

impl PropertyDefinition {
    /// 创建静态属性定义
    pub fn new_static(
        test: impl Into<String>,
        testcase: impl Into<String>,
        country: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            test: test.into(),
            testcase: testcase.into(),
            country: country.into(),
            property: property.into(),
            description: None,
            kind: None,
            database: None,
            value1: value.into(),
            value2: String::new(),
            length: 0,
            row_limit: 0,
            nature: PropertyNature::Static,
            cache_expire: 0,
            retry_nb: 0,
            retry_period: 0,
            rank: 0,
        }
    }

    pub fn with_nature(mut self, nature: PropertyNature) -> Self {
        self.nature = nature;
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_cache_expire(mut self, seconds: u64) -> Self {
        self.cache_expire = seconds;
        self
    }

    pub fn with_retry(mut self, retry_nb: u32, retry_period_ms: u64) -> Self {
        self.retry_nb = retry_nb;
        self.retry_period = retry_period_ms;
        self
    }

    pub fn with_rank(mut self, rank: i32) -> Self {
        self.rank = rank;
        self
    }

    /// 是否为通配国家定义
    pub fn is_wildcard(&self) -> bool {
        self.country.is_empty()
    }

    /// 数据源标识，用作缓存失效前缀
    ///
    /// 格式: `{nature}:{locator}/`
    pub fn source_prefix(&self) -> String {
        let locator = match self.nature {
            PropertyNature::DataLib | PropertyNature::Property => self.value1.as_str(),
            PropertyNature::Sql | PropertyNature::Service => {
                self.database.as_deref().unwrap_or_default()
            }
            PropertyNature::Static => self.property.as_str(),
        };
        source_prefix(self.nature, locator)
    }
}

/// 构造数据源前缀
pub fn source_prefix(nature: PropertyNature, locator: &str) -> String {
    format!("{}:{}/", nature.as_str(), locator)
}

/// 从候选定义中选出最匹配的一条
///
/// 全序: 国家精确匹配 > 通配国家，其次 rank 升序，最后按出现顺序。
/// 只考虑 test/testcase 自身的定义，不继承依赖用例的属性。
pub fn select_definition<'a>(
    definitions: &'a [PropertyDefinition],
    test: &str,
    testcase: &str,
    country: &str,
    property: &str,
) -> Option<&'a PropertyDefinition> {
    definitions
        .iter()
        .enumerate()
        .filter(|(_, d)| d.test == test && d.testcase == testcase && d.property == property)
        .filter(|(_, d)| d.country == country || d.is_wildcard())
        .min_by_key(|(position, d)| (d.is_wildcard(), d.rank, *position))
        .map(|(_, d)| d)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(country: &str, value: &str) -> PropertyDefinition {
        PropertyDefinition::new_static("T1", "TC1", country, "BASE_URL", value)
    }

    #[test]
    fn test_exact_country_preferred_over_wildcard() {
        let defs = vec![def("", "wild"), def("FR", "france")];
        let selected = select_definition(&defs, "T1", "TC1", "FR", "BASE_URL").unwrap();
        assert_eq!(selected.value1, "france");
    }

    #[test]
    fn test_wildcard_used_when_no_exact_match() {
        let defs = vec![def("", "wild"), def("FR", "france")];
        let selected = select_definition(&defs, "T1", "TC1", "DE", "BASE_URL").unwrap();
        assert_eq!(selected.value1, "wild");
    }

    #[test]
    fn test_rank_breaks_tie_then_position() {
        let defs = vec![
            def("FR", "first").with_rank(2),
            def("FR", "second").with_rank(1),
            def("FR", "third").with_rank(1),
        ];
        let selected = select_definition(&defs, "T1", "TC1", "FR", "BASE_URL").unwrap();
        assert_eq!(selected.value1, "second");
    }

    #[test]
    fn test_other_testcase_definitions_not_inherited() {
        let defs = vec![PropertyDefinition::new_static("T1", "DEP", "FR", "BASE_URL", "dep")];
        assert!(select_definition(&defs, "T1", "TC1", "FR", "BASE_URL").is_none());
    }

    #[test]
    fn test_source_prefix() {
        let d = def("FR", "OLD_LIB").with_nature(PropertyNature::DataLib);
        assert_eq!(d.source_prefix(), "dataLib:OLD_LIB/");

        let d = def("FR", "select 1")
            .with_nature(PropertyNature::Sql)
            .with_database("crm");
        assert_eq!(d.source_prefix(), "sql:crm/");
    }

    #[test]
    fn test_definition_from_json() {
        let json = r#"{
            "test": "T1",
            "testcase": "TC1",
            "country": "FR",
            "property": "BASE_URL",
            "nature": "dataLib",
            "value1": "URLS",
            "cacheExpire": 60,
            "retryNb": 2,
            "retryPeriod": 500
        }"#;
        let d: PropertyDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(d.nature, PropertyNature::DataLib);
        assert_eq!(d.cache_expire, 60);
        assert_eq!(d.retry_nb, 2);
        assert_eq!(d.retry_period, 500);
        assert_eq!(d.rank, 0);
    }
}
