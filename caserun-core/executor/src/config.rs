//! 引擎配置管理
//!
//! 支持从多个源加载配置:
//! - 环境变量 (优先级最高)
//! - 配置文件 (TOML/YAML/JSON)
//! - 默认值 (优先级最低)
//!
//! 配置文件搜索路径 (按优先级):
//! 1. `CASERUN_CONFIG` 环境变量指定的路径
//! 2. `./caserun.toml` / `./caserun.yaml` / `./caserun.json` (当前目录)
//! 3. `~/.config/caserun/config.toml` (用户配置目录)
//! 4. `/etc/caserun/config.toml` (系统配置目录)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use caserun_storage::StorageOptions;

// ============================================
// 核心配置结构
// ============================================

/// 引擎配置 (顶层)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 执行配置
    #[serde(default)]
    pub engine: ExecutionConfig,

    /// 属性解析配置
    #[serde(default)]
    pub property: PropertyConfig,

    /// 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,

    /// 环境配置
    #[serde(default)]
    pub environment: EnvironmentConfig,
}

/// 致命失败后的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// 致命失败后跳过剩余步骤
    #[default]
    StopOnFatal,
    /// 始终执行全部步骤
    Continue,
}

impl std::str::FromStr for StopPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stop_on_fatal" => Ok(StopPolicy::StopOnFatal),
            "continue" => Ok(StopPolicy::Continue),
            other => anyhow::bail!("Unknown stop policy: {}", other),
        }
    }
}

/// 执行配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// 库步骤最大调用层级
    #[serde(default = "default_max_library_depth")]
    pub max_library_depth: usize,

    /// 每个步骤的最大循环次数
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u32,

    #[serde(default)]
    pub stop_policy: StopPolicy,

    /// 单个动作的超时 (秒)
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,
}

/// 属性解析配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyConfig {
    /// 属性引用链的最大深度
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: usize,
}

/// 数据库配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,

    /// 是否保存执行结果
    #[serde(default = "default_db_enabled")]
    pub enabled: bool,

    /// 连接池上限
    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,

    /// 写锁等待时间 (毫秒)
    #[serde(default = "default_db_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl DatabaseConfig {
    /// 转换为结果库连接参数
    pub fn storage_options(&self) -> StorageOptions {
        StorageOptions::new(self.path.clone())
            .with_max_connections(self.max_connections)
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms))
    }
}

/// 环境配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// 日志级别 (debug/info/warn/error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ============================================
// 默认值函数
// ============================================

fn default_max_library_depth() -> usize {
    10
}
fn default_max_loop_iterations() -> u32 {
    20
}
fn default_action_timeout() -> u64 {
    60
}
fn default_max_chain_depth() -> usize {
    caserun_property::DEFAULT_MAX_CHAIN_DEPTH
}
fn default_db_path() -> String {
    "~/.config/caserun/data.db".to_string()
}
fn default_db_enabled() -> bool {
    true
}
fn default_db_max_connections() -> u32 {
    4
}
fn default_db_busy_timeout_ms() -> u64 {
    5000
}
fn default_log_level() -> String {
    "info".to_string()
}

// ============================================
// Default 实现
// ============================================

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_library_depth: default_max_library_depth(),
            max_loop_iterations: default_max_loop_iterations(),
            stop_policy: StopPolicy::default(),
            action_timeout_secs: default_action_timeout(),
        }
    }
}

impl Default for PropertyConfig {
    fn default() -> Self {
        Self {
            max_chain_depth: default_max_chain_depth(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            enabled: default_db_enabled(),
            max_connections: default_db_max_connections(),
            busy_timeout_ms: default_db_busy_timeout_ms(),
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl ExecutionConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

// ============================================
// 配置加载实现
// ============================================

impl EngineConfig {
    /// 从多个源加载配置 (优先级: 环境变量 > 配置文件 > 默认值)
    pub fn load() -> Result<Self> {
        // 1. 从默认值开始
        let mut config = Self::default();

        // 2. 尝试加载配置文件
        if let Some(path) = Self::find_config_file() {
            tracing::debug!("Loading config from: {:?}", path);
            config = Self::load_from_file(&path)?;
        } else {
            tracing::debug!("No config file found, using defaults");
        }

        // 3. 从环境变量覆盖
        config.apply_env_vars()?;
        config.validate()?;

        Ok(config)
    }

    /// 从指定文件加载配置
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        // 根据文件扩展名选择解析器
        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {:?}", path))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {:?}", path))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {:?}", path))?,
            _ => anyhow::bail!("Unsupported config file format: {:?}", path),
        };

        Ok(config)
    }

    /// 查找配置文件 (按优先级搜索)
    fn find_config_file() -> Option<PathBuf> {
        // 1. 环境变量指定的路径
        if let Ok(path) = env::var("CASERUN_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        // 2. 当前目录
        let paths = [
            PathBuf::from("./caserun.toml"),
            PathBuf::from("./caserun.yaml"),
            PathBuf::from("./caserun.json"),
        ];
        if let Some(path) = paths.iter().find(|p| p.exists()) {
            return Some(path.clone());
        }

        // 3. 用户配置目录
        if let Some(home) = dirs::home_dir() {
            let path = home.join(".config/caserun/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        // 4. 系统配置目录 (Linux)
        #[cfg(target_os = "linux")]
        {
            let path = PathBuf::from("/etc/caserun/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// 从环境变量覆盖配置
    fn apply_env_vars(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(depth) = lookup("CASERUN_MAX_LIBRARY_DEPTH") {
            self.engine.max_library_depth = depth
                .parse()
                .context("Invalid CASERUN_MAX_LIBRARY_DEPTH value")?;
        }
        if let Some(max) = lookup("CASERUN_MAX_LOOP_ITERATIONS") {
            self.engine.max_loop_iterations = max
                .parse()
                .context("Invalid CASERUN_MAX_LOOP_ITERATIONS value")?;
        }
        if let Some(policy) = lookup("CASERUN_STOP_POLICY") {
            self.engine.stop_policy = policy.parse()?;
        }
        if let Some(timeout) = lookup("CASERUN_ACTION_TIMEOUT") {
            self.engine.action_timeout_secs = timeout
                .parse()
                .context("Invalid CASERUN_ACTION_TIMEOUT value")?;
        }

        // Database
        if let Some(path) = lookup("CASERUN_DB_PATH") {
            self.database.path = path;
        }
        if let Some(max) = lookup("CASERUN_DB_MAX_CONNECTIONS") {
            self.database.max_connections = max
                .parse()
                .context("Invalid CASERUN_DB_MAX_CONNECTIONS value")?;
        }

        // Environment
        if let Some(level) = lookup("CASERUN_LOG_LEVEL") {
            self.environment.log_level = level;
        }

        Ok(())
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_library_depth == 0 {
            anyhow::bail!("engine.max_library_depth must be at least 1");
        }
        if self.engine.max_loop_iterations == 0 {
            anyhow::bail!("engine.max_loop_iterations must be at least 1");
        }
        if self.engine.action_timeout_secs == 0 {
            anyhow::bail!("engine.action_timeout_secs must be at least 1");
        }
        if self.property.max_chain_depth == 0 {
            anyhow::bail!("property.max_chain_depth must be at least 1");
        }
        if self.database.enabled && self.database.path.is_empty() {
            anyhow::bail!("database.path cannot be empty");
        }
        if self.database.enabled && self.database.max_connections == 0 {
            anyhow::bail!("database.max_connections must be at least 1");
        }

        Ok(())
    }

    /// 保存配置到文件
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        // 确保目录存在
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        // 根据文件扩展名选择格式
        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::to_string_pretty(self).context("Failed to serialize to TOML")?,
            Some("yaml") | Some("yml") => {
                serde_yaml::to_string(self).context("Failed to serialize to YAML")?
            }
            Some("json") => {
                serde_json::to_string_pretty(self).context("Failed to serialize to JSON")?
            }
            _ => anyhow::bail!("Unsupported config file format: {:?}", path),
        };

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.engine.max_library_depth, 10);
        assert_eq!(config.engine.max_loop_iterations, 20);
        assert_eq!(config.engine.stop_policy, StopPolicy::StopOnFatal);
        assert_eq!(config.engine.action_timeout(), Duration::from_secs(60));
        assert_eq!(config.property.max_chain_depth, 10);
        assert_eq!(config.environment.log_level, "info");
        assert!(config.database.enabled);
    }

    #[test]
    fn test_config_serialization() {
        let config = EngineConfig::default();

        // Test TOML
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("stop_policy = \"stop_on_fatal\""));

        // Test JSON
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"max_loop_iterations\": 20"));

        // Test YAML
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("log_level: info"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [engine]
            stop_policy = "continue"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.stop_policy, StopPolicy::Continue);
        assert_eq!(config.engine.max_library_depth, 10);
        assert_eq!(config.database.path, "~/.config/caserun/data.db");
        assert_eq!(config.database.max_connections, 4);
    }

    #[test]
    fn test_database_storage_options() {
        let config: EngineConfig = toml::from_str(
            r#"
            [database]
            path = "/var/lib/caserun/results.db"
            max_connections = 2
            busy_timeout_ms = 250
            "#,
        )
        .unwrap();

        let options = config.database.storage_options();
        assert_eq!(options.path, "/var/lib/caserun/results.db");
        assert_eq!(options.max_connections, 2);
        assert_eq!(options.busy_timeout, Duration::from_millis(250));

        let mut config = EngineConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());
        config.database.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CASERUN_MAX_LIBRARY_DEPTH", "3"),
            ("CASERUN_STOP_POLICY", "continue"),
            ("CASERUN_DB_PATH", "/tmp/caserun.db"),
            ("CASERUN_DB_MAX_CONNECTIONS", "1"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.engine.max_library_depth, 3);
        assert_eq!(config.engine.stop_policy, StopPolicy::Continue);
        assert_eq!(config.database.path, "/tmp/caserun.db");
        assert_eq!(config.database.max_connections, 1);

        let mut config = EngineConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "CASERUN_MAX_LOOP_ITERATIONS").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());

        config.engine.max_library_depth = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.database.path = String::new();
        assert!(config.validate().is_err());
        config.database.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.engine.max_loop_iterations = 5;

        for name in ["config.toml", "config.yaml", "config.json"] {
            let path = dir.path().join("nested").join(name);
            config.save_to_file(&path).unwrap();
            let loaded = EngineConfig::load_from_file(&path).unwrap();
            assert_eq!(loaded, config);
        }

        let bad = dir.path().join("config.ini");
        assert!(config.save_to_file(&bad).is_err());
    }
}
