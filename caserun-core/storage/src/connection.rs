use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, StorageError};

/// 当前结果库的 schema 版本，记录在 `PRAGMA user_version` 中
pub const SCHEMA_VERSION: i64 = 1;

const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../migrations/001_initial.sql"))];

// ============================================
// 连接参数
// ============================================

/// 结果库连接参数
#[derive(Debug, Clone, PartialEq)]
pub struct StorageOptions {
    /// 数据库文件路径 (支持 `~` 展开)
    pub path: String,
    /// 连接池上限
    pub max_connections: u32,
    /// 写锁等待时间
    pub busy_timeout: Duration,
}

impl StorageOptions {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// 展开后的数据库文件路径
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).as_ref())
    }
}

// ============================================
// 存储管理器
// ============================================

/// 持有结果库连接池，打开时补齐缺失的 schema 版本
pub struct StorageManager {
    pool: SqlitePool,
}

impl StorageManager {
    /// 打开 (必要时创建) 结果库
    ///
    /// ```no_run
    /// # use caserun_storage::{StorageManager, StorageOptions};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let options = StorageOptions::new("~/.config/caserun/data.db").with_max_connections(2);
    /// let storage = StorageManager::open(&options).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn open(options: &StorageOptions) -> Result<Self> {
        if options.max_connections == 0 {
            return Err(StorageError::ConnectionError(
                "max_connections must be at least 1".to_string(),
            ));
        }

        let path = options.resolved_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::ConnectionError(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        info!(
            "Opening result database at {} (max_connections={}, busy_timeout={:?})",
            path.display(),
            options.max_connections,
            options.busy_timeout
        );

        let connect = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(options.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect)
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;

        Self::migrated(pool).await
    }

    /// 内存结果库，仅在单个连接内可见
    pub async fn new_in_memory() -> Result<Self> {
        let connect = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect)
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;

        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self> {
        let manager = Self { pool };
        manager.migrate().await?;
        Ok(manager)
    }

    /// 依次应用高于当前 `user_version` 的迁移，每个版本一个事务
    async fn migrate(&self) -> Result<()> {
        let current = self.schema_version().await?;
        if current > SCHEMA_VERSION {
            return Err(StorageError::MigrationError(format!(
                "database schema version {} is newer than supported version {}",
                current, SCHEMA_VERSION
            )));
        }

        for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
            info!("Applying result schema version {}", version);

            let mut tx = self.pool.begin().await?;
            sqlx::query(sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::MigrationError(format!("v{}: {}", version, e)))?;
            // PRAGMA 不支持参数绑定
            sqlx::query(&format!("PRAGMA user_version = {}", version))
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }

        debug!("Result schema is at version {}", SCHEMA_VERSION);
        Ok(())
    }

    /// 数据库中记录的 schema 版本
    pub async fn schema_version(&self) -> Result<i64> {
        let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_schema() {
        let storage = StorageManager::new_in_memory().await.unwrap();
        assert_eq!(storage.schema_version().await.unwrap(), SCHEMA_VERSION);

        for table in ["execution_runs", "step_executions"] {
            let result: (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
            )
            .bind(table)
            .fetch_one(storage.pool())
            .await
            .unwrap();

            assert_eq!(result.0, 1, "{} table should exist", table);
        }
    }

    #[tokio::test]
    async fn test_open_creates_nested_file_with_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/data.db");
        let options = StorageOptions::new(path.to_str().unwrap()).with_max_connections(2);

        let storage = StorageManager::open(&options).await.unwrap();
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(storage.pool())
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        storage.close().await;

        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let options = StorageOptions::new(dir.path().join("data.db").to_str().unwrap());

        let storage = StorageManager::open(&options).await.unwrap();
        sqlx::query(
            "INSERT INTO execution_runs (execution_id, test, testcase, country, environment, system, \
             start_time, end_time, duration_ms, return_code, message, created_at) \
             VALUES ('e1', 'T', 'TC', 'FR', 'QA', 'S', 'a', 'b', 0, 'OK', 'ok', 'c')",
        )
        .execute(storage.pool())
        .await
        .unwrap();
        storage.close().await;

        let reopened = StorageManager::open(&options).await.unwrap();
        assert_eq!(reopened.schema_version().await.unwrap(), SCHEMA_VERSION);
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM execution_runs")
            .fetch_one(reopened.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_newer_schema_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let options = StorageOptions::new(dir.path().join("data.db").to_str().unwrap());

        let storage = StorageManager::open(&options).await.unwrap();
        sqlx::query("PRAGMA user_version = 99")
            .execute(storage.pool())
            .await
            .unwrap();
        storage.close().await;

        let err = StorageManager::open(&options).await.err().unwrap();
        assert!(matches!(err, StorageError::MigrationError(_)));
    }

    #[tokio::test]
    async fn test_zero_connections_rejected() {
        let options = StorageOptions::new("unused.db").with_max_connections(0);
        let err = StorageManager::open(&options).await.err().unwrap();
        assert!(matches!(err, StorageError::ConnectionError(_)));
    }
}
