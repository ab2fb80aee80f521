//! CaseRun 存储层
//!
//! 用例执行结果的 SQLite 持久化

mod connection;
mod error;
mod models;
mod repositories;

pub use connection::{StorageManager, StorageOptions, SCHEMA_VERSION};
pub use error::{Result, StorageError};
pub use models::*;
pub use repositories::*;

use sqlx::SqlitePool;

/// 统一的数据访问层入口
pub struct Storage {
    pool: SqlitePool,
    reports: ReportRepository,
}

impl Storage {
    /// 从 StorageManager 创建 Storage
    pub fn from_manager(manager: &StorageManager) -> Self {
        let pool = manager.pool().clone();
        Self {
            pool: pool.clone(),
            reports: ReportRepository::new(pool),
        }
    }

    /// 获取报告仓储
    pub fn reports(&self) -> &ReportRepository {
        &self.reports
    }

    /// 获取数据库连接池
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
