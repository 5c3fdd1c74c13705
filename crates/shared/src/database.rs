//! 规则库连接
//!
//! 规则持久化使用的 PostgreSQL 连接池。服务启动时连接并确认可查询，
//! 任一步失败都由调用方降级为纯内存模式。

use crate::config::DatabaseConfig;
use crate::error::{Result, SharedError};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::{Duration, Instant};
use tracing::{info, instrument};

/// 规则库连接池
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

/// 按配置构造连接池参数
fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
}

impl Database {
    /// 建立连接池并执行一次查询确认规则库可用
    #[instrument(skip(config))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = pool_options(config).connect(&config.url).await?;
        let db = Self { pool };
        let latency = db.ping().await?;

        info!(
            max_connections = config.max_connections,
            latency_ms = latency.as_millis() as u64,
            "Rule database connected"
        );
        Ok(db)
    }

    /// 规则仓储使用的连接池
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 往返一次 `SELECT 1`，返回耗时
    pub async fn ping(&self) -> Result<Duration> {
        let started = Instant::now();
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(SharedError::from)?;
        Ok(started.elapsed())
    }

    /// 停机时释放连接
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Rule database closed");
    }
}
