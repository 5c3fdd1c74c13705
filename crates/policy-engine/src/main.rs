//! 策略引擎服务
//!
//! 提供 HTTP 接口的规则评估与规则编写服务。

use anyhow::Result;
use policy_engine::api::{self, AppState, Evaluator};
use policy_engine::cache::CacheOptions;
use policy_engine::repository::{self, PgRuleRepository, RuleRepository};
use policy_engine::{CachedEngine, InMemoryRuleStore, RuleEngine};
use rules_shared::config::AppConfig;
use rules_shared::database::Database;
use rules_shared::observability::{self, ObservabilityConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load("policy-engine").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig {
            service_name: "policy-engine".to_string(),
            ..AppConfig::default()
        }
    });

    let obs_config = ObservabilityConfig::from_app_config(&config.service_name, &config.observability);
    let _guard = observability::init(&obs_config).await?;

    info!(environment = %config.environment, "Starting policy-engine service...");

    let store = InMemoryRuleStore::new();

    // 数据库不可用时以内存模式启动，编写的规则不持久化
    let database = match Database::connect(&config.database).await {
        Ok(db) => Some(db),
        Err(e) => {
            warn!(code = e.code(), "Rule database unavailable: {}, running with in-memory rules only", e);
            None
        }
    };
    let repository: Option<Arc<dyn RuleRepository>> = database
        .as_ref()
        .map(|db| Arc::new(PgRuleRepository::new(db.pool().clone())) as Arc<dyn RuleRepository>);

    if let Some(repo) = &repository {
        match repository::refresh(repo.as_ref(), &store).await {
            Ok(count) => info!("Loaded {} rules from database", count),
            Err(e) => warn!("Failed to load rules from database: {}, starting with empty store", e),
        }

        let period = Duration::from_secs(config.engine.refresh_interval_seconds.max(1));
        repository::spawn_refresher(repo.clone(), store.clone(), period);
        info!(interval_secs = period.as_secs(), "Rule refresher started");
    }

    let mut engine = RuleEngine::new(store.clone());
    if config.engine.evaluation_timeout_ms > 0 {
        engine = engine.with_timeout(Duration::from_millis(config.engine.evaluation_timeout_ms));
    }
    if config.engine.trace_enabled {
        engine = engine.with_trace();
    }
    let evaluator = if config.engine.cache_enabled {
        let options = CacheOptions {
            ttl: Duration::from_secs(config.engine.cache_ttl_seconds),
            stale_ttl: Duration::from_secs(config.engine.cache_stale_ttl_seconds),
            max_entries: config.engine.cache_max_entries,
        };
        Evaluator::Cached(CachedEngine::with_options(engine, options))
    } else {
        Evaluator::Direct(engine)
    };

    if config.is_production() {
        warn!("CORS allows all origins, restrict it behind a gateway in production");
    }
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = api::router(AppState::new(store, evaluator, repository)).layer(cors);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("HTTP server listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(db) = &database {
        db.close().await;
    }
    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
