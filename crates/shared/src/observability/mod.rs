//! 统一可观测性模块
//!
//! 提供 metrics、logging 的统一初始化和管理。
//! 所有服务通过单一入口点配置可观测性，确保一致的指标命名。

pub mod metrics;
pub mod middleware;
pub mod tracing;

use crate::config::ObservabilityConfig as AppObservabilityConfig;
use ::tracing::info;
use anyhow::Result;
use serde::Deserialize;

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// 服务名称，用于标识指标的来源
    pub service_name: String,

    /// Prometheus 指标导出端口，为 None 时不启动指标服务
    #[serde(default = "default_metrics_port")]
    pub metrics_port: Option<u16>,

    /// 日志级别（如 "info", "debug"）
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// 是否启用 JSON 格式日志
    #[serde(default)]
    pub json_logs: bool,
}

fn default_metrics_port() -> Option<u16> {
    Some(9090)
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            metrics_port: default_metrics_port(),
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    /// 从应用配置转换，并注入服务名
    pub fn from_app_config(service_name: &str, config: &AppObservabilityConfig) -> Self {
        Self {
            service_name: service_name.to_string(),
            metrics_port: config.metrics_enabled.then_some(config.metrics_port),
            log_level: config.log_level.clone(),
            json_logs: config.log_format.eq_ignore_ascii_case("json"),
        }
    }
}

/// 可观测性资源守卫
///
/// 持有指标服务的生命周期，Drop 时记录关闭日志。
pub struct ObservabilityGuard {
    _metrics_handle: Option<metrics::MetricsHandle>,
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!("Shutting down observability...");
    }
}

/// 统一初始化可观测性
///
/// 初始化顺序：
/// 1. Logging（tracing-subscriber）
/// 2. Metrics（Prometheus 指标，可选）
pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    tracing::init(config)?;

    info!(
        service = %config.service_name,
        metrics_port = ?config.metrics_port,
        "Observability initialized"
    );

    let metrics_handle = match config.metrics_port {
        Some(port) => Some(metrics::init(&config.service_name, port).await?),
        None => None,
    };

    Ok(ObservabilityGuard {
        _metrics_handle: metrics_handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.metrics_port, Some(9090));
        assert_eq!(config.log_level, "info");
        assert!(!config.json_logs);
    }

    #[test]
    fn test_from_app_config() {
        let app = AppObservabilityConfig {
            log_level: "debug".to_string(),
            log_format: "JSON".to_string(),
            metrics_enabled: false,
            metrics_port: 9100,
        };
        let config = ObservabilityConfig::from_app_config("policy-engine", &app);
        assert_eq!(config.service_name, "policy-engine");
        assert_eq!(config.metrics_port, None);
        assert!(config.json_logs);
    }
}
