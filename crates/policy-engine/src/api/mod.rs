//! HTTP 接口
//!
//! 评估、访问检查和规则编写的 REST 端点。

pub mod dto;
pub mod error;
pub mod handlers;
pub mod state;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use rules_shared::observability::middleware::{http_tracing, request_id};

pub use error::ApiError;
pub use state::{AppState, Evaluator};

/// 构建 `/api/v1` 路由
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/evaluate", post(handlers::evaluate))
        .route("/access/check", post(handlers::check_access))
        .route(
            "/rules",
            get(handlers::list_rules).post(handlers::create_rule),
        )
        .route(
            "/rules/{id}",
            get(handlers::get_rule)
                .put(handlers::update_rule)
                .delete(handlers::delete_rule),
        )
}

/// 构建完整应用路由
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api_routes())
        .layer(middleware::from_fn(http_tracing))
        .layer(middleware::from_fn(request_id))
        .with_state(state)
}
