//! 评估与规则编写 API 处理器
//!
//! 编写接口先校验，再写数据库（若已配置），最后更新内存存储。

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;
use validator::Validate;

use super::dto::{
    AccessCheckRequest, AccessCheckResponse, ApiResponse, EvaluateRequest, ListRulesQuery,
    RuleDto, RuleRequest,
};
use super::error::ApiError;
use super::state::AppState;
use crate::error::RuleError;
use crate::models::EvaluationResult;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// 评估领域规则
///
/// POST /api/v1/evaluate
pub async fn evaluate(
    State(state): State<AppState>,
    Json(req): Json<EvaluateRequest>,
) -> ApiResult<EvaluationResult> {
    req.validate()?;
    let (domain, context, facts) = req.into_parts();

    let result = state.evaluator.evaluate(&domain, &context, &facts)?;
    Ok(Json(ApiResponse::success(result)))
}

/// 访问检查，引擎失败时返回 DENIED
///
/// POST /api/v1/access/check
pub async fn check_access(
    State(state): State<AppState>,
    Json(req): Json<AccessCheckRequest>,
) -> Json<ApiResponse<AccessCheckResponse>> {
    let decision = state
        .evaluator
        .check_access(&req.context, &req.facts, req.default_decision);
    Json(ApiResponse::success(AccessCheckResponse { decision }))
}

/// 创建规则
///
/// POST /api/v1/rules
pub async fn create_rule(
    State(state): State<AppState>,
    Json(req): Json<RuleRequest>,
) -> ApiResult<RuleDto> {
    req.validate()?;
    let id = req
        .id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let rule = req.into_rule(id);

    state.store.validate(&rule)?;
    if state.store.contains(&rule.id) {
        return Err(RuleError::RuleAlreadyExists(rule.id).into());
    }

    let now = Utc::now();
    if let Some(repo) = &state.repository {
        repo.insert_rule(&rule, now).await?;
    }
    let rule_id = rule.id.clone();
    state.store.create(rule, now)?;

    info!(rule_id = %rule_id, "Rule created");
    let created = state
        .store
        .get(&rule_id)
        .ok_or_else(|| RuleError::RuleNotFound(rule_id.clone()))?;
    Ok(Json(ApiResponse::success(created.into())))
}

/// 更新规则
///
/// PUT /api/v1/rules/{id}
pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RuleRequest>,
) -> ApiResult<RuleDto> {
    req.validate()?;
    let rule = req.into_rule(id.clone());

    state.store.validate(&rule)?;
    if state.store.get(&id).is_none() {
        return Err(RuleError::RuleNotFound(id).into());
    }

    let now = Utc::now();
    if let Some(repo) = &state.repository {
        repo.update_rule(&rule, now).await?;
    }
    state.store.update(rule, now)?;

    info!(rule_id = %id, "Rule updated");
    let updated = state
        .store
        .get(&id)
        .ok_or_else(|| RuleError::RuleNotFound(id.clone()))?;
    Ok(Json(ApiResponse::success(updated.into())))
}

/// 软删除规则
///
/// DELETE /api/v1/rules/{id}
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    if state.store.get(&id).is_none() {
        return Err(RuleError::RuleNotFound(id).into());
    }

    let now = Utc::now();
    if let Some(repo) = &state.repository {
        repo.soft_delete_rule(&id, now).await?;
    }
    state.store.soft_delete(&id, now)?;

    info!(rule_id = %id, "Rule deleted");
    Ok(Json(ApiResponse::<()>::success_empty()))
}

/// 获取规则详情
///
/// GET /api/v1/rules/{id}
pub async fn get_rule(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<RuleDto> {
    let rule = state
        .store
        .get(&id)
        .ok_or(RuleError::RuleNotFound(id))?;
    Ok(Json(ApiResponse::success(rule.into())))
}

/// 规则列表（含停用规则），可按领域过滤
///
/// GET /api/v1/rules?domain=
pub async fn list_rules(
    State(state): State<AppState>,
    Query(query): Query<ListRulesQuery>,
) -> ApiResult<Vec<RuleDto>> {
    let rules = state
        .store
        .list_all(query.domain.as_deref())
        .into_iter()
        .map(RuleDto::from)
        .collect();
    Ok(Json(ApiResponse::success(rules)))
}

/// 健康检查
///
/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "rules": state.store.stats(),
    }))
}
