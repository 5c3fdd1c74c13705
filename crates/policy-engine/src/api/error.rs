//! HTTP 层错误
//!
//! 把 [`RuleError`] 映射为状态码和统一响应体；存储故障只返回通用提示。

use crate::error::RuleError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error(transparent)]
    Rule(#[from] RuleError),
}

impl ApiError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Rule(err) => match err {
                RuleError::ConditionParse(_)
                | RuleError::DataIntegrity { .. }
                | RuleError::InvalidRequest(_)
                | RuleError::TypeMismatch { .. }
                | RuleError::Money(_)
                | RuleError::JsonError(_) => StatusCode::BAD_REQUEST,
                RuleError::RuleNotFound(_) => StatusCode::NOT_FOUND,
                RuleError::RuleAlreadyExists(_) => StatusCode::CONFLICT,
                RuleError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                RuleError::EvaluationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            },
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Rule(err) => err.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            Self::Rule(RuleError::StorageUnavailable(e)) => {
                tracing::error!(error = %e, "规则存储不可用");
                "规则存储暂不可用，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(RuleError::RuleNotFound("r".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(RuleError::RuleAlreadyExists("r".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(RuleError::ConditionParse("$".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(RuleError::StorageUnavailable("db".into())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_codes_follow_rule_errors() {
        let err = ApiError::from(RuleError::EvaluationTimeout {
            elapsed_ms: 250,
            budget_ms: 200,
        });
        assert_eq!(err.error_code(), "EVALUATION_TIMEOUT");
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ApiError::Validation("x".into()).error_code(), "VALIDATION_ERROR");
    }
}
