//! 规则引擎错误类型
//!
//! 只有会中止整次评估的错误才出现在这里；单条规则的问题以
//! [`Diagnostic`](crate::models::Diagnostic) 形式随结果返回。

use crate::money::MoneyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("条件解析失败: {0}")]
    ConditionParse(String),

    #[error("规则数据不一致: rule_id={rule_id}, {reason}")]
    DataIntegrity { rule_id: String, reason: String },

    #[error("规则存储不可用: {0}")]
    StorageUnavailable(String),

    #[error("规则评估超时: 已耗时 {elapsed_ms}ms, 上限 {budget_ms}ms")]
    EvaluationTimeout { elapsed_ms: u64, budget_ms: u64 },

    #[error("规则未找到: {0}")]
    RuleNotFound(String),

    #[error("规则已存在: {0}")]
    RuleAlreadyExists(String),

    #[error("无效的评估请求: {0}")]
    InvalidRequest(String),

    #[error("类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("金额运算失败: {0}")]
    Money(#[from] MoneyError),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RuleError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConditionParse(_) => "CONDITION_PARSE_ERROR",
            Self::DataIntegrity { .. } => "DATA_INTEGRITY_WARNING",
            Self::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            Self::EvaluationTimeout { .. } => "EVALUATION_TIMEOUT",
            Self::RuleNotFound(_) => "RULE_NOT_FOUND",
            Self::RuleAlreadyExists(_) => "RULE_ALREADY_EXISTS",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::TypeMismatch { .. } => "TYPE_MISMATCH",
            Self::Money(_) => "MONEY_ERROR",
            Self::JsonError(_) => "JSON_ERROR",
        }
    }

    /// 存储或超时失败：调用方应按领域默认值失败关闭
    pub fn is_fail_closed(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_) | Self::EvaluationTimeout { .. }
        )
    }
}

impl From<sqlx::Error> for RuleError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
