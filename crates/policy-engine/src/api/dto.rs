//! 请求与响应 DTO

use crate::compiler::CompiledRule;
use crate::models::{
    ACCESS_DOMAIN, AccessConfig, Actor, Audited, Decision, EffectLink, EntityType,
    EvaluationContext, FactContext, PricingConfig, Rule, RuleEffect, RuleTargets, TargetScope,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use validator::Validate;

/// 评估请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    #[validate(length(min = 1, max = 64, message = "领域名称长度必须在1-64个字符之间"))]
    pub domain: String,
    #[serde(default)]
    pub context: EvaluationContext,
    #[serde(default)]
    pub facts: FactContext,
    /// 覆盖 context 中的默认决定
    pub default_decision: Option<Decision>,
}

impl EvaluateRequest {
    pub fn into_parts(self) -> (String, EvaluationContext, FactContext) {
        let mut context = self.context;
        if self.default_decision.is_some() {
            context.default_decision = self.default_decision;
        }
        (self.domain, context, self.facts)
    }
}

/// 访问检查请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCheckRequest {
    #[serde(default)]
    pub context: EvaluationContext,
    #[serde(default)]
    pub facts: FactContext,
    /// 无规则匹配时的决定，缺省为拒绝
    #[serde(default = "default_denied")]
    pub default_decision: Decision,
}

fn default_denied() -> Decision {
    Decision::Denied
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCheckResponse {
    pub decision: Decision,
}

/// 创建/更新规则请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RuleRequest {
    /// 创建时可指定，缺省生成 UUID；更新时以路径参数为准
    #[validate(length(min = 1, max = 128, message = "规则 ID 长度必须在1-128个字符之间"))]
    pub id: Option<String>,
    #[validate(length(min = 1, max = 64, message = "领域名称长度必须在1-64个字符之间"))]
    pub domain: String,
    #[validate(length(min = 1, max = 200, message = "规则名称长度必须在1-200个字符之间"))]
    pub name: String,
    pub description: Option<String>,
    pub message: Option<String>,
    #[serde(default = "default_scope")]
    pub target_scope: TargetScope,
    pub target_entity_type: Option<EntityType>,
    pub condition: Value,
    #[serde(default)]
    pub variables: Map<String, Value>,
    pub fact_keys: Option<Vec<String>>,
    /// 缺省：access 领域为 boolean，其余为 linked
    pub effect: Option<RuleEffect>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub access_config: Option<AccessConfig>,
    pub pricing_config: Option<PricingConfig>,
    #[serde(default)]
    pub targets: RuleTargets,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub effects: Vec<EffectLink>,
    #[serde(default)]
    pub actor: Actor,
}

fn default_scope() -> TargetScope {
    TargetScope::Universal
}

fn default_true() -> bool {
    true
}

impl RuleRequest {
    pub fn into_rule(self, id: String) -> Rule {
        let effect = self.effect.unwrap_or(if self.domain == ACCESS_DOMAIN {
            RuleEffect::Boolean
        } else {
            RuleEffect::Linked
        });

        Rule {
            id,
            domain: self.domain,
            name: self.name,
            description: self.description,
            message: self.message,
            target_scope: self.target_scope,
            target_entity_type: self.target_entity_type,
            condition: self.condition,
            variables: self.variables,
            fact_keys: self.fact_keys,
            effect,
            priority: self.priority,
            is_active: self.is_active,
            access_config: self.access_config,
            pricing_config: self.pricing_config,
            targets: self.targets,
            tags: self.tags,
            effects: self.effects,
            actor: self.actor,
        }
    }
}

/// 规则列表查询
#[derive(Debug, Default, Deserialize)]
pub struct ListRulesQuery {
    pub domain: Option<String>,
}

/// 规则详情
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDto {
    #[serde(flatten)]
    pub rule: Rule,
    /// 条件读取的事实键
    pub required_facts: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Audited<Arc<CompiledRule>>> for RuleDto {
    fn from(audited: Audited<Arc<CompiledRule>>) -> Self {
        Self {
            rule: audited.record.rule.clone(),
            required_facts: audited.record.required_facts.iter().cloned().collect(),
            created_at: audited.created_at,
            updated_at: audited.updated_at,
        }
    }
}

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    pub fn success_empty() -> ApiResponse<()> {
        ApiResponse {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_request_defaults() {
        let req: RuleRequest = serde_json::from_value(json!({
            "domain": "access",
            "name": "block banned users",
            "condition": {"fact": "user.banned", "operator": "eq", "value": true},
            "accessConfig": {"priorityGroup": "deny"}
        }))
        .unwrap();
        assert!(req.validate().is_ok());

        let rule = req.into_rule("r-1".into());
        assert_eq!(rule.effect, RuleEffect::Boolean);
        assert_eq!(rule.target_scope, TargetScope::Universal);
        assert!(rule.is_active);
        assert_eq!(rule.actor, Actor::System);
    }

    #[test]
    fn test_empty_name_fails_validation() {
        let req: RuleRequest = serde_json::from_value(json!({
            "domain": "pricing",
            "name": "",
            "condition": true
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_evaluate_request_default_overrides_context() {
        let req: EvaluateRequest = serde_json::from_value(json!({
            "domain": "access",
            "context": {"tags": ["vip"], "defaultDecision": "DENIED"},
            "defaultDecision": "GRANTED"
        }))
        .unwrap();
        let (domain, context, facts) = req.into_parts();
        assert_eq!(domain, "access");
        assert_eq!(context.default_decision, Some(Decision::Granted));
        assert!(context.tags.contains("vip"));
        assert!(facts.is_empty());
    }
}
