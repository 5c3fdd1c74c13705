//! 定向解析
//!
//! 给定领域的规则快照与评估上下文，求出候选规则集合：
//! UNIVERSAL ∪ DOMAIN ∪ 匹配实体类型的 ENTITY_TYPE ∪ 关联包含该实体的 ENTITIES，
//! 再与标签过滤求交。定向数据不一致的规则被排除并记为诊断，不中断评估。

use crate::compiler::CompiledRule;
use crate::models::{Diagnostic, DiagnosticKind, EvaluationContext, Rule, TargetScope};
use std::sync::Arc;
use tracing::warn;

/// 定向结果
#[derive(Debug, Default)]
pub struct Resolution {
    pub candidates: Vec<Arc<CompiledRule>>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Resolution {
    pub fn candidate_ids(&self) -> Vec<&str> {
        self.candidates.iter().map(|r| r.id()).collect()
    }
}

/// 定向解析器
#[derive(Debug, Default, Clone, Copy)]
pub struct TargetingResolver;

impl TargetingResolver {
    pub fn new() -> Self {
        Self
    }

    /// 解析候选规则
    pub fn resolve(
        &self,
        domain: &str,
        rules: Vec<Arc<CompiledRule>>,
        context: &EvaluationContext,
    ) -> Resolution {
        let mut resolution = Resolution::default();

        for compiled in rules {
            let rule = &compiled.rule;
            if rule.domain != domain {
                continue;
            }

            if let Some(reason) = rule.scope_violation() {
                warn!(rule_id = %rule.id, reason = %reason, "Excluding rule with inconsistent targeting");
                resolution.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::DataIntegrityWarning,
                    rule.id.clone(),
                    reason,
                ));
                continue;
            }

            if Self::scope_matches(rule, context) && Self::tags_match(rule, context) {
                resolution.candidates.push(compiled);
            }
        }

        resolution
    }

    /// 每个实体类别一个查找分支
    fn scope_matches(rule: &Rule, context: &EvaluationContext) -> bool {
        match rule.target_scope {
            TargetScope::Universal | TargetScope::Domain => true,
            TargetScope::EntityType => match (&context.entity, rule.target_entity_type) {
                (Some(entity), Some(target)) => entity.entity_type == target,
                _ => false,
            },
            TargetScope::Entities => context
                .entity
                .as_ref()
                .is_some_and(|entity| rule.targets.contains(entity)),
        }
    }

    /// 无标签的规则不受过滤；有标签的规则要求与上下文标签有交集
    fn tags_match(rule: &Rule, context: &EvaluationContext) -> bool {
        rule.tags.is_empty() || !rule.tags.is_disjoint(&context.tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::RuleCompiler;
    use crate::models::{ACCESS_DOMAIN, EntityType, PRICING_DOMAIN};
    use serde_json::json;

    fn compiled(rules: Vec<Rule>) -> Vec<Arc<CompiledRule>> {
        let mut compiler = RuleCompiler::new();
        rules
            .into_iter()
            .map(|r| Arc::new(compiler.compile(r)))
            .collect()
    }

    fn rule(id: &str) -> Rule {
        Rule::new(PRICING_DOMAIN, id, json!(true)).with_id(id)
    }

    fn ids(resolution: &Resolution) -> Vec<&str> {
        let mut ids = resolution.candidate_ids();
        ids.sort();
        ids
    }

    #[test]
    fn test_union_of_scopes() {
        let rules = compiled(vec![
            rule("universal"),
            rule("domain").with_scope(TargetScope::Domain),
            rule("type-product").for_entity_type(EntityType::Product),
            rule("type-channel").for_entity_type(EntityType::SalesChannel),
            rule("entities-hit").for_entities(EntityType::Product, ["prod-1"]),
            rule("entities-miss").for_entities(EntityType::Product, ["prod-2"]),
            rule("entities-other-family").for_entities(EntityType::ProductVariant, ["prod-1"]),
        ]);
        let ctx = EvaluationContext::for_entity(EntityType::Product, "prod-1");

        let resolution = TargetingResolver::new().resolve(PRICING_DOMAIN, rules, &ctx);

        assert_eq!(
            ids(&resolution),
            vec!["domain", "entities-hit", "type-product", "universal"]
        );
        assert!(resolution.diagnostics.is_empty());
    }

    #[test]
    fn test_without_entity_only_domain_wide_rules() {
        let rules = compiled(vec![
            rule("universal"),
            rule("domain").with_scope(TargetScope::Domain),
            rule("type-product").for_entity_type(EntityType::Product),
            rule("entities").for_entities(EntityType::Product, ["prod-1"]),
        ]);

        let resolution =
            TargetingResolver::new().resolve(PRICING_DOMAIN, rules, &EvaluationContext::new());
        assert_eq!(ids(&resolution), vec!["domain", "universal"]);
    }

    #[test]
    fn test_tag_filter() {
        let rules = compiled(vec![
            rule("vip-only").with_tags(["vip"]),
            rule("untagged"),
        ]);

        let plain = TargetingResolver::new().resolve(
            PRICING_DOMAIN,
            rules.clone(),
            &EvaluationContext::new().with_tags(["returning"]),
        );
        assert_eq!(ids(&plain), vec!["untagged"]);

        let vip = TargetingResolver::new().resolve(
            PRICING_DOMAIN,
            rules,
            &EvaluationContext::new().with_tags(["vip", "returning"]),
        );
        assert_eq!(ids(&vip), vec!["untagged", "vip-only"]);
    }

    #[test]
    fn test_scope_violation_is_isolated() {
        let rules = compiled(vec![
            rule("broken").with_scope(TargetScope::EntityType),
            rule("healthy"),
        ]);
        let ctx = EvaluationContext::for_entity(EntityType::Product, "prod-1");

        let resolution = TargetingResolver::new().resolve(PRICING_DOMAIN, rules, &ctx);

        assert_eq!(ids(&resolution), vec!["healthy"]);
        assert_eq!(resolution.diagnostics.len(), 1);
        assert_eq!(
            resolution.diagnostics[0].kind,
            DiagnosticKind::DataIntegrityWarning
        );
        assert_eq!(resolution.diagnostics[0].rule_id.as_deref(), Some("broken"));
    }

    #[test]
    fn test_other_domains_are_skipped() {
        let rules = compiled(vec![
            rule("pricing"),
            Rule::new(ACCESS_DOMAIN, "access", json!(true)).with_id("access"),
        ]);
        let resolution =
            TargetingResolver::new().resolve(ACCESS_DOMAIN, rules, &EvaluationContext::new());
        assert_eq!(ids(&resolution), vec!["access"]);
    }
}
