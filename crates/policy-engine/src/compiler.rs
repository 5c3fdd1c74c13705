//! 规则编译器
//!
//! 将持久化的条件 JSON 解析为 [`ConditionNode`] 树并预先提取事实键。
//!
//! 两种入口：
//! - [`RuleCompiler::compile`]：宽松模式，用于从数据库装载。解析失败的条件
//!   记为 [`CompiledCondition::Malformed`]，评估时按不匹配处理并给出诊断。
//! - [`RuleCompiler::compile_strict`]：严格模式，用于规则编写。任何解析或
//!   完整性问题都直接拒绝。

use crate::condition::ConditionNode;
use crate::error::{Result, RuleError};
use crate::models::Rule;
use std::collections::BTreeSet;

/// 条件的编译结果
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledCondition {
    Parsed(ConditionNode),
    Malformed(String),
}

/// 编译后的规则
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// 原始规则
    pub rule: Rule,
    pub condition: CompiledCondition,
    /// 条件读取的事实键（含 factKeys 提示）
    pub required_facts: BTreeSet<String>,
    /// 编译器内单调递增的编译序号，日志中区分同一规则的多次编译
    pub compile_version: u64,
}

impl CompiledRule {
    /// 获取规则 ID
    pub fn id(&self) -> &str {
        &self.rule.id
    }

    /// 获取规则名称
    pub fn name(&self) -> &str {
        &self.rule.name
    }

    pub fn domain(&self) -> &str {
        &self.rule.domain
    }

    pub fn priority(&self) -> i32 {
        self.rule.priority
    }
}

/// 规则编译器
pub struct RuleCompiler {
    compile_version: u64,
}

impl RuleCompiler {
    pub fn new() -> Self {
        Self { compile_version: 0 }
    }

    /// 从 JSON 字符串严格编译规则
    pub fn compile_from_json(&mut self, json: &str) -> Result<CompiledRule> {
        let rule: Rule = serde_json::from_str(json)?;
        self.compile_strict(rule)
    }

    /// 宽松编译：永不失败
    pub fn compile(&mut self, rule: Rule) -> CompiledRule {
        let condition = match ConditionNode::parse(&rule.condition) {
            Ok(node) => CompiledCondition::Parsed(node),
            Err(e) => CompiledCondition::Malformed(e.to_string()),
        };

        let mut required_facts = match &condition {
            CompiledCondition::Parsed(node) => node.referenced_names(),
            CompiledCondition::Malformed(_) => BTreeSet::new(),
        };
        // 规则变量不是事实
        required_facts.retain(|name| !rule.variables.contains_key(name));
        if let Some(hints) = &rule.fact_keys {
            required_facts.extend(hints.iter().cloned());
        }

        self.compile_version += 1;

        CompiledRule {
            rule,
            condition,
            required_facts,
            compile_version: self.compile_version,
        }
    }

    /// 严格编译：规则编写时使用
    pub fn compile_strict(&mut self, rule: Rule) -> Result<CompiledRule> {
        self.validate_rule(&rule)?;
        let compiled = self.compile(rule);

        match &compiled.condition {
            CompiledCondition::Malformed(reason) => {
                Err(RuleError::ConditionParse(reason.clone()))
            }
            CompiledCondition::Parsed(node) => {
                if let Some(group) = node.find_empty_group() {
                    return Err(RuleError::ConditionParse(format!(
                        "规则 '{}' 的条件包含空的 {} 组",
                        compiled.id(),
                        group
                    )));
                }
                Ok(compiled)
            }
        }
    }

    /// 验证规则结构
    fn validate_rule(&self, rule: &Rule) -> Result<()> {
        if rule.id.trim().is_empty() {
            return Err(RuleError::InvalidRequest("规则 ID 不能为空".to_string()));
        }

        if rule.name.trim().is_empty() {
            return Err(RuleError::InvalidRequest("规则名称不能为空".to_string()));
        }

        if rule.domain.trim().is_empty() {
            return Err(RuleError::InvalidRequest("规则领域不能为空".to_string()));
        }

        rule.actor.validate()?;

        if let Some(reason) = rule.scope_violation().or_else(|| rule.config_violation()) {
            return Err(RuleError::DataIntegrity {
                rule_id: rule.id.clone(),
                reason,
            });
        }

        Ok(())
    }
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ACCESS_DOMAIN, EntityType, PriorityGroup, TargetScope};
    use serde_json::json;

    fn access_rule(condition: serde_json::Value) -> Rule {
        Rule::new(ACCESS_DOMAIN, "adults", condition)
            .with_id("r-1")
            .with_access(PriorityGroup::Require)
    }

    #[test]
    fn test_compile_extracts_facts() {
        let mut compiler = RuleCompiler::new();
        let rule = access_rule(json!({
            "fact": "user.age", "operator": "gte", "value": "{{minimumAge}}"
        }))
        .with_variable("minimumAge", 18);

        let compiled = compiler.compile_strict(rule).unwrap();

        assert!(matches!(compiled.condition, CompiledCondition::Parsed(_)));
        let facts: Vec<_> = compiled.required_facts.iter().cloned().collect();
        assert_eq!(facts, vec!["user.age"]);
        assert_eq!(compiled.compile_version, 1);
    }

    #[test]
    fn test_compile_version_increases_per_compile() {
        let mut compiler = RuleCompiler::new();
        let first = compiler.compile(access_rule(json!(true)));
        let second = compiler.compile(access_rule(json!(true)));
        assert!(second.compile_version > first.compile_version);
    }

    #[test]
    fn test_fact_key_hints_are_merged() {
        let mut compiler = RuleCompiler::new();
        let mut rule = access_rule(json!(true));
        rule.fact_keys = Some(vec!["cart.total".to_string()]);

        let compiled = compiler.compile(rule);
        assert!(compiled.required_facts.contains("cart.total"));
    }

    #[test]
    fn test_lenient_compile_keeps_malformed() {
        let mut compiler = RuleCompiler::new();
        let compiled = compiler.compile(access_rule(json!({"type": "xor"})));

        assert!(matches!(compiled.condition, CompiledCondition::Malformed(_)));
    }

    #[test]
    fn test_strict_compile_rejects_malformed() {
        let mut compiler = RuleCompiler::new();
        let result = compiler.compile_strict(access_rule(json!({"type": "xor"})));
        assert!(matches!(result, Err(RuleError::ConditionParse(_))));
    }

    #[test]
    fn test_strict_compile_rejects_empty_group() {
        let mut compiler = RuleCompiler::new();
        let result = compiler.compile_strict(access_rule(json!({"type": "or", "children": []})));
        assert!(matches!(result, Err(RuleError::ConditionParse(_))));
    }

    #[test]
    fn test_strict_compile_rejects_scope_violation() {
        let mut compiler = RuleCompiler::new();
        let rule = access_rule(json!(true)).with_scope(TargetScope::EntityType);
        assert!(matches!(
            compiler.compile_strict(rule),
            Err(RuleError::DataIntegrity { .. })
        ));

        let ok = access_rule(json!(true)).for_entity_type(EntityType::SalesChannel);
        assert!(compiler.compile_strict(ok).is_ok());
    }

    #[test]
    fn test_strict_compile_rejects_missing_config() {
        let mut compiler = RuleCompiler::new();
        let rule = Rule::new(ACCESS_DOMAIN, "no config", json!(true));
        assert!(matches!(
            compiler.compile_strict(rule),
            Err(RuleError::DataIntegrity { .. })
        ));
    }

    #[test]
    fn test_compile_from_json() {
        let mut compiler = RuleCompiler::new();
        let compiled = compiler
            .compile_from_json(
                r#"{
                    "id": "r-9",
                    "domain": "access",
                    "name": "members",
                    "targetScope": "DOMAIN",
                    "condition": {"type": "var", "name": "user.isMember"},
                    "effect": "boolean",
                    "accessConfig": {"priorityGroup": "require"}
                }"#,
            )
            .unwrap();
        assert_eq!(compiled.id(), "r-9");
    }
}
