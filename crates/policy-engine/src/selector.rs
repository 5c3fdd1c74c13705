//! 规则选择与排序
//!
//! 过滤停用规则，执行条件并保留匹配项，按 priority 降序、规则 ID 升序排序，
//! 使结果不依赖存储的迭代顺序。

use crate::compiler::{CompiledCondition, CompiledRule};
use crate::executor::{ConditionExecutor, Truth};
use crate::models::{Diagnostic, DiagnosticKind, FactContext};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// 选择结果
#[derive(Debug, Default)]
pub struct Selection {
    /// 已排序的匹配规则
    pub matched: Vec<Arc<CompiledRule>>,
    pub diagnostics: Vec<Diagnostic>,
    /// 开启追踪时每条规则的执行轨迹
    pub traces: Vec<(String, Vec<String>)>,
}

/// 规则选择器
pub struct RuleSelector {
    executor: ConditionExecutor,
}

impl RuleSelector {
    pub fn new(executor: ConditionExecutor) -> Self {
        Self { executor }
    }

    pub fn select(&self, candidates: Vec<Arc<CompiledRule>>, facts: &FactContext) -> Selection {
        let mut selection = Selection::default();

        for compiled in candidates {
            if !compiled.rule.is_active {
                continue;
            }

            if let CompiledCondition::Malformed(reason) = &compiled.condition {
                warn!(rule_id = %compiled.id(), reason = %reason, "Malformed condition, failing closed");
                selection.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::ConditionParseError,
                    compiled.id(),
                    reason.clone(),
                ));
                continue;
            }

            let outcome = self.executor.execute(&compiled, facts);
            if self.executor.trace_enabled() {
                selection
                    .traces
                    .push((compiled.id().to_string(), outcome.trace.clone()));
            }

            match outcome.truth {
                Truth::True => selection.matched.push(compiled),
                Truth::False => {}
                Truth::Indeterminate => {
                    let mut reasons = Vec::new();
                    if !outcome.unresolved.is_empty() {
                        reasons.push(format!("未解析的事实: {}", outcome.unresolved.join(", ")));
                    }
                    reasons.extend(outcome.problems);
                    debug!(rule_id = %compiled.id(), "Condition indeterminate, treated as non-match");
                    selection.diagnostics.push(Diagnostic::new(
                        DiagnosticKind::IndeterminateCondition,
                        compiled.id(),
                        reasons.join("; "),
                    ));
                }
            }
        }

        selection.matched.sort_by(|a, b| rank(a, b));
        selection
    }
}

impl Default for RuleSelector {
    fn default() -> Self {
        Self::new(ConditionExecutor::new())
    }
}

/// priority 降序，ID 升序
pub fn rank(a: &CompiledRule, b: &CompiledRule) -> Ordering {
    b.priority()
        .cmp(&a.priority())
        .then_with(|| a.id().cmp(b.id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::RuleCompiler;
    use crate::models::{PRICING_DOMAIN, Rule};
    use serde_json::json;

    fn compiled(rules: Vec<Rule>) -> Vec<Arc<CompiledRule>> {
        let mut compiler = RuleCompiler::new();
        rules
            .into_iter()
            .map(|r| Arc::new(compiler.compile(r)))
            .collect()
    }

    fn rule(id: &str, priority: i32, condition: serde_json::Value) -> Rule {
        Rule::new(PRICING_DOMAIN, id, condition)
            .with_id(id)
            .with_priority(priority)
    }

    fn facts(value: serde_json::Value) -> FactContext {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_sorted_by_priority_then_id() {
        let candidates = compiled(vec![
            rule("b", 1, json!(true)),
            rule("c", 5, json!(true)),
            rule("a", 1, json!(true)),
        ]);

        let selection = RuleSelector::default().select(candidates, &FactContext::new());
        let ids: Vec<_> = selection.matched.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_non_matching_and_inactive_are_dropped() {
        let candidates = compiled(vec![
            rule("adult", 0, json!({"fact": "user.age", "operator": "gte", "value": 18})),
            rule("senior", 0, json!({"fact": "user.age", "operator": "gte", "value": 65})),
            rule("inactive", 0, json!(true)).inactive(),
        ]);

        let selection = RuleSelector::default().select(candidates, &facts(json!({"user.age": 30})));
        let ids: Vec<_> = selection.matched.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["adult"]);
        assert!(selection.diagnostics.is_empty());
    }

    #[test]
    fn test_indeterminate_emits_diagnostic() {
        let candidates = compiled(vec![rule(
            "needs-age",
            0,
            json!({"fact": "user.age", "operator": "gte", "value": 18}),
        )]);

        let selection = RuleSelector::default().select(candidates, &FactContext::new());
        assert!(selection.matched.is_empty());
        assert_eq!(
            selection.diagnostics[0].kind,
            DiagnosticKind::IndeterminateCondition
        );
        assert!(selection.diagnostics[0].message.contains("user.age"));
    }

    #[test]
    fn test_malformed_condition_fails_closed() {
        let candidates = compiled(vec![rule("broken", 0, json!({"type": "xor"}))]);

        let selection = RuleSelector::default().select(candidates, &FactContext::new());
        assert!(selection.matched.is_empty());
        assert_eq!(
            selection.diagnostics[0].kind,
            DiagnosticKind::ConditionParseError
        );
    }

    #[test]
    fn test_traces_collected_when_enabled() {
        let candidates = compiled(vec![rule(
            "adult",
            0,
            json!({"fact": "user.age", "operator": "gte", "value": 18}),
        )]);

        let selector = RuleSelector::new(ConditionExecutor::new().with_trace());
        let selection = selector.select(candidates, &facts(json!({"user.age": 30})));
        assert_eq!(selection.traces.len(), 1);
        assert_eq!(selection.traces[0].0, "adult");
    }
}
