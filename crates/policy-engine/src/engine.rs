//! 规则引擎编排
//!
//! `evaluate(domain, context, facts)` 依次执行：存储快照读取 → 定向解析 →
//! 条件选择 → （定价领域）一次批量效果查询 → 效果合成。引擎本身无状态，
//! 可并发调用。存储失败或超时中止整次评估，不返回部分定价结果。

use crate::effects::EffectResolver;
use crate::error::{Result, RuleError};
use crate::executor::ConditionExecutor;
use crate::models::{
    ACCESS_DOMAIN, Decision, EffectOutcome, EvaluationContext, EvaluationResult, FactContext,
    PRICING_DOMAIN,
};
use crate::resolver::TargetingResolver;
use crate::selector::RuleSelector;
use crate::store::RuleStore;
use rules_shared::observability::metrics;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// 单次评估的时间预算
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// 阶段之间检查是否超时
    pub fn check(&self, stage: &str) -> Result<()> {
        let elapsed = self.started.elapsed();
        if elapsed > self.budget {
            warn!(stage, elapsed_ms = elapsed.as_millis() as u64, "Evaluation deadline exceeded");
            return Err(RuleError::EvaluationTimeout {
                elapsed_ms: elapsed.as_millis() as u64,
                budget_ms: self.budget.as_millis() as u64,
            });
        }
        Ok(())
    }
}

/// 规则引擎
pub struct RuleEngine<S> {
    store: S,
    resolver: TargetingResolver,
    selector: RuleSelector,
    effects: EffectResolver,
    /// 默认时间预算，调用方可按次覆盖
    timeout: Option<Duration>,
}

impl<S: RuleStore> RuleEngine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            resolver: TargetingResolver::new(),
            selector: RuleSelector::default(),
            effects: EffectResolver::new(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 启用条件执行追踪（写入 debug 日志）
    pub fn with_trace(mut self) -> Self {
        self.selector = RuleSelector::new(ConditionExecutor::new().with_trace());
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// 评估领域规则
    pub fn evaluate(
        &self,
        domain: &str,
        context: &EvaluationContext,
        facts: &FactContext,
    ) -> Result<EvaluationResult> {
        let deadline = self.timeout.map(Deadline::after);
        self.evaluate_with_deadline(domain, context, facts, deadline)
    }

    #[instrument(skip(self, context, facts), fields(entity = ?context.entity))]
    pub fn evaluate_with_deadline(
        &self,
        domain: &str,
        context: &EvaluationContext,
        facts: &FactContext,
        deadline: Option<Deadline>,
    ) -> Result<EvaluationResult> {
        let start = Instant::now();
        let result = self.run(domain, context, facts, deadline.as_ref());
        let elapsed = start.elapsed().as_secs_f64();

        match &result {
            Ok(evaluation) => {
                metrics::record_rule_evaluation(domain, evaluation.outcome_label(), elapsed);
                for diagnostic in &evaluation.diagnostics {
                    metrics::record_rule_diagnostic(domain, diagnostic.kind.as_str());
                }
                debug!(
                    matched = evaluation.matched_rule_ids.len(),
                    diagnostics = evaluation.diagnostics.len(),
                    outcome = evaluation.outcome_label(),
                    "Evaluation complete"
                );
            }
            Err(e) => {
                metrics::record_rule_evaluation(domain, "error", elapsed);
                warn!(error = %e, code = e.code(), "Evaluation aborted");
            }
        }

        result
    }

    fn run(
        &self,
        domain: &str,
        context: &EvaluationContext,
        facts: &FactContext,
        deadline: Option<&Deadline>,
    ) -> Result<EvaluationResult> {
        let check = |stage: &str| deadline.map_or(Ok(()), |d| d.check(stage));

        if domain == PRICING_DOMAIN && context.base_amount.is_none() {
            return Err(RuleError::InvalidRequest(
                "定价评估需要 baseAmount".to_string(),
            ));
        }

        let snapshot = self.store.list_active_rules(domain)?;
        check("store")?;

        let resolution = self.resolver.resolve(domain, snapshot, context);
        let mut diagnostics = resolution.diagnostics;
        check("resolve")?;

        let selection = self.selector.select(resolution.candidates, facts);
        diagnostics.extend(selection.diagnostics);
        for (rule_id, trace) in &selection.traces {
            debug!(rule_id = %rule_id, trace = ?trace, "Condition trace");
        }
        check("select")?;

        let matched = selection.matched;
        let outcome = match domain {
            ACCESS_DOMAIN => EffectOutcome::Access(self.effects.resolve_access(
                &matched,
                context.default_decision,
                &mut diagnostics,
            )?),
            PRICING_DOMAIN => {
                let refs = self.effects.effect_refs(&matched);
                let catalog = if refs.is_empty() {
                    Default::default()
                } else {
                    self.store.lookup_effects(&refs)?
                };
                check("lookup_effects")?;

                let base = context.base_amount.as_ref().ok_or_else(|| {
                    RuleError::InvalidRequest("定价评估需要 baseAmount".to_string())
                })?;
                EffectOutcome::Pricing(self.effects.resolve_pricing(
                    &matched,
                    base,
                    &catalog,
                    &mut diagnostics,
                )?)
            }
            _ => EffectOutcome::MatchOnly,
        };
        check("effects")?;

        Ok(EvaluationResult {
            domain: domain.to_string(),
            matched_rule_ids: matched.iter().map(|r| r.id().to_string()).collect(),
            outcome,
            diagnostics,
            stale: false,
        })
    }

    /// 访问检查：任何引擎失败都视为拒绝
    pub fn check_access(
        &self,
        context: &EvaluationContext,
        facts: &FactContext,
        default_decision: Decision,
    ) -> Decision {
        let context = EvaluationContext {
            default_decision: Some(default_decision),
            ..context.clone()
        };
        match self.evaluate(ACCESS_DOMAIN, &context, facts) {
            Ok(result) => result.decision().unwrap_or(Decision::Denied),
            Err(e) => {
                warn!(error = %e, "Access check failed, denying");
                Decision::Denied
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::RuleCompiler;
    use crate::models::{PriorityGroup, Rule};
    use crate::store::MockRuleStore;
    use serde_json::json;
    use std::sync::Arc;

    fn access_rule(id: &str, group: PriorityGroup) -> Arc<crate::compiler::CompiledRule> {
        let rule = Rule::new(ACCESS_DOMAIN, id, json!(true))
            .with_id(id)
            .with_access(group);
        Arc::new(RuleCompiler::new().compile(rule))
    }

    #[test]
    fn test_storage_failure_aborts_and_check_access_denies() {
        let mut store = MockRuleStore::new();
        store
            .expect_list_active_rules()
            .returning(|_| Err(RuleError::StorageUnavailable("connection refused".into())));

        let engine = RuleEngine::new(store);
        let ctx = EvaluationContext::new().with_default(Decision::Granted);

        let err = engine
            .evaluate(ACCESS_DOMAIN, &ctx, &FactContext::new())
            .unwrap_err();
        assert!(err.is_fail_closed());

        let decision = engine.check_access(&ctx, &FactContext::new(), Decision::Granted);
        assert_eq!(decision, Decision::Denied);
    }

    #[test]
    fn test_access_uses_single_snapshot_read() {
        let mut store = MockRuleStore::new();
        store
            .expect_list_active_rules()
            .withf(|domain| domain.to_string() == ACCESS_DOMAIN)
            .times(1)
            .returning(|_| Ok(vec![access_rule("r-1", PriorityGroup::Require)]));
        store.expect_lookup_effects().never();

        let engine = RuleEngine::new(store);
        let result = engine
            .evaluate(
                ACCESS_DOMAIN,
                &EvaluationContext::new().with_default(Decision::Denied),
                &FactContext::new(),
            )
            .unwrap();

        assert_eq!(result.decision(), Some(Decision::Granted));
        assert_eq!(result.matched_rule_ids, vec!["r-1"]);
    }

    #[test]
    fn test_effect_lookup_failure_aborts_pricing() {
        let pricing_rule = Rule::new(PRICING_DOMAIN, "fee", json!(true))
            .with_id("p-1")
            .with_pricing(
                crate::models::StackingBehavior::Sequential,
                crate::models::CalculationPhase::PreDiscount,
            )
            .link_effect(crate::models::EffectKind::Fee, "fee-1", 0);
        let compiled = Arc::new(RuleCompiler::new().compile(pricing_rule));

        let mut store = MockRuleStore::new();
        store
            .expect_list_active_rules()
            .returning(move |_| Ok(vec![compiled.clone()]));
        store
            .expect_lookup_effects()
            .times(1)
            .returning(|_| Err(RuleError::StorageUnavailable("timeout".into())));

        let engine = RuleEngine::new(store);
        let ctx = EvaluationContext::new()
            .with_base_amount(crate::money::Money::new(1000, crate::money::Currency::usd()));

        let err = engine
            .evaluate(PRICING_DOMAIN, &ctx, &FactContext::new())
            .unwrap_err();
        assert!(matches!(err, RuleError::StorageUnavailable(_)));
    }

    #[test]
    fn test_pricing_requires_base_amount() {
        let store = MockRuleStore::new();
        let engine = RuleEngine::new(store);
        let err = engine
            .evaluate(PRICING_DOMAIN, &EvaluationContext::new(), &FactContext::new())
            .unwrap_err();
        assert!(matches!(err, RuleError::InvalidRequest(_)));
    }

    #[test]
    fn test_zero_budget_times_out() {
        let mut store = MockRuleStore::new();
        store.expect_list_active_rules().returning(|_| {
            std::thread::sleep(Duration::from_millis(5));
            Ok(vec![])
        });

        let engine = RuleEngine::new(store).with_timeout(Duration::from_millis(1));
        let err = engine
            .evaluate(
                ACCESS_DOMAIN,
                &EvaluationContext::new().with_default(Decision::Granted),
                &FactContext::new(),
            )
            .unwrap_err();
        assert!(matches!(err, RuleError::EvaluationTimeout { .. }));
    }

    #[test]
    fn test_other_domains_return_matches_only() {
        let rule = Rule::new("shipping", "free shipping", json!(true)).with_id("s-1");
        let compiled = Arc::new(RuleCompiler::new().compile(rule));

        let mut store = MockRuleStore::new();
        store
            .expect_list_active_rules()
            .returning(move |_| Ok(vec![compiled.clone()]));

        let engine = RuleEngine::new(store);
        let result = engine
            .evaluate("shipping", &EvaluationContext::new(), &FactContext::new())
            .unwrap();
        assert_eq!(result.outcome, EffectOutcome::MatchOnly);
        assert_eq!(result.matched_rule_ids, vec!["s-1"]);
    }
}
