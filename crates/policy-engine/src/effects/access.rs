//! 访问领域合成
//!
//! 优先级与规则 priority 无关：任一 override 匹配即 GRANTED；否则任一 deny
//! 匹配即 DENIED；否则有 require 匹配即 GRANTED；都没有时使用调用方默认值。

use crate::compiler::CompiledRule;
use crate::error::{Result, RuleError};
use crate::models::{
    AccessOutcome, Decision, DecisionBasis, Diagnostic, DiagnosticKind, PriorityGroup,
};
use std::sync::Arc;
use tracing::warn;

pub(super) fn resolve(
    matched: &[Arc<CompiledRule>],
    default_decision: Option<Decision>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<AccessOutcome> {
    let mut first_override = None;
    let mut first_deny = None;
    let mut first_require = None;

    for compiled in matched {
        let Some(config) = compiled.rule.access_config else {
            warn!(rule_id = %compiled.id(), "Access rule without access config, ignored");
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::DataIntegrityWarning,
                compiled.id(),
                "访问规则缺少 access 配置，已忽略",
            ));
            continue;
        };

        let slot = match config.priority_group {
            PriorityGroup::Override => &mut first_override,
            PriorityGroup::Deny => &mut first_deny,
            PriorityGroup::Require => &mut first_require,
        };
        if slot.is_none() {
            *slot = Some(compiled);
        }
    }

    let decided = |decision: Decision, basis: DecisionBasis, rule: &Arc<CompiledRule>| AccessOutcome {
        decision,
        basis,
        deciding_rule_id: Some(rule.id().to_string()),
        message: rule.rule.message.clone(),
    };

    if let Some(rule) = first_override {
        return Ok(decided(Decision::Granted, DecisionBasis::Override, rule));
    }
    if let Some(rule) = first_deny {
        return Ok(decided(Decision::Denied, DecisionBasis::Deny, rule));
    }
    if let Some(rule) = first_require {
        return Ok(decided(Decision::Granted, DecisionBasis::Require, rule));
    }

    let decision = default_decision.ok_or_else(|| {
        RuleError::InvalidRequest("没有规则匹配且未提供默认决定 (defaultDecision)".to_string())
    })?;
    Ok(AccessOutcome {
        decision,
        basis: DecisionBasis::Default,
        deciding_rule_id: None,
        message: None,
    })
}
