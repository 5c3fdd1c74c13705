//! 效果合成
//!
//! 将已排序的匹配规则合成为单一结果：
//! - 访问领域：override > deny > require 的固定优先级
//! - 定价领域：按计算阶段分组，阶段内按叠加方式分桶计算

mod access;
mod pricing;

use crate::catalog::EffectCatalog;
use crate::compiler::CompiledRule;
use crate::error::Result;
use crate::models::{AccessOutcome, Decision, Diagnostic, EffectRef, PriceAdjustment};
use crate::money::Money;
use std::collections::BTreeSet;
use std::sync::Arc;

/// 效果合成器
#[derive(Debug, Default, Clone, Copy)]
pub struct EffectResolver;

impl EffectResolver {
    pub fn new() -> Self {
        Self
    }

    /// 访问决定；没有规则匹配时使用调用方的默认值
    pub fn resolve_access(
        &self,
        matched: &[Arc<CompiledRule>],
        default_decision: Option<Decision>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<AccessOutcome> {
        access::resolve(matched, default_decision, diagnostics)
    }

    /// 价格调整
    pub fn resolve_pricing(
        &self,
        matched: &[Arc<CompiledRule>],
        base_amount: &Money,
        catalog: &EffectCatalog,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<PriceAdjustment> {
        pricing::resolve(matched, base_amount, catalog, diagnostics)
    }

    /// 匹配规则引用的全部效果，用于一次批量查询
    pub fn effect_refs(&self, matched: &[Arc<CompiledRule>]) -> Vec<EffectRef> {
        matched
            .iter()
            .flat_map(|r| r.rule.effects.iter().map(|link| link.key()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
