//! 定价领域合成
//!
//! 先完整计算 pre_discount 阶段，其结果作为 post_discount 阶段的基础。
//! 阶段内按选择顺序（priority 降序、ID 升序）处理规则，并按叠加方式分桶：
//! - compound：以前一条 compound 规则产生的累计金额为基础
//! - sequential：以阶段起始金额为基础，全部调整求和后一次性计入
//! - max：只取绝对值最大的一笔调整，并列时选择顺序在前者胜出
//!
//! 阶段结果 = compound 链输出 + Σ sequential 调整 + 选中的 max 调整（无则为 0）。
//! 促销合计不会把阶段结果压到 `min(起始金额, 0)` 以下，差额记入 `floor_adjustment`。

use crate::catalog::EffectCatalog;
use crate::compiler::CompiledRule;
use crate::error::Result;
use crate::models::{
    CalculationPhase, Diagnostic, DiagnosticKind, EffectLine, PhaseBreakdown, PriceAdjustment,
    PricingConfig, RuleContribution, StackingBehavior,
};
use crate::money::{Money, MoneyError};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::warn;

/// 单条规则针对某个基础金额的计算结果
enum RuleAdjustment {
    Computed { adjustment: Money, lines: Vec<EffectLine> },
    /// 被排除，诊断已记录
    Excluded,
}

pub(super) fn resolve(
    matched: &[Arc<CompiledRule>],
    base_amount: &Money,
    catalog: &EffectCatalog,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<PriceAdjustment> {
    let mut partial = false;

    let mut configured: Vec<(&Arc<CompiledRule>, PricingConfig)> = Vec::with_capacity(matched.len());
    for compiled in matched {
        match compiled.rule.pricing_config {
            Some(config) => configured.push((compiled, config)),
            None => {
                warn!(rule_id = %compiled.id(), "Pricing rule without pricing config, ignored");
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::DataIntegrityWarning,
                    compiled.id(),
                    "定价规则缺少 pricing 配置，已忽略",
                ));
            }
        }
    }

    let mut running = base_amount.clone();
    let mut phases = Vec::new();

    for phase in CalculationPhase::ALL {
        let rules: Vec<_> = configured
            .iter()
            .filter(|(_, config)| config.calculation_phase == phase)
            .collect();
        if rules.is_empty() {
            continue;
        }

        let breakdown = resolve_phase(phase, &rules, &running, catalog, diagnostics, &mut partial)?;
        running = breakdown.ending_amount.clone();
        phases.push(breakdown);
    }

    Ok(PriceAdjustment {
        base_amount: base_amount.clone(),
        total_adjustment: running.subtract(base_amount)?,
        final_amount: running,
        phases,
        partial,
    })
}

fn resolve_phase(
    phase: CalculationPhase,
    rules: &[&(&Arc<CompiledRule>, PricingConfig)],
    starting_amount: &Money,
    catalog: &EffectCatalog,
    diagnostics: &mut Vec<Diagnostic>,
    partial: &mut bool,
) -> Result<PhaseBreakdown> {
    let zero = Money::with_scale(0, starting_amount.currency().clone(), starting_amount.scale());

    let mut compound_running = starting_amount.clone();
    let mut sequential_sum = zero.clone();
    // (contributions 下标, 调整)
    let mut max_pick: Option<(usize, Money)> = None;
    let mut contributions = Vec::with_capacity(rules.len());

    for (compiled, config) in rules.iter().map(|entry| (entry.0, entry.1)) {
        let stacking = config.stacking_behavior;
        let rule_base = match stacking {
            StackingBehavior::Compound => &compound_running,
            StackingBehavior::Sequential | StackingBehavior::Max => starting_amount,
        };

        let (adjustment, lines) = match rule_adjustment(compiled, rule_base, catalog, diagnostics, partial)? {
            RuleAdjustment::Computed { adjustment, lines } => (adjustment, lines),
            RuleAdjustment::Excluded => continue,
        };

        let mut applied = true;
        match stacking {
            StackingBehavior::Compound => {
                compound_running = compound_running.add(&adjustment)?;
            }
            StackingBehavior::Sequential => {
                sequential_sum = sequential_sum.add(&adjustment)?;
            }
            StackingBehavior::Max => {
                applied = false;
                let wins = match &max_pick {
                    None => true,
                    Some((_, best)) => adjustment.abs()?.compare(&best.abs()?)? == Ordering::Greater,
                };
                if wins {
                    max_pick = Some((contributions.len(), adjustment.clone()));
                }
            }
        }

        contributions.push(RuleContribution {
            rule_id: compiled.id().to_string(),
            stacking_behavior: stacking,
            adjustment,
            applied,
            lines,
        });
    }

    let max_adjustment = match max_pick {
        Some((index, adjustment)) => {
            contributions[index].applied = true;
            adjustment
        }
        None => zero.clone(),
    };

    let summed = compound_running.add(&sequential_sum)?.add(&max_adjustment)?;

    // 费用与税率非负，低于下限只可能来自促销叠加
    let floor = if starting_amount.is_negative() {
        starting_amount.clone()
    } else {
        zero
    };
    let (ending_amount, floor_adjustment) = if summed.compare(&floor)? == Ordering::Less {
        let restored = floor.subtract(&summed)?;
        warn!(phase = ?phase, restored = %restored, "Promotions exceed phase amount, clamped");
        (floor, Some(restored))
    } else {
        (summed, None)
    };

    Ok(PhaseBreakdown {
        phase,
        starting_amount: starting_amount.clone(),
        ending_amount,
        contributions,
        floor_adjustment,
    })
}

/// 规则调整 = 其全部关联效果针对同一基础金额的调整之和
fn rule_adjustment(
    compiled: &CompiledRule,
    base: &Money,
    catalog: &EffectCatalog,
    diagnostics: &mut Vec<Diagnostic>,
    partial: &mut bool,
) -> Result<RuleAdjustment> {
    let mut links: Vec<_> = compiled.rule.effects.iter().collect();
    // 展示顺序：关联 priority 降序，再按效果 ID
    links.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| a.effect_id.cmp(&b.effect_id))
    });

    let dangling: Vec<String> = links
        .iter()
        .filter(|link| {
            !catalog
                .get(&link.key())
                .is_some_and(|effect| effect.is_usable())
        })
        .map(|link| link.key().to_string())
        .collect();

    if !dangling.is_empty() {
        warn!(rule_id = %compiled.id(), dangling = ?dangling, "Rule references missing effects, excluded");
        diagnostics.push(Diagnostic::new(
            DiagnosticKind::DanglingEffectReference,
            compiled.id(),
            format!("关联效果不存在或已删除: {}", dangling.join(", ")),
        ));
        *partial = true;
        return Ok(RuleAdjustment::Excluded);
    }

    let mut adjustment = Money::with_scale(0, base.currency().clone(), base.scale());
    let mut lines = Vec::with_capacity(links.len());

    for link in links {
        let Some(effect) = catalog.get(&link.key()) else {
            continue;
        };
        let amount = match effect.adjustment(base) {
            Ok(amount) => amount,
            Err(MoneyError::CurrencyMismatch { left, right }) => {
                warn!(rule_id = %compiled.id(), effect = %link.key(), "Effect currency mismatch, rule excluded");
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::DataIntegrityWarning,
                    compiled.id(),
                    format!("效果 {} 币种 {} 与基础金额币种 {} 不一致", link.key(), right, left),
                ));
                return Ok(RuleAdjustment::Excluded);
            }
            Err(e) => return Err(e.into()),
        };

        adjustment = adjustment.add(&amount)?;
        lines.push(EffectLine {
            kind: link.kind,
            effect_id: link.effect_id.clone(),
            priority: link.priority,
            amount,
        });
    }

    Ok(RuleAdjustment::Computed { adjustment, lines })
}
