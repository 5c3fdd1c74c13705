//! 关联效果目录
//!
//! 定价规则通过关联行引用费用、促销和税率。每个效果给定基础金额后
//! 产生一笔带符号的调整：费用与税率为正，促销为负。

use crate::error::{Result, RuleError};
use crate::models::{EffectKind, EffectRef};
use crate::money::{Money, MoneyError, Rate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 一次批量查询得到的存活效果
pub type EffectCatalog = HashMap<EffectRef, LinkedEffect>;

/// 百分比或固定金额
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AdjustmentValue {
    /// 比率，如 10% = `Rate { amount: 10, scale: 2 }`
    Percentage(Rate),
    Fixed(Money),
}

impl AdjustmentValue {
    /// 百分比必须在 0–100% 之间，固定金额不能为负
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Percentage(rate) => {
                let one = 10i128.checked_pow(rate.scale).ok_or(MoneyError::Overflow)?;
                if rate.amount < 0 || rate.amount as i128 > one {
                    return Err(RuleError::InvalidRequest(format!(
                        "百分比超出 0-100 范围: {}e-{}",
                        rate.amount, rate.scale
                    )));
                }
            }
            Self::Fixed(money) if money.is_negative() => {
                return Err(RuleError::InvalidRequest(format!(
                    "固定金额不能为负: {}",
                    money
                )));
            }
            Self::Fixed(_) => {}
        }
        Ok(())
    }

    /// 按基础金额计算（未带符号）
    fn magnitude(&self, base: &Money) -> std::result::Result<Money, MoneyError> {
        match self {
            Self::Percentage(rate) => base.multiply(rate),
            Self::Fixed(amount) => {
                if amount.currency() != base.currency() {
                    return Err(MoneyError::CurrencyMismatch {
                        left: base.currency().code.clone(),
                        right: amount.currency().code.clone(),
                    });
                }
                Ok(amount.clone())
            }
        }
    }
}

/// 费用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fee {
    pub id: String,
    pub name: String,
    pub value: AdjustmentValue,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_taxable: bool,
}

impl Fee {
    pub fn percentage(id: impl Into<String>, name: impl Into<String>, rate: Rate) -> Self {
        Self::with_value(id, name, AdjustmentValue::Percentage(rate))
    }

    pub fn fixed(id: impl Into<String>, name: impl Into<String>, amount: Money) -> Self {
        Self::with_value(id, name, AdjustmentValue::Fixed(amount))
    }

    fn with_value(id: impl Into<String>, name: impl Into<String>, value: AdjustmentValue) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            value,
            is_active: true,
            is_taxable: false,
        }
    }
}

/// 促销
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Promotion {
    pub id: String,
    pub name: String,
    pub value: AdjustmentValue,
}

impl Promotion {
    pub fn percentage(id: impl Into<String>, name: impl Into<String>, rate: Rate) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            value: AdjustmentValue::Percentage(rate),
        }
    }

    pub fn fixed(id: impl Into<String>, name: impl Into<String>, amount: Money) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            value: AdjustmentValue::Fixed(amount),
        }
    }
}

/// 税率
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxRate {
    pub id: String,
    pub name: String,
    /// 8.25% = `{amount: 825, scale: 4}`
    pub rate: Rate,
    #[serde(default)]
    pub receipt_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkedEffect {
    Fee(Fee),
    Promotion(Promotion),
    TaxRate(TaxRate),
}

impl LinkedEffect {
    pub fn kind(&self) -> EffectKind {
        match self {
            Self::Fee(_) => EffectKind::Fee,
            Self::Promotion(_) => EffectKind::Promotion,
            Self::TaxRate(_) => EffectKind::TaxRate,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Fee(f) => &f.id,
            Self::Promotion(p) => &p.id,
            Self::TaxRate(t) => &t.id,
        }
    }

    pub fn key(&self) -> EffectRef {
        EffectRef::new(self.kind(), self.id())
    }

    /// 停用的费用不参与计算
    pub fn is_usable(&self) -> bool {
        match self {
            Self::Fee(fee) => fee.is_active,
            _ => true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Fee(fee) => fee.value.validate(),
            Self::Promotion(promo) => promo.value.validate(),
            Self::TaxRate(tax) if tax.rate.amount < 0 => Err(RuleError::InvalidRequest(
                format!("税率不能为负: {}", tax.id),
            )),
            Self::TaxRate(_) => Ok(()),
        }
    }

    /// 针对基础金额的带符号调整
    ///
    /// 促销不会把金额压到零以下：折扣幅度以 `max(base, 0)` 为上限。
    pub fn adjustment(&self, base: &Money) -> std::result::Result<Money, MoneyError> {
        match self {
            Self::Fee(fee) => fee.value.magnitude(base),
            Self::TaxRate(tax) => base.multiply(&tax.rate),
            Self::Promotion(promo) => {
                let discount = promo.value.magnitude(base)?;
                let ceiling = if base.is_negative() {
                    Money::with_scale(0, base.currency().clone(), base.scale())
                } else {
                    base.clone()
                };
                discount.min(&ceiling)?.negate()
            }
        }
    }
}

impl From<Fee> for LinkedEffect {
    fn from(fee: Fee) -> Self {
        Self::Fee(fee)
    }
}

impl From<Promotion> for LinkedEffect {
    fn from(promo: Promotion) -> Self {
        Self::Promotion(promo)
    }
}

impl From<TaxRate> for LinkedEffect {
    fn from(tax: TaxRate) -> Self {
        Self::TaxRate(tax)
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;

    fn usd(amount: i64) -> Money {
        Money::new(amount, Currency::usd())
    }

    #[test]
    fn test_fee_adds_to_base() {
        let fee: LinkedEffect = Fee::percentage("f-1", "service", Rate::percent(5)).into();
        assert_eq!(fee.adjustment(&usd(10000)).unwrap(), usd(500));

        let fixed: LinkedEffect = Fee::fixed("f-2", "handling", usd(250)).into();
        assert_eq!(fixed.adjustment(&usd(10000)).unwrap(), usd(250));
    }

    #[test]
    fn test_promotion_is_negative_and_clamped() {
        let promo: LinkedEffect = Promotion::percentage("p-1", "10 off", Rate::percent(10)).into();
        assert_eq!(promo.adjustment(&usd(10000)).unwrap(), usd(-1000));

        let big: LinkedEffect = Promotion::fixed("p-2", "50 off", usd(5000)).into();
        assert_eq!(big.adjustment(&usd(3000)).unwrap(), usd(-3000));
    }

    #[test]
    fn test_tax_rate_rounds() {
        let tax: LinkedEffect = TaxRate {
            id: "t-1".into(),
            name: "TX".into(),
            rate: Rate::new(825, 4),
            receipt_code: Some("TX".into()),
        }
        .into();
        assert_eq!(tax.adjustment(&usd(1000)).unwrap(), usd(83));
    }

    #[test]
    fn test_fixed_currency_mismatch() {
        let fee: LinkedEffect = Fee::fixed("f-1", "eur fee", Money::new(100, Currency::eur())).into();
        assert!(matches!(
            fee.adjustment(&usd(1000)),
            Err(MoneyError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_validation() {
        assert!(AdjustmentValue::Percentage(Rate::percent(100)).validate().is_ok());
        assert!(AdjustmentValue::Percentage(Rate::percent(101)).validate().is_err());
        assert!(AdjustmentValue::Fixed(usd(-1)).validate().is_err());
    }

    #[test]
    fn test_inactive_fee_is_unusable() {
        let mut fee = Fee::fixed("f-1", "x", usd(1));
        fee.is_active = false;
        assert!(!LinkedEffect::from(fee).is_usable());
    }
}
