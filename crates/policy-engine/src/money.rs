//! 货币金额
//!
//! 金额以不可变快照 `{amount, currency: {code, base, exponent}, scale}` 表示，
//! `amount` 为最小单位整数。所有运算都经过本模块，禁止浮点运算。
//!
//! 比率（百分比、税率）使用带精度的整数 [`Rate`]，如 8.25% = `{amount: 825, scale: 4}`。
//! 按比率计算后统一以四舍五入（远离零）回到原金额精度。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("币种不一致: {left} 与 {right}")]
    CurrencyMismatch { left: String, right: String },

    #[error("金额溢出")]
    Overflow,

    #[error("无效的比率: {0}")]
    InvalidRate(String),
}

/// 币种定义（ISO 4217）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency {
    pub code: String,
    pub base: u32,
    pub exponent: u32,
}

impl Currency {
    pub fn new(code: impl Into<String>, base: u32, exponent: u32) -> Self {
        Self {
            code: code.into(),
            base,
            exponent,
        }
    }

    pub fn usd() -> Self {
        Self::new("USD", 10, 2)
    }

    pub fn eur() -> Self {
        Self::new("EUR", 10, 2)
    }
}

/// 金额快照
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    amount: i64,
    currency: Currency,
    scale: u32,
}

impl Money {
    /// 以币种默认精度创建金额
    pub fn new(amount: i64, currency: Currency) -> Self {
        let scale = currency.exponent;
        Self {
            amount,
            currency,
            scale,
        }
    }

    pub fn with_scale(amount: i64, currency: Currency, scale: u32) -> Self {
        Self {
            amount,
            currency,
            scale,
        }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    pub fn is_negative(&self) -> bool {
        self.amount < 0
    }

    /// 尝试从 JSON 值识别金额快照（条件比较中使用）
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if !obj.contains_key("currency") || !obj.contains_key("amount") {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency.code.clone(),
                right: other.currency.code.clone(),
            });
        }
        Ok(())
    }

    /// 把金额提升到更高精度（只放大，不丢精度）
    fn scaled_amount(&self, scale: u32) -> Result<i128, MoneyError> {
        let factor = pow(self.currency.base, scale - self.scale)?;
        (self.amount as i128)
            .checked_mul(factor)
            .ok_or(MoneyError::Overflow)
    }

    fn from_i128(amount: i128, currency: Currency, scale: u32) -> Result<Self, MoneyError> {
        let amount = i64::try_from(amount).map_err(|_| MoneyError::Overflow)?;
        Ok(Self::with_scale(amount, currency, scale))
    }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        let scale = self.scale.max(other.scale);
        let sum = self
            .scaled_amount(scale)?
            .checked_add(other.scaled_amount(scale)?)
            .ok_or(MoneyError::Overflow)?;
        Self::from_i128(sum, self.currency.clone(), scale)
    }

    pub fn subtract(&self, other: &Money) -> Result<Money, MoneyError> {
        self.add(&other.negate()?)
    }

    /// `i64::MIN` 无法取反，报告溢出
    pub fn negate(&self) -> Result<Money, MoneyError> {
        let amount = self.amount.checked_neg().ok_or(MoneyError::Overflow)?;
        Ok(Self::with_scale(amount, self.currency.clone(), self.scale))
    }

    pub fn abs(&self) -> Result<Money, MoneyError> {
        let amount = self.amount.checked_abs().ok_or(MoneyError::Overflow)?;
        Ok(Self::with_scale(amount, self.currency.clone(), self.scale))
    }

    /// 币种安全的大小比较，不同精度先对齐
    pub fn compare(&self, other: &Money) -> Result<Ordering, MoneyError> {
        self.ensure_same_currency(other)?;
        let scale = self.scale.max(other.scale);
        Ok(self.scaled_amount(scale)?.cmp(&other.scaled_amount(scale)?))
    }

    /// 乘以比率，结果保持原精度（四舍五入，远离零）
    pub fn multiply(&self, rate: &Rate) -> Result<Money, MoneyError> {
        let product = (self.amount as i128)
            .checked_mul(rate.amount as i128)
            .ok_or(MoneyError::Overflow)?;
        let divisor = pow(10, rate.scale)?;
        Self::from_i128(
            div_round_half_away(product, divisor),
            self.currency.clone(),
            self.scale,
        )
    }

    /// 取两者中较小者
    pub fn min(&self, other: &Money) -> Result<Money, MoneyError> {
        Ok(match self.compare(other)? {
            Ordering::Greater => other.clone(),
            _ => self.clone(),
        })
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}e-{}",
            self.currency.code, self.amount, self.scale
        )
    }
}

/// 十进制比率：`amount / 10^scale`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rate {
    pub amount: i64,
    pub scale: u32,
}

impl Rate {
    pub fn new(amount: i64, scale: u32) -> Self {
        Self { amount, scale }
    }

    /// 整数百分比，如 `Rate::percent(10)` = 0.10
    pub fn percent(percent: i64) -> Self {
        Self::new(percent, 2)
    }

    /// 解析百分比数值字符串，如 "8.25" -> 0.0825
    pub fn from_percent_str(s: &str) -> Result<Self, MoneyError> {
        let trimmed = s.trim();
        let invalid = || MoneyError::InvalidRate(trimmed.to_string());

        let (int_part, frac_part) = match trimmed.split_once('.') {
            Some((i, f)) => (i, f.trim_end_matches('0')),
            None => (trimmed, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let digits = format!("{}{}", int_part, frac_part);
        let amount: i64 = digits.parse().map_err(|_| invalid())?;
        let scale = u32::try_from(frac_part.len()).map_err(|_| invalid())? + 2;
        Ok(Self::new(amount, scale))
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }
}

fn pow(base: u32, exp: u32) -> Result<i128, MoneyError> {
    (base as i128).checked_pow(exp).ok_or(MoneyError::Overflow)
}

fn div_round_half_away(n: i128, d: i128) -> i128 {
    let q = n / d;
    let r = n % d;
    if r.abs() * 2 >= d { q + n.signum() } else { q }
}
