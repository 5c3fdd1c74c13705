//! 条件评估器
//!
//! 实现比较操作符在 JSON 值上的语义。金额快照走 [`Money::compare`]，
//! 整数精确比较，不做浮点运算。无法比较的组合返回 `TypeMismatch`，
//! 由执行器转换为"不确定"。

use crate::error::{Result, RuleError};
use crate::money::Money;
use crate::operators::ComparisonOperator;
use serde_json::{Number, Value};
use std::cmp::Ordering;

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估比较
    ///
    /// # Arguments
    /// * `lhs` - 左操作数（通常是事实值）
    /// * `operator` - 操作符
    /// * `rhs` - 右操作数（通常是字面量或规则变量）
    pub fn evaluate(lhs: &Value, operator: ComparisonOperator, rhs: &Value) -> Result<bool> {
        match operator {
            ComparisonOperator::Eq => Self::eq(lhs, rhs),
            ComparisonOperator::Ne => Self::eq(lhs, rhs).map(|r| !r),
            ComparisonOperator::Gt => Ok(Self::ordering(lhs, rhs)? == Ordering::Greater),
            ComparisonOperator::Gte => Ok(Self::ordering(lhs, rhs)? != Ordering::Less),
            ComparisonOperator::Lt => Ok(Self::ordering(lhs, rhs)? == Ordering::Less),
            ComparisonOperator::Lte => Ok(Self::ordering(lhs, rhs)? != Ordering::Greater),
            ComparisonOperator::In => Self::in_list(lhs, rhs),
        }
    }

    /// 相等比较
    fn eq(lhs: &Value, rhs: &Value) -> Result<bool> {
        if let (Some(a), Some(b)) = (Money::from_value(lhs), Money::from_value(rhs)) {
            return Ok(a.compare(&b)? == Ordering::Equal);
        }

        if let (Value::Number(a), Value::Number(b)) = (lhs, rhs) {
            return Ok(Self::number_ordering(a, b)? == Ordering::Equal);
        }

        Ok(lhs == rhs)
    }

    /// 排序比较：金额、数值或字符串
    fn ordering(lhs: &Value, rhs: &Value) -> Result<Ordering> {
        if let (Some(a), Some(b)) = (Money::from_value(lhs), Money::from_value(rhs)) {
            return Ok(a.compare(&b)?);
        }

        match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => Self::number_ordering(a, b),
            (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
            _ => Err(RuleError::TypeMismatch {
                expected: Self::type_name(lhs).to_string(),
                actual: Self::type_name(rhs).to_string(),
            }),
        }
    }

    /// 整数精确比较，只有混合整数/小数时才按浮点
    fn number_ordering(a: &Number, b: &Number) -> Result<Ordering> {
        if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
            return Ok(x.cmp(&y));
        }
        if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
            return Ok(x.cmp(&y));
        }
        // 一正一负且超出 i64 的整数
        if a.is_u64() && b.is_i64() {
            return Ok(Ordering::Greater);
        }
        if a.is_i64() && b.is_u64() {
            return Ok(Ordering::Less);
        }

        match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).ok_or_else(|| RuleError::TypeMismatch {
                expected: "comparable number".to_string(),
                actual: "NaN".to_string(),
            }),
            _ => Err(RuleError::TypeMismatch {
                expected: "number".to_string(),
                actual: "unrepresentable number".to_string(),
            }),
        }
    }

    /// 列表包含检查 (in)
    fn in_list(lhs: &Value, rhs: &Value) -> Result<bool> {
        let arr = rhs.as_array().ok_or_else(|| RuleError::TypeMismatch {
            expected: "array".to_string(),
            actual: Self::type_name(rhs).to_string(),
        })?;

        for candidate in arr {
            // 单个元素类型不符不影响其他元素
            if Self::eq(lhs, candidate).unwrap_or(false) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// 获取值的类型名称
    pub fn type_name(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(obj) if obj.contains_key("currency") => "money",
            Value::Object(_) => "object",
        }
    }
}
