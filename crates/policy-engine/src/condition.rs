//! 条件表达式树
//!
//! 持久化的条件 JSON 在编译时解析一次成为 [`ConditionNode`]，评估时不再重复解析。
//!
//! 支持的 JSON 形式：
//!
//! ```json
//! {"type": "and", "children": [
//!     {"type": "compare", "op": "gte", "lhs": {"type": "var", "name": "user.age"}, "rhs": 18},
//!     {"type": "not", "child": {"type": "var", "name": "user.banned"}}
//! ]}
//! ```
//!
//! 以及简写比较 `{"fact": "user.age", "operator": "gte", "value": "{{minimumAge}}"}`。
//! 操作数位置上的裸值视为字面量，`"{{name}}"` 形式的字符串视为变量引用。

use crate::error::{Result, RuleError};
use crate::operators::ComparisonOperator;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// 条件节点
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionNode {
    Literal {
        value: Value,
    },
    Var {
        name: String,
    },
    Compare {
        op: ComparisonOperator,
        lhs: Box<ConditionNode>,
        rhs: Box<ConditionNode>,
    },
    And {
        children: Vec<ConditionNode>,
    },
    Or {
        children: Vec<ConditionNode>,
    },
    Not {
        child: Box<ConditionNode>,
    },
}

impl ConditionNode {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    pub fn var(name: impl Into<String>) -> Self {
        Self::Var { name: name.into() }
    }

    pub fn compare(op: ComparisonOperator, lhs: ConditionNode, rhs: ConditionNode) -> Self {
        Self::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn and(children: Vec<ConditionNode>) -> Self {
        Self::And { children }
    }

    pub fn or(children: Vec<ConditionNode>) -> Self {
        Self::Or { children }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: ConditionNode) -> Self {
        Self::Not {
            child: Box::new(child),
        }
    }

    /// 恒真条件
    pub fn always() -> Self {
        Self::literal(true)
    }

    /// 序列化回持久化 JSON
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// 解析持久化的条件 JSON
    pub fn parse(value: &Value) -> Result<Self> {
        parse_node(value, "$")
    }

    /// 收集条件中引用的全部变量名
    pub fn referenced_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names(&self, names: &mut BTreeSet<String>) {
        match self {
            Self::Literal { .. } => {}
            Self::Var { name } => {
                names.insert(name.clone());
            }
            Self::Compare { lhs, rhs, .. } => {
                lhs.collect_names(names);
                rhs.collect_names(names);
            }
            Self::And { children } | Self::Or { children } => {
                for child in children {
                    child.collect_names(names);
                }
            }
            Self::Not { child } => child.collect_names(names),
        }
    }

    /// 查找空的 and/or 组（编写时拒绝）
    pub fn find_empty_group(&self) -> Option<&'static str> {
        match self {
            Self::And { children } if children.is_empty() => Some("and"),
            Self::Or { children } if children.is_empty() => Some("or"),
            Self::And { children } | Self::Or { children } => {
                children.iter().find_map(|c| c.find_empty_group())
            }
            Self::Not { child } => child.find_empty_group(),
            Self::Compare { lhs, rhs, .. } => lhs.find_empty_group().or(rhs.find_empty_group()),
            _ => None,
        }
    }
}

/// 识别 `{{name}}` 变量模板
fn template_name(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?.trim();
    if inner.is_empty() { None } else { Some(inner) }
}

fn parse_err(path: &str, msg: impl AsRef<str>) -> RuleError {
    RuleError::ConditionParse(format!("{}: {}", path, msg.as_ref()))
}

fn parse_node(value: &Value, path: &str) -> Result<ConditionNode> {
    let obj = match value {
        Value::Bool(b) => return Ok(ConditionNode::literal(*b)),
        Value::Object(obj) => obj,
        other => {
            return Err(parse_err(
                path,
                format!("条件节点必须是对象或布尔值，实际为 {}", other),
            ));
        }
    };

    if obj.contains_key("fact") {
        return parse_shorthand(obj, path);
    }

    let node_type = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| parse_err(path, "缺少 type 字段"))?;

    match node_type {
        "literal" => {
            let value = obj
                .get("value")
                .ok_or_else(|| parse_err(path, "literal 缺少 value"))?;
            Ok(ConditionNode::literal(value.clone()))
        }
        "var" => {
            let name = required_str(obj, "name", path)?;
            Ok(ConditionNode::var(name))
        }
        "compare" => {
            let op = parse_operator(obj.get("op"), path)?;
            let lhs = obj
                .get("lhs")
                .ok_or_else(|| parse_err(path, "compare 缺少 lhs"))?;
            let rhs = obj
                .get("rhs")
                .ok_or_else(|| parse_err(path, "compare 缺少 rhs"))?;
            Ok(ConditionNode::compare(
                op,
                parse_operand(lhs, &format!("{}.lhs", path))?,
                parse_operand(rhs, &format!("{}.rhs", path))?,
            ))
        }
        "and" | "or" => {
            let children = obj
                .get("children")
                .and_then(Value::as_array)
                .ok_or_else(|| parse_err(path, format!("{} 需要 children 数组", node_type)))?;
            let parsed = children
                .iter()
                .enumerate()
                .map(|(i, c)| parse_node(c, &format!("{}.children[{}]", path, i)))
                .collect::<Result<Vec<_>>>()?;
            Ok(if node_type == "and" {
                ConditionNode::and(parsed)
            } else {
                ConditionNode::or(parsed)
            })
        }
        "not" => {
            let child = obj
                .get("child")
                .ok_or_else(|| parse_err(path, "not 缺少 child"))?;
            Ok(ConditionNode::not(parse_node(
                child,
                &format!("{}.child", path),
            )?))
        }
        other => Err(parse_err(path, format!("未知的节点类型: {}", other))),
    }
}

/// 简写比较：`{"fact": .., "operator": .., "value": ..}`
fn parse_shorthand(obj: &Map<String, Value>, path: &str) -> Result<ConditionNode> {
    let fact = required_str(obj, "fact", path)?;
    let op = parse_operator(obj.get("operator"), path)?;
    let value = obj
        .get("value")
        .ok_or_else(|| parse_err(path, "简写比较缺少 value"))?;

    Ok(ConditionNode::compare(
        op,
        ConditionNode::var(fact),
        parse_operand(value, &format!("{}.value", path))?,
    ))
}

/// 操作数位置：节点对象、变量模板或裸字面量
fn parse_operand(value: &Value, path: &str) -> Result<ConditionNode> {
    match value {
        Value::String(s) => Ok(match template_name(s) {
            Some(name) => ConditionNode::var(name),
            None => ConditionNode::literal(value.clone()),
        }),
        Value::Object(obj) if obj.contains_key("type") || obj.contains_key("fact") => {
            parse_node(value, path)
        }
        _ => Ok(ConditionNode::literal(value.clone())),
    }
}

fn parse_operator(value: Option<&Value>, path: &str) -> Result<ComparisonOperator> {
    value
        .and_then(Value::as_str)
        .ok_or_else(|| parse_err(path, "缺少比较操作符"))?
        .parse()
        .map_err(|e: RuleError| parse_err(path, e.to_string()))
}

fn required_str<'a>(obj: &'a Map<String, Value>, key: &str, path: &str) -> Result<&'a str> {
    match obj.get(key).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(parse_err(path, format!("{} 必须是非空字符串", key))),
    }
}
