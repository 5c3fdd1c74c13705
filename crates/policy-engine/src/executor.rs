//! 条件执行器
//!
//! 在事实上下文与规则变量上执行 [`ConditionNode`]，采用三值逻辑：
//! 缺失的事实或无法比较的操作数产生 [`Truth::Indeterminate`]，
//! 它既不是匹配也不会被 `not` 翻转成匹配。

use crate::compiler::{CompiledCondition, CompiledRule};
use crate::condition::ConditionNode;
use crate::evaluator::ConditionEvaluator;
use crate::models::FactContext;
use crate::operators::LogicalOperator;
use serde_json::{Map, Value};
use std::borrow::Cow;

/// 三值真值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Indeterminate,
}

impl Truth {
    fn negate(self) -> Self {
        match self {
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Indeterminate => Self::Indeterminate,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::True => "MATCHED",
            Self::False => "NOT_MATCHED",
            Self::Indeterminate => "INDETERMINATE",
        }
    }
}

impl From<bool> for Truth {
    fn from(b: bool) -> Self {
        if b { Self::True } else { Self::False }
    }
}

/// 变量作用域：事实优先，回退到规则变量
pub struct VariableScope<'a> {
    facts: &'a FactContext,
    variables: &'a Map<String, Value>,
}

impl<'a> VariableScope<'a> {
    pub fn new(facts: &'a FactContext, variables: &'a Map<String, Value>) -> Self {
        Self { facts, variables }
    }

    pub fn get(&self, name: &str) -> Option<&'a Value> {
        lookup(self.facts, name).or_else(|| lookup(self.variables, name))
    }
}

/// 先按扁平键查找，再按点号路径逐级查找（支持数组下标）
fn lookup<'a>(map: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    if let Some(v) = map.get(name) {
        return Some(v);
    }

    let mut parts = name.split('.');
    let mut current = map.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(obj) => obj.get(part)?,
            Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// 单条规则条件的执行结果
#[derive(Debug, Clone)]
pub struct ConditionOutcome {
    pub truth: Truth,
    /// 未能解析的变量名
    pub unresolved: Vec<String>,
    /// 类型不符等导致不确定的原因
    pub problems: Vec<String>,
    pub trace: Vec<String>,
}

impl ConditionOutcome {
    fn new() -> Self {
        Self {
            truth: Truth::Indeterminate,
            unresolved: Vec::new(),
            problems: Vec::new(),
            trace: Vec::new(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.truth == Truth::True
    }
}

/// 条件执行器
pub struct ConditionExecutor {
    /// 是否记录详细评估追踪
    trace_enabled: bool,
}

impl ConditionExecutor {
    pub fn new() -> Self {
        Self {
            trace_enabled: false,
        }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    pub fn trace_enabled(&self) -> bool {
        self.trace_enabled
    }

    /// 执行规则条件；解析失败的条件直接视为不确定
    pub fn execute(&self, rule: &CompiledRule, facts: &FactContext) -> ConditionOutcome {
        match &rule.condition {
            CompiledCondition::Parsed(node) => self.evaluate(node, facts, &rule.rule.variables),
            CompiledCondition::Malformed(reason) => {
                let mut outcome = ConditionOutcome::new();
                outcome.problems.push(reason.clone());
                outcome
            }
        }
    }

    /// 执行条件树
    pub fn evaluate(
        &self,
        node: &ConditionNode,
        facts: &FactContext,
        variables: &Map<String, Value>,
    ) -> ConditionOutcome {
        let scope = VariableScope::new(facts, variables);
        let mut outcome = ConditionOutcome::new();
        outcome.truth = self.truth(node, &scope, &mut outcome, "root");
        outcome
    }

    fn record(&self, outcome: &mut ConditionOutcome, entry: impl FnOnce() -> String) {
        if self.trace_enabled {
            outcome.trace.push(entry());
        }
    }

    /// 布尔位置上的节点
    fn truth(
        &self,
        node: &ConditionNode,
        scope: &VariableScope<'_>,
        outcome: &mut ConditionOutcome,
        path: &str,
    ) -> Truth {
        match node {
            ConditionNode::Literal { value } => match value {
                Value::Bool(b) => Truth::from(*b),
                other => {
                    outcome
                        .problems
                        .push(format!("{}: 非布尔字面量 {}", path, other));
                    Truth::Indeterminate
                }
            },
            ConditionNode::Var { name } => match scope.get(name) {
                Some(Value::Bool(b)) => Truth::from(*b),
                Some(other) => {
                    outcome.problems.push(format!(
                        "{}: 变量 {} 不是布尔值 ({})",
                        path,
                        name,
                        ConditionEvaluator::type_name(other)
                    ));
                    Truth::Indeterminate
                }
                None => {
                    outcome.unresolved.push(name.clone());
                    Truth::Indeterminate
                }
            },
            ConditionNode::Compare { op, lhs, rhs } => {
                let left = self.operand(lhs, scope, outcome, &format!("{}.lhs", path));
                let right = self.operand(rhs, scope, outcome, &format!("{}.rhs", path));
                let truth = match (left, right) {
                    (Some(l), Some(r)) => match ConditionEvaluator::evaluate(&l, *op, &r) {
                        Ok(b) => Truth::from(b),
                        Err(e) => {
                            outcome.problems.push(format!("{}: {}", path, e));
                            Truth::Indeterminate
                        }
                    },
                    _ => Truth::Indeterminate,
                };
                self.record(outcome, || {
                    format!("{}: {:?} {} {:?} => {}", path, lhs, op, rhs, truth.as_str())
                });
                truth
            }
            ConditionNode::And { children } => {
                self.group(LogicalOperator::And, children, scope, outcome, path)
            }
            ConditionNode::Or { children } => {
                self.group(LogicalOperator::Or, children, scope, outcome, path)
            }
            ConditionNode::Not { child } => {
                let truth = self
                    .truth(child, scope, outcome, &format!("{}.child", path))
                    .negate();
                self.record(outcome, || format!("{}: NOT => {}", path, truth.as_str()));
                truth
            }
        }
    }

    /// 逻辑组（Kleene 语义，遇到决定性子节点短路）
    fn group(
        &self,
        operator: LogicalOperator,
        children: &[ConditionNode],
        scope: &VariableScope<'_>,
        outcome: &mut ConditionOutcome,
        path: &str,
    ) -> Truth {
        // AND 遇 false 短路，OR 遇 true 短路
        let (decisive, fallthrough) = match operator {
            LogicalOperator::Or => (Truth::True, Truth::False),
            _ => (Truth::False, Truth::True),
        };

        let mut result = fallthrough;
        for (i, child) in children.iter().enumerate() {
            let child_path = format!("{}.children[{}]", path, i);
            match self.truth(child, scope, outcome, &child_path) {
                t if t == decisive => {
                    self.record(outcome, || {
                        format!("{}: {} 短路 - 子节点 {} 为 {}", path, operator, i, t.as_str())
                    });
                    return decisive;
                }
                Truth::Indeterminate => result = Truth::Indeterminate,
                _ => {}
            }
        }

        self.record(outcome, || format!("{}: {} => {}", path, operator, result.as_str()));
        result
    }

    /// 操作数位置上的节点
    fn operand<'v>(
        &self,
        node: &'v ConditionNode,
        scope: &VariableScope<'v>,
        outcome: &mut ConditionOutcome,
        path: &str,
    ) -> Option<Cow<'v, Value>> {
        match node {
            ConditionNode::Literal { value } => Some(Cow::Borrowed(value)),
            ConditionNode::Var { name } => match scope.get(name) {
                Some(v) => Some(Cow::Borrowed(v)),
                None => {
                    outcome.unresolved.push(name.clone());
                    None
                }
            },
            other => match self.truth(other, scope, outcome, path) {
                Truth::True => Some(Cow::Owned(Value::Bool(true))),
                Truth::False => Some(Cow::Owned(Value::Bool(false))),
                Truth::Indeterminate => None,
            },
        }
    }
}

impl Default for ConditionExecutor {
    fn default() -> Self {
        Self::new()
    }
}
