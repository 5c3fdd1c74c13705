//! 店面策略引擎
//!
//! 对访问、定价等领域的规则做定向、条件求值和效果合成：
//! - JSON 条件 AST 解析与编译缓存
//! - Kleene 三值逻辑的条件执行
//! - 访问领域 override/deny/require 决策
//! - 定价领域按阶段与叠加方式计算价格调整
//! - PostgreSQL 规则仓储与 HTTP 接口

pub mod api;
pub mod cache;
pub mod catalog;
pub mod compiler;
pub mod condition;
pub mod effects;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod models;
pub mod money;
pub mod operators;
pub mod repository;
pub mod resolver;
pub mod selector;
pub mod store;

pub use cache::CachedEngine;
pub use catalog::{AdjustmentValue, EffectCatalog, Fee, LinkedEffect, Promotion, TaxRate};
pub use compiler::{CompiledRule, RuleCompiler};
pub use condition::ConditionNode;
pub use engine::RuleEngine;
pub use error::{Result, RuleError};
pub use models::{
    ACCESS_DOMAIN, Decision, Diagnostic, DiagnosticKind, EffectKind, EntityType,
    EvaluationContext, EvaluationResult, FactContext, PRICING_DOMAIN, PriceAdjustment, Rule,
};
pub use money::{Currency, Money, Rate};
pub use operators::{ComparisonOperator, LogicalOperator};
pub use repository::{PgRuleRepository, RuleRepository};
pub use store::{InMemoryRuleStore, RuleStore};
