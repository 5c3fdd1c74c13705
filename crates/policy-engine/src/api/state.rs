//! 应用状态定义

use crate::cache::CachedEngine;
use crate::engine::RuleEngine;
use crate::error::Result;
use crate::models::{
    ACCESS_DOMAIN, Decision, EvaluationContext, EvaluationResult, FactContext,
};
use crate::repository::RuleRepository;
use crate::store::InMemoryRuleStore;
use std::sync::Arc;
use tracing::warn;

/// 直接评估或经过结果缓存
pub enum Evaluator {
    Direct(RuleEngine<InMemoryRuleStore>),
    Cached(CachedEngine<InMemoryRuleStore>),
}

impl Evaluator {
    pub fn evaluate(
        &self,
        domain: &str,
        context: &EvaluationContext,
        facts: &FactContext,
    ) -> Result<EvaluationResult> {
        match self {
            Self::Direct(engine) => engine.evaluate(domain, context, facts),
            Self::Cached(cached) => cached.evaluate(domain, context, facts),
        }
    }

    /// 访问检查：任何失败都视为拒绝
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

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub store: InMemoryRuleStore,
    pub evaluator: Arc<Evaluator>,
    /// 未配置数据库时规则只保存在内存中
    pub repository: Option<Arc<dyn RuleRepository>>,
}

impl AppState {
    pub fn new(
        store: InMemoryRuleStore,
        evaluator: Evaluator,
        repository: Option<Arc<dyn RuleRepository>>,
    ) -> Self {
        Self {
            store,
            evaluator: Arc::new(evaluator),
            repository,
        }
    }

    /// 内存存储 + 直接评估，不连接数据库
    pub fn in_memory(store: InMemoryRuleStore) -> Self {
        let engine = RuleEngine::new(store.clone());
        Self::new(store, Evaluator::Direct(engine), None)
    }
}
