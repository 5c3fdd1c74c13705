//! 评估结果缓存
//!
//! 包装 [`RuleEngine`] 的装饰器。缓存键为
//! `(domain, entityType, entityId, tags, hash(facts))`，另外并入基础金额和默认决定；
//! 条目记录写入时的领域修订号，修订号变化即失效，旧修订号的条目随即清除。
//! 条目数量有上限并带 TTL，满时先清理过期条目，再淘汰最早写入的条目。
//!
//! 定价评估遇到存储失败或超时时，返回该键上一次成功的结果并标记 `stale`。

use crate::engine::RuleEngine;
use crate::error::Result;
use crate::models::{
    Decision, EntityType, EvaluationContext, EvaluationResult, FactContext, PRICING_DOMAIN,
};
use crate::money::Money;
use crate::store::RuleStore;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rules_shared::observability::metrics;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    domain: String,
    entity_type: Option<EntityType>,
    entity_id: Option<String>,
    tags: Vec<String>,
    facts_hash: String,
}

/// 参与哈希的值；`serde_json::Map` 按键排序，序列化结果稳定
#[derive(Serialize)]
struct HashInput<'a> {
    facts: &'a FactContext,
    base_amount: Option<&'a Money>,
    default_decision: Option<Decision>,
}

impl CacheKey {
    pub fn new(domain: &str, context: &EvaluationContext, facts: &FactContext) -> Self {
        let input = HashInput {
            facts,
            base_amount: context.base_amount.as_ref(),
            default_decision: context.default_decision,
        };
        let bytes = serde_json::to_vec(&input).unwrap_or_default();

        Self {
            domain: domain.to_string(),
            entity_type: context.entity.as_ref().map(|e| e.entity_type),
            entity_id: context.entity.as_ref().map(|e| e.entity_id.clone()),
            tags: context.tags.iter().cloned().collect(),
            facts_hash: format!("{:x}", Sha256::digest(&bytes)),
        }
    }
}

/// 缓存容量与过期设置
#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    pub ttl: Duration,
    /// 定价兜底结果的保留时间
    pub stale_ttl: Duration,
    /// 结果缓存与兜底结果各自的条目上限
    pub max_entries: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            stale_ttl: Duration::from_secs(3600),
            max_entries: 10_000,
        }
    }
}

struct CacheEntry {
    revision: u64,
    inserted_at: Instant,
    result: EvaluationResult,
}

impl CacheEntry {
    fn new(revision: u64, result: EvaluationResult) -> Self {
        Self {
            revision,
            inserted_at: Instant::now(),
            result,
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() < ttl
    }
}

/// 带缓存的引擎
pub struct CachedEngine<S> {
    engine: RuleEngine<S>,
    options: CacheOptions,
    entries: DashMap<CacheKey, CacheEntry>,
    /// 每个键最近一次成功的定价结果
    last_good: DashMap<CacheKey, CacheEntry>,
    /// 各领域最近一次看到的修订号
    seen_revisions: DashMap<String, u64>,
}

impl<S: RuleStore> CachedEngine<S> {
    pub fn new(engine: RuleEngine<S>) -> Self {
        Self::with_options(engine, CacheOptions::default())
    }

    pub fn with_options(engine: RuleEngine<S>, options: CacheOptions) -> Self {
        Self {
            engine,
            options: CacheOptions {
                max_entries: options.max_entries.max(1),
                ..options
            },
            entries: DashMap::new(),
            last_good: DashMap::new(),
            seen_revisions: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &RuleEngine<S> {
        &self.engine
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evaluate(
        &self,
        domain: &str,
        context: &EvaluationContext,
        facts: &FactContext,
    ) -> Result<EvaluationResult> {
        let key = CacheKey::new(domain, context, facts);
        let revision = self.engine.store().revision(domain);
        self.evict_outdated(domain, revision);

        let cached = self
            .entries
            .get(&key)
            .filter(|entry| entry.revision == revision && entry.is_fresh(self.options.ttl))
            .map(|entry| entry.result.clone());
        if let Some(result) = cached {
            metrics::record_cache_lookup(domain, "hit");
            return Ok(result);
        }
        metrics::record_cache_lookup(domain, "miss");

        match self.engine.evaluate(domain, context, facts) {
            Ok(result) => {
                if domain == PRICING_DOMAIN {
                    self.insert_bounded(
                        &self.last_good,
                        key.clone(),
                        CacheEntry::new(revision, result.clone()),
                        self.options.stale_ttl,
                    );
                }
                self.insert_bounded(
                    &self.entries,
                    key,
                    CacheEntry::new(revision, result.clone()),
                    self.options.ttl,
                );
                Ok(result)
            }
            Err(e) if e.is_fail_closed() && domain == PRICING_DOMAIN => {
                let previous = self
                    .last_good
                    .get(&key)
                    .filter(|entry| entry.is_fresh(self.options.stale_ttl))
                    .map(|entry| entry.result.clone());
                match previous {
                    Some(mut stale) => {
                        warn!(error = %e, "Pricing evaluation failed, serving last good result");
                        metrics::record_cache_lookup(domain, "stale");
                        stale.stale = true;
                        Ok(stale)
                    }
                    None => {
                        debug!("No last good pricing result to fall back to");
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// 领域修订号变化后清除该领域旧修订号的结果（兜底结果保留）
    fn evict_outdated(&self, domain: &str, revision: u64) {
        let changed = match self.seen_revisions.entry(domain.to_string()) {
            Entry::Occupied(mut seen) if *seen.get() != revision => {
                seen.insert(revision);
                true
            }
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(revision);
                false
            }
        };

        if changed {
            self.entries
                .retain(|key, entry| key.domain != domain || entry.revision == revision);
            debug!(domain, revision, "Evicted results of outdated revision");
        }
    }

    fn insert_bounded(
        &self,
        map: &DashMap<CacheKey, CacheEntry>,
        key: CacheKey,
        entry: CacheEntry,
        ttl: Duration,
    ) {
        if map.len() >= self.options.max_entries && !map.contains_key(&key) {
            map.retain(|_, existing| existing.is_fresh(ttl));

            if map.len() >= self.options.max_entries {
                let oldest = map
                    .iter()
                    .min_by_key(|existing| existing.inserted_at)
                    .map(|existing| existing.key().clone());
                if let Some(oldest) = oldest {
                    map.remove(&oldest);
                }
            }
        }
        map.insert(key, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ACCESS_DOMAIN, PriorityGroup, Rule};
    use crate::store::InMemoryRuleStore;
    use chrono::Utc;
    use serde_json::json;

    fn adult_rule(id: &str) -> Rule {
        Rule::new(
            ACCESS_DOMAIN,
            id,
            json!({"fact": "user.age", "operator": "gte", "value": 18}),
        )
        .with_id(id)
        .with_access(PriorityGroup::Require)
    }

    fn age(years: i64) -> FactContext {
        facts(json!({"user": {"age": years}}))
    }

    fn denied_by_default() -> EvaluationContext {
        EvaluationContext::new().with_default(Decision::Denied)
    }

    fn facts(value: serde_json::Value) -> FactContext {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_key_is_independent_of_fact_insertion_order() {
        let ctx = EvaluationContext::for_entity(EntityType::Product, "p-1").with_tags(["b", "a"]);
        let mut first = FactContext::new();
        first.insert("x".into(), json!(1));
        first.insert("y".into(), json!({"k": 2, "j": 3}));
        let mut second = FactContext::new();
        second.insert("y".into(), json!({"j": 3, "k": 2}));
        second.insert("x".into(), json!(1));

        assert_eq!(
            CacheKey::new("pricing", &ctx, &first),
            CacheKey::new("pricing", &ctx, &second)
        );
    }

    #[test]
    fn test_key_distinguishes_inputs() {
        let ctx = EvaluationContext::for_entity(EntityType::Product, "p-1");
        let a = CacheKey::new("pricing", &ctx, &facts(json!({"x": 1})));
        let b = CacheKey::new("pricing", &ctx, &facts(json!({"x": 2})));
        let c = CacheKey::new("access", &ctx, &facts(json!({"x": 1})));
        let d = CacheKey::new(
            "pricing",
            &EvaluationContext::for_entity(EntityType::Product, "p-2"),
            &facts(json!({"x": 1})),
        );

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_hash_is_lowercase_hex_sha256() {
        let key = CacheKey::new("access", &EvaluationContext::new(), &FactContext::new());
        assert_eq!(key.facts_hash.len(), 64);
        assert!(key.facts_hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_outdated_revision_entries_are_evicted() {
        let store = InMemoryRuleStore::new();
        store.create(adult_rule("adult"), Utc::now()).unwrap();
        let cached = CachedEngine::new(RuleEngine::new(store.clone()));
        let ctx = denied_by_default();

        cached.evaluate(ACCESS_DOMAIN, &ctx, &age(20)).unwrap();
        cached.evaluate(ACCESS_DOMAIN, &ctx, &age(30)).unwrap();
        assert_eq!(cached.len(), 2);

        store.create(adult_rule("adult-2"), Utc::now()).unwrap();
        cached.evaluate(ACCESS_DOMAIN, &ctx, &age(20)).unwrap();

        // 只剩新修订号下重新计算的一条
        assert_eq!(cached.len(), 1);
    }

    #[test]
    fn test_entries_are_bounded() {
        let store = InMemoryRuleStore::new();
        store.create(adult_rule("adult"), Utc::now()).unwrap();
        let cached = CachedEngine::with_options(
            RuleEngine::new(store),
            CacheOptions {
                max_entries: 2,
                ..CacheOptions::default()
            },
        );
        let ctx = denied_by_default();

        for years in [10, 20, 30, 40] {
            cached.evaluate(ACCESS_DOMAIN, &ctx, &age(years)).unwrap();
        }
        assert_eq!(cached.len(), 2);
    }

    #[test]
    fn test_expired_entries_are_recomputed() {
        let store = InMemoryRuleStore::new();
        store.create(adult_rule("adult"), Utc::now()).unwrap();
        let cached = CachedEngine::with_options(
            RuleEngine::new(store),
            CacheOptions {
                ttl: Duration::ZERO,
                max_entries: 1,
                ..CacheOptions::default()
            },
        );
        let ctx = denied_by_default();

        let first = cached.evaluate(ACCESS_DOMAIN, &ctx, &age(20)).unwrap();
        let second = cached.evaluate(ACCESS_DOMAIN, &ctx, &age(30)).unwrap();
        assert_eq!(first.decision(), second.decision());
        assert_eq!(cached.len(), 1);
    }
}
