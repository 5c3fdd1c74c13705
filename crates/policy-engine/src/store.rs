//! 规则存储管理
//!
//! [`RuleStore`] 是引擎唯一依赖的读取接口；[`InMemoryRuleStore`] 使用 DashMap
//! 提供线程安全的实现，支持规则编写（创建/更新/软删除）、按领域整体替换以及
//! 关联效果目录的维护。每次写入都会递增对应领域的修订号，供缓存判断失效。

use crate::catalog::{EffectCatalog, LinkedEffect};
use crate::compiler::{CompiledRule, RuleCompiler};
use crate::error::{Result, RuleError};
use crate::models::{Audited, EffectRef, Rule};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, instrument, warn};

/// 引擎读取规则的接口
#[cfg_attr(test, mockall::automock)]
pub trait RuleStore: Send + Sync {
    /// 领域内启用且未删除的规则，不保证顺序
    fn list_active_rules(&self, domain: &str) -> Result<Vec<Arc<CompiledRule>>>;

    /// 批量查询关联效果，只返回存活的条目
    fn lookup_effects(&self, refs: &[EffectRef]) -> Result<EffectCatalog>;

    /// 领域修订号，任何规则写入都会使其递增
    fn revision(&self, domain: &str) -> u64;
}

impl<S: RuleStore + ?Sized> RuleStore for Arc<S> {
    fn list_active_rules(&self, domain: &str) -> Result<Vec<Arc<CompiledRule>>> {
        (**self).list_active_rules(domain)
    }

    fn lookup_effects(&self, refs: &[EffectRef]) -> Result<EffectCatalog> {
        (**self).lookup_effects(refs)
    }

    fn revision(&self, domain: &str) -> u64 {
        (**self).revision(domain)
    }
}

/// 内存规则存储
#[derive(Clone)]
pub struct InMemoryRuleStore {
    /// 编译后的规则（含审计信息）
    rules: Arc<DashMap<String, Audited<Arc<CompiledRule>>>>,
    effects: Arc<DashMap<EffectRef, Audited<LinkedEffect>>>,
    revisions: Arc<DashMap<String, AtomicU64>>,
    /// 规则编译器
    compiler: Arc<parking_lot::Mutex<RuleCompiler>>,
}

impl InMemoryRuleStore {
    /// 创建新的规则存储
    pub fn new() -> Self {
        Self {
            rules: Arc::new(DashMap::new()),
            effects: Arc::new(DashMap::new()),
            revisions: Arc::new(DashMap::new()),
            compiler: Arc::new(parking_lot::Mutex::new(RuleCompiler::new())),
        }
    }

    /// 获取当前存储的规则数量（含软删除）
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// 检查存储是否为空
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn bump(&self, domain: &str) {
        self.revisions
            .entry(domain.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst);
    }

    /// 按编写期规则校验，不写入存储
    pub fn validate(&self, rule: &Rule) -> Result<()> {
        self.compiler.lock().compile_strict(rule.clone()).map(|_| ())
    }

    /// id 是否已被占用（含软删除的规则）
    pub fn contains(&self, rule_id: &str) -> bool {
        self.rules.contains_key(rule_id)
    }

    /// 创建规则（严格校验）
    #[instrument(skip(self, rule), fields(rule_id = %rule.id, domain = %rule.domain))]
    pub fn create(&self, rule: Rule, now: DateTime<Utc>) -> Result<Arc<CompiledRule>> {
        let compiled = Arc::new(self.compiler.lock().compile_strict(rule)?);
        let rule_id = compiled.id().to_string();

        match self.rules.entry(rule_id.clone()) {
            Entry::Occupied(_) => {
                warn!("创建已存在的规则: {}", rule_id);
                return Err(RuleError::RuleAlreadyExists(rule_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(Audited::new(compiled.clone(), now));
            }
        }

        self.bump(compiled.domain());
        info!(compile_version = compiled.compile_version, "规则已创建: {}", rule_id);
        Ok(compiled)
    }

    /// 更新规则；已软删除的规则视为不存在
    #[instrument(skip(self, rule), fields(rule_id = %rule.id, domain = %rule.domain))]
    pub fn update(&self, rule: Rule, now: DateTime<Utc>) -> Result<Arc<CompiledRule>> {
        let rule_id = rule.id.clone();
        let compiled = Arc::new(self.compiler.lock().compile_strict(rule)?);

        let previous_domain = {
            let mut entry = match self.rules.get_mut(&rule_id) {
                Some(entry) if !entry.is_deleted() => entry,
                _ => {
                    warn!("更新不存在的规则: {}", rule_id);
                    return Err(RuleError::RuleNotFound(rule_id));
                }
            };
            let previous = entry.record.domain().to_string();
            entry.replace(compiled.clone(), now);
            previous
        };

        self.bump(&previous_domain);
        if previous_domain != compiled.domain() {
            self.bump(compiled.domain());
        }
        info!(compile_version = compiled.compile_version, "规则已更新: {}", rule_id);
        Ok(compiled)
    }

    /// 软删除规则
    #[instrument(skip(self))]
    pub fn soft_delete(&self, rule_id: &str, now: DateTime<Utc>) -> Result<()> {
        let domain = {
            let mut entry = match self.rules.get_mut(rule_id) {
                Some(entry) if !entry.is_deleted() => entry,
                _ => {
                    warn!("删除不存在的规则: {}", rule_id);
                    return Err(RuleError::RuleNotFound(rule_id.to_string()));
                }
            };
            entry.mark_deleted(now);
            entry.record.domain().to_string()
        };

        self.bump(&domain);
        info!("规则已软删除: {}", rule_id);
        Ok(())
    }

    /// 获取未删除的规则
    pub fn get(&self, rule_id: &str) -> Option<Audited<Arc<CompiledRule>>> {
        self.rules
            .get(rule_id)
            .filter(|r| !r.is_deleted())
            .map(|r| r.clone())
    }

    /// 获取所有未删除的规则（含停用），可按领域过滤
    pub fn list_all(&self, domain: Option<&str>) -> Vec<Audited<Arc<CompiledRule>>> {
        let mut rules: Vec<_> = self
            .rules
            .iter()
            .filter(|r| !r.is_deleted())
            .filter(|r| domain.is_none_or(|d| r.record.domain() == d))
            .map(|r| r.value().clone())
            .collect();
        rules.sort_by(|a, b| a.record.id().cmp(b.record.id()));
        rules
    }

    /// 宽松装载单条规则（来自数据库），不做编写期校验
    pub fn load(&self, rule: Audited<Rule>) {
        let Audited {
            record,
            created_at,
            updated_at,
            deleted_at,
        } = rule;
        let compiled = Arc::new(self.compiler.lock().compile(record));
        let domain = compiled.domain().to_string();

        self.rules.insert(
            compiled.id().to_string(),
            Audited {
                record: compiled,
                created_at,
                updated_at,
                deleted_at,
            },
        );
        self.bump(&domain);
    }

    /// 以快照整体替换规则与效果目录
    ///
    /// 先写入新行再清理旧行，读取方不会看到空存储。
    #[instrument(skip_all, fields(rules = rules.len(), effects = effects.len()))]
    pub fn replace_all(&self, rules: Vec<Audited<Rule>>, effects: Vec<Audited<LinkedEffect>>) {
        let mut touched: BTreeSet<String> = self
            .rules
            .iter()
            .map(|r| r.record.domain().to_string())
            .collect();

        let compiled: Vec<_> = {
            let mut compiler = self.compiler.lock();
            rules
                .into_iter()
                .map(|audited| {
                    let Audited {
                        record,
                        created_at,
                        updated_at,
                        deleted_at,
                    } = audited;
                    Audited {
                        record: Arc::new(compiler.compile(record)),
                        created_at,
                        updated_at,
                        deleted_at,
                    }
                })
                .collect()
        };

        let rule_ids: BTreeSet<String> = compiled.iter().map(|r| r.record.id().to_string()).collect();
        for rule in compiled {
            touched.insert(rule.record.domain().to_string());
            self.rules.insert(rule.record.id().to_string(), rule);
        }
        self.rules.retain(|id, _| rule_ids.contains(id));

        let effect_keys: BTreeSet<EffectRef> = effects.iter().map(|e| e.record.key()).collect();
        for effect in effects {
            self.effects.insert(effect.record.key(), effect);
        }
        self.effects.retain(|key, _| effect_keys.contains(key));

        for domain in &touched {
            self.bump(domain);
        }
        info!("规则快照已替换: {} 条规则", self.rules.len());
    }

    /// 新增或替换关联效果
    #[instrument(skip(self, effect), fields(effect = %effect.key()))]
    pub fn upsert_effect(&self, effect: LinkedEffect, now: DateTime<Utc>) -> Result<()> {
        effect.validate()?;
        let key = effect.key();
        match self.effects.entry(key.clone()) {
            Entry::Occupied(mut slot) if !slot.get().is_deleted() => {
                slot.get_mut().replace(effect, now)
            }
            Entry::Occupied(mut slot) => {
                slot.insert(Audited::new(effect, now));
            }
            Entry::Vacant(slot) => {
                slot.insert(Audited::new(effect, now));
            }
        }
        self.bump_linked_domains(&key);
        debug!("关联效果已保存: {}", key);
        Ok(())
    }

    /// 软删除关联效果
    #[instrument(skip(self))]
    pub fn soft_delete_effect(&self, key: &EffectRef, now: DateTime<Utc>) -> Result<()> {
        match self.effects.get_mut(key) {
            Some(mut entry) if !entry.is_deleted() => entry.mark_deleted(now),
            _ => {
                return Err(RuleError::InvalidRequest(format!(
                    "关联效果不存在: {}",
                    key
                )));
            }
        }
        self.bump_linked_domains(key);
        info!("关联效果已软删除: {}", key);
        Ok(())
    }

    /// 效果变更会改变引用它的规则的计算结果
    fn bump_linked_domains(&self, key: &EffectRef) {
        let domains: BTreeSet<String> = self
            .rules
            .iter()
            .filter(|r| r.record.rule.effects.iter().any(|l| &l.key() == key))
            .map(|r| r.record.domain().to_string())
            .collect();
        for domain in &domains {
            self.bump(domain);
        }
    }

    /// 获取规则统计信息
    pub fn stats(&self) -> RuleStoreStats {
        let mut rules_per_domain: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_facts = 0usize;
        let mut live = 0usize;

        for entry in self.rules.iter().filter(|r| !r.is_deleted()) {
            *rules_per_domain
                .entry(entry.record.domain().to_string())
                .or_default() += 1;
            total_facts += entry.record.required_facts.len();
            live += 1;
        }

        RuleStoreStats {
            rules_count: live,
            deleted_count: self.rules.len() - live,
            rules_per_domain,
            effects_count: self.effects.iter().filter(|e| !e.is_deleted()).count(),
            avg_facts_per_rule: if live > 0 {
                total_facts as f64 / live as f64
            } else {
                0.0
            },
        }
    }
}

impl RuleStore for InMemoryRuleStore {
    #[instrument(skip(self))]
    fn list_active_rules(&self, domain: &str) -> Result<Vec<Arc<CompiledRule>>> {
        Ok(self
            .rules
            .iter()
            .filter(|r| !r.is_deleted() && r.record.rule.is_active && r.record.domain() == domain)
            .map(|r| r.record.clone())
            .collect())
    }

    fn lookup_effects(&self, refs: &[EffectRef]) -> Result<EffectCatalog> {
        let mut catalog = HashMap::with_capacity(refs.len());
        for key in refs {
            if let Some(entry) = self.effects.get(key) {
                if !entry.is_deleted() {
                    catalog.insert(key.clone(), entry.record.clone());
                }
            }
        }
        Ok(catalog)
    }

    fn revision(&self, domain: &str) -> u64 {
        self.revisions
            .get(domain)
            .map(|r| r.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

impl Default for InMemoryRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 规则存储统计信息
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleStoreStats {
    /// 未删除的规则数
    pub rules_count: usize,
    pub deleted_count: usize,
    pub rules_per_domain: BTreeMap<String, usize>,
    pub effects_count: usize,
    /// 平均每条规则读取的事实键数
    pub avg_facts_per_rule: f64,
}
