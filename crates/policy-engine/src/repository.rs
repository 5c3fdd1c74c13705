//! PostgreSQL 规则仓储
//!
//! 规则、领域配置、定向关联、标签、效果关联以及费用/促销/税率目录各自一次
//! 批量查询，在内存中拼装后交给 [`InMemoryRuleStore::replace_all`] 整体替换。
//! 无法识别的枚举文本或损坏的金额快照只跳过对应的行并记录告警。
//!
//! 编写接口先写数据库再更新内存存储；后台刷新任务定期用数据库快照覆盖内存。

use crate::catalog::{AdjustmentValue, Fee, LinkedEffect, Promotion, TaxRate};
use crate::error::{Result, RuleError};
use crate::models::{
    AccessConfig, Actor, Audited, CalculationPhase, EffectKind, EffectLink, EntityType,
    PricingConfig, Rule, StackingBehavior,
};
use crate::money::Rate;
use crate::store::InMemoryRuleStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rules_shared::observability::metrics;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// 一次完整读取得到的规则与效果目录
#[derive(Debug, Clone, Default)]
pub struct RuleSnapshot {
    pub rules: Vec<Audited<Rule>>,
    pub effects: Vec<Audited<LinkedEffect>>,
}

/// 规则持久化接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// 读取全部未删除的规则与效果
    async fn load_snapshot(&self) -> Result<RuleSnapshot>;

    /// 新建规则；id 已存在（包括已软删除的）时返回 `RuleAlreadyExists`
    async fn insert_rule(&self, rule: &Rule, now: DateTime<Utc>) -> Result<()>;

    /// 覆盖规则及其全部关联行
    async fn update_rule(&self, rule: &Rule, now: DateTime<Utc>) -> Result<()>;

    async fn soft_delete_rule(&self, rule_id: &str, now: DateTime<Utc>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// 数据库行
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RuleRow {
    pub id: String,
    pub domain: String,
    pub name: String,
    pub description: Option<String>,
    pub message: Option<String>,
    pub target_scope: String,
    pub target_entity_type: Option<String>,
    pub condition: Value,
    pub variables: Value,
    pub fact_keys: Option<Vec<String>>,
    pub effect: String,
    pub priority: i32,
    pub is_active: bool,
    pub actor_type: String,
    pub actor_id: Option<String>,
    pub org_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccessConfigRow {
    pub rule_id: String,
    pub priority_group: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PricingConfigRow {
    pub rule_id: String,
    pub stacking_behavior: String,
    pub calculation_phase: String,
}

/// 四类实体定向表合并后的行
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TargetRow {
    pub rule_id: String,
    pub entity_type: String,
    pub entity_id: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TagRow {
    pub rule_id: String,
    pub tag: String,
}

/// 三类效果关联表合并后的行
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EffectLinkRow {
    pub rule_id: String,
    pub kind: String,
    pub effect_id: String,
    pub priority: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeeRow {
    pub id: String,
    pub name: String,
    pub value: Value,
    pub is_active: bool,
    pub is_taxable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PromotionRow {
    pub id: String,
    pub name: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaxRateRow {
    pub id: String,
    pub name: String,
    pub rate: Value,
    pub receipt_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// 规则相关表的原始读取结果
#[derive(Debug, Clone, Default)]
pub struct RuleTables {
    pub rules: Vec<RuleRow>,
    pub access_configs: Vec<AccessConfigRow>,
    pub pricing_configs: Vec<PricingConfigRow>,
    pub targets: Vec<TargetRow>,
    pub tags: Vec<TagRow>,
    pub links: Vec<EffectLinkRow>,
}

// ---------------------------------------------------------------------------
// 行 -> 领域模型
// ---------------------------------------------------------------------------

fn actor_from_columns(
    actor_type: &str,
    actor_id: Option<String>,
    org_id: Option<String>,
) -> Result<Actor> {
    match (actor_type, actor_id, org_id) {
        ("system", _, _) => Ok(Actor::System),
        ("user", Some(user_id), Some(org_id)) => Actor::user(user_id, org_id),
        ("api_token", _, Some(org_id)) => Actor::api_token(org_id),
        (other, _, _) => Err(RuleError::InvalidRequest(format!(
            "编写者列不完整: actor_type={}",
            other
        ))),
    }
}

fn actor_columns(actor: &Actor) -> (&'static str, Option<&str>, Option<&str>) {
    match actor {
        Actor::System => ("system", None, None),
        Actor::User { user_id, org_id } => ("user", Some(user_id.as_str()), Some(org_id.as_str())),
        Actor::ApiToken { org_id } => ("api_token", None, Some(org_id.as_str())),
    }
}

fn rule_from_row(row: RuleRow) -> Result<Audited<Rule>> {
    let target_entity_type = row
        .target_entity_type
        .as_deref()
        .map(str::parse::<EntityType>)
        .transpose()?;

    let rule = Rule {
        id: row.id,
        domain: row.domain,
        name: row.name,
        description: row.description,
        message: row.message,
        target_scope: row.target_scope.parse()?,
        target_entity_type,
        condition: row.condition,
        variables: row.variables.as_object().cloned().unwrap_or_default(),
        fact_keys: row.fact_keys,
        effect: row.effect.parse()?,
        priority: row.priority,
        is_active: row.is_active,
        access_config: None,
        pricing_config: None,
        targets: Default::default(),
        tags: Default::default(),
        effects: Vec::new(),
        actor: actor_from_columns(&row.actor_type, row.actor_id, row.org_id)?,
    };

    Ok(Audited {
        record: rule,
        created_at: row.created_at,
        updated_at: row.updated_at,
        deleted_at: row.deleted_at,
    })
}

fn find_rule<'a>(
    rules: &'a mut [Audited<Rule>],
    index: &HashMap<String, usize>,
    rule_id: &str,
) -> Option<&'a mut Rule> {
    index.get(rule_id).map(|&i| &mut rules[i].record)
}

/// 把各表的行拼装成规则
///
/// 规则行本身无法解析时整条跳过；配置或关联行无法解析时只跳过该行，
/// 规则保留并在评估阶段以诊断形式暴露缺失的配置。
pub fn assemble_rules(tables: RuleTables) -> Vec<Audited<Rule>> {
    let mut rules: Vec<Audited<Rule>> = Vec::with_capacity(tables.rules.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(tables.rules.len());

    for row in tables.rules {
        let rule_id = row.id.clone();
        match rule_from_row(row) {
            Ok(rule) => {
                index.insert(rule_id, rules.len());
                rules.push(rule);
            }
            Err(e) => warn!(rule_id = %rule_id, error = %e, "Skipping unreadable rule row"),
        }
    }

    for row in tables.access_configs {
        let Some(rule) = find_rule(&mut rules, &index, &row.rule_id) else {
            continue;
        };
        match row.priority_group.parse() {
            Ok(priority_group) => rule.access_config = Some(AccessConfig { priority_group }),
            Err(e) => warn!(rule_id = %row.rule_id, error = %e, "Skipping access config row"),
        }
    }

    for row in tables.pricing_configs {
        let Some(rule) = find_rule(&mut rules, &index, &row.rule_id) else {
            continue;
        };
        let parsed = row
            .stacking_behavior
            .parse::<StackingBehavior>()
            .and_then(|stacking| Ok((stacking, row.calculation_phase.parse::<CalculationPhase>()?)));
        match parsed {
            Ok((stacking_behavior, calculation_phase)) => {
                rule.pricing_config = Some(PricingConfig {
                    stacking_behavior,
                    calculation_phase,
                })
            }
            Err(e) => warn!(rule_id = %row.rule_id, error = %e, "Skipping pricing config row"),
        }
    }

    for row in tables.targets {
        let Some(rule) = find_rule(&mut rules, &index, &row.rule_id) else {
            continue;
        };
        match row.entity_type.parse::<EntityType>() {
            Ok(entity_type) => {
                rule.targets.ids_for_mut(entity_type).insert(row.entity_id);
            }
            Err(e) => warn!(rule_id = %row.rule_id, error = %e, "Skipping target row"),
        }
    }

    for row in tables.tags {
        if let Some(rule) = find_rule(&mut rules, &index, &row.rule_id) {
            rule.tags.insert(row.tag);
        }
    }

    for row in tables.links {
        let Some(rule) = find_rule(&mut rules, &index, &row.rule_id) else {
            continue;
        };
        match row.kind.parse::<EffectKind>() {
            Ok(kind) => rule
                .effects
                .push(EffectLink::new(kind, row.effect_id, row.priority)),
            Err(e) => warn!(rule_id = %row.rule_id, error = %e, "Skipping effect link row"),
        }
    }

    rules
}

fn adjustment_value(id: &str, value: Value) -> Option<AdjustmentValue> {
    match serde_json::from_value(value) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(effect_id = %id, error = %e, "Skipping effect with malformed amount snapshot");
            None
        }
    }
}

pub fn fee_from_row(row: FeeRow) -> Option<Audited<LinkedEffect>> {
    let value = adjustment_value(&row.id, row.value)?;
    Some(Audited {
        record: LinkedEffect::Fee(Fee {
            id: row.id,
            name: row.name,
            value,
            is_active: row.is_active,
            is_taxable: row.is_taxable,
        }),
        created_at: row.created_at,
        updated_at: row.updated_at,
        deleted_at: row.deleted_at,
    })
}

pub fn promotion_from_row(row: PromotionRow) -> Option<Audited<LinkedEffect>> {
    let value = adjustment_value(&row.id, row.value)?;
    Some(Audited {
        record: LinkedEffect::Promotion(Promotion {
            id: row.id,
            name: row.name,
            value,
        }),
        created_at: row.created_at,
        updated_at: row.updated_at,
        deleted_at: row.deleted_at,
    })
}

pub fn tax_rate_from_row(row: TaxRateRow) -> Option<Audited<LinkedEffect>> {
    let rate = match serde_json::from_value::<Rate>(row.rate) {
        Ok(rate) => rate,
        Err(e) => {
            warn!(effect_id = %row.id, error = %e, "Skipping tax rate with malformed rate");
            return None;
        }
    };
    Some(Audited {
        record: LinkedEffect::TaxRate(TaxRate {
            id: row.id,
            name: row.name,
            rate,
            receipt_code: row.receipt_code,
        }),
        created_at: row.created_at,
        updated_at: row.updated_at,
        deleted_at: row.deleted_at,
    })
}

// ---------------------------------------------------------------------------
// PostgreSQL 实现
// ---------------------------------------------------------------------------

/// PostgreSQL 规则仓储
#[derive(Clone)]
pub struct PgRuleRepository {
    pool: PgPool,
}

impl PgRuleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_rule_tables(&self) -> Result<RuleTables> {
        let rules = sqlx::query_as::<_, RuleRow>(
            r#"
            SELECT id, domain, name, description, message, target_scope, target_entity_type,
                   condition, variables, fact_keys, effect, priority, is_active,
                   actor_type, actor_id, org_id, created_at, updated_at, deleted_at
            FROM policy_rules
            WHERE deleted_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let access_configs = sqlx::query_as::<_, AccessConfigRow>(
            "SELECT rule_id, priority_group FROM rule_access_config",
        )
        .fetch_all(&self.pool)
        .await?;

        let pricing_configs = sqlx::query_as::<_, PricingConfigRow>(
            "SELECT rule_id, stacking_behavior, calculation_phase FROM rule_pricing_config",
        )
        .fetch_all(&self.pool)
        .await?;

        let targets = sqlx::query_as::<_, TargetRow>(
            r#"
            SELECT rule_id, 'product' AS entity_type, product_id AS entity_id
            FROM rule_target_products
            UNION ALL
            SELECT rule_id, 'product_variant', variant_id FROM rule_target_product_variants
            UNION ALL
            SELECT rule_id, 'product_category', category_id FROM rule_target_product_categories
            UNION ALL
            SELECT rule_id, 'sales_channel', channel_id FROM rule_target_sales_channels
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let tags = sqlx::query_as::<_, TagRow>("SELECT rule_id, tag FROM rule_target_tags")
            .fetch_all(&self.pool)
            .await?;

        let links = sqlx::query_as::<_, EffectLinkRow>(
            r#"
            SELECT rule_id, 'fee' AS kind, fee_id AS effect_id, priority FROM rule_fees
            UNION ALL
            SELECT rule_id, 'promotion', promotion_id, priority FROM rule_promotions
            UNION ALL
            SELECT rule_id, 'tax_rate', tax_rate_id, priority FROM rule_tax_rates
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(RuleTables {
            rules,
            access_configs,
            pricing_configs,
            targets,
            tags,
            links,
        })
    }

    async fn load_effects(&self) -> Result<Vec<Audited<LinkedEffect>>> {
        let fees = sqlx::query_as::<_, FeeRow>(
            r#"
            SELECT id, name, value, is_active, is_taxable, created_at, updated_at, deleted_at
            FROM fees
            WHERE deleted_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let promotions = sqlx::query_as::<_, PromotionRow>(
            r#"
            SELECT id, name, value, created_at, updated_at, deleted_at
            FROM promotions
            WHERE deleted_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let tax_rates = sqlx::query_as::<_, TaxRateRow>(
            r#"
            SELECT id, name, rate, receipt_code, created_at, updated_at, deleted_at
            FROM tax_rates
            WHERE deleted_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(fees
            .into_iter()
            .filter_map(fee_from_row)
            .chain(promotions.into_iter().filter_map(promotion_from_row))
            .chain(tax_rates.into_iter().filter_map(tax_rate_from_row))
            .collect())
    }
}

/// 写入规则的全部子表行（调用前已清空旧行）
async fn insert_children(tx: &mut Transaction<'_, Postgres>, rule: &Rule) -> Result<()> {
    if let Some(config) = rule.access_config {
        sqlx::query("INSERT INTO rule_access_config (rule_id, priority_group) VALUES ($1, $2)")
            .bind(&rule.id)
            .bind(config.priority_group.as_str())
            .execute(&mut **tx)
            .await?;
    }

    if let Some(config) = rule.pricing_config {
        sqlx::query(
            r#"
            INSERT INTO rule_pricing_config (rule_id, stacking_behavior, calculation_phase)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&rule.id)
        .bind(config.stacking_behavior.as_str())
        .bind(config.calculation_phase.as_str())
        .execute(&mut **tx)
        .await?;
    }

    let target_tables = [
        (EntityType::Product, "rule_target_products", "product_id"),
        (EntityType::ProductVariant, "rule_target_product_variants", "variant_id"),
        (EntityType::ProductCategory, "rule_target_product_categories", "category_id"),
        (EntityType::SalesChannel, "rule_target_sales_channels", "channel_id"),
    ];
    for (entity_type, table, column) in target_tables {
        let sql = format!("INSERT INTO {} (rule_id, {}) VALUES ($1, $2)", table, column);
        for entity_id in rule.targets.ids_for(entity_type) {
            sqlx::query(&sql)
                .bind(&rule.id)
                .bind(entity_id)
                .execute(&mut **tx)
                .await?;
        }
    }

    for tag in &rule.tags {
        sqlx::query("INSERT INTO rule_target_tags (rule_id, tag) VALUES ($1, $2)")
            .bind(&rule.id)
            .bind(tag)
            .execute(&mut **tx)
            .await?;
    }

    for link in &rule.effects {
        let (table, column) = match link.kind {
            EffectKind::Fee => ("rule_fees", "fee_id"),
            EffectKind::Promotion => ("rule_promotions", "promotion_id"),
            EffectKind::TaxRate => ("rule_tax_rates", "tax_rate_id"),
        };
        let sql = format!(
            "INSERT INTO {} (rule_id, {}, priority) VALUES ($1, $2, $3)",
            table, column
        );
        sqlx::query(&sql)
            .bind(&rule.id)
            .bind(&link.effect_id)
            .bind(link.priority)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

const CHILD_TABLES: [&str; 10] = [
    "rule_access_config",
    "rule_pricing_config",
    "rule_target_products",
    "rule_target_product_variants",
    "rule_target_product_categories",
    "rule_target_sales_channels",
    "rule_target_tags",
    "rule_fees",
    "rule_promotions",
    "rule_tax_rates",
];

#[async_trait]
impl RuleRepository for PgRuleRepository {
    #[instrument(skip(self))]
    async fn load_snapshot(&self) -> Result<RuleSnapshot> {
        let tables = self.load_rule_tables().await?;
        let effects = self.load_effects().await?;
        let rules = assemble_rules(tables);
        debug!(rules = rules.len(), effects = effects.len(), "Loaded rule snapshot");
        Ok(RuleSnapshot { rules, effects })
    }

    #[instrument(skip(self, rule), fields(rule_id = %rule.id))]
    async fn insert_rule(&self, rule: &Rule, now: DateTime<Utc>) -> Result<()> {
        let (actor_type, actor_id, org_id) = actor_columns(&rule.actor);
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO policy_rules (
                id, domain, name, description, message, target_scope, target_entity_type,
                condition, variables, fact_keys, effect, priority, is_active,
                actor_type, actor_id, org_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $17)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.domain)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(&rule.message)
        .bind(rule.target_scope.as_str())
        .bind(rule.target_entity_type.map(|t| t.as_str()))
        .bind(&rule.condition)
        .bind(Json(&rule.variables))
        .bind(&rule.fact_keys)
        .bind(rule.effect.as_str())
        .bind(rule.priority)
        .bind(rule.is_active)
        .bind(actor_type)
        .bind(actor_id)
        .bind(org_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(RuleError::RuleAlreadyExists(rule.id.clone()));
        }

        insert_children(&mut tx, rule).await?;
        tx.commit().await?;

        info!("Rule persisted");
        Ok(())
    }

    #[instrument(skip(self, rule), fields(rule_id = %rule.id))]
    async fn update_rule(&self, rule: &Rule, now: DateTime<Utc>) -> Result<()> {
        let (actor_type, actor_id, org_id) = actor_columns(&rule.actor);
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE policy_rules
            SET domain = $2, name = $3, description = $4, message = $5,
                target_scope = $6, target_entity_type = $7, condition = $8, variables = $9,
                fact_keys = $10, effect = $11, priority = $12, is_active = $13,
                actor_type = $14, actor_id = $15, org_id = $16, updated_at = $17
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.domain)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(&rule.message)
        .bind(rule.target_scope.as_str())
        .bind(rule.target_entity_type.map(|t| t.as_str()))
        .bind(&rule.condition)
        .bind(Json(&rule.variables))
        .bind(&rule.fact_keys)
        .bind(rule.effect.as_str())
        .bind(rule.priority)
        .bind(rule.is_active)
        .bind(actor_type)
        .bind(actor_id)
        .bind(org_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(RuleError::RuleNotFound(rule.id.clone()));
        }

        for table in CHILD_TABLES {
            sqlx::query(&format!("DELETE FROM {} WHERE rule_id = $1", table))
                .bind(&rule.id)
                .execute(&mut *tx)
                .await?;
        }
        insert_children(&mut tx, rule).await?;
        tx.commit().await?;

        info!("Rule updated");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn soft_delete_rule(&self, rule_id: &str, now: DateTime<Utc>) -> Result<()> {
        let deleted = sqlx::query(
            r#"
            UPDATE policy_rules
            SET deleted_at = $2, updated_at = $2
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(rule_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if deleted.rows_affected() == 0 {
            return Err(RuleError::RuleNotFound(rule_id.to_string()));
        }

        info!("Rule soft-deleted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 刷新
// ---------------------------------------------------------------------------

/// 用仓储快照替换内存存储，返回装载的规则数
pub async fn refresh(repo: &dyn RuleRepository, store: &InMemoryRuleStore) -> Result<usize> {
    let snapshot = repo.load_snapshot().await?;
    let count = snapshot.rules.len();
    store.replace_all(snapshot.rules, snapshot.effects);

    for (domain, loaded) in store.stats().rules_per_domain {
        metrics::set_rules_loaded(&domain, loaded);
    }
    Ok(count)
}

/// 后台定期刷新；读取失败时保留上一份快照
pub fn spawn_refresher(
    repo: Arc<dyn RuleRepository>,
    store: InMemoryRuleStore,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // 首次 tick 立即返回，启动时已经装载过一次
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match refresh(repo.as_ref(), &store).await {
                Ok(count) => debug!(count, "Rule snapshot refreshed"),
                Err(e) => warn!(error = %e, "Rule refresh failed, keeping previous snapshot"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ACCESS_DOMAIN, PRICING_DOMAIN, PriorityGroup, RuleEffect, TargetScope};
    use crate::store::RuleStore;
    use serde_json::json;

    fn rule_row(id: &str, domain: &str) -> RuleRow {
        let now = Utc::now();
        RuleRow {
            id: id.to_string(),
            domain: domain.to_string(),
            name: format!("rule {}", id),
            description: None,
            message: None,
            target_scope: "UNIVERSAL".to_string(),
            target_entity_type: None,
            condition: json!({"fact": "cart.total", "operator": "gte", "value": 100}),
            variables: json!({}),
            fact_keys: None,
            effect: "linked".to_string(),
            priority: 0,
            is_active: true,
            actor_type: "system".to_string(),
            actor_id: None,
            org_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_assemble_joins_child_rows() {
        let tables = RuleTables {
            rules: vec![rule_row("r-1", PRICING_DOMAIN)],
            pricing_configs: vec![PricingConfigRow {
                rule_id: "r-1".into(),
                stacking_behavior: "max".into(),
                calculation_phase: "post_discount".into(),
            }],
            targets: vec![TargetRow {
                rule_id: "r-1".into(),
                entity_type: "sales_channel".into(),
                entity_id: "web".into(),
            }],
            tags: vec![TagRow {
                rule_id: "r-1".into(),
                tag: "vip".into(),
            }],
            links: vec![EffectLinkRow {
                rule_id: "r-1".into(),
                kind: "promotion".into(),
                effect_id: "promo-1".into(),
                priority: 2,
            }],
            ..Default::default()
        };

        let rules = assemble_rules(tables);
        assert_eq!(rules.len(), 1);
        let rule = &rules[0].record;
        assert_eq!(rule.effect, RuleEffect::Linked);
        assert_eq!(rule.target_scope, TargetScope::Universal);
        assert_eq!(
            rule.pricing_config,
            Some(PricingConfig {
                stacking_behavior: StackingBehavior::Max,
                calculation_phase: CalculationPhase::PostDiscount,
            })
        );
        assert!(rule.targets.sales_channels.contains("web"));
        assert!(rule.tags.contains("vip"));
        assert_eq!(rule.effects, vec![EffectLink::new(EffectKind::Promotion, "promo-1", 2)]);
    }

    #[test]
    fn test_assemble_skips_unreadable_rows() {
        let mut broken = rule_row("bad", ACCESS_DOMAIN);
        broken.target_scope = "EVERYWHERE".to_string();
        let mut orphan_actor = rule_row("orphan", ACCESS_DOMAIN);
        orphan_actor.actor_type = "user".to_string();

        let tables = RuleTables {
            rules: vec![broken, orphan_actor, rule_row("ok", ACCESS_DOMAIN)],
            access_configs: vec![
                AccessConfigRow {
                    rule_id: "ok".into(),
                    priority_group: "veto".into(),
                },
                AccessConfigRow {
                    rule_id: "missing".into(),
                    priority_group: "deny".into(),
                },
            ],
            ..Default::default()
        };

        let rules = assemble_rules(tables);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].record.id, "ok");
        // 无法识别的优先组只丢弃配置
        assert!(rules[0].record.access_config.is_none());
    }

    #[test]
    fn test_actor_columns_round_trip() {
        let actor = Actor::user("u-1", "org-1").unwrap();
        let (kind, user, org) = actor_columns(&actor);
        let back = actor_from_columns(kind, user.map(String::from), org.map(String::from)).unwrap();
        assert_eq!(back, actor);
        assert!(actor_from_columns("api_token", None, None).is_err());
    }

    #[test]
    fn test_effect_rows_with_bad_snapshots_are_skipped() {
        let now = Utc::now();
        let good = FeeRow {
            id: "fee-1".into(),
            name: "service".into(),
            value: json!({"type": "percentage", "value": {"amount": 5, "scale": 2}}),
            is_active: true,
            is_taxable: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let bad = FeeRow {
            id: "fee-2".into(),
            value: json!({"type": "percentage"}),
            ..good.clone()
        };

        assert!(fee_from_row(good).is_some());
        assert!(fee_from_row(bad).is_none());

        let tax = TaxRateRow {
            id: "tax-1".into(),
            name: "sales".into(),
            rate: json!({"amount": 825, "scale": 4}),
            receipt_code: Some("ST".into()),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let effect = tax_rate_from_row(tax).unwrap();
        assert_eq!(effect.record.key().to_string(), "tax_rate:tax-1");
    }

    #[tokio::test]
    async fn test_refresh_replaces_store_contents() {
        let store = InMemoryRuleStore::new();
        store
            .create(
                Rule::new(ACCESS_DOMAIN, "stale", json!(true))
                    .with_id("stale")
                    .with_access(PriorityGroup::Deny),
                Utc::now(),
            )
            .unwrap();

        let mut repo = MockRuleRepository::new();
        repo.expect_load_snapshot().times(1).returning(|| {
            let rule = Rule::new(ACCESS_DOMAIN, "fresh", json!(true))
                .with_id("fresh")
                .with_access(PriorityGroup::Require);
            Ok(RuleSnapshot {
                rules: vec![Audited::new(rule, Utc::now())],
                effects: vec![],
            })
        });

        let before = store.revision(ACCESS_DOMAIN);
        let count = refresh(&repo, &store).await.unwrap();

        assert_eq!(count, 1);
        assert!(store.get("stale").is_none());
        assert!(store.get("fresh").is_some());
        assert!(store.revision(ACCESS_DOMAIN) > before);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let store = InMemoryRuleStore::new();
        store
            .create(
                Rule::new(ACCESS_DOMAIN, "kept", json!(true))
                    .with_id("kept")
                    .with_access(PriorityGroup::Require),
                Utc::now(),
            )
            .unwrap();

        let mut repo = MockRuleRepository::new();
        repo.expect_load_snapshot()
            .returning(|| Err(RuleError::StorageUnavailable("connection reset".into())));

        assert!(refresh(&repo, &store).await.is_err());
        assert_eq!(store.list_active_rules(ACCESS_DOMAIN).unwrap().len(), 1);
    }
}
