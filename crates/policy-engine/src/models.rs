//! 规则引擎领域模型

use crate::error::{Result, RuleError};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 访问控制领域
pub const ACCESS_DOMAIN: &str = "access";
/// 定价领域
pub const PRICING_DOMAIN: &str = "pricing";

/// 调用方提供的事实上下文（扁平 factKey -> value）
pub type FactContext = Map<String, Value>;

// ---------------------------------------------------------------------------
// 枚举
// ---------------------------------------------------------------------------

/// 规则定向范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetScope {
    Universal,
    Domain,
    EntityType,
    Entities,
}

/// 可定向的实体类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Product,
    ProductVariant,
    ProductCategory,
    SalesChannel,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::ProductVariant => "product_variant",
            Self::ProductCategory => "product_category",
            Self::SalesChannel => "sales_channel",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "product" => Ok(Self::Product),
            "product_variant" => Ok(Self::ProductVariant),
            "product_category" => Ok(Self::ProductCategory),
            "sales_channel" => Ok(Self::SalesChannel),
            other => Err(RuleError::InvalidRequest(format!("未知的实体类型: {}", other))),
        }
    }
}

/// 规则效果类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleEffect {
    Boolean,
    Linked,
}

/// 访问规则优先组
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityGroup {
    Override,
    Deny,
    Require,
}

/// 定价叠加方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackingBehavior {
    Compound,
    Sequential,
    Max,
}

/// 定价计算阶段（按声明顺序执行）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationPhase {
    PreDiscount,
    PostDiscount,
}

impl CalculationPhase {
    pub const ALL: [CalculationPhase; 2] = [Self::PreDiscount, Self::PostDiscount];
}

/// 与数据库文本列互转
macro_rules! text_enum {
    ($ty:ident { $($text:literal => $variant:ident),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = RuleError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(RuleError::InvalidRequest(format!(
                        "无效的{}取值: {}",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

text_enum!(TargetScope {
    "UNIVERSAL" => Universal,
    "DOMAIN" => Domain,
    "ENTITY_TYPE" => EntityType,
    "ENTITIES" => Entities,
});
text_enum!(RuleEffect { "boolean" => Boolean, "linked" => Linked });
text_enum!(PriorityGroup {
    "override" => Override,
    "deny" => Deny,
    "require" => Require,
});
text_enum!(StackingBehavior {
    "compound" => Compound,
    "sequential" => Sequential,
    "max" => Max,
});
text_enum!(CalculationPhase {
    "pre_discount" => PreDiscount,
    "post_discount" => PostDiscount,
});

// ---------------------------------------------------------------------------
// 领域配置
// ---------------------------------------------------------------------------

/// 访问领域配置（1:1）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfig {
    pub priority_group: PriorityGroup,
}

/// 定价领域配置（1:1）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingConfig {
    pub stacking_behavior: StackingBehavior,
    pub calculation_phase: CalculationPhase,
}

// ---------------------------------------------------------------------------
// 编写者
// ---------------------------------------------------------------------------

/// 规则编写者（三者互斥）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Actor {
    #[default]
    System,
    User {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "orgId")]
        org_id: String,
    },
    ApiToken {
        #[serde(rename = "orgId")]
        org_id: String,
    },
}

impl Actor {
    pub fn user(user_id: impl Into<String>, org_id: impl Into<String>) -> Result<Self> {
        let actor = Self::User {
            user_id: user_id.into(),
            org_id: org_id.into(),
        };
        actor.validate()?;
        Ok(actor)
    }

    pub fn api_token(org_id: impl Into<String>) -> Result<Self> {
        let actor = Self::ApiToken {
            org_id: org_id.into(),
        };
        actor.validate()?;
        Ok(actor)
    }

    /// 反序列化得到的编写者也需要校验
    pub fn validate(&self) -> Result<()> {
        let blank = |s: &str| s.trim().is_empty();
        match self {
            Self::System => Ok(()),
            Self::User { user_id, org_id } if blank(user_id) || blank(org_id) => Err(
                RuleError::InvalidRequest("用户编写者需要 userId 和 orgId".to_string()),
            ),
            Self::ApiToken { org_id } if blank(org_id) => Err(RuleError::InvalidRequest(
                "API Token 编写者需要 orgId".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// 定向与效果关联
// ---------------------------------------------------------------------------

/// 实体定向关联（仅在 ENTITIES 范围下有意义）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleTargets {
    pub products: BTreeSet<String>,
    pub variants: BTreeSet<String>,
    pub categories: BTreeSet<String>,
    pub sales_channels: BTreeSet<String>,
}

impl RuleTargets {
    pub fn ids_for(&self, entity_type: EntityType) -> &BTreeSet<String> {
        match entity_type {
            EntityType::Product => &self.products,
            EntityType::ProductVariant => &self.variants,
            EntityType::ProductCategory => &self.categories,
            EntityType::SalesChannel => &self.sales_channels,
        }
    }

    pub fn ids_for_mut(&mut self, entity_type: EntityType) -> &mut BTreeSet<String> {
        match entity_type {
            EntityType::Product => &mut self.products,
            EntityType::ProductVariant => &mut self.variants,
            EntityType::ProductCategory => &mut self.categories,
            EntityType::SalesChannel => &mut self.sales_channels,
        }
    }

    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.ids_for(entity.entity_type).contains(&entity.entity_id)
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
            && self.variants.is_empty()
            && self.categories.is_empty()
            && self.sales_channels.is_empty()
    }
}

/// 关联效果类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Fee,
    Promotion,
    TaxRate,
}

text_enum!(EffectKind {
    "fee" => Fee,
    "promotion" => Promotion,
    "tax_rate" => TaxRate,
});

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 关联效果的引用键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectRef {
    pub kind: EffectKind,
    pub id: String,
}

impl EffectRef {
    pub fn new(kind: EffectKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EffectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// 规则与费用/促销/税率的关联行，priority 只影响展示顺序
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectLink {
    pub kind: EffectKind,
    pub effect_id: String,
    #[serde(default)]
    pub priority: i32,
}

impl EffectLink {
    pub fn new(kind: EffectKind, effect_id: impl Into<String>, priority: i32) -> Self {
        Self {
            kind,
            effect_id: effect_id.into(),
            priority,
        }
    }

    pub fn key(&self) -> EffectRef {
        EffectRef::new(self.kind, self.effect_id.clone())
    }
}

// ---------------------------------------------------------------------------
// 规则
// ---------------------------------------------------------------------------

/// 规则定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub domain: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// 面向用户的原因说明（如拒绝理由）
    #[serde(default)]
    pub message: Option<String>,
    pub target_scope: TargetScope,
    #[serde(default)]
    pub target_entity_type: Option<EntityType>,
    /// 持久化的条件 JSON，由编译器解析
    pub condition: Value,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub fact_keys: Option<Vec<String>>,
    pub effect: RuleEffect,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub access_config: Option<AccessConfig>,
    #[serde(default)]
    pub pricing_config: Option<PricingConfig>,
    #[serde(default)]
    pub targets: RuleTargets,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub effects: Vec<EffectLink>,
    #[serde(default)]
    pub actor: Actor,
}

fn default_true() -> bool {
    true
}

impl Rule {
    /// 创建对整个领域生效的规则
    pub fn new(domain: impl Into<String>, name: impl Into<String>, condition: Value) -> Self {
        let domain = domain.into();
        let effect = if domain == ACCESS_DOMAIN {
            RuleEffect::Boolean
        } else {
            RuleEffect::Linked
        };
        Self {
            id: Uuid::new_v4().to_string(),
            domain,
            name: name.into(),
            description: None,
            message: None,
            target_scope: TargetScope::Universal,
            target_entity_type: None,
            condition,
            variables: Map::new(),
            fact_keys: None,
            effect,
            priority: 0,
            is_active: true,
            access_config: None,
            pricing_config: None,
            targets: RuleTargets::default(),
            tags: BTreeSet::new(),
            effects: Vec::new(),
            actor: Actor::System,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_scope(mut self, scope: TargetScope) -> Self {
        self.target_scope = scope;
        self
    }

    /// ENTITY_TYPE 范围
    pub fn for_entity_type(mut self, entity_type: EntityType) -> Self {
        self.target_scope = TargetScope::EntityType;
        self.target_entity_type = Some(entity_type);
        self
    }

    /// ENTITIES 范围，追加具体实体
    pub fn for_entities<I, S>(mut self, entity_type: EntityType, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_scope = TargetScope::Entities;
        self.targets
            .ids_for_mut(entity_type)
            .extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_access(mut self, priority_group: PriorityGroup) -> Self {
        self.access_config = Some(AccessConfig { priority_group });
        self
    }

    pub fn with_pricing(mut self, stacking: StackingBehavior, phase: CalculationPhase) -> Self {
        self.pricing_config = Some(PricingConfig {
            stacking_behavior: stacking,
            calculation_phase: phase,
        });
        self
    }

    pub fn link_effect(mut self, kind: EffectKind, effect_id: impl Into<String>, priority: i32) -> Self {
        self.effects.push(EffectLink::new(kind, effect_id, priority));
        self
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// targetEntityType 非空当且仅当 targetScope = ENTITY_TYPE
    pub fn scope_violation(&self) -> Option<String> {
        match (self.target_scope, self.target_entity_type) {
            (TargetScope::EntityType, None) => {
                Some("ENTITY_TYPE 范围的规则缺少 targetEntityType".to_string())
            }
            (scope, Some(entity_type)) if scope != TargetScope::EntityType => Some(format!(
                "{:?} 范围的规则不应设置 targetEntityType={}",
                scope, entity_type
            )),
            _ => None,
        }
    }

    /// 领域配置缺失
    pub fn config_violation(&self) -> Option<String> {
        if self.domain == ACCESS_DOMAIN && self.access_config.is_none() {
            return Some("访问规则缺少 access 配置".to_string());
        }
        if self.domain == PRICING_DOMAIN && self.pricing_config.is_none() {
            return Some("定价规则缺少 pricing 配置".to_string());
        }
        None
    }
}

// ---------------------------------------------------------------------------
// 生命周期包装
// ---------------------------------------------------------------------------

/// 审计时间戳 + 软删除
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audited<T> {
    pub record: T,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl<T> Audited<T> {
    pub fn new(record: T, now: DateTime<Utc>) -> Self {
        Self {
            record,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn replace(&mut self, record: T, now: DateTime<Utc>) {
        self.record = record;
        self.updated_at = now;
    }

    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.deleted_at = Some(now);
        self.updated_at = now;
    }
}

// ---------------------------------------------------------------------------
// 评估上下文
// ---------------------------------------------------------------------------

/// 被评估的实体
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }
}

/// 评估上下文：定向所需的实体与标签，以及调用方默认值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluationContext {
    pub entity: Option<EntityRef>,
    pub tags: BTreeSet<String>,
    /// 定价领域的基础金额
    pub base_amount: Option<Money>,
    /// 访问领域无匹配规则时的默认决定
    pub default_decision: Option<Decision>,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_entity(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity: Some(EntityRef::new(entity_type, entity_id)),
            ..Self::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_base_amount(mut self, amount: Money) -> Self {
        self.base_amount = Some(amount);
        self
    }

    pub fn with_default(mut self, decision: Decision) -> Self {
        self.default_decision = Some(decision);
        self
    }
}

// ---------------------------------------------------------------------------
// 评估结果
// ---------------------------------------------------------------------------

/// 访问决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Granted,
    Denied,
}

/// 决定的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionBasis {
    Override,
    Deny,
    Require,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessOutcome {
    pub decision: Decision,
    pub basis: DecisionBasis,
    /// 决定性规则（按选择顺序的第一条）
    pub deciding_rule_id: Option<String>,
    pub message: Option<String>,
}

/// 单个关联效果的金额明细
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectLine {
    pub kind: EffectKind,
    pub effect_id: String,
    pub priority: i32,
    pub amount: Money,
}

/// 单条规则的可归因贡献
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleContribution {
    pub rule_id: String,
    pub stacking_behavior: StackingBehavior,
    pub adjustment: Money,
    /// max 组中落选的规则为 false
    pub applied: bool,
    pub lines: Vec<EffectLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseBreakdown {
    pub phase: CalculationPhase,
    pub starting_amount: Money,
    pub ending_amount: Money,
    pub contributions: Vec<RuleContribution>,
    /// 促销合计把金额压到零以下时补回的金额；
    /// `ending = starting + Σ 已应用调整 + floor_adjustment`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor_adjustment: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceAdjustment {
    pub base_amount: Money,
    pub final_amount: Money,
    pub total_adjustment: Money,
    pub phases: Vec<PhaseBreakdown>,
    /// 存在悬空效果引用时为 true
    pub partial: bool,
}

impl PriceAdjustment {
    pub fn contribution(&self, rule_id: &str) -> Option<&RuleContribution> {
        self.phases
            .iter()
            .flat_map(|p| p.contributions.iter())
            .find(|c| c.rule_id == rule_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectOutcome {
    Access(AccessOutcome),
    Pricing(PriceAdjustment),
    /// 其他领域只返回匹配结果
    MatchOnly,
}

/// 诊断类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticKind {
    ConditionParseError,
    DataIntegrityWarning,
    DanglingEffectReference,
    IndeterminateCondition,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConditionParseError => "CONDITION_PARSE_ERROR",
            Self::DataIntegrityWarning => "DATA_INTEGRITY_WARNING",
            Self::DanglingEffectReference => "DANGLING_EFFECT_REFERENCE",
            Self::IndeterminateCondition => "INDETERMINATE_CONDITION",
        }
    }
}

/// 单条规则的问题，不中止评估
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub rule_id: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            rule_id: Some(rule_id.into()),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub domain: String,
    pub matched_rule_ids: Vec<String>,
    pub outcome: EffectOutcome,
    pub diagnostics: Vec<Diagnostic>,
    /// 存储不可用时返回的上一次成功结果
    #[serde(default)]
    pub stale: bool,
}

impl EvaluationResult {
    pub fn decision(&self) -> Option<Decision> {
        match &self.outcome {
            EffectOutcome::Access(access) => Some(access.decision),
            _ => None,
        }
    }

    pub fn price_adjustment(&self) -> Option<&PriceAdjustment> {
        match &self.outcome {
            EffectOutcome::Pricing(adjustment) => Some(adjustment),
            _ => None,
        }
    }

    pub fn is_partial(&self) -> bool {
        self.price_adjustment().is_some_and(|p| p.partial)
    }

    pub fn has_diagnostic(&self, kind: DiagnosticKind, rule_id: &str) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.kind == kind && d.rule_id.as_deref() == Some(rule_id))
    }

    /// 指标标签
    pub fn outcome_label(&self) -> &'static str {
        match &self.outcome {
            EffectOutcome::Access(a) if a.decision == Decision::Granted => "granted",
            EffectOutcome::Access(_) => "denied",
            EffectOutcome::Pricing(p) if p.partial => "partial",
            EffectOutcome::Pricing(_) => "priced",
            EffectOutcome::MatchOnly => "matched",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scope_invariant() {
        let ok = Rule::new(ACCESS_DOMAIN, "t", json!(true)).for_entity_type(EntityType::Product);
        assert!(ok.scope_violation().is_none());

        let missing = Rule::new(ACCESS_DOMAIN, "t", json!(true)).with_scope(TargetScope::EntityType);
        assert!(missing.scope_violation().is_some());

        let mut stray = Rule::new(ACCESS_DOMAIN, "t", json!(true));
        stray.target_entity_type = Some(EntityType::SalesChannel);
        assert!(stray.scope_violation().is_some());
    }

    #[test]
    fn test_actor_validated_at_construction() {
        assert!(Actor::user("u-1", "org-1").is_ok());
        assert!(Actor::user("", "org-1").is_err());
        assert!(Actor::api_token(" ").is_err());

        let actor: Actor = serde_json::from_value(json!({"type": "user", "userId": "u-1", "orgId": ""})).unwrap();
        assert!(actor.validate().is_err());
    }

    #[test]
    fn test_rule_serde_camel_case() {
        let rule = Rule::new(PRICING_DOMAIN, "vip discount", json!(true))
            .with_id("r-1")
            .with_pricing(StackingBehavior::Max, CalculationPhase::PostDiscount)
            .link_effect(EffectKind::Promotion, "promo-1", 5);

        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value["targetScope"], "UNIVERSAL");
        assert_eq!(value["pricingConfig"]["stackingBehavior"], "max");
        assert_eq!(value["pricingConfig"]["calculationPhase"], "post_discount");
        assert_eq!(value["effects"][0]["effectId"], "promo-1");

        let back: Rule = serde_json::from_value(value).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn test_rule_deserialize_defaults() {
        let rule: Rule = serde_json::from_value(json!({
            "id": "r-2",
            "domain": "access",
            "name": "adults only",
            "targetScope": "DOMAIN",
            "condition": {"fact": "user.age", "operator": "gte", "value": 18},
            "effect": "boolean"
        }))
        .unwrap();

        assert!(rule.is_active);
        assert_eq!(rule.priority, 0);
        assert!(rule.variables.is_empty());
        assert_eq!(rule.actor, Actor::System);
        assert!(rule.config_violation().is_some());
    }

    #[test]
    fn test_targets_lookup_per_family() {
        let rule = Rule::new(PRICING_DOMAIN, "t", json!(true))
            .for_entities(EntityType::ProductVariant, ["v-1", "v-2"]);

        assert!(rule.targets.contains(&EntityRef::new(EntityType::ProductVariant, "v-1")));
        assert!(!rule.targets.contains(&EntityRef::new(EntityType::Product, "v-1")));
    }

    #[test]
    fn test_text_enums() {
        assert_eq!("max".parse::<StackingBehavior>().unwrap(), StackingBehavior::Max);
        assert_eq!(
            "post_discount".parse::<CalculationPhase>().unwrap(),
            CalculationPhase::PostDiscount
        );
        assert!("final".parse::<CalculationPhase>().is_err());
        assert!(CalculationPhase::PreDiscount < CalculationPhase::PostDiscount);
        assert_eq!(TargetScope::EntityType.as_str(), "ENTITY_TYPE");
        assert_eq!("tax_rate".parse::<EffectKind>().unwrap(), EffectKind::TaxRate);
    }

    #[test]
    fn test_audited_lifecycle() {
        let now = Utc::now();
        let mut audited = Audited::new("record", now);
        assert!(!audited.is_deleted());
        audited.mark_deleted(now);
        assert!(audited.is_deleted());
    }
}
