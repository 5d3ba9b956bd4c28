use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionType {
    #[sea_orm(string_value = "PERCENT")]
    Percent,
    #[sea_orm(string_value = "FIXED_AMOUNT")]
    FixedAmount,
    /// Carries no order discount; the benefit arrives as a voucher.
    #[sea_orm(string_value = "FREE_ITEM")]
    FreeItem,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum Segment {
    #[sea_orm(string_value = "ALL")]
    #[serde(rename = "ALL")]
    All,
    /// Users without any paid order
    #[sea_orm(string_value = "NEW")]
    #[serde(rename = "NEW")]
    New,
    /// Users whose last paid order is older than the inactivity window
    #[sea_orm(string_value = "INACTIVE_30D")]
    #[serde(rename = "INACTIVE_30D")]
    Inactive30d,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "promotions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Upper-case, unique
    #[sea_orm(unique)]
    pub code: String,
    pub name: String,
    pub promo_type: PromotionType,
    pub value: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub min_order_amount: Option<Decimal>,
    pub segment: Segment,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub usage_limit_total: Option<i32>,
    pub usage_limit_per_user: Option<i32>,
    pub non_cumulable: bool,
    pub created_at: DateTime<Utc>,
}

impl Model {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.start_at.map_or(true, |start| start <= now)
            && self.end_at.map_or(true, |end| now <= end)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::promotion_redemption::Entity")]
    PromotionRedemption,
}

impl Related<super::promotion_redemption::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PromotionRedemption.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
