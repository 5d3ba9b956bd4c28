use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::config::IncentiveConfig;
use crate::db::{with_tx_retry, RetryConfig};
use crate::entities::order::{self, Entity as Order, Model as OrderModel, OrderStatus};
use crate::entities::promotion::{
    self, Entity as Promotion, Model as PromotionModel, PromotionType, Segment,
};
use crate::entities::promotion_redemption::{
    self, Entity as PromotionRedemption, Model as RedemptionModel, RedemptionStatus,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::money::{payable_total, round2};
use crate::services::eligibility::{evaluate, CustomerHistory, EvaluationContext, UsageCounts};
use crate::services::orders::lock_pending_order;
use crate::services::outcome::{IncentiveOutcome, RejectionReason};

/// Upper-cased, trimmed promo or referral code.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Optional fraud signals recorded with each redemption.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFingerprint {
    pub device_id: Option<String>,
    pub ip_hash: Option<String>,
}

/// Operator input for a new promotion.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewPromotion {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub promo_type: PromotionType,
    pub value: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub min_order_amount: Option<Decimal>,
    pub segment: Segment,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    #[validate(range(min = 0))]
    pub usage_limit_total: Option<i32>,
    #[validate(range(min = 0))]
    pub usage_limit_per_user: Option<i32>,
}

impl NewPromotion {
    fn check_amounts(&self) -> Result<(), ServiceError> {
        let negative = |d: Option<Decimal>| d.map_or(false, |d| d < Decimal::ZERO);
        if self.value < Decimal::ZERO
            || negative(self.max_discount_amount)
            || negative(self.min_order_amount)
        {
            return Err(ServiceError::ValidationError(
                "promotion amounts must not be negative".to_string(),
            ));
        }
        if self.promo_type == PromotionType::Percent && self.value > Decimal::ONE_HUNDRED {
            return Err(ServiceError::ValidationError(
                "percent promotions cannot exceed 100".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start_at, self.end_at) {
            if end < start {
                return Err(ServiceError::ValidationError(
                    "promotion ends before it starts".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Promo codes and their redemption ledger.
#[derive(Clone)]
pub struct PromotionService {
    db: Arc<DatabaseConnection>,
    config: IncentiveConfig,
    event_sender: EventSender,
    retry: RetryConfig,
}

impl PromotionService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: IncentiveConfig,
        event_sender: EventSender,
        retry: RetryConfig,
    ) -> Self {
        Self {
            db,
            config,
            event_sender,
            retry,
        }
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_promotion(&self, input: NewPromotion) -> Result<PromotionModel, ServiceError> {
        input.validate()?;
        input.check_amounts()?;

        let code = normalize_code(&input.code);
        if Self::find_by_code(&*self.db, &code).await?.is_some() {
            return Err(ServiceError::Conflict(format!("promotion {} already exists", code)));
        }

        let promotion = promotion::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            name: Set(input.name),
            promo_type: Set(input.promo_type),
            value: Set(round2(input.value)),
            max_discount_amount: Set(input.max_discount_amount.map(round2)),
            min_order_amount: Set(input.min_order_amount.map(round2)),
            segment: Set(input.segment),
            start_at: Set(input.start_at),
            end_at: Set(input.end_at),
            is_active: Set(true),
            usage_limit_total: Set(input.usage_limit_total),
            usage_limit_per_user: Set(input.usage_limit_per_user),
            non_cumulable: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;

        info!(promotion_id = %promotion.id, "promotion created");
        Ok(promotion)
    }

    /// Switches a promotion on or off; inactive codes are rejected with
    /// `PROMO_INACTIVE` while existing redemptions stay untouched.
    #[instrument(skip(self))]
    pub async fn set_active(
        &self,
        promotion_id: Uuid,
        is_active: bool,
    ) -> Result<PromotionModel, ServiceError> {
        let promotion = Promotion::find_by_id(promotion_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Promotion {} not found", promotion_id)))?;
        let mut active: promotion::ActiveModel = promotion.into();
        active.is_active = Set(is_active);
        let updated = active.update(&*self.db).await?;
        info!(code = %updated.code, is_active, "promotion status changed");
        Ok(updated)
    }

    pub async fn find_by_code<C: ConnectionTrait>(
        conn: &C,
        code: &str,
    ) -> Result<Option<PromotionModel>, ServiceError> {
        Ok(Promotion::find()
            .filter(promotion::Column::Code.eq(normalize_code(code)))
            .one(conn)
            .await?)
    }

    /// Paid (delivered) order history used by the segment rules.
    pub async fn customer_history<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
    ) -> Result<CustomerHistory, ServiceError> {
        let paid = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::Status.eq(OrderStatus::Delivered));

        let paid_orders = paid.clone().count(conn).await?;
        let last_paid_at = paid
            .order_by_desc(order::Column::PaidAt)
            .one(conn)
            .await?
            .and_then(|o| o.paid_at);

        Ok(CustomerHistory {
            paid_orders,
            last_paid_at,
        })
    }

    /// APPLIED redemptions of the promotion. Redemptions held by
    /// `excluding_order` are left out since applying supersedes them.
    pub async fn usage_counts<C: ConnectionTrait>(
        conn: &C,
        promotion_id: Uuid,
        user_id: Option<Uuid>,
        excluding_order: Option<Uuid>,
    ) -> Result<UsageCounts, ServiceError> {
        let mut applied = PromotionRedemption::find()
            .filter(promotion_redemption::Column::PromotionId.eq(promotion_id))
            .filter(promotion_redemption::Column::Status.eq(RedemptionStatus::Applied));
        if let Some(order_id) = excluding_order {
            applied = applied.filter(promotion_redemption::Column::OrderId.ne(order_id));
        }

        let total = applied.clone().count(conn).await?;
        let by_user = match user_id {
            Some(user_id) => {
                applied
                    .filter(promotion_redemption::Column::UserId.eq(user_id))
                    .count(conn)
                    .await?
            }
            None => 0,
        };

        Ok(UsageCounts { total, by_user })
    }

    /// Applies a promo code to the user's pending order.
    ///
    /// Any APPLIED redemption already on the order is cancelled first, so
    /// repeating the call supersedes instead of stacking. Voucher discounts
    /// already on the order are kept.
    #[instrument(skip(self, fingerprint))]
    pub async fn apply_promo(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        code: &str,
        fingerprint: &RequestFingerprint,
    ) -> Result<IncentiveOutcome, ServiceError> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Ok(RejectionReason::PromoNotFound.into());
        }

        let code_ref = code.as_str();
        let (outcome, promotion_id) = with_tx_retry(&self.retry, move || {
            self.apply_promo_once(user_id, order_id, code_ref, fingerprint)
        })
        .await?;

        match (outcome.reason, promotion_id) {
            (None, Some(promotion_id)) => {
                counter!("resto.promotions.applied", 1);
                info!(discount = %outcome.discount, "promotion applied");
                self.event_sender
                    .send_or_log(Event::PromotionApplied {
                        order_id,
                        promotion_id,
                        code,
                        discount: outcome.discount,
                    })
                    .await;
            }
            (Some(reason), _) => {
                counter!("resto.promotions.rejected", 1);
                info!(reason = %reason, "promotion rejected");
                self.event_sender
                    .send_or_log(Event::PromotionRejected {
                        order_id,
                        code,
                        reason,
                    })
                    .await;
            }
            (None, None) => {}
        }

        Ok(outcome)
    }

    async fn apply_promo_once(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        code: &str,
        fingerprint: &RequestFingerprint,
    ) -> Result<(IncentiveOutcome, Option<Uuid>), ServiceError> {
        let txn = self.db.begin().await?;
        let order = lock_pending_order(&txn, order_id, Some(user_id)).await?;

        // Locking the promotion serializes concurrent applications of one code
        // so the usage caps are checked against settled counts.
        let promotion = Promotion::find()
            .filter(promotion::Column::Code.eq(code))
            .lock_exclusive()
            .one(&txn)
            .await?;
        let Some(promotion) = promotion else {
            txn.rollback().await?;
            return Ok((RejectionReason::PromoNotFound.into(), None));
        };

        let history = Self::customer_history(&txn, user_id).await?;
        let usage = Self::usage_counts(&txn, promotion.id, Some(user_id), Some(order.id)).await?;
        let subtotal = round2(order.subtotal);

        let eligibility = evaluate(
            &promotion,
            &EvaluationContext {
                now: Utc::now(),
                subtotal,
                history: Some(history),
                usage,
                inactive_segment_days: self.config.inactive_segment_days,
            },
        );
        if let Some(reason) = eligibility.reason {
            txn.rollback().await?;
            return Ok((reason.into(), Some(promotion.id)));
        }
        let discount = eligibility.discount_amount;

        let superseded = Self::cancel_applied_in_txn(&txn, order.id, RedemptionStatus::Cancelled).await?;
        if superseded > 0 {
            debug!(superseded, "superseded previous promotion on order");
        }

        promotion_redemption::ActiveModel {
            id: Set(Uuid::new_v4()),
            promotion_id: Set(promotion.id),
            user_id: Set(user_id),
            order_id: Set(order.id),
            discount_amount: Set(discount),
            status: Set(RedemptionStatus::Applied),
            device_id: Set(fingerprint.device_id.clone()),
            ip_hash: Set(fingerprint.ip_hash.clone()),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        let voucher_discounts = round2(order.discount_total) - round2(order.promo_discount);
        let discount_total = round2(voucher_discounts.max(Decimal::ZERO) + discount);
        let mut active: order::ActiveModel = order.into();
        active.promo_code = Set(Some(promotion.code.clone()));
        active.promo_discount = Set(discount);
        active.discount_total = Set(discount_total);
        active.total = Set(payable_total(subtotal, discount_total));
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        txn.commit().await?;
        Ok((IncentiveOutcome::applied(discount), Some(promotion.id)))
    }

    /// Drops the promo from a pending order, keeping voucher discounts.
    #[instrument(skip(self))]
    pub async fn remove_promo(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let (order, removed_code) =
            with_tx_retry(&self.retry, move || self.remove_promo_once(user_id, order_id)).await?;

        if let Some(code) = removed_code {
            self.event_sender
                .send_or_log(Event::PromotionRemoved { order_id, code })
                .await;
        }
        Ok(order)
    }

    async fn remove_promo_once(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<(OrderModel, Option<String>), ServiceError> {
        let txn = self.db.begin().await?;
        let order = lock_pending_order(&txn, order_id, Some(user_id)).await?;

        let cancelled = Self::cancel_applied_in_txn(&txn, order.id, RedemptionStatus::Cancelled).await?;
        if cancelled == 0 && order.promo_code.is_none() {
            txn.commit().await?;
            return Ok((order, None));
        }

        let removed_code = order.promo_code.clone();
        let subtotal = round2(order.subtotal);
        let discount_total =
            (round2(order.discount_total) - round2(order.promo_discount)).max(Decimal::ZERO);
        let mut active: order::ActiveModel = order.into();
        active.promo_code = Set(None);
        active.promo_discount = Set(Decimal::ZERO);
        active.discount_total = Set(discount_total);
        active.total = Set(payable_total(subtotal, discount_total));
        active.updated_at = Set(Utc::now());
        let order = active.update(&txn).await?;

        txn.commit().await?;
        Ok((order, removed_code))
    }

    /// Releases the APPLIED redemptions of a canceled order so they stop
    /// counting against usage caps.
    pub async fn reverse_for_order_in_txn(
        txn: &DatabaseTransaction,
        order_id: Uuid,
    ) -> Result<u64, ServiceError> {
        Self::cancel_applied_in_txn(txn, order_id, RedemptionStatus::Reversed).await
    }

    async fn cancel_applied_in_txn(
        txn: &DatabaseTransaction,
        order_id: Uuid,
        status: RedemptionStatus,
    ) -> Result<u64, ServiceError> {
        Ok(PromotionRedemption::update_many()
            .col_expr(promotion_redemption::Column::Status, Expr::value(status))
            .filter(promotion_redemption::Column::OrderId.eq(order_id))
            .filter(promotion_redemption::Column::Status.eq(RedemptionStatus::Applied))
            .exec(txn)
            .await?
            .rows_affected)
    }

    /// Evaluates a code against a cart subtotal without recording anything.
    /// Guests only qualify for `ALL` promotions.
    #[instrument(skip(self))]
    pub async fn preview(
        &self,
        user_id: Option<Uuid>,
        code: &str,
        subtotal: Decimal,
    ) -> Result<(IncentiveOutcome, Option<PromotionModel>), ServiceError> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Ok((RejectionReason::PromoNotFound.into(), None));
        }

        let Some(promotion) = Self::find_by_code(&*self.db, &code).await? else {
            return Ok((RejectionReason::PromoNotFound.into(), None));
        };

        let history = match user_id {
            Some(user_id) => Some(Self::customer_history(&*self.db, user_id).await?),
            None => None,
        };
        let usage = Self::usage_counts(&*self.db, promotion.id, user_id, None).await?;

        let eligibility = evaluate(
            &promotion,
            &EvaluationContext {
                now: Utc::now(),
                subtotal: round2(subtotal),
                history,
                usage,
                inactive_segment_days: self.config.inactive_segment_days,
            },
        );

        let outcome = match eligibility.reason {
            Some(reason) => reason.into(),
            None => IncentiveOutcome::applied(eligibility.discount_amount),
        };
        Ok((outcome, Some(promotion)))
    }

    /// Redemption history of an order, newest first.
    pub async fn redemptions_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<RedemptionModel>, ServiceError> {
        Ok(PromotionRedemption::find()
            .filter(promotion_redemption::Column::OrderId.eq(order_id))
            .order_by_desc(promotion_redemption::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_trimmed_and_upper_cased() {
        assert_eq!(normalize_code("  welcome10 "), "WELCOME10");
        assert_eq!(normalize_code(""), "");
    }

    fn new_promotion() -> NewPromotion {
        NewPromotion {
            code: "save20".into(),
            name: "Save 20".into(),
            promo_type: PromotionType::FixedAmount,
            value: Decimal::from(20),
            max_discount_amount: None,
            min_order_amount: None,
            segment: Segment::All,
            start_at: None,
            end_at: None,
            usage_limit_total: None,
            usage_limit_per_user: Some(1),
        }
    }

    #[test]
    fn negative_amounts_are_rejected() {
        let mut input = new_promotion();
        assert!(input.check_amounts().is_ok());

        input.value = Decimal::from(-1);
        assert!(input.check_amounts().is_err());
    }

    #[test]
    fn percent_above_hundred_is_rejected() {
        let mut input = new_promotion();
        input.promo_type = PromotionType::Percent;
        input.value = Decimal::from(150);
        assert!(input.check_amounts().is_err());
    }

    #[test]
    fn window_must_be_ordered() {
        let mut input = new_promotion();
        input.start_at = Some(Utc::now());
        input.end_at = Some(Utc::now() - chrono::Duration::days(1));
        assert!(input.check_amounts().is_err());
    }
}
