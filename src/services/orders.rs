use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::config::IncentiveConfig;
use crate::db::{with_tx_retry, RetryConfig};
use crate::entities::order::{self, Entity as Order, Model as OrderModel, OrderStatus};
use crate::entities::order_item::{self, Entity as OrderItem, Model as OrderItemModel};
use crate::entities::reward_ledger::Model as RewardEntry;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::money::round2;
use crate::services::loyalty::{AccrualResult, LoyaltyService};
use crate::services::order_status::{transition_order, SideEffect};
use crate::services::promotions::PromotionService;
use crate::services::referrals::ReferralService;

/// Locks a pending order, optionally requiring it to belong to `user_id`.
/// Only pending orders accept promo codes and vouchers.
pub(crate) async fn lock_pending_order(
    txn: &DatabaseTransaction,
    order_id: Uuid,
    user_id: Option<Uuid>,
) -> Result<OrderModel, ServiceError> {
    let mut query = Order::find_by_id(order_id).filter(order::Column::Status.eq(OrderStatus::Pending));
    if let Some(user_id) = user_id {
        query = query.filter(order::Column::UserId.eq(user_id));
    }

    query
        .lock_exclusive()
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Pending order {} not found", order_id)))
}

/// A line frozen into an order at checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct OrderLineInput {
    pub menu_item_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

/// Everything one status change did.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionResult {
    pub order: OrderModel,
    pub previous_status: OrderStatus,
    pub side_effects: Vec<SideEffectKind>,
    pub loyalty: Option<AccrualResult>,
    pub referral_reward: Option<RewardEntry>,
    pub redemptions_reversed: u64,
}

/// Serializable mirror of [`SideEffect`] for responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffectKind {
    AccrueLoyalty,
    QualifyReferral,
    ReverseRedemptions,
}

impl From<SideEffect> for SideEffectKind {
    fn from(effect: SideEffect) -> Self {
        match effect {
            SideEffect::AccrueLoyalty => Self::AccrueLoyalty,
            SideEffect::QualifyReferral => Self::QualifyReferral,
            SideEffect::ReverseRedemptions => Self::ReverseRedemptions,
        }
    }
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    config: IncentiveConfig,
    event_sender: EventSender,
    retry: RetryConfig,
}

impl OrderService {
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

    /// Creates a pending order with `total == subtotal`.
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn create_order(
        &self,
        user_id: Option<Uuid>,
        lines: Vec<OrderLineInput>,
    ) -> Result<OrderDetails, ServiceError> {
        if lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "an order needs at least one line".to_string(),
            ));
        }
        for line in &lines {
            line.validate()?;
            if line.unit_price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "negative price for item {}",
                    line.menu_item_id
                )));
            }
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let subtotal = round2(
            lines
                .iter()
                .map(|l| round2(l.unit_price) * Decimal::from(l.quantity))
                .sum(),
        );

        let txn = self.db.begin().await?;
        let order = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            status: Set(OrderStatus::Pending),
            subtotal: Set(subtotal),
            promo_discount: Set(Decimal::ZERO),
            discount_total: Set(Decimal::ZERO),
            total: Set(subtotal),
            promo_code: Set(None),
            created_at: Set(now),
            confirmed_at: Set(None),
            paid_at: Set(None),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let unit_price = round2(line.unit_price);
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                menu_item_id: Set(line.menu_item_id),
                quantity: Set(line.quantity),
                unit_price: Set(unit_price),
                line_total: Set(round2(unit_price * Decimal::from(line.quantity))),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }
        txn.commit().await?;

        info!(order_id = %order_id, subtotal = %subtotal, "order created");
        counter!("resto.orders.created", 1);
        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order_id,
                user_id,
                total: subtotal,
            })
            .await;

        Ok(OrderDetails { order, items })
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::UnitPrice)
            .all(&*self.db)
            .await?;
        Ok(OrderDetails { order, items })
    }

    /// Moves an order to `next` and runs the resulting side effects in the
    /// same transaction. The status flip is guarded on the status that was
    /// read, so a concurrent transition makes this attempt retry instead of
    /// running the hooks twice.
    #[instrument(skip(self))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        next: OrderStatus,
    ) -> Result<TransitionResult, ServiceError> {
        let result = with_tx_retry(&self.retry, move || self.transition_once(order_id, next)).await?;

        if result.previous_status != result.order.status {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status: result.previous_status,
                    new_status: result.order.status,
                })
                .await;
        }
        if let Some(accrual) = &result.loyalty {
            if !accrual.vouchers.is_empty() {
                self.event_sender
                    .send_or_log(Event::VouchersMinted {
                        user_id: accrual.user_id,
                        order_id,
                        count: accrual.vouchers.len() as u32,
                    })
                    .await;
            }
        }
        if let Some(entry) = &result.referral_reward {
            if let Some(referral_id) = entry.source_id {
                self.event_sender
                    .send_or_log(Event::ReferralRewarded {
                        referral_id,
                        referrer_id: entry.user_id,
                        amount: entry.amount,
                    })
                    .await;
            }
        }
        if result.redemptions_reversed > 0 {
            self.event_sender
                .send_or_log(Event::RedemptionsReversed {
                    order_id,
                    count: result.redemptions_reversed,
                })
                .await;
        }

        Ok(result)
    }

    async fn transition_once(
        &self,
        order_id: Uuid,
        next: OrderStatus,
    ) -> Result<TransitionResult, ServiceError> {
        let txn = self.db.begin().await?;

        let current = Order::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let previous_status = current.status;

        let effects = transition_order(previous_status, next)?;
        if previous_status == next {
            txn.commit().await?;
            return Ok(TransitionResult {
                order: current,
                previous_status,
                side_effects: Vec::new(),
                loyalty: None,
                referral_reward: None,
                redemptions_reversed: 0,
            });
        }

        let now = Utc::now();
        let mut update = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(next))
            .col_expr(order::Column::UpdatedAt, Expr::value(now));
        match next {
            OrderStatus::Confirmed => {
                update = update.col_expr(order::Column::ConfirmedAt, Expr::value(now));
            }
            OrderStatus::Delivered => {
                update = update.col_expr(order::Column::PaidAt, Expr::value(now));
            }
            OrderStatus::Pending | OrderStatus::Canceled => {}
        }
        let flipped = update
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(previous_status))
            .exec(&txn)
            .await?
            .rows_affected;
        if flipped != 1 {
            return Err(ServiceError::ConcurrentModification(order_id));
        }

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let mut loyalty = None;
        let mut referral_reward = None;
        let mut redemptions_reversed = 0;
        for effect in &effects {
            match effect {
                SideEffect::AccrueLoyalty => {
                    loyalty = LoyaltyService::accrue_in_txn(&txn, &self.config, &order).await?;
                }
                SideEffect::QualifyReferral => {
                    referral_reward =
                        ReferralService::qualify_and_reward_in_txn(&txn, &self.config, &order)
                            .await?;
                }
                SideEffect::ReverseRedemptions => {
                    redemptions_reversed =
                        PromotionService::reverse_for_order_in_txn(&txn, order_id).await?;
                }
            }
        }

        txn.commit().await?;
        info!(
            order_id = %order_id,
            from = %previous_status,
            to = %next,
            "order status changed"
        );

        Ok(TransitionResult {
            order,
            previous_status,
            side_effects: effects.into_iter().map(SideEffectKind::from).collect(),
            loyalty,
            referral_reward,
            redemptions_reversed,
        })
    }

    pub async fn confirm(&self, order_id: Uuid) -> Result<TransitionResult, ServiceError> {
        self.transition(order_id, OrderStatus::Confirmed).await
    }

    /// Marks the order delivered (paid); loyalty and referral hooks fire once.
    pub async fn mark_delivered(&self, order_id: Uuid) -> Result<TransitionResult, ServiceError> {
        self.transition(order_id, OrderStatus::Delivered).await
    }

    pub async fn cancel(&self, order_id: Uuid) -> Result<TransitionResult, ServiceError> {
        self.transition(order_id, OrderStatus::Canceled).await
    }
}
