use chrono::{Duration, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::IncentiveConfig;
use crate::db::{with_tx_retry, RetryConfig};
use crate::entities::free_item_voucher::{
    self, Entity as FreeItemVoucher, Model as VoucherModel, VoucherStatus,
};
use crate::entities::loyalty_account::{self, Entity as LoyaltyAccount};
use crate::entities::order::{self, Model as OrderModel};
use crate::entities::order_item::{self, Entity as OrderItem};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::money::{payable_total, round2};
use crate::services::orders::lock_pending_order;
use crate::services::outcome::{IncentiveOutcome, RejectionReason};

/// What one accrual did to a customer's loyalty account.
#[derive(Debug, Clone, Serialize)]
pub struct AccrualResult {
    pub user_id: Uuid,
    pub stamps_added: u32,
    pub stamps: u32,
    pub vouchers: Vec<VoucherModel>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoyaltyStatus {
    pub stamps: u32,
    pub target: u32,
    pub stamps_to_next_voucher: u32,
    pub vouchers: Vec<VoucherModel>,
}

/// Loyalty stamps and free-item vouchers.
#[derive(Clone)]
pub struct LoyaltyService {
    db: Arc<DatabaseConnection>,
    config: IncentiveConfig,
    event_sender: EventSender,
    retry: RetryConfig,
}

impl LoyaltyService {
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

    /// Converts the order's item count into stamps and mints one voucher per
    /// full card. Runs inside the transaction that flips the order to
    /// delivered, so it happens exactly once per order. Guests are skipped.
    pub async fn accrue_in_txn(
        txn: &DatabaseTransaction,
        config: &IncentiveConfig,
        order: &OrderModel,
    ) -> Result<Option<AccrualResult>, ServiceError> {
        let Some(user_id) = order.user_id else {
            return Ok(None);
        };

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(txn)
            .await?;
        let stamps_added: u32 = items.iter().map(|i| i.quantity.max(0) as u32).sum();

        let now = Utc::now();
        LoyaltyAccount::insert(loyalty_account::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            stamps: Set(0),
            vouchers_earned: Set(0),
            updated_at: Set(now),
        })
        .on_conflict(
            OnConflict::column(loyalty_account::Column::UserId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(txn)
        .await?;

        let account = LoyaltyAccount::find()
            .filter(loyalty_account::Column::UserId.eq(user_id))
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!("loyalty account for {} vanished", user_id))
            })?;

        let target = config.stamps_target.max(1);
        let mut stamps = account.stamps.max(0) as u32 + stamps_added;
        let mut vouchers = Vec::new();
        while stamps >= target {
            stamps -= target;
            let voucher = free_item_voucher::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user_id),
                max_item_value: Set(round2(config.voucher_max_item_value)),
                status: Set(VoucherStatus::Available),
                expires_at: Set(now + Duration::days(config.voucher_days_valid)),
                used_order_id: Set(None),
                redeemed_amount: Set(None),
                created_at: Set(now),
                used_at: Set(None),
            }
            .insert(txn)
            .await?;
            vouchers.push(voucher);
        }

        let vouchers_earned = account.vouchers_earned + vouchers.len() as i32;
        let mut active: loyalty_account::ActiveModel = account.into();
        active.stamps = Set(stamps as i32);
        active.vouchers_earned = Set(vouchers_earned);
        active.updated_at = Set(now);
        active.update(txn).await?;

        if !vouchers.is_empty() {
            counter!("resto.loyalty.vouchers_minted", vouchers.len() as u64);
        }
        info!(
            order_id = %order.id,
            user_id = %user_id,
            stamps_added,
            stamps,
            minted = vouchers.len(),
            "loyalty stamps accrued"
        );

        Ok(Some(AccrualResult {
            user_id,
            stamps_added,
            stamps,
            vouchers,
        }))
    }

    /// Applies a free-item voucher to a pending order. The discount is the
    /// cheapest line's unit price, capped by the voucher's value, and adds to
    /// any promo discount already on the order.
    #[instrument(skip(self))]
    pub async fn redeem_voucher(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        voucher_id: Uuid,
    ) -> Result<IncentiveOutcome, ServiceError> {
        let outcome = with_tx_retry(&self.retry, move || {
            self.redeem_voucher_once(user_id, order_id, voucher_id)
        })
        .await?;

        match outcome.reason {
            None => {
                counter!("resto.vouchers.redeemed", 1);
                self.event_sender
                    .send_or_log(Event::VoucherRedeemed {
                        voucher_id,
                        order_id,
                        discount: outcome.discount,
                    })
                    .await;
            }
            Some(reason) => {
                counter!("resto.vouchers.rejected", 1);
                info!(reason = %reason, "voucher not redeemed");
            }
        }

        Ok(outcome)
    }

    async fn redeem_voucher_once(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        voucher_id: Uuid,
    ) -> Result<IncentiveOutcome, ServiceError> {
        let txn = self.db.begin().await?;
        let order = lock_pending_order(&txn, order_id, Some(user_id)).await?;

        let voucher = FreeItemVoucher::find_by_id(voucher_id)
            .filter(free_item_voucher::Column::UserId.eq(user_id))
            .lock_exclusive()
            .one(&txn)
            .await?;

        let Some(voucher) = voucher else {
            txn.rollback().await?;
            return Ok(RejectionReason::VoucherNotFound.into());
        };

        if voucher.status != VoucherStatus::Available {
            txn.rollback().await?;
            return Ok(RejectionReason::VoucherNotAvailable.into());
        }

        let now = Utc::now();
        if voucher.expires_at <= now {
            Self::flip_status(&txn, voucher.id, VoucherStatus::Expired).await?;
            txn.commit().await?;
            warn!("voucher expired before use");
            return Ok(RejectionReason::VoucherExpired.into());
        }

        let cheapest = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&txn)
            .await?
            .into_iter()
            .map(|item| round2(item.unit_price))
            .min();

        let Some(cheapest) = cheapest else {
            txn.rollback().await?;
            return Ok(RejectionReason::EmptyOrder.into());
        };

        let discount = round2(cheapest.min(round2(voucher.max_item_value)));

        // The status guard makes the flip exactly-once even without row locks.
        let consumed = FreeItemVoucher::update_many()
            .col_expr(
                free_item_voucher::Column::Status,
                Expr::value(VoucherStatus::Used),
            )
            .col_expr(free_item_voucher::Column::UsedOrderId, Expr::value(order.id))
            .col_expr(free_item_voucher::Column::RedeemedAmount, Expr::value(discount))
            .col_expr(free_item_voucher::Column::UsedAt, Expr::value(now))
            .filter(free_item_voucher::Column::Id.eq(voucher.id))
            .filter(free_item_voucher::Column::Status.eq(VoucherStatus::Available))
            .exec(&txn)
            .await?
            .rows_affected;

        if consumed != 1 {
            txn.rollback().await?;
            return Ok(RejectionReason::VoucherNotAvailable.into());
        }

        let subtotal = round2(order.subtotal);
        let discount_total = round2(order.discount_total) + discount;
        let mut active: order::ActiveModel = order.into();
        active.discount_total = Set(discount_total);
        active.total = Set(payable_total(subtotal, discount_total));
        active.updated_at = Set(now);
        active.update(&txn).await?;

        txn.commit().await?;
        Ok(IncentiveOutcome::applied(discount))
    }

    async fn flip_status(
        txn: &DatabaseTransaction,
        voucher_id: Uuid,
        status: VoucherStatus,
    ) -> Result<u64, ServiceError> {
        Ok(FreeItemVoucher::update_many()
            .col_expr(free_item_voucher::Column::Status, Expr::value(status))
            .filter(free_item_voucher::Column::Id.eq(voucher_id))
            .filter(free_item_voucher::Column::Status.eq(VoucherStatus::Available))
            .exec(txn)
            .await?
            .rows_affected)
    }

    /// All vouchers of the user, newest first.
    pub async fn list_vouchers(&self, user_id: Uuid) -> Result<Vec<VoucherModel>, ServiceError> {
        Ok(FreeItemVoucher::find()
            .filter(free_item_voucher::Column::UserId.eq(user_id))
            .order_by_desc(free_item_voucher::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Available, unexpired voucher closest to expiry.
    pub async fn soonest_expiring_available(
        &self,
        user_id: Uuid,
    ) -> Result<Option<VoucherModel>, ServiceError> {
        Ok(FreeItemVoucher::find()
            .filter(free_item_voucher::Column::UserId.eq(user_id))
            .filter(free_item_voucher::Column::Status.eq(VoucherStatus::Available))
            .filter(free_item_voucher::Column::ExpiresAt.gt(Utc::now()))
            .order_by_asc(free_item_voucher::Column::ExpiresAt)
            .one(&*self.db)
            .await?)
    }

    /// Flips every AVAILABLE voucher past its expiry to EXPIRED.
    #[instrument(skip(self))]
    pub async fn expire_vouchers(&self) -> Result<u64, ServiceError> {
        let expired = FreeItemVoucher::update_many()
            .col_expr(
                free_item_voucher::Column::Status,
                Expr::value(VoucherStatus::Expired),
            )
            .filter(free_item_voucher::Column::Status.eq(VoucherStatus::Available))
            .filter(free_item_voucher::Column::ExpiresAt.lte(Utc::now()))
            .exec(&*self.db)
            .await?
            .rows_affected;

        if expired > 0 {
            info!(expired, "expired free-item vouchers");
            counter!("resto.vouchers.expired", expired);
            self.event_sender
                .send_or_log(Event::VouchersExpired { count: expired })
                .await;
        }
        Ok(expired)
    }

    /// Current stamp card and the most recent vouchers.
    pub async fn status(&self, user_id: Uuid) -> Result<LoyaltyStatus, ServiceError> {
        let stamps = LoyaltyAccount::find()
            .filter(loyalty_account::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .map(|a| a.stamps.max(0) as u32)
            .unwrap_or(0);

        let vouchers = FreeItemVoucher::find()
            .filter(free_item_voucher::Column::UserId.eq(user_id))
            .order_by_desc(free_item_voucher::Column::CreatedAt)
            .limit(self.config.voucher_list_limit)
            .all(&*self.db)
            .await?;

        let target = self.config.stamps_target;
        Ok(LoyaltyStatus {
            stamps,
            target,
            stamps_to_next_voucher: target.saturating_sub(stamps),
            vouchers,
        })
    }
}
