use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::IncentiveConfig;
use crate::db::{with_tx_retry, RetryConfig};
use crate::entities::order::{Entity as Order, Model as OrderModel, OrderStatus};
use crate::entities::referral::{self, Entity as Referral, Model as ReferralModel, ReferralStatus};
use crate::entities::referral_code::{self, Entity as ReferralCode, Model as ReferralCodeModel};
use crate::entities::reward_ledger::{Model as RewardEntry, RewardSource};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::money::round2;
use crate::services::outcome::{IncentiveOutcome, RejectionReason};
use crate::services::promotions::normalize_code;
use crate::services::rewards::RewardService;

/// Short code derived from the user id; the full id is used if the short
/// form is taken.
fn candidate_codes(prefix: &str, user_id: Uuid) -> [String; 2] {
    let hex = user_id.simple().to_string();
    [
        normalize_code(&format!("{}{}", prefix, &hex[..10])),
        normalize_code(&format!("{}{}", prefix, hex)),
    ]
}

/// Referral codes, attribution and referrer rewards.
#[derive(Clone)]
pub struct ReferralService {
    db: Arc<DatabaseConnection>,
    config: IncentiveConfig,
    event_sender: EventSender,
    retry: RetryConfig,
}

impl ReferralService {
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

    /// Returns the user's referral code, creating it on first use.
    #[instrument(skip(self))]
    pub async fn get_or_create_code(&self, user_id: Uuid) -> Result<ReferralCodeModel, ServiceError> {
        if let Some(existing) = self.code_of(user_id).await? {
            return Ok(existing);
        }

        for code in candidate_codes(&self.config.referral_code_prefix, user_id) {
            let taken = ReferralCode::find()
                .filter(referral_code::Column::Code.eq(code.as_str()))
                .one(&*self.db)
                .await?
                .is_some();
            if taken {
                continue;
            }

            let inserted = referral_code::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user_id),
                code: Set(code),
                is_active: Set(true),
                created_at: Set(Utc::now()),
            }
            .insert(&*self.db)
            .await
            .map_err(ServiceError::from);

            match inserted {
                Ok(created) => {
                    info!(code = %created.code, "referral code created");
                    return Ok(created);
                }
                // A concurrent request may have created the user's code first.
                Err(err) if err.is_unique_violation() => {
                    if let Some(existing) = self.code_of(user_id).await? {
                        return Ok(existing);
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(ServiceError::Conflict(format!(
            "no free referral code for user {}",
            user_id
        )))
    }

    async fn code_of(&self, user_id: Uuid) -> Result<Option<ReferralCodeModel>, ServiceError> {
        Ok(ReferralCode::find()
            .filter(referral_code::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?)
    }

    /// Attributes `referred_user_id` to the owner of `code`.
    #[instrument(skip(self))]
    pub async fn apply_referral_code(
        &self,
        referred_user_id: Uuid,
        code: &str,
    ) -> Result<IncentiveOutcome, ServiceError> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Ok(RejectionReason::RefCodeNotFound.into());
        }

        let owner = ReferralCode::find()
            .filter(referral_code::Column::Code.eq(code.as_str()))
            .filter(referral_code::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?;
        let Some(owner) = owner else {
            return Ok(RejectionReason::RefCodeNotFound.into());
        };

        if owner.user_id == referred_user_id {
            return Ok(RejectionReason::SelfReferral.into());
        }

        let already = Referral::find()
            .filter(referral::Column::ReferredUserId.eq(referred_user_id))
            .one(&*self.db)
            .await?
            .is_some();
        if already {
            return Ok(RejectionReason::AlreadyReferred.into());
        }

        let inserted = referral::ActiveModel {
            id: Set(Uuid::new_v4()),
            referrer_id: Set(owner.user_id),
            referred_user_id: Set(referred_user_id),
            code_used: Set(owner.code.clone()),
            status: Set(ReferralStatus::Pending),
            qualifying_order_id: Set(None),
            qualified_at: Set(None),
            rewarded_at: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .map_err(ServiceError::from);

        match inserted {
            Ok(_) => {}
            // Lost the race against another attribution of the same user.
            Err(err) if err.is_unique_violation() => {
                return Ok(RejectionReason::AlreadyReferred.into());
            }
            Err(err) => return Err(err),
        }

        info!(referrer_id = %owner.user_id, "referral attributed");
        counter!("resto.referrals.attributed", 1);
        self.event_sender
            .send_or_log(Event::ReferralAttributed {
                referrer_id: owner.user_id,
                referred_user_id,
            })
            .await;

        Ok(IncentiveOutcome::accepted())
    }

    /// Qualifies the referral of the order's customer and rewards the
    /// referrer. Runs inside the transaction that marks the order delivered.
    ///
    /// Two phases: PENDING to QUALIFIED with the qualifying order, then the
    /// ledger credit and QUALIFIED to REWARDED. A referral stuck in QUALIFIED
    /// is completed later without a second credit.
    pub async fn qualify_and_reward_in_txn(
        txn: &DatabaseTransaction,
        config: &IncentiveConfig,
        order: &OrderModel,
    ) -> Result<Option<RewardEntry>, ServiceError> {
        let Some(user_id) = order.user_id else {
            return Ok(None);
        };
        if round2(order.total) < round2(config.referral_min_order) {
            return Ok(None);
        }

        let referral = Referral::find()
            .filter(referral::Column::ReferredUserId.eq(user_id))
            .filter(
                referral::Column::Status.is_in([ReferralStatus::Pending, ReferralStatus::Qualified]),
            )
            .lock_exclusive()
            .one(txn)
            .await?;
        let Some(referral) = referral else {
            return Ok(None);
        };

        if referral.status == ReferralStatus::Pending {
            let qualified = Referral::update_many()
                .col_expr(
                    referral::Column::Status,
                    Expr::value(ReferralStatus::Qualified),
                )
                .col_expr(referral::Column::QualifyingOrderId, Expr::value(order.id))
                .col_expr(referral::Column::QualifiedAt, Expr::value(Utc::now()))
                .filter(referral::Column::Id.eq(referral.id))
                .filter(referral::Column::Status.eq(ReferralStatus::Pending))
                .exec(txn)
                .await?
                .rows_affected;
            if qualified != 1 {
                return Err(ServiceError::ConcurrentModification(referral.id));
            }
            info!(referral_id = %referral.id, order_id = %order.id, "referral qualified");
        }

        Self::complete_reward_in_txn(txn, config, &referral).await.map(Some)
    }

    /// Credits the referrer once and marks the referral REWARDED.
    async fn complete_reward_in_txn<C: ConnectionTrait>(
        conn: &C,
        config: &IncentiveConfig,
        referral: &ReferralModel,
    ) -> Result<RewardEntry, ServiceError> {
        let entry = match RewardService::find_by_source(conn, RewardSource::Referral, referral.id)
            .await?
        {
            Some(existing) => {
                warn!(referral_id = %referral.id, "reward already credited, finishing referral");
                existing
            }
            None => {
                RewardService::credit(
                    conn,
                    referral.referrer_id,
                    config.referral_reward,
                    RewardSource::Referral,
                    Some(referral.id),
                    None,
                )
                .await?
            }
        };

        let rewarded = Referral::update_many()
            .col_expr(
                referral::Column::Status,
                Expr::value(ReferralStatus::Rewarded),
            )
            .col_expr(referral::Column::RewardedAt, Expr::value(Utc::now()))
            .filter(referral::Column::Id.eq(referral.id))
            .filter(referral::Column::Status.eq(ReferralStatus::Qualified))
            .exec(conn)
            .await?
            .rows_affected;
        if rewarded != 1 {
            return Err(ServiceError::ConcurrentModification(referral.id));
        }

        counter!("resto.referrals.rewarded", 1);
        info!(referral_id = %referral.id, amount = %entry.amount, "referral rewarded");
        Ok(entry)
    }

    /// Runs qualification for an order that is already delivered.
    #[instrument(skip(self))]
    pub async fn try_qualify_and_reward(
        &self,
        order_id: Uuid,
    ) -> Result<Option<RewardEntry>, ServiceError> {
        let reward = with_tx_retry(&self.retry, move || self.try_qualify_once(order_id)).await?;
        if let Some(entry) = &reward {
            self.publish_reward(entry).await;
        }
        Ok(reward)
    }

    async fn try_qualify_once(&self, order_id: Uuid) -> Result<Option<RewardEntry>, ServiceError> {
        let txn = self.db.begin().await?;
        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        if order.status != OrderStatus::Delivered {
            txn.rollback().await?;
            return Ok(None);
        }

        let reward = Self::qualify_and_reward_in_txn(&txn, &self.config, &order).await?;
        txn.commit().await?;
        Ok(reward)
    }

    /// Completes QUALIFIED referrals whose reward step never finished.
    #[instrument(skip(self))]
    pub async fn reconcile_qualified(&self) -> Result<u64, ServiceError> {
        let stuck = Referral::find()
            .filter(referral::Column::Status.eq(ReferralStatus::Qualified))
            .all(&*self.db)
            .await?;

        let mut completed = 0;
        for referral in stuck {
            let referral_id = referral.id;
            let reward =
                with_tx_retry(&self.retry, move || self.reconcile_once(referral_id)).await?;
            if let Some(entry) = reward {
                completed += 1;
                self.publish_reward(&entry).await;
            }
        }

        if completed > 0 {
            info!(completed, "reconciled qualified referrals");
        }
        Ok(completed)
    }

    async fn reconcile_once(&self, referral_id: Uuid) -> Result<Option<RewardEntry>, ServiceError> {
        let txn = self.db.begin().await?;
        let referral = Referral::find_by_id(referral_id)
            .filter(referral::Column::Status.eq(ReferralStatus::Qualified))
            .lock_exclusive()
            .one(&txn)
            .await?;
        let Some(referral) = referral else {
            txn.rollback().await?;
            return Ok(None);
        };

        let entry = Self::complete_reward_in_txn(&txn, &self.config, &referral).await?;
        txn.commit().await?;
        Ok(Some(entry))
    }

    async fn publish_reward(&self, entry: &RewardEntry) {
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

    pub async fn referral_of(&self, referred_user_id: Uuid) -> Result<Option<ReferralModel>, ServiceError> {
        Ok(Referral::find()
            .filter(referral::Column::ReferredUserId.eq(referred_user_id))
            .one(&*self.db)
            .await?)
    }
}
