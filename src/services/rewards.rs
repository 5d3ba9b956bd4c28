use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::reward_ledger::{
    self, Entity as RewardLedger, Model as RewardEntry, RewardSource, RewardStatus,
};
use crate::errors::ServiceError;
use crate::money::round2;

/// Append-only reward ledger.
#[derive(Clone)]
pub struct RewardService {
    db: Arc<DatabaseConnection>,
}

impl RewardService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Appends a ledger entry using the caller's connection or transaction.
    pub async fn credit<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        amount: Decimal,
        source: RewardSource,
        source_id: Option<Uuid>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<RewardEntry, ServiceError> {
        let entry = reward_ledger::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            amount: Set(round2(amount)),
            source: Set(source),
            source_id: Set(source_id),
            status: Set(RewardStatus::Active),
            expires_at: Set(expires_at),
            created_at: Set(Utc::now()),
        }
        .insert(conn)
        .await?;

        info!(user_id = %user_id, amount = %entry.amount, source = ?source, "reward credited");
        Ok(entry)
    }

    /// Entry previously written for `source`/`source_id`, if any.
    pub async fn find_by_source<C: ConnectionTrait>(
        conn: &C,
        source: RewardSource,
        source_id: Uuid,
    ) -> Result<Option<RewardEntry>, ServiceError> {
        Ok(RewardLedger::find()
            .filter(reward_ledger::Column::Source.eq(source))
            .filter(reward_ledger::Column::SourceId.eq(source_id))
            .one(conn)
            .await?)
    }

    /// Compensation credit issued by staff.
    #[instrument(skip(self))]
    pub async fn compensate(
        &self,
        user_id: Uuid,
        amount: Decimal,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<RewardEntry, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "compensation amount must be positive".to_string(),
            ));
        }
        Self::credit(
            &*self.db,
            user_id,
            amount,
            RewardSource::Compensation,
            None,
            expires_at,
        )
        .await
    }

    /// Sum of ACTIVE entries that have not expired.
    #[instrument(skip(self))]
    pub async fn balance(&self, user_id: Uuid) -> Result<Decimal, ServiceError> {
        let now = Utc::now();
        let entries = RewardLedger::find()
            .filter(reward_ledger::Column::UserId.eq(user_id))
            .filter(reward_ledger::Column::Status.eq(RewardStatus::Active))
            .filter(
                Condition::any()
                    .add(reward_ledger::Column::ExpiresAt.is_null())
                    .add(reward_ledger::Column::ExpiresAt.gt(now)),
            )
            .all(&*self.db)
            .await?;

        Ok(round2(entries.iter().map(|e| round2(e.amount)).sum()))
    }

    /// Ledger entries, newest first.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<RewardEntry>, ServiceError> {
        Ok(RewardLedger::find()
            .filter(reward_ledger::Column::UserId.eq(user_id))
            .order_by_desc(reward_ledger::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}
