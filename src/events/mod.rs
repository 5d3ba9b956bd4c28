use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::services::outcome::RejectionReason;

/// Publishes domain events after the owning transaction has committed.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender and the receiver to hand to [`process_events`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when nobody listens.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping domain event: {}", e);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        user_id: Option<Uuid>,
        total: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    PromotionApplied {
        order_id: Uuid,
        promotion_id: Uuid,
        code: String,
        discount: Decimal,
    },
    PromotionRejected {
        order_id: Uuid,
        code: String,
        reason: RejectionReason,
    },
    PromotionRemoved {
        order_id: Uuid,
        code: String,
    },
    RedemptionsReversed {
        order_id: Uuid,
        count: u64,
    },
    VoucherRedeemed {
        voucher_id: Uuid,
        order_id: Uuid,
        discount: Decimal,
    },
    VouchersMinted {
        user_id: Uuid,
        order_id: Uuid,
        count: u32,
    },
    VouchersExpired {
        count: u64,
    },
    ReferralAttributed {
        referrer_id: Uuid,
        referred_user_id: Uuid,
    },
    ReferralRewarded {
        referral_id: Uuid,
        referrer_id: Uuid,
        amount: Decimal,
    },
}

/// Envelope written to the log by [`process_events`].
#[derive(Debug, Serialize)]
struct EventRecord<'a> {
    received_at: DateTime<Utc>,
    event: &'a Event,
}

pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        let record = EventRecord {
            received_at: Utc::now(),
            event: &event,
        };
        match serde_json::to_string(&record) {
            Ok(json) => info!(target: "resto_incentives::events", "{}", json),
            Err(e) => warn!("Failed to serialize event {:?}: {}", event, e),
        }
    }

    info!("Event channel closed; stopping event processing loop");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn sent_events_reach_the_receiver() {
        let (sender, mut rx) = EventSender::channel(4);
        let order_id = Uuid::new_v4();

        sender
            .send(Event::VoucherRedeemed {
                voucher_id: Uuid::nil(),
                order_id,
                discount: dec!(12.00),
            })
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Event::VoucherRedeemed {
                voucher_id: Uuid::nil(),
                order_id,
                discount: dec!(12.00),
            })
        );
    }

    #[tokio::test]
    async fn send_or_log_survives_closed_channel() {
        let (sender, rx) = EventSender::channel(1);
        drop(rx);

        assert!(sender.send(Event::VouchersExpired { count: 1 }).await.is_err());
        sender.send_or_log(Event::VouchersExpired { count: 1 }).await;
    }
}
