//! Request-facing pricing pipeline.
//!
//! Ties the session cart, the catalog and the incentive services together.
//! Every operation that touches money commits in its own transaction inside
//! the owning service; the pipeline only sequences them.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::cart::{Cart, CartStore, PendingPromo, PricedCart};
use crate::catalog::Catalog;
use crate::config::IncentiveConfig;
use crate::db::RetryConfig;
use crate::entities::free_item_voucher::Model as VoucherModel;
use crate::entities::order::Model as OrderModel;
use crate::entities::referral_code::Model as ReferralCodeModel;
use crate::entities::reward_ledger::Model as RewardEntry;
use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::identity::Identity;
use crate::services::loyalty::{LoyaltyService, LoyaltyStatus};
use crate::services::orders::{OrderDetails, OrderLineInput, OrderService, TransitionResult};
use crate::services::outcome::IncentiveOutcome;
use crate::services::promotions::{PromotionService, RequestFingerprint};
use crate::services::referrals::ReferralService;
use crate::services::rewards::RewardService;
use crate::session::SessionStore;

/// Checkout switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckoutOptions {
    /// Redeem the user's soonest-expiring voucher on the new order.
    pub auto_voucher: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResult {
    pub order: OrderDetails,
    pub promo: Option<IncentiveOutcome>,
    pub voucher: Option<IncentiveOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartPromoResult {
    pub outcome: IncentiveOutcome,
    pub cart: PricedCart,
}

#[derive(Clone)]
pub struct PricingPipeline {
    config: IncentiveConfig,
    catalog: Arc<dyn Catalog>,
    carts: CartStore,
    pub orders: OrderService,
    pub promotions: PromotionService,
    pub referrals: ReferralService,
    pub loyalty: LoyaltyService,
    pub rewards: RewardService,
}

impl PricingPipeline {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: IncentiveConfig,
        catalog: Arc<dyn Catalog>,
        sessions: Arc<dyn SessionStore>,
        event_sender: EventSender,
        retry: RetryConfig,
    ) -> Self {
        Self {
            orders: OrderService::new(
                db.clone(),
                config.clone(),
                event_sender.clone(),
                retry.clone(),
            ),
            promotions: PromotionService::new(
                db.clone(),
                config.clone(),
                event_sender.clone(),
                retry.clone(),
            ),
            referrals: ReferralService::new(
                db.clone(),
                config.clone(),
                event_sender.clone(),
                retry.clone(),
            ),
            loyalty: LoyaltyService::new(db.clone(), config.clone(), event_sender, retry),
            rewards: RewardService::new(db),
            carts: CartStore::new(sessions),
            catalog,
            config,
        }
    }

    pub fn config(&self) -> &IncentiveConfig {
        &self.config
    }

    // Order incentives

    pub async fn apply_promo(
        &self,
        identity: &Identity,
        order_id: Uuid,
        code: &str,
        fingerprint: &RequestFingerprint,
    ) -> Result<IncentiveOutcome, ServiceError> {
        let user_id = identity.require_user()?;
        self.promotions
            .apply_promo(user_id, order_id, code, fingerprint)
            .await
    }

    pub async fn remove_promo(
        &self,
        identity: &Identity,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let user_id = identity.require_user()?;
        self.promotions.remove_promo(user_id, order_id).await
    }

    pub async fn redeem_voucher(
        &self,
        identity: &Identity,
        order_id: Uuid,
        voucher_id: Uuid,
    ) -> Result<IncentiveOutcome, ServiceError> {
        let user_id = identity.require_user()?;
        self.loyalty
            .redeem_voucher(user_id, order_id, voucher_id)
            .await
    }

    pub async fn list_vouchers(&self, identity: &Identity) -> Result<Vec<VoucherModel>, ServiceError> {
        let user_id = identity.require_user()?;
        self.loyalty.list_vouchers(user_id).await
    }

    pub async fn loyalty_status(&self, identity: &Identity) -> Result<LoyaltyStatus, ServiceError> {
        let user_id = identity.require_user()?;
        self.loyalty.status(user_id).await
    }

    pub async fn apply_referral(
        &self,
        identity: &Identity,
        code: &str,
    ) -> Result<IncentiveOutcome, ServiceError> {
        let user_id = identity.require_user()?;
        self.referrals.apply_referral_code(user_id, code).await
    }

    pub async fn referral_code(&self, identity: &Identity) -> Result<ReferralCodeModel, ServiceError> {
        let user_id = identity.require_user()?;
        self.referrals.get_or_create_code(user_id).await
    }

    pub async fn reward_balance(&self, identity: &Identity) -> Result<Decimal, ServiceError> {
        let user_id = identity.require_user()?;
        self.rewards.balance(user_id).await
    }

    pub async fn reward_history(&self, identity: &Identity) -> Result<Vec<RewardEntry>, ServiceError> {
        let user_id = identity.require_user()?;
        self.rewards.list(user_id).await
    }

    // Staff transitions

    pub async fn confirm(&self, order_id: Uuid) -> Result<TransitionResult, ServiceError> {
        self.orders.confirm(order_id).await
    }

    pub async fn mark_delivered(&self, order_id: Uuid) -> Result<TransitionResult, ServiceError> {
        self.orders.mark_delivered(order_id).await
    }

    pub async fn cancel(&self, order_id: Uuid) -> Result<TransitionResult, ServiceError> {
        self.orders.cancel(order_id).await
    }

    // Maintenance

    pub async fn expire_vouchers(&self) -> Result<u64, ServiceError> {
        self.loyalty.expire_vouchers().await
    }

    pub async fn reconcile_referrals(&self) -> Result<u64, ServiceError> {
        self.referrals.reconcile_qualified().await
    }

    // Cart

    pub async fn view_cart(&self, session_id: &str) -> Result<PricedCart, ServiceError> {
        let cart = self.carts.load(session_id).await?;
        cart.price(self.catalog.as_ref()).await
    }

    /// Adds units of an active menu item; the line is clamped to
    /// `[1, cart_max_quantity]`.
    #[instrument(skip(self, identity))]
    pub async fn add_to_cart(
        &self,
        identity: &Identity,
        session_id: &str,
        item_id: Uuid,
        quantity: i64,
    ) -> Result<PricedCart, ServiceError> {
        self.require_available(item_id).await?;
        let mut cart = self.carts.load(session_id).await?;
        cart.add(item_id, quantity, self.config.cart_max_quantity);
        self.store_repriced(identity, session_id, cart).await
    }

    /// Sets a line's quantity; zero or less removes it.
    #[instrument(skip(self, identity))]
    pub async fn set_cart_quantity(
        &self,
        identity: &Identity,
        session_id: &str,
        item_id: Uuid,
        quantity: i64,
    ) -> Result<PricedCart, ServiceError> {
        if quantity > 0 {
            self.require_available(item_id).await?;
        }
        let mut cart = self.carts.load(session_id).await?;
        cart.set(item_id, quantity, self.config.cart_max_quantity);
        self.store_repriced(identity, session_id, cart).await
    }

    pub async fn remove_from_cart(
        &self,
        identity: &Identity,
        session_id: &str,
        item_id: Uuid,
    ) -> Result<PricedCart, ServiceError> {
        let mut cart = self.carts.load(session_id).await?;
        cart.remove(item_id);
        self.store_repriced(identity, session_id, cart).await
    }

    async fn require_available(&self, item_id: Uuid) -> Result<(), ServiceError> {
        match self.catalog.get_item(item_id).await? {
            Some(item) if item.is_active => Ok(()),
            _ => Err(ServiceError::NotFound(format!(
                "Menu item {} not available",
                item_id
            ))),
        }
    }

    /// Saves the cart after re-evaluating its pending promo against the new
    /// subtotal. A promo the cart no longer qualifies for is dropped.
    async fn store_repriced(
        &self,
        identity: &Identity,
        session_id: &str,
        mut cart: Cart,
    ) -> Result<PricedCart, ServiceError> {
        if let Some(pending) = cart.pending_promo.clone() {
            let subtotal = cart.price(self.catalog.as_ref()).await?.subtotal;
            let (outcome, _) = self
                .promotions
                .preview(identity.user_id(), &pending.code, subtotal)
                .await?;
            cart.pending_promo = outcome.ok.then(|| PendingPromo {
                discount: outcome.discount,
                ..pending
            });
        }

        self.carts.save(session_id, &cart).await?;
        cart.price(self.catalog.as_ref()).await
    }

    /// Previews a code against the live cart and remembers it for checkout.
    /// A rejected code clears any previously remembered one.
    #[instrument(skip(self, identity))]
    pub async fn apply_cart_promo(
        &self,
        identity: &Identity,
        session_id: &str,
        code: &str,
    ) -> Result<CartPromoResult, ServiceError> {
        let mut cart = self.carts.load(session_id).await?;
        let subtotal = cart.price(self.catalog.as_ref()).await?.subtotal;

        let (outcome, promotion) = self
            .promotions
            .preview(identity.user_id(), code, subtotal)
            .await?;

        cart.pending_promo = match (&outcome.reason, promotion) {
            (None, Some(promotion)) => Some(PendingPromo {
                code: promotion.code,
                discount: outcome.discount,
                applied_at: Utc::now(),
            }),
            _ => None,
        };
        self.carts.save(session_id, &cart).await?;

        Ok(CartPromoResult {
            outcome,
            cart: cart.price(self.catalog.as_ref()).await?,
        })
    }

    pub async fn remove_cart_promo(&self, session_id: &str) -> Result<PricedCart, ServiceError> {
        let mut cart = self.carts.load(session_id).await?;
        cart.pending_promo = None;
        self.carts.save(session_id, &cart).await?;
        cart.price(self.catalog.as_ref()).await
    }

    /// Turns the session cart into a pending order.
    ///
    /// Lines are frozen at the catalog price of this moment. For signed-in
    /// users the remembered promo is then redeemed for real and, when asked,
    /// the voucher closest to expiry is applied. A rejected promo or voucher
    /// leaves the order at full price. The cart is emptied as soon as the
    /// order is committed, so an error from a later step never leads to a
    /// duplicate order on retry.
    #[instrument(skip(self, identity, fingerprint))]
    pub async fn checkout(
        &self,
        identity: &Identity,
        session_id: &str,
        options: CheckoutOptions,
        fingerprint: &RequestFingerprint,
    ) -> Result<CheckoutResult, ServiceError> {
        let cart = self.carts.load(session_id).await?;
        let priced = cart.price(self.catalog.as_ref()).await?;
        if priced.lines.is_empty() {
            return Err(ServiceError::ValidationError("cart is empty".to_string()));
        }

        let lines = priced
            .lines
            .iter()
            .map(|line| OrderLineInput {
                menu_item_id: line.item_id,
                quantity: line.quantity as i32,
                unit_price: line.unit_price,
            })
            .collect();

        let created = self.orders.create_order(identity.user_id(), lines).await?;
        let order_id = created.order.id;
        // The order exists from here on; a failed incentive step must not
        // leave the cart behind for a second checkout.
        self.carts.clear(session_id).await?;

        let mut promo = None;
        let mut voucher = None;
        if let Some(user_id) = identity.user_id() {
            if let Some(pending) = &cart.pending_promo {
                let outcome = self
                    .promotions
                    .apply_promo(user_id, order_id, &pending.code, fingerprint)
                    .await?;
                if !outcome.ok {
                    warn!(%order_id, code = %pending.code, "remembered promo no longer applies");
                }
                promo = Some(outcome);
            }

            if options.auto_voucher {
                if let Some(available) = self.loyalty.soonest_expiring_available(user_id).await? {
                    voucher = Some(
                        self.loyalty
                            .redeem_voucher(user_id, order_id, available.id)
                            .await?,
                    );
                }
            }
        }

        let order = self.orders.get_order(order_id).await?;
        info!(%order_id, total = %order.order.total, "checkout completed");

        Ok(CheckoutResult {
            order,
            promo,
            voucher,
        })
    }
}
