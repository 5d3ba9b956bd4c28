use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::errors::ServiceError;
use crate::money::{clamp_discount, round2};
use crate::session::SessionStore;

const CART_KEY: &str = "cart";
const PENDING_PROMO_KEY: &str = "cart_promo";

/// Promo code previewed against the cart, redeemed for real at checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPromo {
    pub code: String,
    pub discount: Decimal,
    pub applied_at: DateTime<Utc>,
}

/// Session cart: menu item id to quantity. Quantities stay within
/// `[1, max_quantity]`; prices are never stored here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    items: BTreeMap<Uuid, u32>,
    #[serde(skip)]
    pub pending_promo: Option<PendingPromo>,
}

impl Cart {
    /// Increments the quantity, clamping the result to `[1, max_quantity]`.
    pub fn add(&mut self, item_id: Uuid, quantity: i64, max_quantity: u32) -> u32 {
        let current = self.items.get(&item_id).copied().unwrap_or(0) as i64;
        let next = current
            .saturating_add(quantity)
            .clamp(1, max_quantity as i64) as u32;
        self.items.insert(item_id, next);
        next
    }

    /// Sets the quantity; zero or negative removes the line.
    pub fn set(&mut self, item_id: Uuid, quantity: i64, max_quantity: u32) -> Option<u32> {
        if quantity <= 0 {
            self.items.remove(&item_id);
            return None;
        }
        let next = quantity.min(max_quantity as i64) as u32;
        self.items.insert(item_id, next);
        Some(next)
    }

    pub fn remove(&mut self, item_id: Uuid) -> bool {
        self.items.remove(&item_id).is_some()
    }

    pub fn quantity(&self, item_id: Uuid) -> Option<u32> {
        self.items.get(&item_id).copied()
    }

    pub fn items(&self) -> impl Iterator<Item = (Uuid, u32)> + '_ {
        self.items.iter().map(|(id, qty)| (*id, *qty))
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of units across all lines.
    pub fn item_count(&self) -> u32 {
        self.items.values().sum()
    }

    /// Resolves every line against the catalog. Unknown or inactive items
    /// are left out of the priced view.
    pub async fn price(&self, catalog: &dyn Catalog) -> Result<PricedCart, ServiceError> {
        let mut lines = Vec::with_capacity(self.items.len());
        for (item_id, quantity) in self.items() {
            match catalog.get_item(item_id).await? {
                Some(item) if item.is_active => {
                    let unit_price = round2(item.price);
                    lines.push(CartLine {
                        item_id,
                        name: item.name,
                        quantity,
                        unit_price,
                        line_total: round2(unit_price * Decimal::from(quantity)),
                    });
                }
                _ => debug!(%item_id, "skipping unavailable cart item"),
            }
        }

        let subtotal = round2(lines.iter().map(|l| l.line_total).sum());
        let discount = self
            .pending_promo
            .as_ref()
            .map(|p| clamp_discount(p.discount, subtotal))
            .unwrap_or(Decimal::ZERO);

        Ok(PricedCart {
            lines,
            subtotal,
            promo_code: self.pending_promo.as_ref().map(|p| p.code.clone()),
            discount,
            total_after_discount: round2(subtotal - discount),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub item_id: Uuid,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedCart {
    pub lines: Vec<CartLine>,
    pub subtotal: Decimal,
    pub promo_code: Option<String>,
    pub discount: Decimal,
    pub total_after_discount: Decimal,
}

/// Loads and saves carts through the session store.
#[derive(Clone)]
pub struct CartStore {
    sessions: Arc<dyn SessionStore>,
}

impl CartStore {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }

    pub async fn load(&self, session_id: &str) -> Result<Cart, ServiceError> {
        let mut cart = match self.sessions.get(session_id, CART_KEY).await? {
            Some(value) => serde_json::from_value::<Cart>(value).unwrap_or_else(|e| {
                warn!(session_id, "discarding unreadable cart: {}", e);
                Cart::default()
            }),
            None => Cart::default(),
        };

        cart.pending_promo = match self.sessions.get(session_id, PENDING_PROMO_KEY).await? {
            Some(value) => serde_json::from_value(value).ok(),
            None => None,
        };

        Ok(cart)
    }

    /// Persists both the lines and the pending promo marker.
    pub async fn save(&self, session_id: &str, cart: &Cart) -> Result<(), ServiceError> {
        let value = serde_json::to_value(cart)
            .map_err(|e| ServiceError::InternalError(format!("cart serialization: {}", e)))?;
        self.sessions.set(session_id, CART_KEY, value).await?;

        match &cart.pending_promo {
            Some(promo) => {
                let value = serde_json::to_value(promo).map_err(|e| {
                    ServiceError::InternalError(format!("promo serialization: {}", e))
                })?;
                self.sessions.set(session_id, PENDING_PROMO_KEY, value).await
            }
            None => self.sessions.delete(session_id, PENDING_PROMO_KEY).await,
        }
    }

    pub async fn clear(&self, session_id: &str) -> Result<(), ServiceError> {
        self.sessions.delete(session_id, CART_KEY).await?;
        self.sessions.delete(session_id, PENDING_PROMO_KEY).await
    }
}
