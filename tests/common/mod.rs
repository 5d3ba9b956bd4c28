#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::{DateTime, Utc};
use resto_incentives::{
    build_router,
    catalog::DbCatalog,
    config::AppConfig,
    db,
    entities::{menu_item, order::Model as OrderModel, promotion::Model as PromotionModel},
    entities::promotion::{PromotionType, Segment},
    events::{self, EventSender},
    handlers::common::{SESSION_ID_HEADER, USER_ID_HEADER},
    money::round2,
    services::{orders::OrderLineInput, promotions::NewPromotion},
    session::InMemorySessionStore,
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

/// Application state on a fresh SQLite database in a temporary directory.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Several pooled connections, so spawned tasks really overlap and
    /// losers of a write conflict go through the retry path.
    pub async fn concurrent() -> Self {
        Self::with_config(|cfg| {
            cfg.db_max_connections = 4;
            cfg.tx_max_retries = 10;
        })
        .await
    }

    /// Builds the app after letting the caller adjust the configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("resto_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // One connection: SQLite has a single writer anyway and this makes
        // concurrent requests queue instead of failing with SQLITE_BUSY.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_sender, event_rx) = EventSender::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(
            db_arc.clone(),
            cfg,
            Arc::new(DbCatalog::new(db_arc)),
            Arc::new(InMemorySessionStore::new()),
            event_sender,
        );

        Self {
            router: build_router(state.clone()),
            state,
            _dir: dir,
            _event_task: event_task,
        }
    }

    pub async fn seed_menu_item(&self, name: &str, price: Decimal) -> Uuid {
        self.seed_menu_item_with(name, price, true).await
    }

    pub async fn seed_menu_item_with(&self, name: &str, price: Decimal, is_active: bool) -> Uuid {
        let item = menu_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            is_active: Set(is_active),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed menu item");
        item.id
    }

    /// Creates an always-live promotion open to everybody; `adjust` tweaks it.
    pub async fn seed_promotion(
        &self,
        code: &str,
        promo_type: PromotionType,
        value: Decimal,
        adjust: impl FnOnce(&mut NewPromotion),
    ) -> PromotionModel {
        let mut input = NewPromotion {
            code: code.to_string(),
            name: format!("{} promotion", code),
            promo_type,
            value,
            max_discount_amount: None,
            min_order_amount: None,
            segment: Segment::All,
            start_at: None,
            end_at: None,
            usage_limit_total: None,
            usage_limit_per_user: None,
        };
        adjust(&mut input);
        self.state
            .pipeline
            .promotions
            .create_promotion(input)
            .await
            .expect("seed promotion")
    }

    /// Places a pending order of `quantity` units at `unit_price` per line.
    pub async fn place_order(
        &self,
        user_id: Option<Uuid>,
        lines: &[(Uuid, i32, Decimal)],
    ) -> OrderModel {
        let lines = lines
            .iter()
            .map(|(menu_item_id, quantity, unit_price)| OrderLineInput {
                menu_item_id: *menu_item_id,
                quantity: *quantity,
                unit_price: *unit_price,
            })
            .collect();
        self.state
            .pipeline
            .orders
            .create_order(user_id, lines)
            .await
            .expect("place order")
            .order
    }

    /// Single-line order with a fresh menu item.
    pub async fn place_simple_order(&self, user_id: Uuid, amount: Decimal) -> OrderModel {
        let item = self.seed_menu_item("Set menu", amount).await;
        self.place_order(Some(user_id), &[(item, 1, amount)]).await
    }

    /// Places and delivers an order, backdating it to `paid_at` when given.
    pub async fn delivered_order(
        &self,
        user_id: Uuid,
        amount: Decimal,
        paid_at: Option<DateTime<Utc>>,
    ) -> OrderModel {
        let order = self.place_simple_order(user_id, amount).await;
        let delivered = self
            .state
            .pipeline
            .mark_delivered(order.id)
            .await
            .expect("deliver order")
            .order;

        match paid_at {
            Some(paid_at) => {
                let mut active: resto_incentives::entities::order::ActiveModel = delivered.into();
                active.paid_at = Set(Some(paid_at));
                active.update(&*self.state.db).await.expect("backdate order")
            }
            None => delivered,
        }
    }

    pub async fn fetch_order(&self, order_id: Uuid) -> OrderModel {
        self.state
            .pipeline
            .orders
            .get_order(order_id)
            .await
            .expect("order exists")
            .order
    }

    /// Send a request with optional identity and session headers.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        user_id: Option<Uuid>,
        session_id: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(user_id) = user_id {
            builder = builder.header(USER_ID_HEADER, user_id.to_string());
        }
        if let Some(session_id) = session_id {
            builder = builder.header(SESSION_ID_HEADER, session_id);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("failed to build request"))
            .await
            .expect("request failed")
    }
}

/// Reads a JSON response body.
pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// Parses a decimal that was serialized as a JSON string or number.
pub fn json_decimal(value: &Value) -> Decimal {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    round2(raw.parse::<Decimal>().expect("decimal value"))
}

/// `total == max(0, subtotal - discount_total)` for a stored order.
pub fn assert_total_consistent(order: &OrderModel) {
    let expected = round2((round2(order.subtotal) - round2(order.discount_total)).max(Decimal::ZERO));
    assert_eq!(round2(order.total), expected, "order {} total drifted", order.id);
}
