//! Resto incentives library
//!
//! Pricing and incentive engine for a restaurant ordering service: promo
//! codes, referral rewards, loyalty stamps and free-item vouchers applied to
//! a session cart and to pending orders.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod cart;
pub mod catalog;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod identity;
pub mod migrator;
pub mod money;
pub mod services;
pub mod session;

use axum::Router;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::catalog::Catalog;
use crate::db::RetryConfig;
use crate::services::pricing::PricingPipeline;
use crate::session::SessionStore;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub pipeline: PricingPipeline,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        catalog: Arc<dyn Catalog>,
        sessions: Arc<dyn SessionStore>,
        event_sender: events::EventSender,
    ) -> Self {
        let pipeline = PricingPipeline::new(
            db.clone(),
            config.incentives.clone(),
            catalog,
            sessions,
            event_sender.clone(),
            RetryConfig::with_retries(config.tx_max_retries),
        );
        Self {
            db,
            config,
            event_sender,
            pipeline,
        }
    }
}

/// Full HTTP application: health probes plus the versioned API.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(handlers::health::health_routes())
        .nest("/api/v1", handlers::api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
