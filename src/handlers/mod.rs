pub mod cart;
pub mod common;
pub mod health;
pub mod incentives;
pub mod orders;

use axum::Router;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Versioned API surface.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/orders", orders::order_routes())
        .nest(
            "/staff",
            Router::new()
                .nest("/orders", orders::staff_order_routes())
                .merge(incentives::staff_incentive_routes()),
        )
        .merge(cart::cart_routes())
        .merge(incentives::incentive_routes())
}
