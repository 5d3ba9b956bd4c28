use crate::{
    errors::ServiceError,
    handlers::{
        common::{success_response, validate_input, RequestContext},
        AppState,
    },
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Customer-facing order incentive endpoints
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/:id", get(get_order))
        .route("/:id/promo", post(apply_promo).delete(remove_promo))
        .route("/:id/vouchers/:voucher_id/redeem", post(redeem_voucher))
}

/// Staff transitions; authorization is enforced by the gateway.
pub fn staff_order_routes() -> Router<AppState> {
    Router::new()
        .route("/:id/confirm", post(confirm_order))
        .route("/:id/deliver", post(deliver_order))
        .route("/:id/cancel", post(cancel_order))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ApplyPromoRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ServiceError> {
    let user_id = ctx.identity.require_user()?;
    let details = state.pipeline.orders.get_order(id).await?;
    if details.order.user_id != Some(user_id) {
        return Err(ServiceError::NotFound(format!("Order {} not found", id)));
    }
    Ok(success_response(details))
}

/// Apply a promo code to a pending order
pub async fn apply_promo(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ctx: RequestContext,
    Json(payload): Json<ApplyPromoRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let outcome = state
        .pipeline
        .apply_promo(&ctx.identity, id, &payload.code, &ctx.fingerprint)
        .await?;
    Ok(success_response(outcome))
}

pub async fn remove_promo(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.pipeline.remove_promo(&ctx.identity, id).await?;
    Ok(success_response(order))
}

pub async fn redeem_voucher(
    State(state): State<AppState>,
    Path((id, voucher_id)): Path<(Uuid, Uuid)>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state
        .pipeline
        .redeem_voucher(&ctx.identity, id, voucher_id)
        .await?;
    Ok(success_response(outcome))
}

pub async fn confirm_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.pipeline.confirm(id).await?))
}

/// Mark an order delivered; loyalty stamps and referral rewards follow
pub async fn deliver_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.pipeline.mark_delivered(id).await?))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.pipeline.cancel(id).await?))
}
