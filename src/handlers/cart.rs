use crate::{
    errors::ServiceError,
    handlers::{
        common::{created_response, success_response, validate_input, RequestContext},
        AppState,
    },
    services::pricing::CheckoutOptions,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Session cart and checkout endpoints
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(view_cart))
        .route("/cart/items", post(add_item))
        .route(
            "/cart/items/:item_id",
            put(set_item_quantity).delete(remove_item),
        )
        .route("/cart/promo", post(apply_cart_promo).delete(remove_cart_promo))
        .route("/checkout", post(checkout))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddItemRequest {
    pub item_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetQuantityRequest {
    pub quantity: i64,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CartPromoRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub auto_voucher: bool,
}

pub async fn view_cart(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.pipeline.view_cart(ctx.session()?).await?;
    Ok(success_response(cart))
}

pub async fn add_item(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state
        .pipeline
        .add_to_cart(&ctx.identity, ctx.session()?, payload.item_id, payload.quantity)
        .await?;
    Ok(success_response(cart))
}

pub async fn set_item_quantity(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    ctx: RequestContext,
    Json(payload): Json<SetQuantityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state
        .pipeline
        .set_cart_quantity(&ctx.identity, ctx.session()?, item_id, payload.quantity)
        .await?;
    Ok(success_response(cart))
}

pub async fn remove_item(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state
        .pipeline
        .remove_from_cart(&ctx.identity, ctx.session()?, item_id)
        .await?;
    Ok(success_response(cart))
}

/// Preview a promo code against the cart
pub async fn apply_cart_promo(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(payload): Json<CartPromoRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let result = state
        .pipeline
        .apply_cart_promo(&ctx.identity, ctx.session()?, &payload.code)
        .await?;
    Ok(success_response(result))
}

pub async fn remove_cart_promo(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.pipeline.remove_cart_promo(ctx.session()?).await?;
    Ok(success_response(cart))
}

pub async fn checkout(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Option<Json<CheckoutRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let result = state
        .pipeline
        .checkout(
            &ctx.identity,
            ctx.session()?,
            CheckoutOptions {
                auto_voucher: request.auto_voucher,
            },
            &ctx.fingerprint,
        )
        .await?;
    Ok(created_response(result))
}
