use crate::{
    errors::ServiceError,
    handlers::{
        common::{created_response, success_response, validate_input, RequestContext},
        AppState,
    },
    services::promotions::NewPromotion,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

/// Referral, voucher, loyalty and reward endpoints for the signed-in user
pub fn incentive_routes() -> Router<AppState> {
    Router::new()
        .route("/referrals/apply", post(apply_referral))
        .route("/referrals/code", get(referral_code))
        .route("/vouchers", get(list_vouchers))
        .route("/loyalty", get(loyalty_status))
        .route("/rewards", get(rewards))
}

/// Promotion management and maintenance sweeps
pub fn staff_incentive_routes() -> Router<AppState> {
    Router::new()
        .route("/promotions", post(create_promotion))
        .route("/promotions/:id/active", put(set_promotion_active))
        .route("/maintenance/expire-vouchers", post(expire_vouchers))
        .route("/maintenance/reconcile-referrals", post(reconcile_referrals))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ApplyReferralRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct RewardsResponse<T> {
    pub balance: Decimal,
    pub entries: Vec<T>,
}

pub async fn apply_referral(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(payload): Json<ApplyReferralRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let outcome = state
        .pipeline
        .apply_referral(&ctx.identity, &payload.code)
        .await?;
    Ok(success_response(outcome))
}

/// Get (or create) the caller's referral code
pub async fn referral_code(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ServiceError> {
    let code = state.pipeline.referral_code(&ctx.identity).await?;
    Ok(success_response(json!({ "code": code.code })))
}

pub async fn list_vouchers(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ServiceError> {
    let vouchers = state.pipeline.list_vouchers(&ctx.identity).await?;
    Ok(success_response(vouchers))
}

pub async fn loyalty_status(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ServiceError> {
    let status = state.pipeline.loyalty_status(&ctx.identity).await?;
    Ok(success_response(status))
}

pub async fn rewards(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ServiceError> {
    let balance = state.pipeline.reward_balance(&ctx.identity).await?;
    let entries = state.pipeline.reward_history(&ctx.identity).await?;
    Ok(success_response(RewardsResponse { balance, entries }))
}

pub async fn create_promotion(
    State(state): State<AppState>,
    Json(payload): Json<NewPromotion>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let promotion = state.pipeline.promotions.create_promotion(payload).await?;
    Ok(created_response(promotion))
}

pub async fn set_promotion_active(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetActiveRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let promotion = state
        .pipeline
        .promotions
        .set_active(id, payload.is_active)
        .await?;
    Ok(success_response(promotion))
}

pub async fn expire_vouchers(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let expired = state.pipeline.expire_vouchers().await?;
    Ok(success_response(json!({ "expired": expired })))
}

pub async fn reconcile_referrals(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let completed = state.pipeline.reconcile_referrals().await?;
    Ok(success_response(json!({ "completed": completed })))
}
