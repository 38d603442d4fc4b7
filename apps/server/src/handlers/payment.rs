use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::auth;
use crate::error::ApiResult;
use crate::models::*;
use crate::services::{booking, payment};
use crate::AppState;

const SIGNATURE_HEADER: &str = "x-signature";

/// POST /api/v1/payments/create
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreatePaymentRequest>,
) -> ApiResult<PaymentResponse> {
    let res = payment::create_payment(
        &state.db,
        state.gateway.as_ref(),
        body,
        &state.config.webapp_url,
        Utc::now(),
    )
    .await?;
    Ok(Json(ApiResponse::success(res)))
}

/// GET /api/v1/payments/status/{payment_id}
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<String>,
) -> ApiResult<PaymentStatusResponse> {
    Ok(Json(ApiResponse::success(
        payment::payment_status(state.gateway.as_ref(), &payment_id).await?,
    )))
}

/// POST /api/v1/payments/webhook
///
/// The signature is only checked when the provider sends one.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookOutcome> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = payment::process_webhook(
        &state.db,
        &state.notifier,
        &state.config.webhook_secret,
        &body,
        signature,
        Utc::now(),
    )
    .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// POST /api/v1/payments/refund, for admins of the booking's car wash.
pub async fn refund(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RefundRequest>,
) -> ApiResult<RefundResponse> {
    let caller = auth::caller(&headers, &state)?;
    let target = booking::get(&state.db, body.booking_id).await?;
    auth::require_carwash_admin(&state.db, &state, &caller, target.car_wash_id).await?;

    let res = payment::refund(&state.db, state.gateway.as_ref(), body, Utc::now()).await?;
    Ok(Json(ApiResponse::success(res)))
}

/// GET /api/v1/payments/demo-pay
pub async fn demo_pay(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DemoPayQuery>,
) -> ApiResult<DemoPayPage> {
    Ok(Json(ApiResponse::success(payment::demo_page(
        state.gateway.as_ref(),
        &state.config.public_base_url,
        q,
    )?)))
}

/// POST /api/v1/payments/demo-confirm
pub async fn demo_confirm(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DemoConfirmQuery>,
) -> ApiResult<DemoConfirmResponse> {
    let res = payment::demo_confirm(
        &state.db,
        state.gateway.as_ref(),
        &state.notifier,
        q.payment_id.as_deref(),
        Utc::now(),
    )
    .await?;
    Ok(Json(ApiResponse::success(res)))
}
