use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth;
use crate::error::ApiResult;
use crate::models::*;
use crate::services::booking;
use crate::AppState;

/// POST /api/v1/bookings/create
///
/// Anonymous guests may book. A signed caller is linked to the booking.
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut body): Json<CreateBookingRequest>,
) -> ApiResult<BookingConfirmation> {
    if let Ok(caller) = auth::caller(&headers, &state) {
        body.telegram_id = Some(caller.telegram_id);
    }
    let confirmation = booking::create(&state.db, &state.config, body, Utc::now()).await?;
    Ok(Json(ApiResponse::success(confirmation)))
}

/// POST /api/v1/bookings/calculate-price
pub async fn calculate_price(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CalculatePriceRequest>,
) -> ApiResult<PriceQuote> {
    Ok(Json(ApiResponse::success(
        booking::calculate_price(&state.db, body).await?,
    )))
}

/// GET /api/v1/bookings/my?phone=...
pub async fn my(
    State(state): State<Arc<AppState>>,
    Query(q): Query<MyBookingsQuery>,
) -> ApiResult<Page<BookingWithDetails>> {
    Ok(Json(ApiResponse::success(
        booking::list_by_phone(&state.db, q).await?,
    )))
}

/// GET /api/v1/bookings/{id}
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<BookingWithDetails> {
    Ok(Json(ApiResponse::success(
        booking::get_with_details(&state.db, id).await?,
    )))
}

/// POST /api/v1/bookings/{id}/cancel with an optional `{"reason": ...}` body.
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<CancelBookingResponse> {
    let req: CancelBookingRequest = super::optional_json(&body)?;
    let res = booking::cancel(&state.db, state.gateway.as_ref(), id, req.reason, Utc::now()).await?;
    Ok(Json(ApiResponse::success(res)))
}
