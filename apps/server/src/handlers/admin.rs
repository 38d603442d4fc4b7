use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{self, Caller};
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::services::{booking, carwash, carwash_admin, moscow_now};
use crate::AppState;

fn system_admin(headers: &HeaderMap, state: &AppState) -> Result<Caller, ApiError> {
    let caller = auth::caller(headers, state)?;
    auth::require_system_admin(&caller, state)?;
    Ok(caller)
}

/// Resolve the booking and make sure the caller manages its car wash.
async fn booking_admin(headers: &HeaderMap, state: &AppState, booking_id: Uuid) -> Result<Booking, ApiError> {
    let caller = auth::caller(headers, state)?;
    let target = booking::get(&state.db, booking_id).await?;
    auth::require_carwash_admin(&state.db, state, &caller, target.car_wash_id).await?;
    Ok(target)
}

// ── System admin: car washes ──

pub async fn create_carwash(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateCarWashRequest>,
) -> ApiResult<CarWash> {
    let caller = system_admin(&headers, &state)?;
    let created = carwash::create(&state.db, body).await?;
    tracing::info!(admin = caller.telegram_id, carwash_id = %created.id, "car wash created");
    Ok(Json(ApiResponse::success(created)))
}

pub async fn update_carwash(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateCarWashRequest>,
) -> ApiResult<CarWash> {
    system_admin(&headers, &state)?;
    Ok(Json(ApiResponse::success(
        carwash::update(&state.db, id, body).await?,
    )))
}

pub async fn delete_carwash(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Deleted> {
    system_admin(&headers, &state)?;
    Ok(Json(ApiResponse::success(carwash::delete(&state.db, id).await?)))
}

pub async fn list_bays(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<WashBay>> {
    system_admin(&headers, &state)?;
    Ok(Json(ApiResponse::success(carwash::bays(&state.db, id).await?)))
}

/// POST /admin/system/carwashes/{id}/bays
///
/// Slots for the configured horizon are generated right away.
pub async fn add_bay(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<CreateWashBayRequest>,
) -> ApiResult<BayCreated> {
    system_admin(&headers, &state)?;
    let created =
        carwash::add_bay(&state.db, &state.config, id, body, moscow_now().date()).await?;
    Ok(Json(ApiResponse::success(created)))
}

pub async fn bay_slots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((id, bay_id)): Path<(Uuid, Uuid)>,
    Query(q): Query<DateQuery>,
) -> ApiResult<Vec<TimeSlot>> {
    system_admin(&headers, &state)?;
    let date = q.date.unwrap_or_else(|| moscow_now().date());
    Ok(Json(ApiResponse::success(
        carwash::bay_slots(&state.db, id, bay_id, date).await?,
    )))
}

/// POST /admin/system/carwashes/{id}/bays/{bay_id}/slots with optional `{"days_ahead": n}`.
pub async fn regenerate_slots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((id, bay_id)): Path<(Uuid, Uuid)>,
    body: Bytes,
) -> ApiResult<SlotsGenerated> {
    system_admin(&headers, &state)?;
    let req: GenerateSlotsRequest = super::optional_json(&body)?;
    let generated = carwash::regenerate_bay_slots(
        &state.db,
        &state.config,
        id,
        bay_id,
        req.days_ahead,
        moscow_now().date(),
    )
    .await?;
    Ok(Json(ApiResponse::success(generated)))
}

pub async fn statistics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Statistics> {
    system_admin(&headers, &state)?;
    Ok(Json(ApiResponse::success(carwash::statistics(&state.db).await?)))
}

// ── System admin: car wash admin assignments ──

pub async fn add_carwash_admin(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<AddCarWashAdminRequest>,
) -> ApiResult<CarWashAdmin> {
    system_admin(&headers, &state)?;
    Ok(Json(ApiResponse::success(
        carwash_admin::add(&state.db, body).await?,
    )))
}

pub async fn list_carwash_admins(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(carwash_id): Path<Uuid>,
) -> ApiResult<Vec<CarWashAdminView>> {
    system_admin(&headers, &state)?;
    Ok(Json(ApiResponse::success(
        carwash_admin::list_for_carwash(&state.db, carwash_id).await?,
    )))
}

pub async fn delete_carwash_admin(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(admin_id): Path<Uuid>,
) -> ApiResult<Deleted> {
    system_admin(&headers, &state)?;
    Ok(Json(ApiResponse::success(
        carwash_admin::delete(&state.db, admin_id).await?,
    )))
}

// ── Car wash admin: bookings ──

pub async fn carwash_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(carwash_id): Path<Uuid>,
    Query(q): Query<CarwashBookingsQuery>,
) -> ApiResult<Page<BookingWithDetails>> {
    let caller = auth::caller(&headers, &state)?;
    auth::require_carwash_admin(&state.db, &state, &caller, carwash_id).await?;
    Ok(Json(ApiResponse::success(
        booking::list_for_carwash(&state.db, carwash_id, q).await?,
    )))
}

pub async fn verify_qr(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<VerifyQrRequest>,
) -> ApiResult<VerifyQrResponse> {
    booking_admin(&headers, &state, id).await?;
    Ok(Json(ApiResponse::success(
        booking::verify_qr(&state.db, id, &body.qr_code).await?,
    )))
}

pub async fn start_wash(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<BookingStatusChange> {
    booking_admin(&headers, &state, id).await?;
    Ok(Json(ApiResponse::success(
        booking::start_wash(&state.db, id, Utc::now()).await?,
    )))
}

pub async fn complete_wash(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<BookingStatusChange> {
    booking_admin(&headers, &state, id).await?;
    Ok(Json(ApiResponse::success(
        booking::complete_wash(&state.db, id, Utc::now()).await?,
    )))
}
