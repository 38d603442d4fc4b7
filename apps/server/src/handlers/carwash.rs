use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::*;
use crate::services::{carwash, moscow_now};
use crate::AppState;

/// GET /api/v1/carwashes
pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Vec<CarWash>> {
    let carwashes = carwash::list(&state.db).await?;
    Ok(Json(ApiResponse::success(carwashes)))
}

/// GET /api/v1/carwashes/{id}
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<CarWash> {
    Ok(Json(ApiResponse::success(carwash::get(&state.db, id).await?)))
}

/// GET /api/v1/carwashes/{id}/slots-count?date=YYYY-MM-DD
pub async fn slots_count(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(q): Query<DateQuery>,
) -> ApiResult<SlotsCount> {
    let count = carwash::slots_count(&state.db, id, q.date, moscow_now()).await?;
    Ok(Json(ApiResponse::success(count)))
}

/// GET /api/v1/carwashes/{id}/slots?date=YYYY-MM-DD
pub async fn slots(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(q): Query<DateQuery>,
) -> ApiResult<Vec<SlotWithBay>> {
    let slots = carwash::available_slots(&state.db, id, q.date, moscow_now()).await?;
    Ok(Json(ApiResponse::success(slots)))
}
