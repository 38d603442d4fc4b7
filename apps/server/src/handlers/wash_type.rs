use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth;
use crate::error::ApiResult;
use crate::models::*;
use crate::services::wash_type;
use crate::AppState;

pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<WashTypeList> {
    Ok(Json(ApiResponse::success(wash_type::list(&state.db).await?)))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<WashType> {
    Ok(Json(ApiResponse::success(wash_type::get(&state.db, id).await?)))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateWashTypeRequest>,
) -> ApiResult<WashType> {
    let caller = auth::caller(&headers, &state)?;
    auth::require_system_admin(&caller, &state)?;
    Ok(Json(ApiResponse::success(
        wash_type::create(&state.db, body).await?,
    )))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateWashTypeRequest>,
) -> ApiResult<WashType> {
    let caller = auth::caller(&headers, &state)?;
    auth::require_system_admin(&caller, &state)?;
    Ok(Json(ApiResponse::success(
        wash_type::update(&state.db, id, body).await?,
    )))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Deleted> {
    let caller = auth::caller(&headers, &state)?;
    auth::require_system_admin(&caller, &state)?;
    Ok(Json(ApiResponse::success(
        wash_type::delete(&state.db, id).await?,
    )))
}
