use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{self, INIT_DATA_HEADER};
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::services::users;
use crate::AppState;

/// POST /api/v1/users/telegram/auth with raw initData in `X-Telegram-Init-Data`.
pub async fn telegram_auth(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<User> {
    let init_data = headers
        .get(INIT_DATA_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing X-Telegram-Init-Data header".into()))?;
    let tg_user = auth::validate_init_data(init_data, &state.config.bot_token)
        .ok_or_else(|| ApiError::Unauthorized("Invalid Telegram auth".into()))?;

    let user = users::auth_telegram(&state.db, &tg_user, Utc::now()).await?;
    Ok(Json(ApiResponse::success(user)))
}

/// POST /api/v1/users/register, bot only.
pub async fn register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RegisterUserRequest>,
) -> ApiResult<User> {
    auth::require_service(&headers, &state)?;
    Ok(Json(ApiResponse::success(
        users::register(&state.db, body, Utc::now()).await?,
    )))
}

/// POST /api/v1/users/verify-phone
pub async fn verify_phone(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<VerifyPhoneRequest>,
) -> ApiResult<User> {
    let caller = auth::caller(&headers, &state)?;
    Ok(Json(ApiResponse::success(
        users::verify_phone(&state.db, caller.telegram_id, &body.phone_number).await?,
    )))
}

/// GET /api/v1/users/me
pub async fn me(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<UserProfile> {
    let caller = auth::caller(&headers, &state)?;
    Ok(Json(ApiResponse::success(
        users::me(&state.db, &state.config, caller.telegram_id).await?,
    )))
}

/// PATCH /api/v1/users/me
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<UpdateUserRequest>,
) -> ApiResult<User> {
    let caller = auth::caller(&headers, &state)?;
    Ok(Json(ApiResponse::success(
        users::update_me(&state.db, caller.telegram_id, body).await?,
    )))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ListQuery>,
) -> ApiResult<Vec<User>> {
    let caller = auth::caller(&headers, &state)?;
    auth::require_system_admin(&caller, &state)?;
    Ok(Json(ApiResponse::success(users::list(&state.db, q).await?)))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<User> {
    let caller = auth::caller(&headers, &state)?;
    auth::require_system_admin(&caller, &state)?;
    Ok(Json(ApiResponse::success(users::get(&state.db, id).await?)))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Deleted> {
    let caller = auth::caller(&headers, &state)?;
    auth::require_system_admin(&caller, &state)?;
    Ok(Json(ApiResponse::success(users::delete(&state.db, id).await?)))
}
