use axum::http::{header, HeaderMap};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::{error::ApiError, models::TelegramUser, AppState};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of initData before it's considered expired (24 hours).
const MAX_AUTH_AGE_SECS: i64 = 86400;

pub const SERVICE_KEY_HEADER: &str = "x-service-key";
pub const TELEGRAM_ID_HEADER: &str = "x-telegram-id";
pub const INIT_DATA_HEADER: &str = "x-telegram-init-data";

/// Validates Telegram Mini App initData and extracts user info.
/// See: https://core.telegram.org/bots/webapps#validating-data-received-via-the-mini-app
pub fn validate_init_data(init_data: &str, bot_token: &str) -> Option<TelegramUser> {
    let params: BTreeMap<String, String> = url::form_urlencoded::parse(init_data.as_bytes())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let hash = hex::decode(params.get("hash")?).ok()?;

    // Verify auth_date is recent (prevent replay attacks)
    if let Some(auth_date) = params.get("auth_date").and_then(|s| s.parse::<i64>().ok()) {
        let age = chrono::Utc::now().timestamp() - auth_date;
        if age > MAX_AUTH_AGE_SECS {
            tracing::warn!(auth_date, age, "initData expired");
            return None;
        }
    }

    let mut mac = HmacSha256::new_from_slice(&init_data_secret(bot_token)).ok()?;
    mac.update(data_check_string(&params).as_bytes());

    if mac.verify_slice(&hash).is_err() {
        tracing::warn!("initData hash mismatch");
        return None;
    }

    let user_json = params.get("user")?;
    serde_json::from_str::<TelegramUser>(user_json).ok()
}

/// secret_key = HMAC-SHA256("WebAppData", bot_token)
fn init_data_secret(bot_token: &str) -> Vec<u8> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(b"WebAppData")
        .expect("HMAC can take key of any size");
    mac.update(bot_token.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Sorted `key=value` lines, excluding `hash`.
fn data_check_string(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .filter(|(k, _)| k.as_str() != "hash")
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build a signed initData string. Used by tests and local tooling.
pub fn sign_init_data(user: &TelegramUser, auth_date: i64, bot_token: &str) -> String {
    let user_json = serde_json::to_string(user).unwrap_or_default();
    let mut params = BTreeMap::new();
    params.insert("auth_date".to_string(), auth_date.to_string());
    params.insert("user".to_string(), user_json);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(&init_data_secret(bot_token))
        .expect("HMAC can take key of any size");
    mac.update(data_check_string(&params).as_bytes());
    let hash = hex::encode(mac.finalize().into_bytes());

    let mut out = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in &params {
        out.append_pair(k, v);
    }
    out.append_pair("hash", &hash);
    out.finish()
}

/// Extract Telegram user from the Authorization header.
/// Header format: `tma <initData>`
pub fn extract_user_from_header(auth_header: &str, bot_token: &str) -> Option<TelegramUser> {
    let init_data = auth_header.strip_prefix("tma ")?;
    validate_init_data(init_data, bot_token)
}

/// The Telegram identity behind a request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub telegram_id: i64,
    /// Present when the identity came from signed initData.
    pub profile: Option<TelegramUser>,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn has_service_key(headers: &HeaderMap, state: &AppState) -> bool {
    let expected = &state.config.service_api_key;
    !expected.is_empty()
        && header_str(headers, SERVICE_KEY_HEADER)
            .is_some_and(|got| constant_time_eq(got.as_bytes(), expected.as_bytes()))
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Resolve the caller from `Authorization: tma <initData>` or from the
/// service key plus `X-Telegram-Id`.
pub fn caller(headers: &HeaderMap, state: &AppState) -> Result<Caller, ApiError> {
    if let Some(auth_header) = header_str(headers, header::AUTHORIZATION.as_str()) {
        let user = extract_user_from_header(auth_header, &state.config.bot_token)
            .ok_or_else(|| ApiError::Unauthorized("Invalid Telegram auth".into()))?;
        return Ok(Caller {
            telegram_id: user.id,
            profile: Some(user),
        });
    }

    if has_service_key(headers, state) {
        let telegram_id = header_str(headers, TELEGRAM_ID_HEADER)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing X-Telegram-Id header".into()))?;
        return Ok(Caller {
            telegram_id,
            profile: None,
        });
    }

    Err(ApiError::Unauthorized("Missing Authorization header".into()))
}

/// Only trusted services (the bot) may call.
pub fn require_service(headers: &HeaderMap, state: &AppState) -> Result<(), ApiError> {
    if has_service_key(headers, state) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("Service key required".into()))
    }
}

pub fn require_system_admin(caller: &Caller, state: &AppState) -> Result<(), ApiError> {
    if state.config.is_system_admin(caller.telegram_id) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Access denied".into()))
    }
}

/// System admins pass everywhere; otherwise the caller must be assigned to the car wash.
pub async fn require_carwash_admin(
    db: &SqlitePool,
    state: &AppState,
    caller: &Caller,
    carwash_id: Uuid,
) -> Result<(), ApiError> {
    if state.config.is_system_admin(caller.telegram_id) {
        return Ok(());
    }

    let assigned: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM car_wash_admins a
         JOIN users u ON u.id = a.user_id
         WHERE u.telegram_id = ? AND a.car_wash_id = ?",
    )
    .bind(caller.telegram_id)
    .bind(carwash_id)
    .fetch_one(db)
    .await?;

    if assigned {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Access denied".into()))
    }
}
