use chrono::{DateTime, Utc};
use regex::Regex;
use sqlx::SqlitePool;
use std::sync::LazyLock;
use uuid::Uuid;

use super::{booking::normalize_phone, carwash_admin, required_text};
use crate::config::Config;
use crate::error::ApiError;
use crate::models::*;

const NOT_FOUND: &str = "User not found";
const MAX_LIST_LIMIT: i64 = 100;

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]{3,32}$").expect("valid username regex"));

pub async fn get(db: &SqlitePool, id: Uuid) -> Result<User, ApiError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found(NOT_FOUND))
}

pub async fn find_by_telegram_id(db: &SqlitePool, telegram_id: i64) -> Result<Option<User>, ApiError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE telegram_id = ?")
        .bind(telegram_id)
        .fetch_optional(db)
        .await?;
    Ok(user)
}

pub async fn by_telegram_id(db: &SqlitePool, telegram_id: i64) -> Result<User, ApiError> {
    find_by_telegram_id(db, telegram_id)
        .await?
        .ok_or_else(|| ApiError::not_found(NOT_FOUND))
}

/// Get or create the user behind a verified initData, refreshing profile fields.
pub async fn auth_telegram(
    db: &SqlitePool,
    tg: &TelegramUser,
    now: DateTime<Utc>,
) -> Result<User, ApiError> {
    sqlx::query(
        "INSERT INTO users (id, telegram_id, username, first_name, last_name, is_verified, last_visit, created_at)
         VALUES (?, ?, ?, ?, ?, 0, ?, ?)
         ON CONFLICT(telegram_id) DO UPDATE SET
            username = excluded.username,
            first_name = excluded.first_name,
            last_name = excluded.last_name,
            last_visit = excluded.last_visit",
    )
    .bind(Uuid::new_v4())
    .bind(tg.id)
    .bind(&tg.username)
    .bind(&tg.first_name)
    .bind(&tg.last_name)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?;

    by_telegram_id(db, tg.id).await
}

/// Bot registration: the phone comes from a Telegram contact, so it counts as verified.
pub async fn register(
    db: &SqlitePool,
    req: RegisterUserRequest,
    now: DateTime<Utc>,
) -> Result<User, ApiError> {
    let first_name = required_text("first_name", &req.first_name, 100)?;
    let phone = normalize_phone(&req.phone_number)?;
    let last_name = req
        .last_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    sqlx::query(
        "INSERT INTO users (id, telegram_id, username, first_name, last_name, phone_number, is_verified, last_visit, created_at)
         VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
         ON CONFLICT(telegram_id) DO UPDATE SET
            username = COALESCE(excluded.username, users.username),
            first_name = excluded.first_name,
            last_name = COALESCE(excluded.last_name, users.last_name),
            phone_number = excluded.phone_number,
            is_verified = 1,
            last_visit = excluded.last_visit",
    )
    .bind(Uuid::new_v4())
    .bind(req.telegram_id)
    .bind(&req.username)
    .bind(&first_name)
    .bind(&last_name)
    .bind(&phone)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?;

    tracing::info!(telegram_id = req.telegram_id, "user registered");
    by_telegram_id(db, req.telegram_id).await
}

pub async fn verify_phone(db: &SqlitePool, telegram_id: i64, phone: &str) -> Result<User, ApiError> {
    let phone = normalize_phone(phone)?;
    let updated = sqlx::query("UPDATE users SET phone_number = ?, is_verified = 1 WHERE telegram_id = ?")
        .bind(&phone)
        .bind(telegram_id)
        .execute(db)
        .await?
        .rows_affected();
    if updated == 0 {
        return Err(ApiError::not_found(NOT_FOUND));
    }
    by_telegram_id(db, telegram_id).await
}

pub async fn me(db: &SqlitePool, config: &Config, telegram_id: i64) -> Result<UserProfile, ApiError> {
    let user = by_telegram_id(db, telegram_id).await?;

    let (total_bookings, completed_bookings): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(status = ?), 0) FROM bookings
         WHERE user_id = ? OR (? IS NOT NULL AND guest_phone = ?)",
    )
    .bind(BookingStatus::Completed)
    .bind(user.id)
    .bind(&user.phone_number)
    .bind(&user.phone_number)
    .fetch_one(db)
    .await?;

    let admin_of = carwash_admin::carwashes_of(db, telegram_id).await?;

    Ok(UserProfile {
        is_system_admin: config.is_system_admin(telegram_id),
        stats: UserStats {
            total_bookings,
            completed_bookings,
        },
        admin_of,
        user,
    })
}

pub async fn update_me(
    db: &SqlitePool,
    telegram_id: i64,
    patch: UpdateUserRequest,
) -> Result<User, ApiError> {
    let mut user = by_telegram_id(db, telegram_id).await?;

    if patch.username.is_none()
        && patch.email.is_none()
        && patch.first_name.is_none()
        && patch.last_name.is_none()
        && patch.phone_number.is_none()
    {
        return Err(ApiError::bad_request("Nothing to update"));
    }

    if let Some(username) = patch.username {
        let username = username.trim().trim_start_matches('@').to_string();
        if !USERNAME_RE.is_match(&username) {
            return Err(ApiError::bad_request(
                "username must be 3-32 characters of letters, digits or underscore",
            ));
        }
        user.username = Some(username);
    }
    if let Some(email) = patch.email {
        let email = email.trim().to_string();
        if !email.contains('@') {
            return Err(ApiError::bad_request("Invalid email"));
        }
        user.email = Some(email);
    }
    if let Some(first_name) = patch.first_name {
        user.first_name = required_text("first_name", &first_name, 100)?;
    }
    if let Some(last_name) = patch.last_name {
        let last_name = last_name.trim().to_string();
        user.last_name = (!last_name.is_empty()).then_some(last_name);
    }
    if let Some(phone) = patch.phone_number {
        let phone = normalize_phone(&phone)?;
        // A typed-in number has not been confirmed through a Telegram contact.
        if user.phone_number.as_deref() != Some(phone.as_str()) {
            user.is_verified = false;
        }
        user.phone_number = Some(phone);
    }

    sqlx::query(
        "UPDATE users SET username = ?, email = ?, first_name = ?, last_name = ?,
         phone_number = ?, is_verified = ?
         WHERE id = ?",
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.phone_number)
    .bind(user.is_verified)
    .bind(user.id)
    .execute(db)
    .await?;

    Ok(user)
}

pub async fn list(db: &SqlitePool, query: ListQuery) -> Result<Vec<User>, ApiError> {
    let skip = query.skip.unwrap_or(0);
    let limit = query.limit.unwrap_or(MAX_LIST_LIMIT);
    if skip < 0 {
        return Err(ApiError::bad_request("skip must be >= 0"));
    }
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(ApiError::bad_request(format!(
            "limit must be between 1 and {MAX_LIST_LIMIT}"
        )));
    }

    let users = sqlx::query_as::<_, User>(
        "SELECT * FROM users ORDER BY created_at DESC LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(skip)
    .fetch_all(db)
    .await?;
    Ok(users)
}

pub async fn delete(db: &SqlitePool, id: Uuid) -> Result<Deleted, ApiError> {
    let affected = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();
    if affected == 0 {
        return Err(ApiError::not_found(NOT_FOUND));
    }
    tracing::info!(user_id = %id, "user deleted");
    Ok(Deleted::new(id))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db;

    pub async fn seed_user(db: &SqlitePool, telegram_id: i64, phone: &str) -> User {
        register(
            db,
            RegisterUserRequest {
                telegram_id,
                first_name: "Ivan".into(),
                last_name: Some("Petrov".into()),
                username: None,
                phone_number: phone.into(),
            },
            Utc::now(),
        )
        .await
        .unwrap()
    }

    fn tg(id: i64, first: &str) -> TelegramUser {
        TelegramUser {
            id,
            first_name: first.into(),
            last_name: None,
            username: Some("ivan_p".into()),
        }
    }

    #[tokio::test]
    async fn test_auth_creates_then_refreshes() {
        let pool = db::memory_pool().await.unwrap();
        let first = auth_telegram(&pool, &tg(10, "Ivan"), Utc::now()).await.unwrap();
        assert_eq!(first.first_name, "Ivan");
        assert!(!first.is_verified);

        let second = auth_telegram(&pool, &tg(10, "Ivan2"), Utc::now()).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.first_name, "Ivan2");
        assert!(second.last_visit.is_some());
    }

    #[tokio::test]
    async fn test_register_normalizes_and_verifies() {
        let pool = db::memory_pool().await.unwrap();
        let user = seed_user(&pool, 11, "8 999 123 45 67").await;
        assert_eq!(user.phone_number.as_deref(), Some("+79991234567"));
        assert!(user.is_verified);
        assert_eq!(user.full_name(), "Ivan Petrov");

        // Re-registering updates in place.
        let again = seed_user(&pool, 11, "+79990000000").await;
        assert_eq!(again.id, user.id);
        assert_eq!(again.phone_number.as_deref(), Some("+79990000000"));
    }

    #[tokio::test]
    async fn test_verify_phone_unknown_user() {
        let pool = db::memory_pool().await.unwrap();
        let res = verify_phone(&pool, 999, "+79991234567").await;
        assert!(matches!(res, Err(ApiError::NotFound(_))));

        auth_telegram(&pool, &tg(12, "Ivan"), Utc::now()).await.unwrap();
        let user = verify_phone(&pool, 12, "89991234567").await.unwrap();
        assert!(user.is_verified);
        assert_eq!(user.phone_number.as_deref(), Some("+79991234567"));
    }

    #[tokio::test]
    async fn test_me_reports_roles_and_stats() {
        let pool = db::memory_pool().await.unwrap();
        let cfg = Config::for_tests();
        seed_user(&pool, 1, "+79991234567").await;

        let profile = me(&pool, &cfg, 1).await.unwrap();
        assert!(profile.is_system_admin);
        assert_eq!(profile.stats.total_bookings, 0);
        assert!(profile.admin_of.is_empty());

        assert!(matches!(me(&pool, &cfg, 2).await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_me_validation() {
        let pool = db::memory_pool().await.unwrap();
        seed_user(&pool, 13, "+79991234567").await;

        let empty = update_me(&pool, 13, UpdateUserRequest::default()).await;
        assert!(matches!(empty, Err(ApiError::BadRequest(_))));

        let bad_name = update_me(
            &pool,
            13,
            UpdateUserRequest {
                username: Some("a-b".into()),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(bad_name, Err(ApiError::BadRequest(_))));

        let bad_email = update_me(
            &pool,
            13,
            UpdateUserRequest {
                email: Some("nope".into()),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(bad_email, Err(ApiError::BadRequest(_))));

        let ok = update_me(
            &pool,
            13,
            UpdateUserRequest {
                username: Some("@ivan_p".into()),
                email: Some("ivan@example.com".into()),
                phone_number: Some("+7 999 000 00 00".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(ok.username.as_deref(), Some("ivan_p"));
        assert_eq!(ok.phone_number.as_deref(), Some("+79990000000"));
        assert!(!ok.is_verified);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let pool = db::memory_pool().await.unwrap();
        let a = seed_user(&pool, 20, "+79990000001").await;
        seed_user(&pool, 21, "+79990000002").await;

        let all = list(&pool, ListQuery { skip: None, limit: None }).await.unwrap();
        assert_eq!(all.len(), 2);
        let one = list(&pool, ListQuery { skip: Some(1), limit: Some(1) }).await.unwrap();
        assert_eq!(one.len(), 1);
        assert!(list(&pool, ListQuery { skip: None, limit: Some(101) }).await.is_err());

        delete(&pool, a.id).await.unwrap();
        assert!(matches!(get(&pool, a.id).await, Err(ApiError::NotFound(_))));
        assert!(matches!(delete(&pool, a.id).await, Err(ApiError::NotFound(_))));
    }
}
