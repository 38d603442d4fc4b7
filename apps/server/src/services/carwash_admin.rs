use sqlx::SqlitePool;
use uuid::Uuid;

use super::{booking::normalize_phone, carwash};
use crate::error::ApiError;
use crate::models::*;

pub async fn add(db: &SqlitePool, req: AddCarWashAdminRequest) -> Result<CarWashAdmin, ApiError> {
    carwash::get(db, req.car_wash_id).await?;

    let phone = normalize_phone(&req.phone_number)?;
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE phone_number = ?")
        .bind(&phone)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM car_wash_admins WHERE user_id = ? AND car_wash_id = ?",
    )
    .bind(user.id)
    .bind(req.car_wash_id)
    .fetch_one(db)
    .await?;
    if exists {
        return Err(ApiError::bad_request(
            "User is already an admin of this car wash",
        ));
    }

    let admin = CarWashAdmin {
        id: Uuid::new_v4(),
        user_id: user.id,
        car_wash_id: req.car_wash_id,
        user_name: user.full_name(),
    };
    sqlx::query(
        "INSERT INTO car_wash_admins (id, user_id, car_wash_id, user_name) VALUES (?, ?, ?, ?)",
    )
    .bind(admin.id)
    .bind(admin.user_id)
    .bind(admin.car_wash_id)
    .bind(&admin.user_name)
    .execute(db)
    .await?;

    tracing::info!(carwash_id = %admin.car_wash_id, user_id = %admin.user_id, "car wash admin added");
    Ok(admin)
}

pub async fn list_for_carwash(
    db: &SqlitePool,
    carwash_id: Uuid,
) -> Result<Vec<CarWashAdminView>, ApiError> {
    carwash::get(db, carwash_id).await?;
    let admins = sqlx::query_as::<_, CarWashAdminView>(
        "SELECT a.id, a.user_id, a.car_wash_id, a.user_name, u.telegram_id, u.phone_number
         FROM car_wash_admins a
         JOIN users u ON u.id = a.user_id
         WHERE a.car_wash_id = ?
         ORDER BY a.user_name ASC",
    )
    .bind(carwash_id)
    .fetch_all(db)
    .await?;
    Ok(admins)
}

pub async fn delete(db: &SqlitePool, admin_id: Uuid) -> Result<Deleted, ApiError> {
    let affected = sqlx::query("DELETE FROM car_wash_admins WHERE id = ?")
        .bind(admin_id)
        .execute(db)
        .await?
        .rows_affected();
    if affected == 0 {
        return Err(ApiError::not_found("Car wash admin not found"));
    }
    Ok(Deleted::new(admin_id))
}

pub async fn carwashes_of(
    db: &SqlitePool,
    telegram_id: i64,
) -> Result<Vec<CarWashSummary>, ApiError> {
    let carwashes = sqlx::query_as::<_, CarWashSummary>(
        "SELECT c.id, c.name, c.address
         FROM car_wash_admins a
         JOIN users u ON u.id = a.user_id
         JOIN car_washes c ON c.id = a.car_wash_id
         WHERE u.telegram_id = ?
         ORDER BY c.name ASC",
    )
    .bind(telegram_id)
    .fetch_all(db)
    .await?;
    Ok(carwashes)
}
