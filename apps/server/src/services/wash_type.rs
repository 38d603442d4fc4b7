use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::required_text;
use crate::error::ApiError;
use crate::models::{
    CreateWashTypeRequest, Deleted, UpdateWashTypeRequest, WashType, WashTypeList,
};

const NOT_FOUND: &str = "Wash type not found";

fn check_duration(minutes: i64) -> Result<(), ApiError> {
    if minutes > 0 {
        Ok(())
    } else {
        Err(ApiError::bad_request("duration_minutes must be positive"))
    }
}

fn check_price(kopecks: i64) -> Result<(), ApiError> {
    if kopecks >= 0 {
        Ok(())
    } else {
        Err(ApiError::bad_request("base_price must not be negative"))
    }
}

fn clean_description(raw: Option<String>) -> Option<String> {
    raw.map(|d| d.trim().to_string()).filter(|d| !d.is_empty())
}

pub async fn list(db: &SqlitePool) -> Result<WashTypeList, ApiError> {
    let items = sqlx::query_as::<_, WashType>(
        "SELECT * FROM wash_types ORDER BY base_price ASC, name ASC",
    )
    .fetch_all(db)
    .await?;
    let total = items.len();
    Ok(WashTypeList { items, total })
}

pub async fn get(db: &SqlitePool, id: Uuid) -> Result<WashType, ApiError> {
    sqlx::query_as::<_, WashType>("SELECT * FROM wash_types WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found(NOT_FOUND))
}

pub async fn create(db: &SqlitePool, req: CreateWashTypeRequest) -> Result<WashType, ApiError> {
    let name = required_text("name", &req.name, 100)?;
    check_duration(req.duration_minutes)?;
    check_price(req.base_price)?;

    let wash_type = WashType {
        id: Uuid::new_v4(),
        name,
        description: clean_description(req.description),
        duration_minutes: req.duration_minutes,
        base_price: req.base_price,
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO wash_types (id, name, description, duration_minutes, base_price, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(wash_type.id)
    .bind(&wash_type.name)
    .bind(&wash_type.description)
    .bind(wash_type.duration_minutes)
    .bind(wash_type.base_price)
    .bind(wash_type.created_at)
    .execute(db)
    .await?;

    Ok(wash_type)
}

pub async fn update(
    db: &SqlitePool,
    id: Uuid,
    req: UpdateWashTypeRequest,
) -> Result<WashType, ApiError> {
    let mut wash_type = get(db, id).await?;

    if let Some(name) = &req.name {
        wash_type.name = required_text("name", name, 100)?;
    }
    if req.description.is_some() {
        wash_type.description = clean_description(req.description);
    }
    if let Some(minutes) = req.duration_minutes {
        check_duration(minutes)?;
        wash_type.duration_minutes = minutes;
    }
    if let Some(price) = req.base_price {
        check_price(price)?;
        wash_type.base_price = price;
    }

    sqlx::query(
        "UPDATE wash_types SET name = ?, description = ?, duration_minutes = ?, base_price = ?
         WHERE id = ?",
    )
    .bind(&wash_type.name)
    .bind(&wash_type.description)
    .bind(wash_type.duration_minutes)
    .bind(wash_type.base_price)
    .bind(id)
    .execute(db)
    .await?;

    Ok(wash_type)
}

pub async fn delete(db: &SqlitePool, id: Uuid) -> Result<Deleted, ApiError> {
    get(db, id).await?;

    let in_use: bool =
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM bookings WHERE wash_type_id = ?")
            .bind(id)
            .fetch_one(db)
            .await?;
    if in_use {
        return Err(ApiError::conflict(
            "Wash type is used by existing bookings",
        ));
    }

    sqlx::query("DELETE FROM wash_types WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(Deleted::new(id))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db;

    pub async fn seed_wash_type(db: &SqlitePool, name: &str, minutes: i64, price: i64) -> WashType {
        create(
            db,
            CreateWashTypeRequest {
                name: name.into(),
                description: None,
                duration_minutes: minutes,
                base_price: price,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_ordered_by_price_then_name() {
        let pool = db::memory_pool().await.unwrap();
        seed_wash_type(&pool, "Premium", 60, 250_000).await;
        seed_wash_type(&pool, "Express", 20, 80_000).await;
        seed_wash_type(&pool, "Basic", 30, 80_000).await;

        let list = list(&pool).await.unwrap();
        assert_eq!(list.total, 3);
        let names: Vec<_> = list.items.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["Basic", "Express", "Premium"]);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let pool = db::memory_pool().await.unwrap();
        let bad = |name: &str, minutes, price| CreateWashTypeRequest {
            name: name.into(),
            description: None,
            duration_minutes: minutes,
            base_price: price,
        };
        assert!(create(&pool, bad("", 30, 100)).await.is_err());
        assert!(create(&pool, bad("Basic", 0, 100)).await.is_err());
        assert!(create(&pool, bad("Basic", 30, -1)).await.is_err());
        assert!(create(&pool, bad("Free rinse", 10, 0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_partial_and_clear_description() {
        let pool = db::memory_pool().await.unwrap();
        let wt = seed_wash_type(&pool, "Basic", 30, 100_000).await;
        let updated = update(
            &pool,
            wt.id,
            UpdateWashTypeRequest {
                base_price: Some(120_000),
                description: Some("  ".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.name, "Basic");
        assert_eq!(updated.base_price, 120_000);
        assert_eq!(updated.description, None);

        let bad = update(
            &pool,
            wt.id,
            UpdateWashTypeRequest {
                duration_minutes: Some(-5),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(bad, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_delete_missing_is_404() {
        let pool = db::memory_pool().await.unwrap();
        let res = delete(&pool, Uuid::new_v4()).await;
        assert!(matches!(res, Err(ApiError::NotFound(_))));

        let wt = seed_wash_type(&pool, "Basic", 30, 100_000).await;
        assert_eq!(delete(&pool, wt.id).await.unwrap().id, wt.id);
        assert!(matches!(get(&pool, wt.id).await, Err(ApiError::NotFound(_))));
    }
}
