use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{required_text, slots, validate_strict_phone};
use crate::config::Config;
use crate::error::ApiError;
use crate::models::*;

const CARWASH_NOT_FOUND: &str = "Car wash not found";

/// Parse `HH:MM` working hours; start must be before end.
pub fn parse_working_hours(input: &WorkingHoursInput) -> Result<(NaiveTime, NaiveTime), ApiError> {
    let parse = |raw: &str| {
        NaiveTime::parse_from_str(raw.trim(), hhmm::FORMAT).map_err(|_| {
            ApiError::bad_request("Invalid working hours time format, use 'HH:MM'")
        })
    };
    let start = parse(&input.start)?;
    let end = parse(&input.end)?;
    if start >= end {
        return Err(ApiError::bad_request(
            "Working hours start must be before end",
        ));
    }
    Ok((start, end))
}

pub async fn list(db: &SqlitePool) -> Result<Vec<CarWash>, ApiError> {
    let carwashes = sqlx::query_as::<_, CarWash>("SELECT * FROM car_washes ORDER BY name ASC")
        .fetch_all(db)
        .await?;
    Ok(carwashes)
}

pub async fn get(db: &SqlitePool, id: Uuid) -> Result<CarWash, ApiError> {
    sqlx::query_as::<_, CarWash>("SELECT * FROM car_washes WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found(CARWASH_NOT_FOUND))
}

async fn name_taken(db: &SqlitePool, name: &str, except: Option<Uuid>) -> Result<bool, ApiError> {
    let taken = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM car_washes WHERE name = ? AND (? IS NULL OR id != ?)",
    )
    .bind(name)
    .bind(except)
    .bind(except)
    .fetch_one(db)
    .await?;
    Ok(taken)
}

pub async fn slots_count(
    db: &SqlitePool,
    id: Uuid,
    date: Option<NaiveDate>,
    now: NaiveDateTime,
) -> Result<SlotsCount, ApiError> {
    get(db, id).await?;
    let date = date.unwrap_or(now.date());
    let available_slots = slots::count_available(db, id, date, now).await?;
    Ok(SlotsCount {
        carwash_id: id,
        date,
        available_slots,
    })
}

pub async fn available_slots(
    db: &SqlitePool,
    id: Uuid,
    date: Option<NaiveDate>,
    now: NaiveDateTime,
) -> Result<Vec<SlotWithBay>, ApiError> {
    get(db, id).await?;
    slots::list_available(db, id, date.unwrap_or(now.date()), now).await
}

pub async fn create(db: &SqlitePool, req: CreateCarWashRequest) -> Result<CarWash, ApiError> {
    let name = required_text("name", &req.name, 100)?;
    let address = required_text("address", &req.address, 255)?;
    let phone = req.phone_number.trim().to_string();
    validate_strict_phone(&phone)?;
    let (start, end) = parse_working_hours(&req.working_hours)?;

    if name_taken(db, &name, None).await? {
        return Err(ApiError::bad_request(
            "A car wash with this name already exists",
        ));
    }

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO car_washes
         (id, name, address, phone_number, working_hours_start, working_hours_end, is_active, created_at)
         VALUES (?, ?, ?, ?, ?, ?, 1, ?)",
    )
    .bind(id)
    .bind(&name)
    .bind(&address)
    .bind(&phone)
    .bind(start)
    .bind(end)
    .bind(Utc::now())
    .execute(db)
    .await?;

    tracing::info!(carwash_id = %id, %name, "car wash created");
    get(db, id).await
}

pub async fn update(
    db: &SqlitePool,
    id: Uuid,
    req: UpdateCarWashRequest,
) -> Result<CarWash, ApiError> {
    let mut carwash = get(db, id).await?;

    if req.name.is_none()
        && req.address.is_none()
        && req.phone_number.is_none()
        && req.working_hours.is_none()
        && req.is_active.is_none()
    {
        return Err(ApiError::bad_request("Nothing to update"));
    }

    if let Some(name) = &req.name {
        let name = required_text("name", name, 100)?;
        if name_taken(db, &name, Some(id)).await? {
            return Err(ApiError::bad_request(
                "A car wash with this name already exists",
            ));
        }
        carwash.name = name;
    }
    if let Some(address) = &req.address {
        carwash.address = required_text("address", address, 255)?;
    }
    if let Some(phone) = &req.phone_number {
        let phone = phone.trim().to_string();
        validate_strict_phone(&phone)?;
        carwash.phone_number = phone;
    }
    if let Some(hours) = &req.working_hours {
        let (start, end) = parse_working_hours(hours)?;
        carwash.working_hours_start = start;
        carwash.working_hours_end = end;
    }
    if let Some(active) = req.is_active {
        carwash.is_active = active;
    }

    sqlx::query(
        "UPDATE car_washes SET name = ?, address = ?, phone_number = ?,
         working_hours_start = ?, working_hours_end = ?, is_active = ?
         WHERE id = ?",
    )
    .bind(&carwash.name)
    .bind(&carwash.address)
    .bind(&carwash.phone_number)
    .bind(carwash.working_hours_start)
    .bind(carwash.working_hours_end)
    .bind(carwash.is_active)
    .bind(id)
    .execute(db)
    .await?;

    Ok(carwash)
}

pub async fn delete(db: &SqlitePool, id: Uuid) -> Result<Deleted, ApiError> {
    let affected = sqlx::query("DELETE FROM car_washes WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();

    if affected == 0 {
        return Err(ApiError::not_found(CARWASH_NOT_FOUND));
    }
    tracing::info!(carwash_id = %id, "car wash deleted");
    Ok(Deleted::new(id))
}

/// Add a bay and open its slots for the configured horizon.
pub async fn add_bay(
    db: &SqlitePool,
    config: &Config,
    carwash_id: Uuid,
    req: CreateWashBayRequest,
    today: NaiveDate,
) -> Result<BayCreated, ApiError> {
    let carwash = get(db, carwash_id).await?;

    if req.bay_number < 1 {
        return Err(ApiError::bad_request("bay_number must be >= 1"));
    }
    let bay_type = match req.bay_type.as_deref().map(str::trim) {
        Some(t) if !t.is_empty() => required_text("bay_type", t, 50)?,
        _ => "standard".to_string(),
    };

    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM wash_bays WHERE car_wash_id = ? AND bay_number = ?",
    )
    .bind(carwash_id)
    .bind(req.bay_number)
    .fetch_one(db)
    .await?;
    if exists {
        return Err(ApiError::bad_request(format!(
            "Bay {} already exists at this car wash; use its slots endpoint to generate more slots",
            req.bay_number
        )));
    }

    let bay = WashBay {
        id: Uuid::new_v4(),
        car_wash_id: carwash_id,
        bay_number: req.bay_number,
        bay_type,
        is_active: true,
    };

    // A bay without slots cannot be re-added, so both land together or not at all.
    let mut tx = db.begin().await?;
    sqlx::query(
        "INSERT INTO wash_bays (id, car_wash_id, bay_number, bay_type, is_active)
         VALUES (?, ?, ?, ?, 1)",
    )
    .bind(bay.id)
    .bind(bay.car_wash_id)
    .bind(bay.bay_number)
    .bind(&bay.bay_type)
    .execute(&mut *tx)
    .await?;

    let slots_created = slots::insert_for_bay(
        &mut tx,
        &carwash,
        &bay,
        today,
        config.slot_days_ahead,
        config.slot_duration_minutes,
    )
    .await?;
    tx.commit().await?;

    Ok(BayCreated { bay, slots_created })
}

/// Top up the slot horizon for an existing bay.
pub async fn regenerate_bay_slots(
    db: &SqlitePool,
    config: &Config,
    carwash_id: Uuid,
    bay_id: Uuid,
    days_ahead: Option<u32>,
    today: NaiveDate,
) -> Result<SlotsGenerated, ApiError> {
    let carwash = get(db, carwash_id).await?;
    let bay = get_bay(db, carwash_id, bay_id).await?;

    let days = days_ahead.unwrap_or(config.slot_days_ahead);
    if !(1..=90).contains(&days) {
        return Err(ApiError::bad_request("days_ahead must be between 1 and 90"));
    }

    let slots_created = slots::generate_for_bay(
        db,
        &carwash,
        &bay,
        today,
        days,
        config.slot_duration_minutes,
    )
    .await?;

    Ok(SlotsGenerated {
        wash_bay_id: bay.id,
        slots_created,
    })
}

async fn get_bay(db: &SqlitePool, carwash_id: Uuid, bay_id: Uuid) -> Result<WashBay, ApiError> {
    sqlx::query_as::<_, WashBay>("SELECT * FROM wash_bays WHERE id = ? AND car_wash_id = ?")
        .bind(bay_id)
        .bind(carwash_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Wash bay not found"))
}

pub async fn bays(db: &SqlitePool, carwash_id: Uuid) -> Result<Vec<WashBay>, ApiError> {
    get(db, carwash_id).await?;
    let bays = sqlx::query_as::<_, WashBay>(
        "SELECT * FROM wash_bays WHERE car_wash_id = ? ORDER BY bay_number ASC",
    )
    .bind(carwash_id)
    .fetch_all(db)
    .await?;
    Ok(bays)
}

pub async fn bay_slots(
    db: &SqlitePool,
    carwash_id: Uuid,
    bay_id: Uuid,
    date: NaiveDate,
) -> Result<Vec<TimeSlot>, ApiError> {
    let bay = get_bay(db, carwash_id, bay_id).await?;
    slots::list_for_bay_date(db, bay.id, date).await
}

pub async fn statistics(db: &SqlitePool) -> Result<Statistics, ApiError> {
    let (carwashes_count, total_bookings, confirmed_bookings): (i64, i64, i64) = sqlx::query_as(
        "SELECT
            (SELECT COUNT(*) FROM car_washes),
            (SELECT COUNT(*) FROM bookings),
            (SELECT COUNT(*) FROM bookings WHERE status = ?)",
    )
    .bind(BookingStatus::Confirmed)
    .fetch_one(db)
    .await?;

    Ok(Statistics {
        carwashes_count,
        total_bookings,
        confirmed_bookings,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db;

    pub async fn seed_carwash(db: &SqlitePool, name: &str, start: &str, end: &str) -> CarWash {
        create(
            db,
            CreateCarWashRequest {
                name: name.into(),
                address: "Lenina 1".into(),
                phone_number: "+79991234567".into(),
                working_hours: WorkingHoursInput {
                    start: start.into(),
                    end: end.into(),
                },
            },
        )
        .await
        .unwrap()
    }

    pub async fn seed_bay(db: &SqlitePool, carwash: &CarWash, number: i64) -> WashBay {
        let bay = WashBay {
            id: Uuid::new_v4(),
            car_wash_id: carwash.id,
            bay_number: number,
            bay_type: "standard".into(),
            is_active: true,
        };
        sqlx::query(
            "INSERT INTO wash_bays (id, car_wash_id, bay_number, bay_type, is_active)
             VALUES (?, ?, ?, ?, 1)",
        )
        .bind(bay.id)
        .bind(bay.car_wash_id)
        .bind(bay.bay_number)
        .bind(&bay.bay_type)
        .execute(db)
        .await
        .unwrap();
        bay
    }

    fn hours(start: &str, end: &str) -> WorkingHoursInput {
        WorkingHoursInput {
            start: start.into(),
            end: end.into(),
        }
    }

    #[test]
    fn test_parse_working_hours() {
        let (s, e) = parse_working_hours(&hours("08:00", "21:30")).unwrap();
        assert_eq!(s, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(e, NaiveTime::from_hms_opt(21, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_working_hours_rejects_bad_input() {
        assert!(parse_working_hours(&hours("20:00", "08:00")).is_err());
        assert!(parse_working_hours(&hours("08:00", "08:00")).is_err());
        assert!(parse_working_hours(&hours("25:00", "26:00")).is_err());
        assert!(parse_working_hours(&hours("8", "20:00")).is_err());
    }

    #[tokio::test]
    async fn test_create_and_duplicate_name() {
        let pool = db::memory_pool().await.unwrap();
        let cw = seed_carwash(&pool, "Foam", "08:00", "20:00").await;
        assert_eq!(cw.name, "Foam");
        assert!(cw.is_active);

        let dup = create(
            &pool,
            CreateCarWashRequest {
                name: " Foam ".into(),
                address: "Other".into(),
                phone_number: "+79990000000".into(),
                working_hours: hours("09:00", "18:00"),
            },
        )
        .await;
        assert!(matches!(dup, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_create_validates_phone() {
        let pool = db::memory_pool().await.unwrap();
        let res = create(
            &pool,
            CreateCarWashRequest {
                name: "Foam".into(),
                address: "Lenina 1".into(),
                phone_number: "89991234567".into(),
                working_hours: hours("08:00", "20:00"),
            },
        )
        .await;
        assert!(matches!(res, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_update_partial() {
        let pool = db::memory_pool().await.unwrap();
        let cw = seed_carwash(&pool, "Foam", "08:00", "20:00").await;
        let updated = update(
            &pool,
            cw.id,
            UpdateCarWashRequest {
                address: Some("Mira 5".into()),
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.name, "Foam");
        assert_eq!(updated.address, "Mira 5");
        assert!(!updated.is_active);

        let empty = update(&pool, cw.id, UpdateCarWashRequest::default()).await;
        assert!(matches!(empty, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_update_rejects_taken_name() {
        let pool = db::memory_pool().await.unwrap();
        seed_carwash(&pool, "Foam", "08:00", "20:00").await;
        let other = seed_carwash(&pool, "Shine", "08:00", "20:00").await;
        let res = update(
            &pool,
            other.id,
            UpdateCarWashRequest {
                name: Some("Foam".into()),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(res, Err(ApiError::BadRequest(_))));

        // Renaming to its own name is fine.
        let same = update(
            &pool,
            other.id,
            UpdateCarWashRequest {
                name: Some("Shine".into()),
                ..Default::default()
            },
        )
        .await;
        assert!(same.is_ok());
    }

    #[tokio::test]
    async fn test_add_bay_is_atomic() {
        let pool = db::memory_pool().await.unwrap();
        let cw = seed_carwash(&pool, "Foam", "08:00", "09:00").await;
        let cfg = Config::for_tests();
        let today = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let req = || CreateWashBayRequest {
            bay_number: 1,
            bay_type: None,
        };

        sqlx::query(
            "CREATE TRIGGER no_slots BEFORE INSERT ON time_slots
             BEGIN SELECT RAISE(ABORT, 'slots unavailable'); END",
        )
        .execute(&pool)
        .await
        .unwrap();
        let failed = add_bay(&pool, &cfg, cw.id, req(), today).await;
        assert!(matches!(failed, Err(ApiError::Database(_))));
        assert!(bays(&pool, cw.id).await.unwrap().is_empty());

        sqlx::query("DROP TRIGGER no_slots")
            .execute(&pool)
            .await
            .unwrap();
        let created = add_bay(&pool, &cfg, cw.id, req(), today).await.unwrap();
        assert_eq!(created.bay.bay_number, 1);
        assert!(created.slots_created > 0);

        match add_bay(&pool, &cfg, cw.id, req(), today).await {
            Err(ApiError::BadRequest(msg)) => assert!(msg.contains("slots endpoint")),
            other => panic!("expected duplicate bay error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_cascades_and_404() {
        let pool = db::memory_pool().await.unwrap();
        let cw = seed_carwash(&pool, "Foam", "08:00", "09:00").await;
        let cfg = Config::for_tests();
        let today = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        add_bay(
            &pool,
            &cfg,
            cw.id,
            CreateWashBayRequest {
                bay_number: 1,
                bay_type: None,
            },
            today,
        )
        .await
        .unwrap();

        let deleted = delete(&pool, cw.id).await.unwrap();
        assert_eq!(deleted.status, "deleted");

        let slots_left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM time_slots")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(slots_left, 0);

        assert!(matches!(
            delete(&pool, cw.id).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_add_bay_generates_slots() {
        let pool = db::memory_pool().await.unwrap();
        let cw = seed_carwash(&pool, "Foam", "08:00", "10:00").await;
        let cfg = Config::for_tests();
        let today = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();

        let created = add_bay(
            &pool,
            &cfg,
            cw.id,
            CreateWashBayRequest {
                bay_number: 2,
                bay_type: Some("truck".into()),
            },
            today,
        )
        .await
        .unwrap();
        // 4 half-hour slots per day over the 2-day test horizon.
        assert_eq!(created.slots_created, 8);
        assert_eq!(created.bay.bay_type, "truck");

        let dup = add_bay(
            &pool,
            &cfg,
            cw.id,
            CreateWashBayRequest {
                bay_number: 2,
                bay_type: None,
            },
            today,
        )
        .await;
        assert!(matches!(dup, Err(ApiError::BadRequest(_))));

        let topped = regenerate_bay_slots(&pool, &cfg, cw.id, created.bay.id, Some(3), today)
            .await
            .unwrap();
        assert_eq!(topped.slots_created, 4);
    }

    #[tokio::test]
    async fn test_statistics_counts() {
        let pool = db::memory_pool().await.unwrap();
        seed_carwash(&pool, "Foam", "08:00", "20:00").await;
        seed_carwash(&pool, "Shine", "08:00", "20:00").await;
        let stats = statistics(&pool).await.unwrap();
        assert_eq!(stats.carwashes_count, 2);
        assert_eq!(stats.total_bookings, 0);
        assert_eq!(stats.confirmed_bookings, 0);
    }

    #[tokio::test]
    async fn test_slots_count_unknown_carwash() {
        let pool = db::memory_pool().await.unwrap();
        let now = NaiveDate::from_ymd_opt(2030, 1, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let res = slots_count(&pool, Uuid::new_v4(), None, now).await;
        assert!(matches!(res, Err(ApiError::NotFound(_))));
    }
}
