use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{CarWash, SlotStatus, SlotWithBay, TimeSlot, WashBay};

/// `(start, end)` pairs from `open` while `start < close`, every `step` minutes.
/// The last slot may end after `close`; a slot crossing midnight ends the day.
pub fn slot_times(open: NaiveTime, close: NaiveTime, step_minutes: u32) -> Vec<(NaiveTime, NaiveTime)> {
    let mut out = Vec::new();
    if step_minutes == 0 {
        return out;
    }
    let step = Duration::minutes(i64::from(step_minutes));
    let mut start = open;
    while start < close {
        let (end, wrapped) = start.overflowing_add_signed(step);
        out.push((start, end));
        if wrapped != 0 {
            break;
        }
        start = end;
    }
    out
}

/// Create slots for one bay for `days_ahead` days starting at `from`.
/// Existing `(bay, date, start)` rows are left alone. Returns rows inserted.
pub async fn generate_for_bay(
    db: &SqlitePool,
    carwash: &CarWash,
    bay: &WashBay,
    from: NaiveDate,
    days_ahead: u32,
    step_minutes: u32,
) -> Result<u64, ApiError> {
    let mut tx = db.begin().await?;
    let inserted = insert_for_bay(&mut tx, carwash, bay, from, days_ahead, step_minutes).await?;
    tx.commit().await?;
    Ok(inserted)
}

/// Slot inserts for callers that own the transaction. Existing slots are kept.
pub(crate) async fn insert_for_bay(
    conn: &mut SqliteConnection,
    carwash: &CarWash,
    bay: &WashBay,
    from: NaiveDate,
    days_ahead: u32,
    step_minutes: u32,
) -> Result<u64, ApiError> {
    let times = slot_times(
        carwash.working_hours_start,
        carwash.working_hours_end,
        step_minutes,
    );

    let mut inserted = 0;
    for day in from.iter_days().take(days_ahead as usize) {
        for (start, end) in &times {
            inserted += sqlx::query(
                "INSERT OR IGNORE INTO time_slots
                 (id, car_wash_id, wash_bay_id, slot_date, start_time, end_time, status)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4())
            .bind(carwash.id)
            .bind(bay.id)
            .bind(day)
            .bind(start)
            .bind(end)
            .bind(SlotStatus::Available)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        }
    }

    tracing::info!(
        carwash_id = %carwash.id,
        bay_number = bay.bay_number,
        inserted,
        "generated time slots"
    );
    Ok(inserted)
}

/// Earliest bookable start on `date`, or `None` when the whole day is past.
fn earliest_start(date: NaiveDate, now: NaiveDateTime) -> Option<NaiveTime> {
    match date.cmp(&now.date()) {
        std::cmp::Ordering::Less => None,
        std::cmp::Ordering::Equal => Some(now.time()),
        std::cmp::Ordering::Greater => Some(NaiveTime::MIN),
    }
}

pub async fn count_available(
    db: &SqlitePool,
    carwash_id: Uuid,
    date: NaiveDate,
    now: NaiveDateTime,
) -> Result<i64, ApiError> {
    let Some(min_start) = earliest_start(date, now) else {
        return Ok(0);
    };

    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM time_slots s
         JOIN wash_bays b ON b.id = s.wash_bay_id
         WHERE s.car_wash_id = ? AND s.slot_date = ? AND s.status = ?
           AND s.start_time >= ? AND b.is_active = 1",
    )
    .bind(carwash_id)
    .bind(date)
    .bind(SlotStatus::Available)
    .bind(min_start)
    .fetch_one(db)
    .await?;

    Ok(count)
}

pub async fn list_available(
    db: &SqlitePool,
    carwash_id: Uuid,
    date: NaiveDate,
    now: NaiveDateTime,
) -> Result<Vec<SlotWithBay>, ApiError> {
    let Some(min_start) = earliest_start(date, now) else {
        return Ok(Vec::new());
    };

    let slots = sqlx::query_as::<_, SlotWithBay>(
        "SELECT s.id, s.wash_bay_id, b.bay_number, s.slot_date, s.start_time, s.end_time, s.status
         FROM time_slots s
         JOIN wash_bays b ON b.id = s.wash_bay_id
         WHERE s.car_wash_id = ? AND s.slot_date = ? AND s.status = ?
           AND s.start_time >= ? AND b.is_active = 1
         ORDER BY s.start_time ASC, b.bay_number ASC",
    )
    .bind(carwash_id)
    .bind(date)
    .bind(SlotStatus::Available)
    .bind(min_start)
    .fetch_all(db)
    .await?;

    Ok(slots)
}

/// Every slot of one bay on `date`, whatever its status. Admin view.
pub async fn list_for_bay_date(
    db: &SqlitePool,
    bay_id: Uuid,
    date: NaiveDate,
) -> Result<Vec<TimeSlot>, ApiError> {
    let slots = sqlx::query_as::<_, TimeSlot>(
        "SELECT * FROM time_slots WHERE wash_bay_id = ? AND slot_date = ? ORDER BY start_time ASC",
    )
    .bind(bay_id)
    .bind(date)
    .fetch_all(db)
    .await?;
    Ok(slots)
}

pub async fn get(db: &SqlitePool, slot_id: Uuid) -> Result<Option<TimeSlot>, ApiError> {
    let slot = sqlx::query_as::<_, TimeSlot>("SELECT * FROM time_slots WHERE id = ?")
        .bind(slot_id)
        .fetch_optional(db)
        .await?;
    Ok(slot)
}
