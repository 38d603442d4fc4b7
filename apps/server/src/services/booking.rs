//! Booking lifecycle: reserve, cancel, run the wash, expire unpaid holds.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{carwash, page_count, paging, pricing, required_text, slots, to_moscow, wash_type};
use crate::auth::constant_time_eq;
use crate::config::Config;
use crate::error::ApiError;
use crate::models::*;
use crate::payment_gateway::PaymentGateway;

pub const CURRENCY: &str = "RUB";

/// Cancellation is allowed up to this many minutes before the slot starts.
const CANCEL_CUTOFF_MINUTES: i64 = 120;

const NOT_FOUND: &str = "Booking not found";
const DEFAULT_CANCEL_REASON: &str = "cancelled by user";
pub const EXPIRED_REASON: &str = "payment window expired";

const DETAILS_SELECT: &str = "SELECT b.*,
        c.name AS car_wash_name,
        c.address AS car_wash_address,
        w.name AS wash_type_name,
        wb.bay_number AS bay_number
    FROM bookings b
    JOIN car_washes c ON c.id = b.car_wash_id
    JOIN wash_types w ON w.id = b.wash_type_id
    JOIN wash_bays wb ON wb.id = b.wash_bay_id";

/// Strip separators and force a `+7` prefix.
pub fn normalize_phone(raw: &str) -> Result<String, ApiError> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();

    let phone = if let Some(rest) = compact.strip_prefix('8') {
        format!("+7{rest}")
    } else if compact.starts_with("+7") {
        compact
    } else {
        format!("+7{compact}")
    };

    if phone.chars().count() < 10 {
        return Err(ApiError::bad_request("Invalid phone number"));
    }
    Ok(phone)
}

pub fn normalize_plate(raw: &str) -> Result<String, ApiError> {
    let plate: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    let len = plate.chars().count();
    if !(1..=20).contains(&len) {
        return Err(ApiError::bad_request("car_plate must be 1-20 characters"));
    }
    Ok(plate)
}

/// Short code shown to the car wash at check-in.
fn make_qr_code(id: Uuid, phone: &str, created_at: DateTime<Utc>) -> String {
    let digest = Sha256::digest(format!("{}:{}:{}", id, phone, created_at.to_rfc3339()));
    URL_SAFE_NO_PAD.encode(&digest[..16])
}

/// Codes are only handed out once the booking is paid for.
fn expose_qr(mut details: BookingWithDetails) -> BookingWithDetails {
    if matches!(
        details.booking.status,
        BookingStatus::Confirmed | BookingStatus::InProgress
    ) {
        details.qr_code = Some(details.booking.qr_code.clone());
    }
    details
}

fn minutes_until_start(booking: &Booking, now: DateTime<Utc>) -> i64 {
    let start = booking.slot_date.and_time(booking.start_time);
    (start - to_moscow(now)).num_minutes()
}

pub async fn get(db: &SqlitePool, id: Uuid) -> Result<Booking, ApiError> {
    sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found(NOT_FOUND))
}

pub async fn find_by_payment_id(
    db: &SqlitePool,
    payment_id: &str,
) -> Result<Option<Booking>, ApiError> {
    let booking = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE payment_id = ?")
        .bind(payment_id)
        .fetch_optional(db)
        .await?;
    Ok(booking)
}

async fn details(db: &SqlitePool, id: Uuid) -> Result<BookingWithDetails, ApiError> {
    let sql = format!("{DETAILS_SELECT} WHERE b.id = ?");
    sqlx::query_as::<_, BookingWithDetails>(&sql)
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found(NOT_FOUND))
}

pub async fn get_with_details(db: &SqlitePool, id: Uuid) -> Result<BookingWithDetails, ApiError> {
    details(db, id).await.map(expose_qr)
}

pub async fn create(
    db: &SqlitePool,
    config: &Config,
    req: CreateBookingRequest,
    now: DateTime<Utc>,
) -> Result<BookingConfirmation, ApiError> {
    let guest_name = required_text("guest_name", &req.guest_name, 100)?;
    let car_model = required_text("car_model", &req.car_model, 50)?;
    let guest_phone = normalize_phone(&req.guest_phone)?;
    let car_plate = normalize_plate(&req.car_plate)?;
    let notes = req
        .notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let slot = slots::get(db, req.time_slot_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Time slot not found"))?;
    let carwash = carwash::get(db, req.car_wash_id).await?;
    let wash_type = wash_type::get(db, req.wash_type_id).await?;

    if slot.car_wash_id != carwash.id {
        return Err(ApiError::bad_request(
            "Time slot does not belong to this car wash",
        ));
    }
    if !carwash.is_active {
        return Err(ApiError::bad_request("Car wash is not accepting bookings"));
    }
    if slot.status != SlotStatus::Available {
        return Err(ApiError::conflict("Time slot is unavailable"));
    }
    if slot.slot_date.and_time(slot.start_time) < to_moscow(now) {
        return Err(ApiError::bad_request("Time slot has already started"));
    }

    let user_id: Option<Uuid> = match req.telegram_id {
        Some(telegram_id) => {
            sqlx::query_scalar("SELECT id FROM users WHERE telegram_id = ?")
                .bind(telegram_id)
                .fetch_optional(db)
                .await?
        }
        None => None,
    };

    let price = pricing::calculate_price(wash_type.base_price, 0);
    let id = Uuid::new_v4();
    let expires_at = now + Duration::minutes(config.booking_ttl_minutes);
    let qr_code = make_qr_code(id, &guest_phone, now);

    let mut tx = db.begin().await?;

    let reserved = sqlx::query("UPDATE time_slots SET status = ? WHERE id = ? AND status = ?")
        .bind(SlotStatus::Reserved)
        .bind(slot.id)
        .bind(SlotStatus::Available)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if reserved == 0 {
        return Err(ApiError::conflict("Time slot is unavailable"));
    }

    sqlx::query(
        "INSERT INTO bookings (
            id, user_id, car_wash_id, wash_bay_id, time_slot_id, wash_type_id,
            guest_phone, guest_name, car_plate, car_model,
            slot_date, start_time, end_time, duration_minutes,
            price, discount, final_price, status, payment_status,
            qr_code, notes, expires_at, created_at, updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(user_id)
    .bind(carwash.id)
    .bind(slot.wash_bay_id)
    .bind(slot.id)
    .bind(wash_type.id)
    .bind(&guest_phone)
    .bind(&guest_name)
    .bind(&car_plate)
    .bind(&car_model)
    .bind(slot.slot_date)
    .bind(slot.start_time)
    .bind(slot.end_time)
    .bind(wash_type.duration_minutes)
    .bind(price.price)
    .bind(price.discount)
    .bind(price.final_price)
    .bind(BookingStatus::PendingPayment)
    .bind(PaymentStatus::Pending)
    .bind(&qr_code)
    .bind(&notes)
    .bind(expires_at)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        booking_id = %id,
        carwash_id = %carwash.id,
        slot_id = %slot.id,
        final_price = price.final_price,
        "booking created"
    );

    let mut booking = details(db, id).await?;
    booking.qr_code = Some(qr_code.clone());

    Ok(BookingConfirmation {
        payment: PaymentInfo {
            booking_id: id,
            amount: price.final_price,
            prepayment_amount: pricing::prepayment(price.final_price),
            currency: CURRENCY,
            payment_url: "/api/v1/payments/create".into(),
            expires_at,
        },
        booking,
        qr_code,
    })
}

pub async fn calculate_price(
    db: &SqlitePool,
    req: CalculatePriceRequest,
) -> Result<PriceQuote, ApiError> {
    slots::get(db, req.time_slot_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Time slot not found"))?;
    let wash_type = wash_type::get(db, req.wash_type_id).await?;

    let price = pricing::calculate_price(wash_type.base_price, 0);
    Ok(PriceQuote {
        price: price.price,
        discount: price.discount,
        final_price: price.final_price,
        prepayment_amount: pricing::prepayment(price.final_price),
        duration_minutes: wash_type.duration_minutes,
        currency: CURRENCY,
    })
}

pub async fn list_by_phone(
    db: &SqlitePool,
    query: MyBookingsQuery,
) -> Result<Page<BookingWithDetails>, ApiError> {
    let phone = normalize_phone(&query.phone)?;
    let (page, per_page, offset) = paging(query.page, query.per_page)?;

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM bookings b WHERE b.guest_phone = ? AND (? IS NULL OR b.status = ?)",
    )
    .bind(&phone)
    .bind(query.status)
    .bind(query.status)
    .fetch_one(db)
    .await?;

    let sql = format!(
        "{DETAILS_SELECT}
         WHERE b.guest_phone = ? AND (? IS NULL OR b.status = ?)
         ORDER BY b.slot_date DESC, b.start_time DESC
         LIMIT ? OFFSET ?"
    );
    let items = sqlx::query_as::<_, BookingWithDetails>(&sql)
        .bind(&phone)
        .bind(query.status)
        .bind(query.status)
        .bind(per_page)
        .bind(offset)
        .fetch_all(db)
        .await?;

    Ok(Page {
        items: items.into_iter().map(expose_qr).collect(),
        total,
        page,
        per_page,
        pages: page_count(total, per_page),
    })
}

pub async fn list_for_carwash(
    db: &SqlitePool,
    carwash_id: Uuid,
    query: CarwashBookingsQuery,
) -> Result<Page<BookingWithDetails>, ApiError> {
    carwash::get(db, carwash_id).await?;
    let (page, per_page, offset) = paging(query.page, query.per_page)?;
    if let (Some(from), Some(to)) = (query.date_from, query.date_to) {
        if from > to {
            return Err(ApiError::bad_request("date_from must not be after date_to"));
        }
    }

    const FILTER: &str = "b.car_wash_id = ?
        AND (? IS NULL OR b.slot_date >= ?)
        AND (? IS NULL OR b.slot_date <= ?)
        AND (? IS NULL OR b.status = ?)";

    let count_sql = format!("SELECT COUNT(*) FROM bookings b WHERE {FILTER}");
    let total: i64 = sqlx::query_scalar(&count_sql)
        .bind(carwash_id)
        .bind(query.date_from)
        .bind(query.date_from)
        .bind(query.date_to)
        .bind(query.date_to)
        .bind(query.status)
        .bind(query.status)
        .fetch_one(db)
        .await?;

    let sql = format!(
        "{DETAILS_SELECT} WHERE {FILTER}
         ORDER BY b.slot_date ASC, b.start_time ASC, wb.bay_number ASC
         LIMIT ? OFFSET ?"
    );
    let items = sqlx::query_as::<_, BookingWithDetails>(&sql)
        .bind(carwash_id)
        .bind(query.date_from)
        .bind(query.date_from)
        .bind(query.date_to)
        .bind(query.date_to)
        .bind(query.status)
        .bind(query.status)
        .bind(per_page)
        .bind(offset)
        .fetch_all(db)
        .await?;

    Ok(Page {
        items: items.into_iter().map(expose_qr).collect(),
        total,
        page,
        per_page,
        pages: page_count(total, per_page),
    })
}

pub async fn cancel(
    db: &SqlitePool,
    gateway: &dyn PaymentGateway,
    id: Uuid,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<CancelBookingResponse, ApiError> {
    let booking = get(db, id).await?;

    match booking.status {
        BookingStatus::Completed => {
            return Err(ApiError::bad_request("Completed bookings cannot be cancelled"))
        }
        BookingStatus::Cancelled => {
            return Err(ApiError::bad_request("Booking is already cancelled"))
        }
        _ => {}
    }

    let minutes_left = minutes_until_start(&booking, now);
    if minutes_left < CANCEL_CUTOFF_MINUTES {
        return Err(ApiError::bad_request(
            "Bookings can only be cancelled at least 2 hours before the start",
        ));
    }

    let reason = reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());

    let mut tx = db.begin().await?;
    let updated = sqlx::query(
        "UPDATE bookings
         SET status = ?, cancellation_reason = ?, cancelled_at = ?, updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(BookingStatus::Cancelled)
    .bind(&reason)
    .bind(now)
    .bind(now)
    .bind(id)
    .bind(booking.status)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if updated == 0 {
        return Err(ApiError::conflict("Booking was changed concurrently, retry"));
    }
    sqlx::query("UPDATE time_slots SET status = ? WHERE id = ?")
        .bind(SlotStatus::Available)
        .bind(booking.time_slot_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(booking_id = %id, %reason, "booking cancelled");

    let refund_status = match (&booking.payment_status, &booking.payment_id) {
        (PaymentStatus::Paid, Some(payment_id)) => {
            let amount = pricing::refundable_amount(
                pricing::prepayment(booking.final_price),
                minutes_left,
            );
            refund_after_cancel(db, gateway, &booking, payment_id, amount, &reason, now).await?
        }
        _ => RefundStatus::NotRequired,
    };

    Ok(CancelBookingResponse {
        status: BookingStatus::Cancelled,
        booking_id: id,
        refund_status,
    })
}

/// The cancellation already committed, so a gateway failure only shows up in the status.
async fn refund_after_cancel(
    db: &SqlitePool,
    gateway: &dyn PaymentGateway,
    booking: &Booking,
    payment_id: &str,
    amount: i64,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<RefundStatus, ApiError> {
    let prepaid = pricing::prepayment(booking.final_price);
    let amount = amount.min(prepaid - booking.refunded_amount);
    if amount <= 0 {
        return Ok(RefundStatus::NotRequired);
    }
    if !claim_refund(db, booking.id, amount, prepaid, now).await? {
        return Ok(RefundStatus::NotRequired);
    }

    let booking_id = booking.id;
    match gateway.create_refund(payment_id, amount, Some(reason)).await {
        Ok(refund) => {
            let succeeded = refund.status == "succeeded";
            record_refund(db, booking_id, &refund.id, succeeded, prepaid, now).await?;
            tracing::info!(%booking_id, refund_id = %refund.id, status = %refund.status, amount, "refund requested");
            Ok(if succeeded {
                RefundStatus::Succeeded
            } else {
                RefundStatus::Processing
            })
        }
        Err(e) => {
            release_refund(db, booking_id, amount, now).await?;
            tracing::error!(%booking_id, payment_id, error = %e, "refund failed");
            Ok(RefundStatus::Failed)
        }
    }
}

/// Reserve `amount` of a paid prepayment before asking the provider for it.
/// Returns false when the booking is not paid or the claims would exceed `prepaid`.
pub(crate) async fn claim_refund(
    db: &SqlitePool,
    booking_id: Uuid,
    amount: i64,
    prepaid: i64,
    now: DateTime<Utc>,
) -> Result<bool, ApiError> {
    let claimed = sqlx::query(
        "UPDATE bookings
         SET refunded_amount = refunded_amount + ?, updated_at = ?
         WHERE id = ? AND payment_status = ? AND refunded_amount + ? <= ?",
    )
    .bind(amount)
    .bind(now)
    .bind(booking_id)
    .bind(PaymentStatus::Paid)
    .bind(amount)
    .bind(prepaid)
    .execute(db)
    .await?
    .rows_affected();
    Ok(claimed == 1)
}

/// Undo a claim the provider rejected.
pub(crate) async fn release_refund(
    db: &SqlitePool,
    booking_id: Uuid,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    sqlx::query(
        "UPDATE bookings SET refunded_amount = MAX(refunded_amount - ?, 0), updated_at = ? WHERE id = ?",
    )
    .bind(amount)
    .bind(now)
    .bind(booking_id)
    .execute(db)
    .await?;
    Ok(())
}

/// Store the provider's refund id. A succeeded refund that covers the whole
/// prepayment marks the payment refunded.
pub(crate) async fn record_refund(
    db: &SqlitePool,
    booking_id: Uuid,
    refund_id: &str,
    succeeded: bool,
    prepaid: i64,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    sqlx::query(
        "UPDATE bookings
         SET refund_id = ?,
             payment_status = CASE WHEN ? AND refunded_amount >= ? THEN ? ELSE payment_status END,
             updated_at = ?
         WHERE id = ?",
    )
    .bind(refund_id)
    .bind(succeeded)
    .bind(prepaid)
    .bind(PaymentStatus::Refunded)
    .bind(now)
    .bind(booking_id)
    .execute(db)
    .await?;
    Ok(())
}

pub(crate) async fn mark_refunded(
    db: &SqlitePool,
    booking_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    sqlx::query("UPDATE bookings SET payment_status = ?, updated_at = ? WHERE id = ?")
        .bind(PaymentStatus::Refunded)
        .bind(now)
        .bind(booking_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Move a booking along `from -> to`, refusing any other starting state.
async fn transition(
    db: &SqlitePool,
    id: Uuid,
    from: BookingStatus,
    to: BookingStatus,
    now: DateTime<Utc>,
) -> Result<BookingStatusChange, ApiError> {
    let booking = get(db, id).await?;
    if booking.status != from {
        return Err(ApiError::bad_request(format!(
            "Booking is {}, expected {}",
            booking.status.as_str(),
            from.as_str()
        )));
    }

    let completed_at = (to == BookingStatus::Completed).then_some(now);
    let updated = sqlx::query(
        "UPDATE bookings SET status = ?, completed_at = COALESCE(?, completed_at), updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(to)
    .bind(completed_at)
    .bind(now)
    .bind(id)
    .bind(from)
    .execute(db)
    .await?
    .rows_affected();
    if updated == 0 {
        return Err(ApiError::conflict("Booking was changed concurrently, retry"));
    }

    tracing::info!(booking_id = %id, from = from.as_str(), to = to.as_str(), "booking status changed");
    Ok(BookingStatusChange {
        booking_id: id,
        status: to,
    })
}

pub async fn start_wash(
    db: &SqlitePool,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<BookingStatusChange, ApiError> {
    transition(db, id, BookingStatus::Confirmed, BookingStatus::InProgress, now).await
}

pub async fn complete_wash(
    db: &SqlitePool,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<BookingStatusChange, ApiError> {
    transition(db, id, BookingStatus::InProgress, BookingStatus::Completed, now).await
}

pub async fn verify_qr(db: &SqlitePool, id: Uuid, code: &str) -> Result<VerifyQrResponse, ApiError> {
    let booking = get(db, id).await?;
    let valid = constant_time_eq(code.trim().as_bytes(), booking.qr_code.as_bytes());

    if !valid {
        tracing::warn!(booking_id = %id, "QR code mismatch");
    }

    Ok(VerifyQrResponse {
        valid,
        booking: QrBookingSummary {
            id: booking.id,
            guest_name: booking.guest_name,
            car_plate: booking.car_plate,
            slot_date: booking.slot_date,
            start_time: booking.start_time,
            status: booking.status,
        },
    })
}

/// Cancel unpaid bookings whose payment window has passed and free their slots.
pub async fn expire_pending(db: &SqlitePool, now: DateTime<Utc>) -> Result<u64, ApiError> {
    let pending: Vec<(Uuid, Uuid, DateTime<Utc>)> = sqlx::query_as(
        "SELECT id, time_slot_id, expires_at FROM bookings WHERE status = ?",
    )
    .bind(BookingStatus::PendingPayment)
    .fetch_all(db)
    .await?;

    let mut expired = 0;
    for (id, slot_id, expires_at) in pending {
        if expires_at >= now {
            continue;
        }

        let mut tx = db.begin().await?;
        let updated = sqlx::query(
            "UPDATE bookings
             SET status = ?, payment_status = ?, cancellation_reason = ?,
                 cancelled_at = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(BookingStatus::Cancelled)
        .bind(PaymentStatus::Failed)
        .bind(EXPIRED_REASON)
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(BookingStatus::PendingPayment)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 1 {
            sqlx::query("UPDATE time_slots SET status = ? WHERE id = ? AND status = ?")
                .bind(SlotStatus::Available)
                .bind(slot_id)
                .bind(SlotStatus::Reserved)
                .execute(&mut *tx)
                .await?;
            expired += 1;
        }
        tx.commit().await?;
    }

    if expired > 0 {
        tracing::info!(expired, "expired unpaid bookings");
    }
    Ok(expired)
}
