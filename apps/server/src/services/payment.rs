use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{booking, pricing, to_moscow};
use crate::error::ApiError;
use crate::models::*;
use crate::notify::{escape_html, Notifier};
use crate::payment_gateway::{format_rub, verify_webhook_signature, NewPayment, PaymentGateway};

const PAYMENT_CANCELED_REASON: &str = "payment canceled";
const SLOT_LOST_REASON: &str = "slot released before payment arrived";

pub async fn create_payment(
    db: &SqlitePool,
    gateway: &dyn PaymentGateway,
    req: CreatePaymentRequest,
    default_return_url: &str,
    now: DateTime<Utc>,
) -> Result<PaymentResponse, ApiError> {
    let booking = booking::get(db, req.booking_id).await?;

    if booking.payment_status == PaymentStatus::Paid {
        return Err(ApiError::bad_request("Booking is already paid"));
    }
    if booking.status == BookingStatus::Cancelled {
        return Err(ApiError::bad_request("Booking is cancelled"));
    }

    let amount = pricing::prepayment(booking.final_price);
    let payment = gateway
        .create_payment(&NewPayment {
            booking_id: booking.id,
            amount,
            description: format!(
                "Car wash prepayment {} {}",
                booking.slot_date.format("%d.%m.%Y"),
                booking.start_time.format("%H:%M")
            ),
            return_url: req
                .return_url
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| default_return_url.to_string()),
        })
        .await?;

    sqlx::query("UPDATE bookings SET payment_id = ?, updated_at = ? WHERE id = ?")
        .bind(&payment.id)
        .bind(now)
        .bind(booking.id)
        .execute(db)
        .await?;

    tracing::info!(booking_id = %booking.id, payment_id = %payment.id, amount, "payment created");

    Ok(PaymentResponse {
        payment_id: payment.id,
        booking_id: booking.id,
        amount,
        currency: booking::CURRENCY,
        status: payment.status,
        confirmation_url: payment.confirmation_url,
        created_at: now,
    })
}

pub async fn payment_status(
    gateway: &dyn PaymentGateway,
    payment_id: &str,
) -> Result<PaymentStatusResponse, ApiError> {
    let status = gateway.get_payment(payment_id).await?;
    Ok(PaymentStatusResponse {
        payment_id: payment_id.to_string(),
        status: status.status,
        paid: status.paid,
    })
}

/// Result of applying a successful payment.
#[derive(Debug, PartialEq)]
pub(crate) enum PaidOutcome {
    /// Booking moved to confirmed and its slot to booked.
    Confirmed,
    /// Booking was already past pending; nothing changed.
    AlreadyApplied(BookingStatus),
    /// Booking expired and its slot was taken meanwhile. Money is kept as paid for a refund.
    SlotLost,
}

/// Current booking row as seen by the open transaction. Callers hold older
/// snapshots, so every decision below is made on this one.
async fn reload(tx: &mut sqlx::SqliteConnection, id: Uuid) -> Result<Booking, ApiError> {
    sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = ?")
        .bind(id)
        .fetch_optional(tx)
        .await?
        .ok_or_else(|| ApiError::not_found("Booking not found"))
}

fn changed_concurrently() -> ApiError {
    ApiError::conflict("Booking was changed concurrently, retry")
}

pub(crate) async fn apply_payment_succeeded(
    db: &SqlitePool,
    booking: &Booking,
    now: DateTime<Utc>,
) -> Result<PaidOutcome, ApiError> {
    let mut tx = db.begin().await?;
    let current = reload(&mut tx, booking.id).await?;

    // A refunded or otherwise settled cancellation is never revived.
    let settled = matches!(current.payment_status, PaymentStatus::Paid | PaymentStatus::Refunded);
    let outcome = match current.status {
        // A pending booking owns its reserved slot. An expired one competes
        // with new reservations and only gets the slot back while it is free.
        BookingStatus::PendingPayment | BookingStatus::Cancelled
            if !(settled && current.status == BookingStatus::Cancelled) =>
        {
            let (held, free) = if current.status == BookingStatus::PendingPayment {
                (SlotStatus::Reserved, SlotStatus::Available)
            } else {
                (SlotStatus::Available, SlotStatus::Available)
            };
            let taken = sqlx::query(
                "UPDATE time_slots SET status = ? WHERE id = ? AND status IN (?, ?)",
            )
            .bind(SlotStatus::Booked)
            .bind(current.time_slot_id)
            .bind(held)
            .bind(free)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if taken == 1 {
                PaidOutcome::Confirmed
            } else {
                PaidOutcome::SlotLost
            }
        }
        other => PaidOutcome::AlreadyApplied(other),
    };

    let updated = match outcome {
        PaidOutcome::Confirmed => sqlx::query(
            "UPDATE bookings
             SET status = ?, payment_status = ?, cancellation_reason = NULL,
                 cancelled_at = NULL, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(BookingStatus::Confirmed)
        .bind(PaymentStatus::Paid)
        .bind(now)
        .bind(current.id)
        .bind(current.status)
        .execute(&mut *tx)
        .await?
        .rows_affected(),
        PaidOutcome::SlotLost => sqlx::query(
            "UPDATE bookings
             SET status = ?, payment_status = ?, cancellation_reason = COALESCE(cancellation_reason, ?),
                 cancelled_at = COALESCE(cancelled_at, ?), updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(BookingStatus::Cancelled)
        .bind(PaymentStatus::Paid)
        .bind(SLOT_LOST_REASON)
        .bind(now)
        .bind(now)
        .bind(current.id)
        .bind(current.status)
        .execute(&mut *tx)
        .await?
        .rows_affected(),
        PaidOutcome::AlreadyApplied(_) if settled => 1,
        PaidOutcome::AlreadyApplied(_) => sqlx::query(
            "UPDATE bookings SET payment_status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(PaymentStatus::Paid)
        .bind(now)
        .bind(current.id)
        .bind(current.status)
        .execute(&mut *tx)
        .await?
        .rows_affected(),
    };
    if updated == 0 {
        return Err(changed_concurrently());
    }

    tx.commit().await?;

    if outcome == PaidOutcome::SlotLost {
        tracing::warn!(booking_id = %booking.id, "payment arrived after the slot was released");
    }
    Ok(outcome)
}

/// Staff message for a new paid booking. Guest fields are free text.
fn paid_booking_alert(booking: &Booking, when: &str) -> String {
    format!(
        "✅ <b>New paid booking</b>\n{} · {}\n{} {}\n{}",
        when,
        escape_html(&booking.guest_name),
        escape_html(&booking.car_model),
        escape_html(&booking.car_plate),
        escape_html(&booking.guest_phone)
    )
}

async fn notify_confirmed(db: &SqlitePool, notifier: &Notifier, booking: &Booking) {
    let when = format!(
        "{} {}",
        booking.slot_date.format("%d.%m.%Y"),
        booking.start_time.format("%H:%M")
    );

    let admin_text = paid_booking_alert(booking, &when);
    notifier
        .notify_admins(db, booking.car_wash_id, &admin_text)
        .await;

    let Some(user_id) = booking.user_id else {
        return;
    };
    match sqlx::query_scalar::<_, i64>("SELECT telegram_id FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(db)
        .await
    {
        Ok(Some(chat_id)) => {
            let text = format!(
                "✅ Payment received. Your wash is booked for <b>{}</b>.\nShow the QR code from /mybookings at the car wash.",
                when
            );
            notifier.send(chat_id, &text).await;
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(%user_id, error = %e, "could not load user for notification"),
    }
}

/// Apply a provider notification to booking, payment and slot state.
pub async fn process_webhook(
    db: &SqlitePool,
    notifier: &Notifier,
    secret: &str,
    body: &[u8],
    signature: Option<&str>,
    now: DateTime<Utc>,
) -> Result<WebhookOutcome, ApiError> {
    if let Some(signature) = signature {
        if !verify_webhook_signature(secret, body, signature) {
            tracing::warn!("webhook signature mismatch");
            return Err(ApiError::bad_request("Invalid signature"));
        }
    }

    let event: WebhookEvent = serde_json::from_slice(body)
        .map_err(|_| ApiError::bad_request("Invalid webhook payload"))?;

    let Some(raw_id) = event
        .object
        .metadata
        .get("booking_id")
        .and_then(|v| v.as_str())
    else {
        return Ok(WebhookOutcome::ignored("missing booking_id"));
    };
    let Ok(booking_id) = Uuid::parse_str(raw_id) else {
        return Ok(WebhookOutcome::ignored("invalid booking_id"));
    };
    let booking = match booking::get(db, booking_id).await {
        Ok(b) => b,
        Err(ApiError::NotFound(_)) => return Ok(WebhookOutcome::ignored("booking not found")),
        Err(e) => return Err(e),
    };

    tracing::info!(event = %event.event, %booking_id, "processing payment webhook");

    match event.event.as_str() {
        "payment.succeeded" => {
            let outcome = apply_payment_succeeded(db, &booking, now).await?;
            let status = match outcome {
                PaidOutcome::Confirmed => {
                    notify_confirmed(db, notifier, &booking).await;
                    BookingStatus::Confirmed
                }
                PaidOutcome::AlreadyApplied(status) => status,
                PaidOutcome::SlotLost => BookingStatus::Cancelled,
            };
            Ok(WebhookOutcome::booking(status))
        }
        "payment.canceled" => match apply_payment_canceled(db, &booking, now).await? {
            CanceledOutcome::Ignored(reason) => Ok(WebhookOutcome::ignored(reason)),
            CanceledOutcome::Released | CanceledOutcome::AlreadyCancelled => {
                Ok(WebhookOutcome::booking(BookingStatus::Cancelled))
            }
        },
        "refund.succeeded" => {
            booking::mark_refunded(db, booking.id, now).await?;
            Ok(WebhookOutcome::payment(PaymentStatus::Refunded))
        }
        _ => Ok(WebhookOutcome::ignored("unknown event")),
    }
}

/// Result of a provider-side payment cancellation.
#[derive(Debug, PartialEq)]
pub(crate) enum CanceledOutcome {
    /// Pending booking cancelled and its slot released.
    Released,
    /// Booking was already cancelled; only the payment is marked failed.
    AlreadyCancelled,
    /// Money arrived or the wash moved on; nothing changed.
    Ignored(&'static str),
}

pub(crate) async fn apply_payment_canceled(
    db: &SqlitePool,
    booking: &Booking,
    now: DateTime<Utc>,
) -> Result<CanceledOutcome, ApiError> {
    let mut tx = db.begin().await?;
    let current = reload(&mut tx, booking.id).await?;

    if matches!(current.payment_status, PaymentStatus::Paid | PaymentStatus::Refunded) {
        return Ok(CanceledOutcome::Ignored("booking already paid"));
    }

    let outcome = match current.status {
        BookingStatus::Cancelled => {
            let updated = sqlx::query(
                "UPDATE bookings SET payment_status = ?, updated_at = ? WHERE id = ? AND status = ?",
            )
            .bind(PaymentStatus::Failed)
            .bind(now)
            .bind(current.id)
            .bind(BookingStatus::Cancelled)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if updated == 0 {
                return Err(changed_concurrently());
            }
            CanceledOutcome::AlreadyCancelled
        }
        BookingStatus::PendingPayment => {
            let updated = sqlx::query(
                "UPDATE bookings
                 SET status = ?, payment_status = ?, cancellation_reason = ?,
                     cancelled_at = ?, updated_at = ?
                 WHERE id = ? AND status = ?",
            )
            .bind(BookingStatus::Cancelled)
            .bind(PaymentStatus::Failed)
            .bind(PAYMENT_CANCELED_REASON)
            .bind(now)
            .bind(now)
            .bind(current.id)
            .bind(BookingStatus::PendingPayment)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if updated == 0 {
                return Err(changed_concurrently());
            }
            sqlx::query("UPDATE time_slots SET status = ? WHERE id = ? AND status = ?")
                .bind(SlotStatus::Available)
                .bind(current.time_slot_id)
                .bind(SlotStatus::Reserved)
                .execute(&mut *tx)
                .await?;
            CanceledOutcome::Released
        }
        _ => return Ok(CanceledOutcome::Ignored("booking already in service")),
    };

    tx.commit().await?;
    tracing::info!(booking_id = %booking.id, ?outcome, "payment canceled");
    Ok(outcome)
}

pub async fn refund(
    db: &SqlitePool,
    gateway: &dyn PaymentGateway,
    req: RefundRequest,
    now: DateTime<Utc>,
) -> Result<RefundResponse, ApiError> {
    let booking = booking::get(db, req.booking_id).await?;

    if booking.payment_status != PaymentStatus::Paid {
        return Err(ApiError::bad_request("Booking is not paid"));
    }
    let Some(payment_id) = booking.payment_id.as_deref() else {
        return Err(ApiError::bad_request("Booking has no payment"));
    };

    let prepaid = pricing::prepayment(booking.final_price);
    let remaining = prepaid - booking.refunded_amount;
    if remaining <= 0 {
        return Err(ApiError::bad_request("Prepayment is already refunded"));
    }
    let minutes_left = (booking.slot_date.and_time(booking.start_time) - to_moscow(now)).num_minutes();
    let amount = req
        .amount
        .unwrap_or_else(|| pricing::refundable_amount(prepaid, minutes_left).min(remaining));

    if amount <= 0 {
        return Err(ApiError::bad_request("Refund amount must be positive"));
    }
    if amount > remaining {
        return Err(ApiError::bad_request(format!(
            "Refund amount exceeds the remaining prepayment of {} RUB",
            format_rub(remaining)
        )));
    }
    if !booking::claim_refund(db, booking.id, amount, prepaid, now).await? {
        return Err(ApiError::conflict("Another refund for this booking is in progress"));
    }

    let refund = match gateway
        .create_refund(payment_id, amount, req.reason.as_deref())
        .await
    {
        Ok(refund) => refund,
        Err(e) => {
            booking::release_refund(db, booking.id, amount, now).await?;
            return Err(e.into());
        }
    };
    booking::record_refund(db, booking.id, &refund.id, refund.status == "succeeded", prepaid, now)
        .await?;

    tracing::info!(booking_id = %booking.id, refund_id = %refund.id, amount, "refund requested");

    Ok(RefundResponse {
        refund_id: refund.id,
        booking_id: booking.id,
        amount,
        status: refund.status,
        created_at: now,
    })
}

pub fn demo_page(
    gateway: &dyn PaymentGateway,
    public_base_url: &str,
    query: DemoPayQuery,
) -> Result<DemoPayPage, ApiError> {
    if !gateway.is_demo() {
        return Err(ApiError::not_found("Demo payments are disabled"));
    }
    let confirm_url = format!(
        "{}/api/v1/payments/demo-confirm?payment_id={}",
        public_base_url, query.payment_id
    );
    Ok(DemoPayPage {
        message: "Demo payment",
        payment_id: query.payment_id,
        amount: query.amount,
        instructions: "POST to confirm_url to mark this payment as succeeded",
        confirm_url,
    })
}

pub async fn demo_confirm(
    db: &SqlitePool,
    gateway: &dyn PaymentGateway,
    notifier: &Notifier,
    payment_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<DemoConfirmResponse, ApiError> {
    if !gateway.is_demo() {
        return Err(ApiError::not_found("Demo payments are disabled"));
    }

    let booking = match payment_id.filter(|p| !p.is_empty()) {
        Some(pid) => booking::find_by_payment_id(db, pid).await?,
        None => {
            sqlx::query_as::<_, Booking>(
                "SELECT * FROM bookings WHERE status = ? ORDER BY created_at DESC LIMIT 1",
            )
            .bind(BookingStatus::PendingPayment)
            .fetch_optional(db)
            .await?
        }
    }
    .ok_or_else(|| ApiError::not_found("No pending booking to confirm"))?;

    let booking_status = match apply_payment_succeeded(db, &booking, now).await? {
        PaidOutcome::Confirmed => {
            notify_confirmed(db, notifier, &booking).await;
            BookingStatus::Confirmed
        }
        PaidOutcome::AlreadyApplied(status) => status,
        PaidOutcome::SlotLost => BookingStatus::Cancelled,
    };

    tracing::info!(booking_id = %booking.id, "demo payment confirmed");

    Ok(DemoConfirmResponse {
        status: "success",
        message: "Payment confirmed",
        booking_id: booking.id,
        booking_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db;
    use crate::error::GatewayError;
    use crate::payment_gateway::{
        sign_webhook, DemoGateway, GatewayPayment, GatewayPaymentStatus, GatewayRefund,
        YooKassaGateway,
    };
    use crate::services::booking::tests::{fixture, now, request, set_status};
    use chrono::Duration;

    const SECRET: &str = "demo_secret";

    /// Provider that accepts refunds asynchronously, or is down.
    struct SlowRefunds {
        down: bool,
    }

    #[async_trait::async_trait]
    impl PaymentGateway for SlowRefunds {
        async fn create_payment(&self, payment: &NewPayment) -> Result<GatewayPayment, GatewayError> {
            DemoGateway::new("").create_payment(payment).await
        }

        async fn get_payment(&self, payment_id: &str) -> Result<GatewayPaymentStatus, GatewayError> {
            DemoGateway::new("").get_payment(payment_id).await
        }

        async fn create_refund(
            &self,
            _payment_id: &str,
            _amount: i64,
            _reason: Option<&str>,
        ) -> Result<GatewayRefund, GatewayError> {
            if self.down {
                return Err(GatewayError::Api {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            Ok(GatewayRefund {
                id: "ref_pending".into(),
                status: "pending".into(),
            })
        }
    }

    async fn pending_booking(pool: &SqlitePool) -> (Booking, Uuid) {
        let fx = fixture(pool).await;
        let conf = booking::create(pool, &Config::for_tests(), request(&fx, 0), now())
            .await
            .unwrap();
        let b = booking::get(pool, conf.booking.booking.id).await.unwrap();
        (b, fx.slots[0].id)
    }

    fn event(name: &str, booking_id: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "event": name,
            "object": {"id": "pay_1", "status": "succeeded", "metadata": {"booking_id": booking_id}}
        }))
        .unwrap()
    }

    async fn slot_status(pool: &SqlitePool, id: Uuid) -> SlotStatus {
        sqlx::query_scalar("SELECT status FROM time_slots WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_payment_stores_id() {
        let pool = db::memory_pool().await.unwrap();
        let (b, _) = pending_booking(&pool).await;
        let gateway = DemoGateway::new("http://localhost:3000");

        let resp = create_payment(
            &pool,
            &gateway,
            CreatePaymentRequest {
                booking_id: b.id,
                return_url: None,
            },
            "https://example.com",
            now(),
        )
        .await
        .unwrap();
        assert_eq!(resp.amount, 75_001);
        assert_eq!(resp.status, "pending");
        assert!(resp.payment_id.starts_with("pay_"));
        let url = resp.confirmation_url.unwrap();
        assert!(url.starts_with("http://localhost:3000/api/v1/payments/demo-pay?payment_id=pay_"));
        assert!(url.ends_with("&amount=750.01"));

        let stored = booking::get(&pool, b.id).await.unwrap();
        assert_eq!(stored.payment_id.as_deref(), Some(resp.payment_id.as_str()));
    }

    #[tokio::test]
    async fn test_create_payment_rejects_paid_and_cancelled() {
        let pool = db::memory_pool().await.unwrap();
        let (b, _) = pending_booking(&pool).await;
        let gateway = DemoGateway::new("");
        let req = || CreatePaymentRequest {
            booking_id: b.id,
            return_url: None,
        };

        set_status(&pool, b.id, BookingStatus::Confirmed, true).await;
        let paid = create_payment(&pool, &gateway, req(), "", now()).await;
        assert!(matches!(paid, Err(ApiError::BadRequest(_))));

        set_status(&pool, b.id, BookingStatus::Cancelled, false).await;
        let cancelled = create_payment(&pool, &gateway, req(), "", now()).await;
        assert!(matches!(cancelled, Err(ApiError::BadRequest(_))));

        let missing = create_payment(
            &pool,
            &gateway,
            CreatePaymentRequest {
                booking_id: Uuid::new_v4(),
                return_url: None,
            },
            "",
            now(),
        )
        .await;
        assert!(matches!(missing, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_webhook_success_confirms_and_books_slot() {
        let pool = db::memory_pool().await.unwrap();
        let (b, slot_id) = pending_booking(&pool).await;
        let body = event("payment.succeeded", &b.id.to_string());

        let out = process_webhook(&pool, &Notifier::disabled(), SECRET, &body, None, now())
            .await
            .unwrap();
        assert_eq!(out, WebhookOutcome::booking(BookingStatus::Confirmed));

        let stored = booking::get(&pool, b.id).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert_eq!(slot_status(&pool, slot_id).await, SlotStatus::Booked);

        // Redelivery is harmless.
        let again = process_webhook(&pool, &Notifier::disabled(), SECRET, &body, None, now())
            .await
            .unwrap();
        assert_eq!(again, WebhookOutcome::booking(BookingStatus::Confirmed));
    }

    #[tokio::test]
    async fn test_webhook_signature_checked_when_present() {
        let pool = db::memory_pool().await.unwrap();
        let (b, _) = pending_booking(&pool).await;
        let body = event("payment.succeeded", &b.id.to_string());

        let bad = process_webhook(&pool, &Notifier::disabled(), SECRET, &body, Some("deadbeef"), now()).await;
        assert!(matches!(bad, Err(ApiError::BadRequest(_))));
        assert_eq!(
            booking::get(&pool, b.id).await.unwrap().status,
            BookingStatus::PendingPayment
        );

        let sig = sign_webhook(SECRET, &body);
        let good = process_webhook(&pool, &Notifier::disabled(), SECRET, &body, Some(&sig), now())
            .await
            .unwrap();
        assert_eq!(good.booking_status, Some(BookingStatus::Confirmed));
    }

    #[tokio::test]
    async fn test_webhook_ignores_unroutable_events() {
        let pool = db::memory_pool().await.unwrap();
        let n = Notifier::disabled();

        let no_meta = br#"{"event":"payment.succeeded","object":{"id":"x"}}"#;
        assert_eq!(
            process_webhook(&pool, &n, SECRET, no_meta, None, now()).await.unwrap(),
            WebhookOutcome::ignored("missing booking_id")
        );
        assert_eq!(
            process_webhook(&pool, &n, SECRET, &event("payment.succeeded", "42"), None, now())
                .await
                .unwrap(),
            WebhookOutcome::ignored("invalid booking_id")
        );
        let unknown = event("payment.succeeded", &Uuid::new_v4().to_string());
        assert_eq!(
            process_webhook(&pool, &n, SECRET, &unknown, None, now()).await.unwrap(),
            WebhookOutcome::ignored("booking not found")
        );

        let (b, _) = pending_booking(&pool).await;
        assert_eq!(
            process_webhook(&pool, &n, SECRET, &event("payment.waiting", &b.id.to_string()), None, now())
                .await
                .unwrap(),
            WebhookOutcome::ignored("unknown event")
        );

        assert!(matches!(
            process_webhook(&pool, &n, SECRET, b"not json", None, now()).await,
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_webhook_canceled_releases_slot() {
        let pool = db::memory_pool().await.unwrap();
        let (b, slot_id) = pending_booking(&pool).await;
        let body = event("payment.canceled", &b.id.to_string());

        let out = process_webhook(&pool, &Notifier::disabled(), SECRET, &body, None, now())
            .await
            .unwrap();
        assert_eq!(out, WebhookOutcome::booking(BookingStatus::Cancelled));

        let stored = booking::get(&pool, b.id).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert_eq!(stored.payment_status, PaymentStatus::Failed);
        assert_eq!(stored.cancellation_reason.as_deref(), Some(PAYMENT_CANCELED_REASON));
        assert_eq!(slot_status(&pool, slot_id).await, SlotStatus::Available);
    }

    #[tokio::test]
    async fn test_webhook_refund_marks_refunded() {
        let pool = db::memory_pool().await.unwrap();
        let (b, _) = pending_booking(&pool).await;
        set_status(&pool, b.id, BookingStatus::Cancelled, true).await;

        let out = process_webhook(
            &pool,
            &Notifier::disabled(),
            SECRET,
            &event("refund.succeeded", &b.id.to_string()),
            None,
            now(),
        )
        .await
        .unwrap();
        assert_eq!(out, WebhookOutcome::payment(PaymentStatus::Refunded));
        assert_eq!(
            booking::get(&pool, b.id).await.unwrap().payment_status,
            PaymentStatus::Refunded
        );
    }

    #[tokio::test]
    async fn test_late_payment_after_expiry() {
        let pool = db::memory_pool().await.unwrap();
        let (b, slot_id) = pending_booking(&pool).await;
        booking::expire_pending(&pool, now() + Duration::minutes(30))
            .await
            .unwrap();
        let expired = booking::get(&pool, b.id).await.unwrap();

        // Slot still free: the booking is revived.
        let outcome = apply_payment_succeeded(&pool, &expired, now()).await.unwrap();
        assert_eq!(outcome, PaidOutcome::Confirmed);
        assert_eq!(slot_status(&pool, slot_id).await, SlotStatus::Booked);
        assert_eq!(
            booking::get(&pool, b.id).await.unwrap().cancellation_reason,
            None
        );
    }

    #[tokio::test]
    async fn test_late_payment_loses_rebooked_slot() {
        let pool = db::memory_pool().await.unwrap();
        let fx = fixture(&pool).await;
        let config = Config::for_tests();
        let first = booking::create(&pool, &config, request(&fx, 0), now())
            .await
            .unwrap()
            .booking
            .booking
            .id;
        // Snapshot taken while the booking was still pending.
        let stale = booking::get(&pool, first).await.unwrap();

        booking::expire_pending(&pool, now() + Duration::minutes(30))
            .await
            .unwrap();
        let second = booking::create(&pool, &config, request(&fx, 0), now() + Duration::minutes(31))
            .await
            .unwrap()
            .booking
            .booking
            .id;

        let outcome = apply_payment_succeeded(&pool, &stale, now()).await.unwrap();
        assert_eq!(outcome, PaidOutcome::SlotLost);

        let late = booking::get(&pool, first).await.unwrap();
        assert_eq!(late.status, BookingStatus::Cancelled);
        assert_eq!(late.payment_status, PaymentStatus::Paid);
        let other = booking::get(&pool, second).await.unwrap();
        assert_eq!(other.status, BookingStatus::PendingPayment);
        assert_eq!(slot_status(&pool, fx.slots[0].id).await, SlotStatus::Reserved);

        let body = event("payment.succeeded", &first.to_string());
        let out = process_webhook(&pool, &Notifier::disabled(), SECRET, &body, None, now())
            .await
            .unwrap();
        assert_eq!(out, WebhookOutcome::booking(BookingStatus::Cancelled));
        assert_eq!(slot_status(&pool, fx.slots[0].id).await, SlotStatus::Reserved);
    }

    #[tokio::test]
    async fn test_stale_cancel_does_not_undo_payment() {
        let pool = db::memory_pool().await.unwrap();
        let (b, slot_id) = pending_booking(&pool).await;
        apply_payment_succeeded(&pool, &b, now()).await.unwrap();

        // `b` still says pending.
        let outcome = apply_payment_canceled(&pool, &b, now()).await.unwrap();
        assert_eq!(outcome, CanceledOutcome::Ignored("booking already paid"));

        let out = process_webhook(
            &pool,
            &Notifier::disabled(),
            SECRET,
            &event("payment.canceled", &b.id.to_string()),
            None,
            now(),
        )
        .await
        .unwrap();
        assert_eq!(out, WebhookOutcome::ignored("booking already paid"));

        let stored = booking::get(&pool, b.id).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert_eq!(slot_status(&pool, slot_id).await, SlotStatus::Booked);
    }

    #[tokio::test]
    async fn test_canceled_after_expiry_leaves_slot_alone() {
        let pool = db::memory_pool().await.unwrap();
        let fx = fixture(&pool).await;
        let config = Config::for_tests();
        let first = booking::create(&pool, &config, request(&fx, 0), now())
            .await
            .unwrap()
            .booking
            .booking
            .id;
        booking::expire_pending(&pool, now() + Duration::minutes(30))
            .await
            .unwrap();
        let second = booking::create(&pool, &config, request(&fx, 0), now() + Duration::minutes(31))
            .await
            .unwrap()
            .booking
            .booking
            .id;

        let out = process_webhook(
            &pool,
            &Notifier::disabled(),
            SECRET,
            &event("payment.canceled", &first.to_string()),
            None,
            now() + Duration::minutes(32),
        )
        .await
        .unwrap();
        assert_eq!(out, WebhookOutcome::booking(BookingStatus::Cancelled));

        let expired = booking::get(&pool, first).await.unwrap();
        assert_eq!(expired.status, BookingStatus::Cancelled);
        assert_eq!(expired.payment_status, PaymentStatus::Failed);
        assert_eq!(
            booking::get(&pool, second).await.unwrap().status,
            BookingStatus::PendingPayment
        );
        assert_eq!(slot_status(&pool, fx.slots[0].id).await, SlotStatus::Reserved);
    }

    #[tokio::test]
    async fn test_pending_refunds_stay_within_prepayment() {
        let pool = db::memory_pool().await.unwrap();
        let (b, _) = pending_booking(&pool).await;
        set_status(&pool, b.id, BookingStatus::Confirmed, true).await;
        let gateway = SlowRefunds { down: false };
        let req = |amount| RefundRequest {
            booking_id: b.id,
            amount,
            reason: None,
        };

        let part = refund(&pool, &gateway, req(Some(50_000)), now()).await.unwrap();
        assert_eq!(part.status, "pending");
        let rest = refund(&pool, &gateway, req(None), now()).await.unwrap();
        assert_eq!(rest.amount, 25_001);

        for amount in [None, Some(1)] {
            assert!(matches!(
                refund(&pool, &gateway, req(amount), now()).await,
                Err(ApiError::BadRequest(_))
            ));
        }

        let stored = booking::get(&pool, b.id).await.unwrap();
        assert_eq!(stored.refunded_amount, 75_001);
        assert_eq!(stored.refund_id.as_deref(), Some("ref_pending"));
        // Money is not back until the provider reports it.
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_failed_refund_releases_claim() {
        let pool = db::memory_pool().await.unwrap();
        let (b, _) = pending_booking(&pool).await;
        set_status(&pool, b.id, BookingStatus::Confirmed, true).await;
        let req = || RefundRequest {
            booking_id: b.id,
            amount: None,
            reason: None,
        };

        let down = refund(&pool, &SlowRefunds { down: true }, req(), now()).await;
        assert!(matches!(down, Err(ApiError::Gateway(_))));
        assert_eq!(booking::get(&pool, b.id).await.unwrap().refunded_amount, 0);

        let retried = refund(&pool, &DemoGateway::new(""), req(), now()).await.unwrap();
        assert_eq!(retried.amount, 75_001);
    }

    #[tokio::test]
    async fn test_refund_after_cancel_is_rejected() {
        let pool = db::memory_pool().await.unwrap();
        let (b, slot_id) = pending_booking(&pool).await;
        set_status(&pool, b.id, BookingStatus::Confirmed, true).await;
        let gateway = SlowRefunds { down: false };

        let cancelled = booking::cancel(&pool, &gateway, b.id, None, now()).await.unwrap();
        assert_eq!(cancelled.refund_status, RefundStatus::Processing);

        let again = refund(
            &pool,
            &gateway,
            RefundRequest {
                booking_id: b.id,
                amount: None,
                reason: None,
            },
            now(),
        )
        .await;
        assert!(matches!(again, Err(ApiError::BadRequest(_))));
        assert_eq!(booking::get(&pool, b.id).await.unwrap().refunded_amount, 75_001);

        // A redelivered success must not revive a booking the guest cancelled.
        let redelivered = apply_payment_succeeded(&pool, &b, now()).await.unwrap();
        assert_eq!(redelivered, PaidOutcome::AlreadyApplied(BookingStatus::Cancelled));
        assert_eq!(slot_status(&pool, slot_id).await, SlotStatus::Available);
    }

    #[tokio::test]
    async fn test_refund_policy_and_bounds() {
        let pool = db::memory_pool().await.unwrap();
        let (b, _) = pending_booking(&pool).await;
        let gateway = DemoGateway::new("");
        let req = |amount| RefundRequest {
            booking_id: b.id,
            amount,
            reason: None,
        };

        assert!(matches!(
            refund(&pool, &gateway, req(None), now()).await,
            Err(ApiError::BadRequest(_))
        ));

        set_status(&pool, b.id, BookingStatus::Confirmed, true).await;
        assert!(matches!(
            refund(&pool, &gateway, req(Some(0)), now()).await,
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            refund(&pool, &gateway, req(Some(75_002)), now()).await,
            Err(ApiError::BadRequest(_))
        ));

        let full = refund(&pool, &gateway, req(None), now()).await.unwrap();
        assert_eq!(full.amount, 75_001);
        assert_eq!(full.status, "succeeded");
        assert!(full.refund_id.starts_with("ref_"));
        assert_eq!(
            booking::get(&pool, b.id).await.unwrap().payment_status,
            PaymentStatus::Refunded
        );
    }

    #[tokio::test]
    async fn test_refund_default_halves_inside_two_hours() {
        let pool = db::memory_pool().await.unwrap();
        let (b, _) = pending_booking(&pool).await;
        set_status(&pool, b.id, BookingStatus::Confirmed, true).await;

        // 90 minutes before an 08:00 Moscow slot.
        let close = chrono::TimeZone::with_ymd_and_hms(&Utc, 2030, 1, 10, 3, 30, 0).unwrap();
        let res = refund(
            &pool,
            &DemoGateway::new(""),
            RefundRequest {
                booking_id: b.id,
                amount: None,
                reason: Some("late".into()),
            },
            close,
        )
        .await
        .unwrap();
        assert_eq!(res.amount, 37_501);
    }

    #[tokio::test]
    async fn test_demo_confirm_latest_pending() {
        let pool = db::memory_pool().await.unwrap();
        let (b, _) = pending_booking(&pool).await;
        let gateway = DemoGateway::new("");

        let res = demo_confirm(&pool, &gateway, &Notifier::disabled(), None, now())
            .await
            .unwrap();
        assert_eq!(res.booking_id, b.id);
        assert_eq!(res.booking_status, BookingStatus::Confirmed);

        let none = demo_confirm(&pool, &gateway, &Notifier::disabled(), None, now()).await;
        assert!(matches!(none, Err(ApiError::NotFound(_))));
        let unknown = demo_confirm(&pool, &gateway, &Notifier::disabled(), Some("pay_x"), now()).await;
        assert!(matches!(unknown, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_demo_endpoints_disabled_with_real_gateway() {
        let pool = db::memory_pool().await.unwrap();
        let gateway = YooKassaGateway::new("shop", "secret");
        let res = demo_confirm(&pool, &gateway, &Notifier::disabled(), None, now()).await;
        assert!(matches!(res, Err(ApiError::NotFound(_))));

        let page = demo_page(
            &gateway,
            "",
            DemoPayQuery {
                payment_id: "pay_1".into(),
                amount: "1.00".into(),
            },
        );
        assert!(matches!(page, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_paid_booking_alert_escapes_guest_text() {
        let pool = db::memory_pool().await.unwrap();
        let (mut b, _) = pending_booking(&pool).await;
        b.guest_name = "<Vasya>".into();
        b.car_model = "A&B </b>".into();

        let text = paid_booking_alert(&b, "10.01.2030 08:00");
        assert!(text.starts_with("✅ <b>New paid booking</b>\n10.01.2030 08:00 · &lt;Vasya&gt;"));
        assert!(text.contains("A&amp;B &lt;/b&gt; "));
        assert!(!text.contains("<Vasya>"));
    }

    #[test]
    fn test_demo_page_links_confirm() {
        let page = demo_page(
            &DemoGateway::new("http://h"),
            "http://h",
            DemoPayQuery {
                payment_id: "pay_1".into(),
                amount: "750.01".into(),
            },
        )
        .unwrap();
        assert_eq!(
            page.confirm_url,
            "http://h/api/v1/payments/demo-confirm?payment_id=pay_1"
        );
        assert_eq!(page.amount, "750.01");
    }
}
