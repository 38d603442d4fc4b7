use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `NaiveTime` on the wire as `"HH:MM"`.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

// ── Statuses ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingPayment,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Confirmed => "confirmed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states cannot be cancelled again.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Reserved,
    Booked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    NotRequired,
    Processing,
    Succeeded,
    Failed,
}

// ── Database models ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub is_verified: bool,
    pub last_visit: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CarWash {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub phone_number: String,
    #[serde(with = "hhmm")]
    pub working_hours_start: NaiveTime,
    #[serde(with = "hhmm")]
    pub working_hours_end: NaiveTime,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WashBay {
    pub id: Uuid,
    pub car_wash_id: Uuid,
    pub bay_number: i64,
    pub bay_type: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TimeSlot {
    pub id: Uuid,
    pub car_wash_id: Uuid,
    pub wash_bay_id: Uuid,
    pub slot_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub status: SlotStatus,
}

/// Prices are kopecks.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WashType {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub duration_minutes: i64,
    pub base_price: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub car_wash_id: Uuid,
    pub wash_bay_id: Uuid,
    pub time_slot_id: Uuid,
    pub wash_type_id: Uuid,
    pub guest_phone: String,
    pub guest_name: String,
    pub car_plate: String,
    pub car_model: String,
    pub slot_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub duration_minutes: i64,
    pub price: i64,
    pub discount: i64,
    pub final_price: i64,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub payment_id: Option<String>,
    /// Kopecks of the prepayment claimed by refunds so far.
    pub refunded_amount: i64,
    pub refund_id: Option<String>,
    #[serde(skip)]
    pub qr_code: String,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CarWashAdmin {
    pub id: Uuid,
    pub user_id: Uuid,
    pub car_wash_id: Uuid,
    pub user_name: String,
}

// ── Joined views ──

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BookingWithDetails {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub booking: Booking,
    pub car_wash_name: String,
    pub car_wash_address: String,
    pub wash_type_name: String,
    pub bay_number: i64,
    /// Only exposed once the booking is paid for.
    #[sqlx(skip)]
    pub qr_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SlotWithBay {
    pub id: Uuid,
    pub wash_bay_id: Uuid,
    pub bay_number: i64,
    pub slot_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub status: SlotStatus,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CarWashAdminView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub car_wash_id: Uuid,
    pub user_name: String,
    pub telegram_id: i64,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CarWashSummary {
    pub id: Uuid,
    pub name: String,
    pub address: String,
}

// ── API request/response types ──

#[derive(Debug, Clone, Deserialize)]
pub struct WorkingHoursInput {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCarWashRequest {
    pub name: String,
    pub address: String,
    pub phone_number: String,
    pub working_hours: WorkingHoursInput,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateCarWashRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone_number: Option<String>,
    pub working_hours: Option<WorkingHoursInput>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateWashBayRequest {
    pub bay_number: i64,
    pub bay_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateSlotsRequest {
    pub days_ahead: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct BayCreated {
    pub bay: WashBay,
    pub slots_created: u64,
}

#[derive(Debug, Serialize)]
pub struct SlotsGenerated {
    pub wash_bay_id: Uuid,
    pub slots_created: u64,
}

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct SlotsCount {
    pub carwash_id: Uuid,
    pub date: NaiveDate,
    pub available_slots: i64,
}

#[derive(Debug, Serialize)]
pub struct Statistics {
    pub carwashes_count: i64,
    pub total_bookings: i64,
    pub confirmed_bookings: i64,
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub status: &'static str,
    pub id: Uuid,
}

impl Deleted {
    pub fn new(id: Uuid) -> Self {
        Self {
            status: "deleted",
            id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateWashTypeRequest {
    pub name: String,
    pub description: Option<String>,
    pub duration_minutes: i64,
    pub base_price: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateWashTypeRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub duration_minutes: Option<i64>,
    pub base_price: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct WashTypeList {
    pub items: Vec<WashType>,
    pub total: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingRequest {
    pub telegram_id: Option<i64>,
    pub car_wash_id: Uuid,
    pub time_slot_id: Uuid,
    pub wash_type_id: Uuid,
    pub guest_phone: String,
    pub guest_name: String,
    pub car_plate: String,
    pub car_model: String,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentInfo {
    pub booking_id: Uuid,
    pub amount: i64,
    pub prepayment_amount: i64,
    pub currency: &'static str,
    pub payment_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct BookingConfirmation {
    pub booking: BookingWithDetails,
    pub payment: PaymentInfo,
    pub qr_code: String,
}

#[derive(Debug, Deserialize)]
pub struct CalculatePriceRequest {
    pub time_slot_id: Uuid,
    pub wash_type_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct PriceQuote {
    pub price: i64,
    pub discount: i64,
    pub final_price: i64,
    pub prepayment_amount: i64,
    pub duration_minutes: i64,
    pub currency: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct MyBookingsQuery {
    pub phone: String,
    pub status: Option<BookingStatus>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CarwashBookingsQuery {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub status: Option<BookingStatus>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct Page<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub pages: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBookingRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelBookingResponse {
    pub status: BookingStatus,
    pub booking_id: Uuid,
    pub refund_status: RefundStatus,
}

#[derive(Debug, Serialize)]
pub struct BookingStatusChange {
    pub booking_id: Uuid,
    pub status: BookingStatus,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQrRequest {
    pub qr_code: String,
}

#[derive(Debug, Serialize)]
pub struct QrBookingSummary {
    pub id: Uuid,
    pub guest_name: String,
    pub car_plate: String,
    pub slot_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    pub status: BookingStatus,
}

#[derive(Debug, Serialize)]
pub struct VerifyQrResponse {
    pub valid: bool,
    pub booking: QrBookingSummary,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub booking_id: Uuid,
    pub return_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub payment_id: String,
    pub booking_id: Uuid,
    pub amount: i64,
    pub currency: &'static str,
    pub status: String,
    pub confirmation_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub payment_id: String,
    pub status: String,
    pub paid: bool,
}

/// Incoming provider notification. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub object: WebhookObject,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookObject {
    pub id: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct WebhookOutcome {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_status: Option<BookingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
}

impl WebhookOutcome {
    pub fn ignored(reason: &'static str) -> Self {
        Self {
            status: "ignored",
            reason: Some(reason),
            booking_status: None,
            payment_status: None,
        }
    }

    pub fn booking(status: BookingStatus) -> Self {
        Self {
            status: "processed",
            reason: None,
            booking_status: Some(status),
            payment_status: None,
        }
    }

    pub fn payment(status: PaymentStatus) -> Self {
        Self {
            status: "processed",
            reason: None,
            booking_status: None,
            payment_status: Some(status),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub booking_id: Uuid,
    pub amount: Option<i64>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub refund_id: String,
    pub booking_id: Uuid,
    pub amount: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct DemoPayQuery {
    pub payment_id: String,
    pub amount: String,
}

#[derive(Debug, Serialize)]
pub struct DemoPayPage {
    pub message: &'static str,
    pub payment_id: String,
    pub amount: String,
    pub instructions: &'static str,
    pub confirm_url: String,
}

#[derive(Debug, Deserialize)]
pub struct DemoConfirmQuery {
    pub payment_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DemoConfirmResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub booking_id: Uuid,
    pub booking_status: BookingStatus,
}

#[derive(Debug, Deserialize)]
pub struct RegisterUserRequest {
    pub telegram_id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub phone_number: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPhoneRequest {
    pub phone_number: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UserStats {
    pub total_bookings: i64,
    pub completed_bookings: i64,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    pub stats: UserStats,
    pub is_system_admin: bool,
    pub admin_of: Vec<CarWashSummary>,
}

#[derive(Debug, Deserialize)]
pub struct AddCarWashAdminRequest {
    pub car_wash_id: Uuid,
    pub phone_number: String,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

// ── Telegram auth ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statuses_serialize_snake_case() {
        assert_eq!(
            serde_json::to_value(BookingStatus::PendingPayment).unwrap(),
            "pending_payment"
        );
        assert_eq!(serde_json::to_value(RefundStatus::NotRequired).unwrap(), "not_required");
        let parsed: BookingStatus = serde_json::from_value("in_progress".into()).unwrap();
        assert_eq!(parsed, BookingStatus::InProgress);
        assert_eq!(parsed.as_str(), "in_progress");
    }

    #[test]
    fn test_final_states() {
        assert!(BookingStatus::Completed.is_final());
        assert!(BookingStatus::Cancelled.is_final());
        assert!(!BookingStatus::Confirmed.is_final());
    }

    #[test]
    fn test_hhmm_format() {
        #[derive(Serialize, Deserialize)]
        struct T {
            #[serde(with = "hhmm")]
            t: NaiveTime,
        }
        let v: T = serde_json::from_str(r#"{"t":"08:30"}"#).unwrap();
        assert_eq!(v.t, NaiveTime::from_hms_opt(8, 30, 0).unwrap());
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"{"t":"08:30"}"#);
        assert!(serde_json::from_str::<T>(r#"{"t":"8h"}"#).is_err());
    }

    #[test]
    fn test_webhook_event_tolerates_missing_object() {
        let ev: WebhookEvent = serde_json::from_str(r#"{"event":"payment.succeeded"}"#).unwrap();
        assert_eq!(ev.event, "payment.succeeded");
        assert!(ev.object.metadata.is_empty());
    }

    #[test]
    fn test_ignored_outcome_shape() {
        let json = serde_json::to_value(WebhookOutcome::ignored("unknown event")).unwrap();
        assert_eq!(json, serde_json::json!({"status": "ignored", "reason": "unknown event"}));
    }
}
