//! Thin client for the car wash HTTP API.
//!
//! Every call carries the service key. Calls made on behalf of a Telegram
//! user also carry `X-Telegram-Id`, which the server trusts only together
//! with the key.

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{
    de::{DeserializeOwned, IgnoredAny},
    Deserialize, Serialize,
};
use serde_json::json;
use uuid::Uuid;

const SERVICE_KEY_HEADER: &str = "X-Service-Key";
const TELEGRAM_ID_HEADER: &str = "X-Telegram-Id";

#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    /// The server answered with an error envelope; the message is user-facing.
    #[error("{message}")]
    Api { status: StatusCode, message: String },
    #[error("API unreachable: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned {0} without data")]
    Empty(StatusCode),
}

impl ApiClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status, .. } if *status == StatusCode::NOT_FOUND)
    }

    /// Errors the user can act on, as opposed to outages.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::Api { status, .. } if status.is_client_error())
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    data: Option<T>,
    error: Option<String>,
}

// ── Response shapes (only the fields the bot reads) ──

#[derive(Debug, Clone, Deserialize)]
pub struct CarWash {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub working_hours_start: String,
    pub working_hours_end: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotsCount {
    pub date: NaiveDate,
    pub available_slots: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Slot {
    pub id: Uuid,
    pub bay_number: i64,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WashType {
    pub id: Uuid,
    pub name: String,
    pub duration_minutes: i64,
    pub base_price: i64,
}

#[derive(Debug, Deserialize)]
pub struct WashTypeList {
    pub items: Vec<WashType>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceQuote {
    pub final_price: i64,
    pub prepayment_amount: i64,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub guest_phone: String,
    pub guest_name: String,
    pub car_plate: String,
    pub car_model: String,
    pub slot_date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub final_price: i64,
    pub status: String,
    pub car_wash_name: String,
    pub car_wash_address: String,
    pub wash_type_name: String,
    pub bay_number: i64,
    pub qr_code: Option<String>,
}

impl Booking {
    pub fn is_cancellable(&self) -> bool {
        matches!(self.status.as_str(), "pending_payment" | "confirmed")
    }
}

#[derive(Debug, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

#[derive(Debug, Deserialize)]
pub struct PaymentInfo {
    pub amount: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct BookingConfirmation {
    pub booking: Booking,
    pub payment: PaymentInfo,
}

#[derive(Debug, Deserialize)]
pub struct Payment {
    pub amount: i64,
    pub confirmation_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelResult {
    pub status: String,
    pub refund_status: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct QrBooking {
    pub id: Uuid,
    pub guest_name: String,
    pub car_plate: String,
    pub slot_date: NaiveDate,
    pub start_time: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct QrCheck {
    pub valid: bool,
    pub booking: QrBooking,
}

#[derive(Debug, Deserialize)]
pub struct Statistics {
    pub carwashes_count: i64,
    pub total_bookings: i64,
    pub confirmed_bookings: i64,
}

#[derive(Debug, Deserialize)]
pub struct Bay {
    pub bay_number: i64,
}

#[derive(Debug, Deserialize)]
pub struct BayCreated {
    pub bay: Bay,
    pub slots_created: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CarWashSummary {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UserStats {
    pub total_bookings: i64,
    pub completed_bookings: i64,
}

#[derive(Debug, Deserialize)]
pub struct UserProfile {
    pub first_name: String,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub is_verified: bool,
    pub stats: UserStats,
    pub is_system_admin: bool,
    pub admin_of: Vec<CarWashSummary>,
}

// ── Requests ──

#[derive(Debug, Serialize)]
pub struct Registration {
    pub telegram_id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub phone_number: String,
}

#[derive(Debug, Serialize)]
pub struct NewBooking {
    pub car_wash_id: Uuid,
    pub time_slot_id: Uuid,
    pub wash_type_id: Uuid,
    pub guest_phone: String,
    pub guest_name: String,
    pub car_plate: String,
    pub car_model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkingHours {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewCarWash {
    pub name: String,
    pub address: String,
    pub phone_number: String,
    pub working_hours: WorkingHours,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            service_key: service_key.into(),
        }
    }

    fn request(&self, method: Method, path: &str, telegram_id: Option<i64>) -> RequestBuilder {
        let mut req = self
            .http
            .request(method, format!("{}/api/v1{}", self.base_url, path))
            .header(SERVICE_KEY_HEADER, &self.service_key);
        if let Some(id) = telegram_id {
            req = req.header(TELEGRAM_ID_HEADER, id.to_string());
        }
        req
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiClientError> {
        let resp = req.send().await?;
        let status = resp.status();
        let envelope: Envelope<T> = match resp.json().await {
            Ok(e) => e,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => {
                return Err(ApiClientError::Api {
                    status,
                    message: format!("Server error ({})", status.as_u16()),
                })
            }
        };

        if !envelope.ok || !status.is_success() {
            return Err(ApiClientError::Api {
                status,
                message: envelope
                    .error
                    .unwrap_or_else(|| format!("Server error ({})", status.as_u16())),
            });
        }
        envelope.data.ok_or(ApiClientError::Empty(status))
    }

    // ── Users ──

    pub async fn me(&self, telegram_id: i64) -> Result<UserProfile, ApiClientError> {
        self.send(self.request(Method::GET, "/users/me", Some(telegram_id)))
            .await
    }

    pub async fn register(&self, reg: &Registration) -> Result<(), ApiClientError> {
        let _: IgnoredAny = self
            .send(self.request(Method::POST, "/users/register", None).json(reg))
            .await?;
        Ok(())
    }

    // ── Catalogue ──

    pub async fn carwashes(&self) -> Result<Vec<CarWash>, ApiClientError> {
        self.send(self.request(Method::GET, "/carwashes", None)).await
    }

    pub async fn carwash(&self, id: Uuid) -> Result<CarWash, ApiClientError> {
        self.send(self.request(Method::GET, &format!("/carwashes/{id}"), None))
            .await
    }

    pub async fn slots_count(&self, carwash_id: Uuid, date: NaiveDate) -> Result<SlotsCount, ApiClientError> {
        self.send(
            self.request(Method::GET, &format!("/carwashes/{carwash_id}/slots-count"), None)
                .query(&[("date", date.to_string())]),
        )
        .await
    }

    pub async fn slots(&self, carwash_id: Uuid, date: NaiveDate) -> Result<Vec<Slot>, ApiClientError> {
        self.send(
            self.request(Method::GET, &format!("/carwashes/{carwash_id}/slots"), None)
                .query(&[("date", date.to_string())]),
        )
        .await
    }

    pub async fn wash_types(&self) -> Result<Vec<WashType>, ApiClientError> {
        let list: WashTypeList = self
            .send(self.request(Method::GET, "/wash-types", None))
            .await?;
        Ok(list.items)
    }

    pub async fn calculate_price(&self, slot_id: Uuid, wash_type_id: Uuid) -> Result<PriceQuote, ApiClientError> {
        self.send(
            self.request(Method::POST, "/bookings/calculate-price", None)
                .json(&json!({"time_slot_id": slot_id, "wash_type_id": wash_type_id})),
        )
        .await
    }

    // ── Bookings ──

    pub async fn create_booking(
        &self,
        telegram_id: i64,
        booking: &NewBooking,
    ) -> Result<BookingConfirmation, ApiClientError> {
        self.send(
            self.request(Method::POST, "/bookings/create", Some(telegram_id))
                .json(booking),
        )
        .await
    }

    pub async fn create_payment(&self, booking_id: Uuid) -> Result<Payment, ApiClientError> {
        self.send(
            self.request(Method::POST, "/payments/create", None)
                .json(&json!({"booking_id": booking_id})),
        )
        .await
    }

    pub async fn my_bookings(&self, phone: &str, per_page: u32) -> Result<Page<Booking>, ApiClientError> {
        self.send(
            self.request(Method::GET, "/bookings/my", None)
                .query(&[("phone", phone.to_string()), ("per_page", per_page.to_string())]),
        )
        .await
    }

    pub async fn booking(&self, id: Uuid) -> Result<Booking, ApiClientError> {
        self.send(self.request(Method::GET, &format!("/bookings/{id}"), None))
            .await
    }

    pub async fn cancel_booking(&self, id: Uuid) -> Result<CancelResult, ApiClientError> {
        self.send(
            self.request(Method::POST, &format!("/bookings/{id}/cancel"), None)
                .json(&json!({"reason": "cancelled in Telegram"})),
        )
        .await
    }

    // ── Car wash admin ──

    pub async fn carwash_bookings(
        &self,
        telegram_id: i64,
        carwash_id: Uuid,
        date: NaiveDate,
    ) -> Result<Page<Booking>, ApiClientError> {
        self.send(
            self.request(
                Method::GET,
                &format!("/admin/carwash/{carwash_id}/bookings"),
                Some(telegram_id),
            )
            .query(&[
                ("date_from", date.to_string()),
                ("date_to", date.to_string()),
                ("per_page", "100".to_string()),
            ]),
        )
        .await
    }

    pub async fn verify_qr(&self, telegram_id: i64, booking_id: Uuid, code: &str) -> Result<QrCheck, ApiClientError> {
        self.send(
            self.request(
                Method::POST,
                &format!("/admin/carwash/bookings/{booking_id}/verify-qr"),
                Some(telegram_id),
            )
            .json(&json!({"qr_code": code})),
        )
        .await
    }

    pub async fn start_wash(&self, telegram_id: i64, booking_id: Uuid) -> Result<StatusChange, ApiClientError> {
        self.send(self.request(
            Method::POST,
            &format!("/admin/carwash/bookings/{booking_id}/start"),
            Some(telegram_id),
        ))
        .await
    }

    pub async fn complete_wash(&self, telegram_id: i64, booking_id: Uuid) -> Result<StatusChange, ApiClientError> {
        self.send(self.request(
            Method::POST,
            &format!("/admin/carwash/bookings/{booking_id}/complete"),
            Some(telegram_id),
        ))
        .await
    }

    // ── System admin ──

    pub async fn statistics(&self, telegram_id: i64) -> Result<Statistics, ApiClientError> {
        self.send(self.request(Method::GET, "/admin/system/statistics", Some(telegram_id)))
            .await
    }

    pub async fn create_carwash(&self, telegram_id: i64, carwash: &NewCarWash) -> Result<CarWash, ApiClientError> {
        self.send(
            self.request(Method::POST, "/admin/system/carwashes", Some(telegram_id))
                .json(carwash),
        )
        .await
    }

    pub async fn delete_carwash(&self, telegram_id: i64, id: Uuid) -> Result<(), ApiClientError> {
        let _: IgnoredAny = self
            .send(self.request(
                Method::DELETE,
                &format!("/admin/system/carwashes/{id}"),
                Some(telegram_id),
            ))
            .await?;
        Ok(())
    }

    pub async fn add_bay(&self, telegram_id: i64, carwash_id: Uuid, bay_number: i64) -> Result<BayCreated, ApiClientError> {
        self.send(
            self.request(
                Method::POST,
                &format!("/admin/system/carwashes/{carwash_id}/bays"),
                Some(telegram_id),
            )
            .json(&json!({"bay_number": bay_number})),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_parses_server_shape() {
        let raw = json!({
            "id": "7b0d1c8e-8f5e-4a57-9a39-3d6a4c1f2e10",
            "user_id": null,
            "car_wash_id": "1b0d1c8e-8f5e-4a57-9a39-3d6a4c1f2e10",
            "guest_phone": "+79991234567",
            "guest_name": "Ivan",
            "car_plate": "А123ВС77",
            "car_model": "Lada",
            "slot_date": "2030-01-10",
            "start_time": "08:00",
            "end_time": "08:30",
            "final_price": 150000,
            "status": "confirmed",
            "payment_status": "paid",
            "car_wash_name": "Aqua",
            "car_wash_address": "Lenina 1",
            "wash_type_name": "Basic",
            "bay_number": 1,
            "qr_code": "abc"
        });
        let booking: Booking = serde_json::from_value(raw).unwrap();
        assert!(booking.is_cancellable());
        assert_eq!(booking.qr_code.as_deref(), Some("abc"));
    }

    #[test]
    fn test_error_classification() {
        let not_found = ApiClientError::Api {
            status: StatusCode::NOT_FOUND,
            message: "User not found".into(),
        };
        assert!(not_found.is_not_found());
        assert!(not_found.is_user_facing());

        let outage = ApiClientError::Api {
            status: StatusCode::BAD_GATEWAY,
            message: "Payment provider error".into(),
        };
        assert!(!outage.is_not_found());
        assert!(!outage.is_user_facing());
    }
}
