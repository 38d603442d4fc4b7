//! Payment provider integration.
//!
//! `YooKassaGateway` talks to the real API when credentials are configured;
//! `DemoGateway` fabricates ids so the whole booking flow works locally.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::GatewayError;

type HmacSha256 = Hmac<Sha256>;

const YOOKASSA_API: &str = "https://api.yookassa.ru/v3";

/// What we ask the provider to charge.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub booking_id: Uuid,
    /// Kopecks.
    pub amount: i64,
    pub description: String,
    pub return_url: String,
}

#[derive(Debug, Clone)]
pub struct GatewayPayment {
    pub id: String,
    pub status: String,
    pub confirmation_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayPaymentStatus {
    pub status: String,
    pub paid: bool,
}

#[derive(Debug, Clone)]
pub struct GatewayRefund {
    pub id: String,
    pub status: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(&self, payment: &NewPayment) -> Result<GatewayPayment, GatewayError>;

    async fn get_payment(&self, payment_id: &str) -> Result<GatewayPaymentStatus, GatewayError>;

    async fn create_refund(
        &self,
        payment_id: &str,
        amount: i64,
        reason: Option<&str>,
    ) -> Result<GatewayRefund, GatewayError>;

    /// Demo mode enables the `/payments/demo-*` endpoints.
    fn is_demo(&self) -> bool {
        false
    }
}

/// `"1250.50"` for 125050 kopecks.
pub fn format_rub(kopecks: i64) -> String {
    let sign = if kopecks < 0 { "-" } else { "" };
    let abs = kopecks.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// `pay_` / `ref_` style ids: prefix plus 16 hex chars.
fn short_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}{}", prefix, &hex[..16])
}

// ── Demo ──

pub struct DemoGateway {
    public_base_url: String,
}

impl DemoGateway {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            public_base_url: public_base_url.into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for DemoGateway {
    async fn create_payment(&self, payment: &NewPayment) -> Result<GatewayPayment, GatewayError> {
        let id = short_id("pay_");
        let confirmation_url = format!(
            "{}/api/v1/payments/demo-pay?payment_id={}&amount={}",
            self.public_base_url,
            id,
            format_rub(payment.amount)
        );
        tracing::info!(payment_id = %id, booking_id = %payment.booking_id, "demo payment created");
        Ok(GatewayPayment {
            id,
            status: "pending".into(),
            confirmation_url: Some(confirmation_url),
        })
    }

    async fn get_payment(&self, _payment_id: &str) -> Result<GatewayPaymentStatus, GatewayError> {
        Ok(GatewayPaymentStatus {
            status: "succeeded".into(),
            paid: true,
        })
    }

    async fn create_refund(
        &self,
        payment_id: &str,
        amount: i64,
        _reason: Option<&str>,
    ) -> Result<GatewayRefund, GatewayError> {
        let id = short_id("ref_");
        tracing::info!(refund_id = %id, payment_id, amount, "demo refund created");
        Ok(GatewayRefund {
            id,
            status: "succeeded".into(),
        })
    }

    fn is_demo(&self) -> bool {
        true
    }
}

// ── YooKassa ──

pub struct YooKassaGateway {
    shop_id: String,
    secret_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl YooKassaGateway {
    pub fn new(shop_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            shop_id: shop_id.into(),
            secret_key: secret_key.into(),
            base_url: YOOKASSA_API.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn post(
        &self,
        path: &str,
        idempotence_key: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .header("Idempotence-Key", idempotence_key)
            .json(body)
            .send()
            .await?;
        read_json(resp).await
    }
}

async fn read_json(resp: reqwest::Response) -> Result<serde_json::Value, GatewayError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(GatewayError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json().await?)
}

fn str_field(json: &serde_json::Value, pointer: &'static str) -> Result<String, GatewayError> {
    json.pointer(pointer)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or(GatewayError::MissingField(pointer))
}

#[async_trait]
impl PaymentGateway for YooKassaGateway {
    async fn create_payment(&self, payment: &NewPayment) -> Result<GatewayPayment, GatewayError> {
        let idempotence_key = format!(
            "booking-{}-{}",
            payment.booking_id,
            chrono::Utc::now().timestamp_millis()
        );

        let body = serde_json::json!({
            "amount": {
                "value": format_rub(payment.amount),
                "currency": "RUB"
            },
            "capture": true,
            "confirmation": {
                "type": "redirect",
                "return_url": payment.return_url
            },
            "description": payment.description,
            "metadata": {
                "booking_id": payment.booking_id.to_string()
            }
        });

        let json = self.post("/payments", &idempotence_key, &body).await?;
        let id = str_field(&json, "/id")?;
        let status = str_field(&json, "/status").unwrap_or_else(|_| "pending".into());
        let confirmation_url = str_field(&json, "/confirmation/confirmation_url").ok();

        tracing::info!(payment_id = %id, booking_id = %payment.booking_id, "YooKassa payment created");

        Ok(GatewayPayment {
            id,
            status,
            confirmation_url,
        })
    }

    async fn get_payment(&self, payment_id: &str) -> Result<GatewayPaymentStatus, GatewayError> {
        let resp = self
            .http
            .get(format!("{}/payments/{}", self.base_url, payment_id))
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .send()
            .await?;
        let json = read_json(resp).await?;

        Ok(GatewayPaymentStatus {
            status: str_field(&json, "/status")?,
            paid: json["paid"].as_bool().unwrap_or(false),
        })
    }

    async fn create_refund(
        &self,
        payment_id: &str,
        amount: i64,
        reason: Option<&str>,
    ) -> Result<GatewayRefund, GatewayError> {
        let idempotence_key = format!(
            "refund-{}-{}",
            payment_id,
            chrono::Utc::now().timestamp_millis()
        );

        let mut body = serde_json::json!({
            "payment_id": payment_id,
            "amount": {
                "value": format_rub(amount),
                "currency": "RUB"
            }
        });
        if let Some(reason) = reason {
            body["description"] = reason.into();
        }

        let json = self.post("/refunds", &idempotence_key, &body).await?;
        tracing::info!(payment_id, "YooKassa refund created");

        Ok(GatewayRefund {
            id: str_field(&json, "/id")?,
            status: str_field(&json, "/status")?,
        })
    }
}

// ── Webhook signatures ──

/// Hex HMAC-SHA256 of the raw body.
pub fn sign_webhook(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of an `X-Signature` header value.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
