pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod payment_gateway;
pub mod rate_limit;
pub mod services;
pub mod telegram_layer;

use axum::{
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::{Config, DEFAULT_WEBAPP_URL};
use notify::Notifier;
use payment_gateway::{DemoGateway, PaymentGateway, YooKassaGateway};
use rate_limit::{rate_limit, RateLimiter, Tier};

/// Vite dev server, allowed next to the configured mini-app origin.
const DEV_ORIGIN: &str = "http://localhost:5173";

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Notifier,
    pub started_at: Instant,
}

impl AppState {
    /// Production wiring: YooKassa when credentials exist, demo payments otherwise.
    pub fn new(db: SqlitePool, config: Config) -> Self {
        let gateway: Arc<dyn PaymentGateway> = if config.has_yookassa() {
            Arc::new(YooKassaGateway::new(
                config.yookassa_shop_id.clone(),
                config.yookassa_secret_key.clone(),
            ))
        } else {
            tracing::warn!("YooKassa credentials not set, using demo payments");
            Arc::new(DemoGateway::new(config.public_base_url.clone()))
        };
        let notifier = Notifier::new(config.bot_token.clone(), config.admin_tg_ids.clone());
        Self::with_parts(db, config, gateway, notifier)
    }

    pub fn with_parts(
        db: SqlitePool,
        config: Config,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Notifier,
    ) -> Self {
        Self {
            db,
            config,
            gateway,
            notifier,
            started_at: Instant::now(),
        }
    }
}

fn cors_layer(webapp_url: &str) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if webapp_url == DEFAULT_WEBAPP_URL {
        return base.allow_origin(Any);
    }
    match webapp_url.trim_end_matches('/').parse::<HeaderValue>() {
        Ok(origin) => base.allow_origin(AllowOrigin::list([
            origin,
            HeaderValue::from_static(DEV_ORIGIN),
        ])),
        Err(_) => {
            tracing::warn!(webapp_url, "WEBAPP_URL is not a valid origin, allowing any");
            base.allow_origin(Any)
        }
    }
}

pub fn build_router(state: Arc<AppState>, limiter: RateLimiter) -> Router {
    use handlers::{admin, booking, carwash, health, payment, user, wash_type};

    // No limit: health checks and provider webhooks.
    let no_limit = Router::new().route("/payments/webhook", post(payment::webhook));

    let public = Router::new()
        .route("/carwashes", get(carwash::list))
        .route("/carwashes/{id}", get(carwash::get_one))
        .route("/carwashes/{id}/slots-count", get(carwash::slots_count))
        .route("/carwashes/{id}/slots", get(carwash::slots))
        .route("/wash-types", get(wash_type::list))
        .route("/wash-types/{id}", get(wash_type::get_one))
        .route("/bookings/calculate-price", post(booking::calculate_price))
        .route("/payments/status/{payment_id}", get(payment::status))
        .route("/payments/demo-pay", get(payment::demo_pay))
        .layer(from_fn_with_state(limiter.for_tier(Tier::Public), rate_limit));

    let booking_create = Router::new()
        .route("/bookings/create", post(booking::create))
        .layer(from_fn_with_state(limiter.for_tier(Tier::Booking), rate_limit));

    let client = Router::new()
        .route("/bookings/my", get(booking::my))
        .route("/bookings/{id}", get(booking::get_one))
        .route("/bookings/{id}/cancel", post(booking::cancel))
        .route("/payments/create", post(payment::create))
        .route("/payments/demo-confirm", post(payment::demo_confirm))
        .route("/users/telegram/auth", post(user::telegram_auth))
        .route("/users/register", post(user::register))
        .route("/users/verify-phone", post(user::verify_phone))
        .route("/users/me", get(user::me).patch(user::update_me))
        .layer(from_fn_with_state(limiter.for_tier(Tier::Client), rate_limit));

    let admin = Router::new()
        .route("/wash-types", post(wash_type::create))
        .route(
            "/wash-types/{id}",
            axum::routing::patch(wash_type::update).delete(wash_type::delete),
        )
        .route("/payments/refund", post(payment::refund))
        .route("/users", get(user::list))
        .route("/users/{id}", get(user::get_one).delete(user::delete))
        .route("/admin/system/carwashes", post(admin::create_carwash))
        .route(
            "/admin/system/carwashes/{id}",
            axum::routing::patch(admin::update_carwash).delete(admin::delete_carwash),
        )
        .route(
            "/admin/system/carwashes/{id}/bays",
            get(admin::list_bays).post(admin::add_bay),
        )
        .route(
            "/admin/system/carwashes/{id}/bays/{bay_id}/slots",
            get(admin::bay_slots).post(admin::regenerate_slots),
        )
        .route("/admin/system/statistics", get(admin::statistics))
        .route("/admin/carwash-admins", post(admin::add_carwash_admin))
        .route(
            "/admin/carwash-admins/carwash/{carwash_id}",
            get(admin::list_carwash_admins),
        )
        .route(
            "/admin/carwash-admins/{admin_id}",
            delete(admin::delete_carwash_admin),
        )
        .route(
            "/admin/carwash/{carwash_id}/bookings",
            get(admin::carwash_bookings),
        )
        .route(
            "/admin/carwash/bookings/{id}/verify-qr",
            post(admin::verify_qr),
        )
        .route("/admin/carwash/bookings/{id}/start", post(admin::start_wash))
        .route(
            "/admin/carwash/bookings/{id}/complete",
            post(admin::complete_wash),
        )
        .layer(from_fn_with_state(limiter.for_tier(Tier::Admin), rate_limit));

    let v1 = Router::new()
        .merge(no_limit)
        .merge(public)
        .merge(booking_create)
        .merge(client)
        .merge(admin);

    let cors = cors_layer(&state.config.webapp_url);

    Router::new()
        .route("/api/health", get(health::health))
        .nest("/api/v1", v1)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
