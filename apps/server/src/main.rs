use carwash_server::{
    build_router, config::Config, db, rate_limit::RateLimiter, services::booking,
    telegram_layer::TelegramLayer, AppState,
};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Unpaid booking sweep interval (seconds).
const PAYMENT_EXPIRY_INTERVAL_SECS: u64 = 60;
/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Read before tracing so TelegramLayer can use the bot token.
    let config = Config::from_env()?;

    // ── Tracing: console + optional Telegram error notifications ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    if !config.bot_token.is_empty() && !config.admin_tg_ids.is_empty() {
        let tg_layer = TelegramLayer::new(
            config.bot_token.clone(),
            config.admin_tg_ids.iter().copied(),
        );
        registry.with(tg_layer).init();
    } else {
        registry.init();
    }

    if config.admin_tg_ids.is_empty() {
        tracing::warn!("ADMIN_TG_IDS not set, system admin endpoints are unreachable");
    }
    if config.service_api_key.is_empty() {
        tracing::warn!("SERVICE_API_KEY not set, the bot cannot call the API");
    }

    // ── Database ──
    let pool = db::connect(&config.database_url, 5).await?;
    db::run_migrations(&pool).await?;

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(pool, config));

    // ── Background task: expire unpaid bookings ──
    let expire_db = state.db.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(PAYMENT_EXPIRY_INTERVAL_SECS));
        loop {
            interval.tick().await;
            match booking::expire_pending(&expire_db, Utc::now()).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(expired = n, "expired unpaid bookings"),
                Err(e) => tracing::error!(error = %e, "booking expiry sweep failed"),
            }
        }
    });

    // ── Rate limiter + cleanup of stale entries ──
    let rate_limiter = RateLimiter::new();
    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
        }
    });

    let app = build_router(state, rate_limiter);

    tracing::info!("Car wash server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
