use std::collections::HashSet;

/// Placeholder mini-app origin; CORS is left open while it is in use.
pub const DEFAULT_WEBAPP_URL: &str = "https://example.com";

/// Runtime settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub bot_token: String,
    pub admin_tg_ids: HashSet<i64>,
    pub service_api_key: String,
    pub webapp_url: String,
    pub public_base_url: String,
    pub yookassa_shop_id: String,
    pub yookassa_secret_key: String,
    pub webhook_secret: String,
    pub booking_ttl_minutes: i64,
    pub slot_days_ahead: u32,
    pub slot_duration_minutes: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bot_token = std::env::var("BOT_TOKEN")
            .map_err(|_| anyhow::anyhow!("BOT_TOKEN must be set"))?;

        let mut admin_tg_ids = parse_id_list(&env_or("ADMIN_TG_IDS", ""));
        if let Ok(single) = std::env::var("ADMIN_TG_ID") {
            admin_tg_ids.extend(parse_id_list(&single));
        }

        let yookassa_shop_id = env_or("YOOKASSA_SHOP_ID", "");
        let yookassa_secret_key = env_or("YOOKASSA_SECRET_KEY", "");
        let webhook_secret = std::env::var("WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| Some(yookassa_secret_key.clone()).filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "demo_secret".into());

        Ok(Self {
            database_url: env_or("DATABASE_URL", "sqlite:carwash.db?mode=rwc"),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 3000)?,
            bot_token,
            admin_tg_ids,
            service_api_key: env_or("SERVICE_API_KEY", ""),
            webapp_url: env_or("WEBAPP_URL", DEFAULT_WEBAPP_URL),
            public_base_url: env_or("PUBLIC_BASE_URL", "")
                .trim_end_matches('/')
                .to_string(),
            yookassa_shop_id,
            yookassa_secret_key,
            webhook_secret,
            booking_ttl_minutes: env_parse("BOOKING_TTL_MINUTES", 15)?,
            slot_days_ahead: env_parse("SLOT_DAYS_AHEAD", 30)?,
            slot_duration_minutes: env_parse("SLOT_DURATION_MINUTES", 30)?,
        })
    }

    /// Real gateway credentials present.
    pub fn has_yookassa(&self) -> bool {
        !self.yookassa_shop_id.is_empty() && !self.yookassa_secret_key.is_empty()
    }

    pub fn is_system_admin(&self, telegram_id: i64) -> bool {
        self.admin_tg_ids.contains(&telegram_id)
    }

    /// Settings for tests and local tooling: no external services.
    pub fn for_tests() -> Self {
        Self {
            database_url: "sqlite::memory:".into(),
            host: "127.0.0.1".into(),
            port: 0,
            bot_token: "123456:TEST-TOKEN".into(),
            admin_tg_ids: HashSet::from([1]),
            service_api_key: "test-service-key".into(),
            webapp_url: DEFAULT_WEBAPP_URL.into(),
            public_base_url: String::new(),
            yookassa_shop_id: String::new(),
            yookassa_secret_key: String::new(),
            webhook_secret: "demo_secret".into(),
            booking_ttl_minutes: 15,
            slot_days_ahead: 2,
            slot_duration_minutes: 30,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} is invalid: {e}")),
        _ => Ok(default),
    }
}

/// Comma-separated Telegram ids; blanks and junk are skipped.
pub fn parse_id_list(raw: &str) -> HashSet<i64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}
