use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub api_base_url: String,
    pub service_api_key: String,
    /// Mini-app link for the main menu; `None` hides the button.
    pub webapp_url: Option<String>,
    pub admin_tg_ids: HashSet<i64>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bot_token = std::env::var("BOT_TOKEN")
            .map_err(|_| anyhow::anyhow!("BOT_TOKEN must be set"))?;

        let mut admin_tg_ids = parse_id_list(&std::env::var("ADMIN_TG_IDS").unwrap_or_default());
        if let Ok(single) = std::env::var("ADMIN_TG_ID") {
            admin_tg_ids.extend(parse_id_list(&single));
        }

        let service_api_key = std::env::var("SERVICE_API_KEY").unwrap_or_default();
        if service_api_key.is_empty() {
            anyhow::bail!("SERVICE_API_KEY must be set so the bot can act for users");
        }

        Ok(Self {
            bot_token,
            api_base_url: std::env::var("API_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3000".into())
                .trim_end_matches('/')
                .to_string(),
            service_api_key,
            webapp_url: std::env::var("WEBAPP_URL")
                .ok()
                .filter(|u| u.starts_with("https://") && u != "https://example.com"),
            admin_tg_ids,
        })
    }

    pub fn is_system_admin(&self, telegram_id: i64) -> bool {
        self.admin_tg_ids.contains(&telegram_id)
    }
}

fn parse_id_list(raw: &str) -> HashSet<i64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}
