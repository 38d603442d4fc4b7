use sqlx::SqlitePool;
use std::collections::HashSet;
use uuid::Uuid;

/// Makes user-supplied text safe inside a `parse_mode: HTML` message.
pub fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Sends HTML messages through the Telegram Bot API.
#[derive(Clone)]
pub struct Notifier {
    bot_token: String,
    system_admins: HashSet<i64>,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(bot_token: impl Into<String>, system_admins: HashSet<i64>) -> Self {
        Self {
            bot_token: bot_token.into(),
            system_admins,
            http: reqwest::Client::new(),
        }
    }

    /// No token, no messages.
    pub fn disabled() -> Self {
        Self::new(String::new(), HashSet::new())
    }

    pub async fn send(&self, chat_id: i64, text: &str) {
        if self.bot_token.is_empty() {
            return;
        }
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let result = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML"
            }))
            .send()
            .await;

        match result {
            Ok(resp) if !resp.status().is_success() => {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                tracing::warn!(chat_id, status, %body, "telegram rejected notification");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(chat_id, error = %e, "telegram notification failed"),
        }
    }

    /// Message everyone responsible for a car wash: its admins and the system admins.
    pub async fn notify_admins(&self, db: &SqlitePool, carwash_id: Uuid, text: &str) {
        if self.bot_token.is_empty() {
            return;
        }

        let assigned: Vec<i64> = match sqlx::query_scalar(
            "SELECT u.telegram_id FROM car_wash_admins a
             JOIN users u ON u.id = a.user_id
             WHERE a.car_wash_id = ?",
        )
        .bind(carwash_id)
        .fetch_all(db)
        .await
        {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(%carwash_id, error = %e, "could not load car wash admins");
                Vec::new()
            }
        };

        let recipients: HashSet<i64> = assigned
            .into_iter()
            .chain(self.system_admins.iter().copied())
            .collect();

        for chat_id in recipients {
            self.send(chat_id, text).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>A&B</b>"), "&lt;b&gt;A&amp;B&lt;/b&gt;");
        assert_eq!(escape_html("Lada Vesta"), "Lada Vesta");
    }
}
