//! Tracing layer that forwards ERROR events to the system admins on Telegram.
//!
//! - at most one message per [`MIN_INTERVAL`]
//! - identical messages are suppressed for [`DEDUP_WINDOW`]
//! - HTTP calls are spawned onto the Tokio runtime

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::notify::escape_html;

pub const MIN_INTERVAL: Duration = Duration::from_secs(10);
pub const DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Rate limit plus dedup for outgoing alerts. Time is passed in explicitly.
#[derive(Debug)]
pub struct Throttle {
    last_sent: Option<Instant>,
    /// (hash, sent_at) of recently sent messages.
    recent: Vec<(u64, Instant)>,
}

impl Throttle {
    pub fn new() -> Self {
        Self {
            last_sent: None,
            recent: Vec::new(),
        }
    }

    /// Records the send when it returns true.
    pub fn allow(&mut self, message_hash: u64, now: Instant) -> bool {
        self.recent
            .retain(|(_, ts)| now.saturating_duration_since(*ts) < DEDUP_WINDOW);

        let is_dup = self.recent.iter().any(|(h, _)| *h == message_hash);
        let too_soon = self
            .last_sent
            .is_some_and(|last| now.saturating_duration_since(last) < MIN_INTERVAL);

        if is_dup || too_soon {
            return false;
        }
        self.last_sent = Some(now);
        self.recent.push((message_hash, now));
        true
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_message(message: &str) -> u64 {
    let mut h = DefaultHasher::new();
    message.hash(&mut h);
    h.finish()
}

pub struct TelegramLayer {
    bot_token: String,
    chat_ids: Vec<i64>,
    http: reqwest::Client,
    throttle: Mutex<Throttle>,
}

impl TelegramLayer {
    pub fn new(bot_token: String, chat_ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            bot_token,
            chat_ids: chat_ids.into_iter().collect(),
            http: reqwest::Client::new(),
            throttle: Mutex::new(Throttle::new()),
        }
    }

    fn should_send(&self, message: &str) -> bool {
        match self.throttle.lock() {
            Ok(mut throttle) => throttle.allow(hash_message(message), Instant::now()),
            Err(_) => false,
        }
    }
}

fn format_alert(message: &str, target: &str, file: &str, line: &str) -> String {
    let now_utc = chrono::Utc::now().format("%H:%M:%S UTC");
    format!(
        "\u{1f6a8} <b>Car wash API error</b>\n\
         ━━━━━━━━━━━━━━━\n\
         <code>{message}</code>\n\
         ━━━━━━━━━━━━━━━\n\
         \u{1f4cd} {target} ({file}:{line})\n\
         \u{1f550} {now_utc}"
    )
}

impl<S: Subscriber> Layer<S> for TelegramLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR || self.chat_ids.is_empty() {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.message();

        if !self.should_send(&message) {
            return;
        }

        let meta = event.metadata();
        let line = meta
            .line()
            .map(|l| l.to_string())
            .unwrap_or_else(|| "?".into());
        let text = format_alert(
            &escape_html(&message),
            meta.target(),
            meta.file().unwrap_or("?"),
            &line,
        );

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let client = self.http.clone();
        let chat_ids = self.chat_ids.clone();

        runtime.spawn(async move {
            for chat_id in chat_ids {
                let _ = client
                    .post(&url)
                    .json(&serde_json::json!({
                        "chat_id": chat_id,
                        "text": text,
                        "parse_mode": "HTML"
                    }))
                    .send()
                    .await;
            }
        });
    }
}

/// Collects the `message` field and any structured fields of an event.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl MessageVisitor {
    fn message(&self) -> String {
        if self.fields.is_empty() {
            return self.message.clone();
        }
        let extras: Vec<String> = self
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        if self.message.is_empty() {
            extras.join(", ")
        } else {
            format!("{} ({})", self.message, extras.join(", "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{:?}", value);
        if field.name() == "message" {
            self.message = val;
        } else {
            self.fields.push((field.name().to_string(), val));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.push((field.name().to_string(), value.to_string()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.push((field.name().to_string(), value.to_string()));
    }
}
