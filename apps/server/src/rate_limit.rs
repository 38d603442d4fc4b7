use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::ApiResponse;

type TierMap = DashMap<Tier, (RateLimitConfig, DashMap<IpAddr, Vec<Instant>>)>;

/// Route groups with their own request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Read-only catalogue endpoints.
    Public,
    /// Per-user endpoints: my bookings, payments, profile.
    Client,
    /// Booking creation.
    Booking,
    Admin,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Public, Tier::Client, Tier::Booking, Tier::Admin];

    pub fn default_config(self) -> RateLimitConfig {
        let (max_requests, secs) = match self {
            Tier::Public => (60, 60),
            Tier::Client => (30, 60),
            Tier::Booking => (5, 300),
            Tier::Admin => (120, 60),
        };
        RateLimitConfig {
            max_requests,
            window: Duration::from_secs(secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests allowed within the sliding window.
    pub max_requests: u32,
    pub window: Duration,
}

/// In-memory per-IP sliding-window limiter, one window per [`Tier`].
#[derive(Debug, Clone)]
pub struct RateLimiter {
    tiers: Arc<TierMap>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Every tier with its default budget.
    pub fn new() -> Self {
        let limiter = Self {
            tiers: Arc::new(DashMap::new()),
        };
        for tier in Tier::ALL {
            limiter.set_tier(tier, tier.default_config());
        }
        limiter
    }

    /// Replace a tier's budget and forget its history.
    pub fn set_tier(&self, tier: Tier, config: RateLimitConfig) {
        self.tiers.insert(tier, (config, DashMap::new()));
    }

    /// `Err(retry_after_secs)` when `ip` is over budget.
    pub fn check(&self, tier: Tier, ip: IpAddr) -> Result<(), u64> {
        self.check_at(tier, ip, Instant::now())
    }

    pub fn check_at(&self, tier: Tier, ip: IpAddr, now: Instant) -> Result<(), u64> {
        let Some(tier_entry) = self.tiers.get(&tier) else {
            return Ok(());
        };
        let (config, ip_map) = tier_entry.value();

        let mut entry = ip_map.entry(ip).or_default();
        entry.retain(|t| now.saturating_duration_since(*t) < config.window);

        if entry.len() >= config.max_requests as usize {
            let retry_after = entry
                .first()
                .map(|oldest| (*oldest + config.window).saturating_duration_since(now).as_secs())
                .unwrap_or(0)
                .max(1);
            return Err(retry_after);
        }

        entry.push(now);
        Ok(())
    }

    /// Drop entries older than twice their window. Run periodically.
    pub fn cleanup(&self) {
        self.cleanup_at(Instant::now());
    }

    pub fn cleanup_at(&self, now: Instant) {
        for tier_entry in self.tiers.iter() {
            let (config, ip_map) = tier_entry.value();
            let cutoff = config.window * 2;
            ip_map.retain(|_ip, timestamps| {
                timestamps.retain(|t| now.saturating_duration_since(*t) < cutoff);
                !timestamps.is_empty()
            });
        }
    }

    /// Number of IPs currently tracked in `tier`.
    pub fn tracked(&self, tier: Tier) -> usize {
        self.tiers.get(&tier).map(|e| e.value().1.len()).unwrap_or(0)
    }

    /// Middleware state binding this limiter to one tier.
    pub fn for_tier(&self, tier: Tier) -> TierLimiter {
        TierLimiter {
            limiter: self.clone(),
            tier,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TierLimiter {
    limiter: RateLimiter,
    tier: Tier,
}

/// Client IP from `X-Forwarded-For` (reverse proxy) or the socket.
pub fn extract_client_ip(req: &Request) -> IpAddr {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(ip) = forwarded
            .split(',')
            .next()
            .and_then(|first| first.trim().parse::<IpAddr>().ok())
        {
            return ip;
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn too_many_requests(retry_after: u64) -> Response {
    let body = ApiResponse::<()>::error(format!(
        "Too many requests. Try again in {} seconds",
        retry_after
    ));
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", retry_after.to_string())],
        Json(body),
    )
        .into_response()
}

pub async fn rate_limit(
    State(limiter): State<TierLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let ip = extract_client_ip(&req);
    limiter
        .limiter
        .check(limiter.tier, ip)
        .map_err(|retry_after| {
            tracing::warn!(%ip, tier = ?limiter.tier, retry_after, "rate limited");
            too_many_requests(retry_after)
        })?;
    Ok(next.run(req).await)
}
