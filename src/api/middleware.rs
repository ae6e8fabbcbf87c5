//! Request guards for the HTTP surface: bearer-key authentication and a
//! per-client request budget.

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::{
    collections::{HashMap, VecDeque},
    net::{IpAddr, Ipv4Addr},
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

/// Requests per minute per client when `COIN_RATE_LIMIT` is unset.
pub const DEFAULT_RATE_LIMIT: u32 = 60;

const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, Default)]
pub struct SecurityConfig {
    /// Bearer key every protected route requires.
    pub api_key: Option<String>,
    /// Allowed CORS origins. `None` is permissive.
    pub cors_origins: Option<Vec<String>>,
    pub rate_limiter: Option<RateLimiter>,
}

impl SecurityConfig {
    /// Read `COIN_API_KEY`, `COIN_CORS_ORIGINS` and `COIN_RATE_LIMIT`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. The request budget only applies when an
    /// API key is set, as that marks a shared deployment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = get("COIN_API_KEY");
        let cors_origins = get("COIN_CORS_ORIGINS").map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect()
        });
        let budget = match get("COIN_RATE_LIMIT").map(|v| v.parse::<u32>()) {
            Some(Ok(n)) => n,
            Some(Err(_)) => {
                warn!("Ignoring invalid COIN_RATE_LIMIT, using {}", DEFAULT_RATE_LIMIT);
                DEFAULT_RATE_LIMIT
            }
            None => DEFAULT_RATE_LIMIT,
        };
        let rate_limiter = api_key.as_ref().map(|_| RateLimiter::per_minute(budget));

        Self {
            api_key,
            cors_origins,
            rate_limiter,
        }
    }

    /// No authentication, permissive CORS, no request budget.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn with_rate_limit(per_minute: u32) -> Self {
        Self {
            rate_limiter: Some(RateLimiter::per_minute(per_minute)),
            ..Self::default()
        }
    }

    pub fn allow_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn cors_layer(&self) -> CorsLayer {
        let Some(origins) = &self.cors_origins else {
            return CorsLayer::permissive();
        };
        let allowed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| {
                HeaderValue::from_str(origin)
                    .map_err(|_| warn!("Ignoring invalid CORS origin: {}", origin))
                    .ok()
            })
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Sliding-window request budget per client IP.
///
/// Clients with nothing left inside the window are forgotten during the
/// first check after each full window, so the ledger only holds clients
/// seen recently.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    budget: usize,
    window: Duration,
    ledger: Arc<Mutex<Ledger>>,
}

#[derive(Debug)]
struct Ledger {
    clients: HashMap<IpAddr, VecDeque<Instant>>,
    last_sweep: Instant,
}

impl Ledger {
    fn sweep(&mut self, cutoff: Option<Instant>) {
        self.clients.retain(|_, stamps| {
            expire(stamps, cutoff);
            !stamps.is_empty()
        });
    }
}

impl RateLimiter {
    pub fn new(budget: u32, window: Duration) -> Self {
        Self {
            budget: budget as usize,
            window,
            ledger: Arc::new(Mutex::new(Ledger {
                clients: HashMap::new(),
                last_sweep: Instant::now(),
            })),
        }
    }

    pub fn per_minute(budget: u32) -> Self {
        Self::new(budget, RATE_WINDOW)
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a request from `ip`. False once its budget for the window is spent.
    pub fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let cutoff = now.checked_sub(self.window);
        let mut ledger = self.ledger();

        if now.saturating_duration_since(ledger.last_sweep) >= self.window {
            ledger.sweep(cutoff);
            ledger.last_sweep = now;
        }

        let stamps = ledger.clients.entry(ip).or_default();
        expire(stamps, cutoff);
        if stamps.len() >= self.budget {
            return false;
        }
        stamps.push_back(now);
        true
    }

    pub fn tracked_clients(&self) -> usize {
        self.ledger().clients.len()
    }
}

/// Drop timestamps at or before `cutoff`. Stamps are pushed in order.
fn expire(stamps: &mut VecDeque<Instant>, cutoff: Option<Instant>) {
    let Some(cutoff) = cutoff else {
        return;
    };
    while stamps.front().is_some_and(|&t| t <= cutoff) {
        stamps.pop_front();
    }
}

pub async fn auth_middleware(
    State(config): State<SecurityConfig>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = config.api_key.as_deref() else {
        return Ok(next.run(request).await);
    };
    match bearer_token(request.headers()) {
        Some(token) if token == expected => Ok(next.run(request).await),
        Some(_) => {
            warn!("Rejected request with a wrong API key");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!("Rejected request without a bearer token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let client = client_ip(request.headers());
    if !limiter.check(client) {
        warn!(%client, "Request budget exhausted");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }
    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// First address in the proxy headers, or localhost for direct callers.
fn client_ip(headers: &HeaderMap) -> IpAddr {
    ["x-forwarded-for", "x-real-ip"]
        .iter()
        .find_map(|name| {
            headers
                .get(*name)?
                .to_str()
                .ok()?
                .split(',')
                .next()?
                .trim()
                .parse()
                .ok()
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
