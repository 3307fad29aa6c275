// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Authentication, rate-limiting, and CSRF middleware.
//!
//! # Token authentication
//!
//! Authenticated requests carry either `Authorization: Bearer <jwt>` or
//! the cookie-bound access token. Verification covers signature, expiry,
//! and the JTI blacklist; the resolved [`Principal`] rides the request
//! extensions.
//!
//! # Rate limiting
//!
//! `governor` (GCRA) keyed by client IP, charged **only on failed auth
//! attempts** — legitimate clients are never throttled by their own
//! traffic. Loopback is exempt so local tooling cannot lock itself out.
//!
//! # CSRF
//!
//! Every mutating request must send the `x-csrf-token` header matching the
//! `podex_csrf` cookie (double-submit pattern). Bearer-only clients (CLI,
//! pods) are exempt — the attack requires ambient cookie credentials.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::DefaultClock;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use tracing::warn;

use podex_auth::TokenKind;

use crate::state::ApiState;

pub type IpLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

pub const ACCESS_COOKIE: &str = "podex_access_token";
pub const CSRF_COOKIE: &str = "podex_csrf";
pub const CSRF_HEADER: &str = "x-csrf-token";

/// The authenticated caller, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub jti: uuid::Uuid,
}

pub fn build_limiter(max_per_minute: u32, burst: u32) -> Arc<IpLimiter> {
    let per_minute = NonZeroU32::new(max_per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst.max(1)).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::per_minute(per_minute).allow_burst(burst);
    Arc::new(RateLimiter::keyed(quota))
}

/// Bearer/cookie JWT middleware. 401 on missing or invalid credentials,
/// 429 after repeated failures from one IP.
pub async fn require_auth(
    State(state): State<Arc<ApiState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = extract_token(request.headers());

    if let Some(token) = token {
        if let Ok(claims) = state.jwt.verify(&token, TokenKind::Access).await {
            request.extensions_mut().insert(Principal {
                user_id: claims.sub,
                jti: claims.jti,
            });
            // Successful auth never consumes a rate-limit token.
            return next.run(request).await;
        }
    }

    let ip = addr.ip();
    if !is_loopback(ip) && state.auth_limiter.check_key(&ip).is_err() {
        warn!(%ip, "rate limit exceeded after repeated auth failures");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(axum::http::header::RETRY_AFTER, "60")],
            "Too Many Requests",
        )
            .into_response();
    }
    warn!(%ip, "authentication failed");
    (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}

/// CSRF double-submit check on mutating methods. Applied after
/// `require_auth`, to cookie-authenticated requests only.
pub async fn require_csrf(request: Request, next: Next) -> Response {
    let mutating = !matches!(
        *request.method(),
        Method::GET | Method::HEAD | Method::OPTIONS
    );
    if mutating && uses_cookie_auth(request.headers()) {
        let header = request
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok());
        let cookie = cookie_value(request.headers(), CSRF_COOKIE);
        match (header, cookie) {
            (Some(h), Some(c)) if !h.is_empty() && h == c => {}
            _ => {
                warn!("mutating request without a valid CSRF header pair");
                return (StatusCode::FORBIDDEN, "CSRF check failed").into_response();
            }
        }
    }
    next.run(request).await
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(bearer) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.to_string());
    }
    cookie_value(headers, ACCESS_COOKIE)
}

fn uses_cookie_auth(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").is_none())
        .unwrap_or(true)
        && cookie_value(headers, ACCESS_COOKIE).is_some()
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        if parts.next() == Some(name) {
            return parts.next().map(str::to_string);
        }
    }
    None
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4 == Ipv4Addr::LOCALHOST,
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
