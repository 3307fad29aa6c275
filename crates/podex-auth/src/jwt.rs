// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! User JWTs with JTI-based revocation.
//!
//! HS256, claims `sub` / `exp` / `iat` / `jti` / `kind`. Revoking a token
//! writes `podex:token_blacklist:{jti}` with TTL equal to the token's
//! remaining lifetime — the blacklist key dies exactly when the token
//! would have expired anyway. Verification checks signature, expiry, and
//! the blacklist.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use podex_core::{Error, Result};
use podex_redis::RedisApi;

fn blacklist_key(jti: Uuid) -> String {
    format!("podex:token_blacklist:{jti}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: Uuid,
    pub kind: TokenKind,
}

impl Claims {
    pub fn remaining(&self) -> Duration {
        let secs = self.exp - Utc::now().timestamp();
        Duration::from_secs(secs.max(0) as u64)
    }
}

pub struct JwtIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    redis: Arc<dyn RedisApi>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtIssuer {
    pub fn new(
        secret: &[u8],
        redis: Arc<dyn RedisApi>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            redis,
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn issue(&self, user_id: &str, kind: TokenKind) -> Result<(String, Claims)> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: now + ttl.as_secs() as i64,
            iat: now,
            jti: Uuid::new_v4(),
            kind,
        };
        let token = encode(&jsonwebtoken::Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Fatal(format!("jwt encoding failed: {e}")))?;
        Ok((token, claims))
    }

    /// Verify signature and expiry, require the expected kind, then check
    /// the JTI blacklist. Failures are uniform `Unauthorized` — callers
    /// never learn which check failed.
    pub async fn verify(&self, token: &str, expect: TokenKind) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            debug!("jwt rejected: {e}");
            Error::Unauthorized
        })?;
        let claims = data.claims;
        if claims.kind != expect {
            return Err(Error::Unauthorized);
        }
        if self.is_revoked(claims.jti).await? {
            debug!(jti = %claims.jti, "revoked token presented");
            return Err(Error::Unauthorized);
        }
        Ok(claims)
    }

    pub async fn is_revoked(&self, jti: Uuid) -> Result<bool> {
        Ok(self.redis.get(&blacklist_key(jti)).await?.is_some())
    }

    /// Blacklist a token for its remaining lifetime.
    pub async fn revoke(&self, claims: &Claims) -> Result<()> {
        self.revoke_jti(claims.jti, claims.remaining()).await
    }

    pub async fn revoke_jti(&self, jti: Uuid, remaining: Duration) -> Result<()> {
        // A token already past expiry needs no blacklist entry, but a
        // zero-TTL SET would be an error; clamp to one second.
        let ttl = remaining.as_secs().max(1);
        self.redis
            .set(&blacklist_key(jti), "revoked", Some(ttl))
            .await
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
