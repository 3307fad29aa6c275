// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! OAuth 2.0 Device Authorization Grant (RFC 8628).
//!
//! Codes live in Redis scratch space with explicit TTLs. The device code
//! is the secret the device polls with; the user code is the short
//! confusable-free string a human types into the browser. The token
//! exchange is single-use: the grant record is deleted on success and a
//! tombstone makes any later poll `invalid_grant`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::info;

use podex_core::{Error, Result};
use podex_redis::{get_json, set_json, RedisApi};

use crate::jwt::{JwtIssuer, TokenKind};

/// Confusable-free alphabet for user codes (no 0/O/I/1/L).
const USER_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const USER_CODE_LEN: usize = 8;
const DEVICE_CODE_BYTES: usize = 40;

fn device_key(device_code: &str) -> String {
    format!("podex:device_code:{device_code}")
}
fn user_code_key(user_code: &str) -> String {
    format!("podex:device_user_code:{user_code}")
}
fn used_key(device_code: &str) -> String {
    format!("podex:device_used:{device_code}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum GrantStatus {
    Pending,
    Authorized,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GrantRecord {
    user_code: String,
    status: GrantStatus,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    authorized_at: Option<DateTime<Utc>>,
    device_type: String,
    #[serde(default)]
    device_name: Option<String>,
    #[serde(default)]
    last_poll_at: Option<DateTime<Utc>>,
}

/// What `POST /auth/device/code` returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCodeGrant {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub interval: u64,
    pub expires_in: u64,
}

/// Poll outcomes, mapping one-to-one onto the RFC 8628 error codes.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceTokenResponse {
    Granted {
        access_token: String,
        refresh_token: String,
        expires_in: u64,
        user_id: String,
        refresh_jti: uuid::Uuid,
    },
    /// `authorization_pending`
    Pending,
    /// `slow_down`
    SlowDown,
    /// `expired_token`
    Expired,
    /// `access_denied`
    Denied,
    /// `invalid_grant`
    InvalidGrant,
}

impl DeviceTokenResponse {
    /// RFC 8628 error code, `None` for a granted response.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            DeviceTokenResponse::Granted { .. } => None,
            DeviceTokenResponse::Pending => Some("authorization_pending"),
            DeviceTokenResponse::SlowDown => Some("slow_down"),
            DeviceTokenResponse::Expired => Some("expired_token"),
            DeviceTokenResponse::Denied => Some("access_denied"),
            DeviceTokenResponse::InvalidGrant => Some("invalid_grant"),
        }
    }
}

pub struct DeviceAuth {
    redis: Arc<dyn RedisApi>,
    jwt: Arc<JwtIssuer>,
    verification_uri: String,
    code_ttl_secs: u64,
    poll_interval_secs: u64,
}

impl DeviceAuth {
    pub fn new(
        redis: Arc<dyn RedisApi>,
        jwt: Arc<JwtIssuer>,
        verification_uri: impl Into<String>,
        code_ttl_secs: u64,
        poll_interval_secs: u64,
    ) -> Self {
        Self {
            redis,
            jwt,
            verification_uri: verification_uri.into(),
            code_ttl_secs,
            poll_interval_secs,
        }
    }

    /// Start a grant: allocate the code pair and park it in Redis.
    pub async fn request_device_code(
        &self,
        device_type: &str,
        device_name: Option<&str>,
    ) -> Result<DeviceCodeGrant> {
        let device_code = generate_device_code();
        let user_code = generate_user_code();
        let now = Utc::now();

        let record = GrantRecord {
            user_code: user_code.clone(),
            status: GrantStatus::Pending,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(self.code_ttl_secs as i64),
            user_id: None,
            authorized_at: None,
            device_type: device_type.to_string(),
            device_name: device_name.map(str::to_string),
            last_poll_at: None,
        };

        // Keys outlive the logical expiry slightly so polls inside the
        // window can still distinguish "expired" from "never existed".
        let key_ttl = self.code_ttl_secs * 2;
        set_json(self.redis.as_ref(), &device_key(&device_code), &record, Some(key_ttl)).await?;
        self.redis
            .set(&user_code_key(&user_code), &device_code, Some(key_ttl))
            .await?;

        info!(%user_code, device_type, "device code issued");
        Ok(DeviceCodeGrant {
            device_code,
            user_code,
            verification_uri: self.verification_uri.clone(),
            interval: self.poll_interval_secs,
            expires_in: self.code_ttl_secs,
        })
    }

    /// The browser half: the signed-in user approves or denies the code
    /// they typed. Dashes and case in the user code are forgiven.
    pub async fn authorize_device(
        &self,
        user_code: &str,
        user_id: &str,
        approve: bool,
    ) -> Result<()> {
        let normalized = normalize_user_code(user_code);
        let Some(device_code) = self.redis.get(&user_code_key(&normalized)).await? else {
            return Err(Error::NotFound("device code".into()));
        };
        let key = device_key(&device_code);
        let Some(mut record) = get_json::<GrantRecord>(self.redis.as_ref(), &key).await? else {
            return Err(Error::NotFound("device code".into()));
        };
        if record.status != GrantStatus::Pending {
            return Err(Error::Conflict("device code already resolved".into()));
        }
        if Utc::now() > record.expires_at {
            return Err(Error::NotFound("device code".into()));
        }

        record.status = if approve {
            GrantStatus::Authorized
        } else {
            GrantStatus::Denied
        };
        record.user_id = Some(user_id.to_string());
        record.authorized_at = Some(Utc::now());
        set_json(self.redis.as_ref(), &key, &record, Some(self.code_ttl_secs * 2)).await?;

        info!(user_code = %normalized, approve, "device authorization resolved");
        Ok(())
    }

    /// The device half: poll for tokens. Exactly one poll can ever return
    /// `Granted` for a given device code.
    pub async fn poll_device_token(&self, device_code: &str) -> Result<DeviceTokenResponse> {
        // A consumed code stays invalid_grant for as long as anyone could
        // still be polling it.
        if self.redis.get(&used_key(device_code)).await?.is_some() {
            return Ok(DeviceTokenResponse::InvalidGrant);
        }

        let key = device_key(device_code);
        let Some(mut record) = get_json::<GrantRecord>(self.redis.as_ref(), &key).await? else {
            return Ok(DeviceTokenResponse::InvalidGrant);
        };

        let now = Utc::now();
        if now > record.expires_at {
            self.redis.del(&key).await?;
            self.redis.del(&user_code_key(&record.user_code)).await?;
            return Ok(DeviceTokenResponse::Expired);
        }

        // Enforce the advertised poll interval.
        if let Some(last) = record.last_poll_at {
            if (now - last).num_seconds() < self.poll_interval_secs as i64 {
                return Ok(DeviceTokenResponse::SlowDown);
            }
        }
        record.last_poll_at = Some(now);
        set_json(self.redis.as_ref(), &key, &record, Some(self.code_ttl_secs * 2)).await?;

        match record.status {
            GrantStatus::Pending => Ok(DeviceTokenResponse::Pending),
            GrantStatus::Denied => {
                self.consume(device_code, &record).await?;
                Ok(DeviceTokenResponse::Denied)
            }
            GrantStatus::Authorized => {
                let user_id = record
                    .user_id
                    .clone()
                    .ok_or_else(|| Error::Fatal("authorized grant without user".into()))?;
                let (access_token, _) = self.jwt.issue(&user_id, TokenKind::Access)?;
                let (refresh_token, refresh_claims) = self.jwt.issue(&user_id, TokenKind::Refresh)?;

                self.consume(device_code, &record).await?;
                info!(%user_id, "device grant exchanged for tokens");
                Ok(DeviceTokenResponse::Granted {
                    access_token,
                    refresh_token,
                    expires_in: self.jwt.access_ttl().as_secs(),
                    user_id,
                    refresh_jti: refresh_claims.jti,
                })
            }
        }
    }

    /// Delete the grant and leave a tombstone so replays are
    /// `invalid_grant`, not `expired_token`.
    async fn consume(&self, device_code: &str, record: &GrantRecord) -> Result<()> {
        self.redis.del(&device_key(device_code)).await?;
        self.redis.del(&user_code_key(&record.user_code)).await?;
        self.redis
            .set(&used_key(device_code), "1", Some(self.code_ttl_secs * 2))
            .await
    }
}

fn generate_device_code() -> String {
    let mut bytes = vec![0u8; DEVICE_CODE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

/// `XXXX-XXXX` over the confusable-free alphabet.
fn generate_user_code() -> String {
    let mut code = String::with_capacity(USER_CODE_LEN + 1);
    for i in 0..USER_CODE_LEN {
        if i == USER_CODE_LEN / 2 {
            code.push('-');
        }
        let idx = (OsRng.next_u32() as usize) % USER_CODE_ALPHABET.len();
        code.push(USER_CODE_ALPHABET[idx] as char);
    }
    code
}

fn normalize_user_code(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if cleaned.len() == USER_CODE_LEN {
        format!("{}-{}", &cleaned[..4], &cleaned[4..])
    } else {
        input.to_string()
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
