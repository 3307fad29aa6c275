// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Device-grant routes (RFC 8628) and device-session management.
//!
//! `POST /auth/device/code` and `POST /auth/device/token` are
//! unauthenticated by design — the device has no credentials yet. The
//! token poll returns the RFC error codes verbatim so standard clients
//! interoperate.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use podex_auth::{DeviceSession, DeviceTokenResponse};
use podex_core::Error;

use crate::error::ApiResult;
use crate::middleware::Principal;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct DeviceCodeBody {
    #[serde(default = "default_device_type")]
    pub device_type: String,
    #[serde(default)]
    pub device_name: Option<String>,
}

fn default_device_type() -> String {
    "cli".into()
}

pub async fn request_code(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<DeviceCodeBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let grant = state
        .device_auth
        .request_device_code(&body.device_type, body.device_name.as_deref())
        .await?;
    Ok(Json(json!({
        "device_code": grant.device_code,
        "user_code": grant.user_code,
        "verification_uri": grant.verification_uri,
        "interval": grant.interval,
        "expires_in": grant.expires_in,
    })))
}

#[derive(Debug, Deserialize)]
pub struct TokenPollBody {
    pub device_code: String,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub device_name: Option<String>,
}

pub async fn poll_token(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<TokenPollBody>,
) -> Response {
    let response = match state.device_auth.poll_device_token(&body.device_code).await {
        Ok(response) => response,
        Err(e) => return crate::error::ApiError(e).into_response(),
    };

    match response {
        DeviceTokenResponse::Granted {
            access_token,
            refresh_token,
            expires_in,
            user_id,
            refresh_jti,
        } => {
            // Materialize the refresh-token holder as a device session.
            let mut session = DeviceSession::new(
                &user_id,
                body.device_type.as_deref().unwrap_or("cli"),
                refresh_jti,
                Utc::now() + chrono::Duration::seconds(expires_in as i64 * 4),
            );
            session.device_name = body.device_name.clone();
            if let Err(e) = state.device_sessions.create(&session).await {
                return crate::error::ApiError(e).into_response();
            }
            info!(%user_id, device_session = %session.id, "device session created");
            Json(json!({
                "access_token": access_token,
                "refresh_token": refresh_token,
                "token_type": "Bearer",
                "expires_in": expires_in,
            }))
            .into_response()
        }
        other => {
            let code = other.error_code().unwrap_or("invalid_grant");
            (StatusCode::BAD_REQUEST, Json(json!({ "error": code }))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeBody {
    pub user_code: String,
    /// `approve` or `deny`.
    pub action: String,
}

pub async fn authorize(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<AuthorizeBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let approve = match body.action.as_str() {
        "approve" => true,
        "deny" => false,
        other => {
            return Err(Error::Validation(format!("unknown action: {other}")).into());
        }
    };
    state
        .device_auth
        .authorize_device(&body.user_code, &principal.user_id, approve)
        .await?;
    Ok(Json(json!({ "status": if approve { "approved" } else { "denied" } })))
}

// ── Device-session management ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct DeviceSessionView {
    pub id: Uuid,
    pub device_type: String,
    pub device_name: Option<String>,
    pub os_name: Option<String>,
    pub browser_name: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub last_active_at: chrono::DateTime<Utc>,
    pub expires_at: chrono::DateTime<Utc>,
}

impl From<DeviceSession> for DeviceSessionView {
    fn from(s: DeviceSession) -> Self {
        Self {
            id: s.id,
            device_type: s.device_type,
            device_name: s.device_name,
            os_name: s.os_name,
            browser_name: s.browser_name,
            city: s.city,
            country: s.country,
            last_active_at: s.last_active_at,
            expires_at: s.expires_at,
        }
    }
}

pub async fn list_device_sessions(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<Vec<DeviceSessionView>>> {
    let sessions = state.device_sessions.list_active(&principal.user_id).await?;
    Ok(Json(sessions.into_iter().map(Into::into).collect()))
}

/// Revoke one device session, cascading to its refresh token's JTI.
pub async fn revoke_device_session(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = state
        .device_sessions
        .get(session_id)
        .await?
        .filter(|s| s.user_id == principal.user_id)
        .ok_or_else(|| Error::NotFound(format!("device session {session_id}")))?;

    let revoked = state.device_sessions.revoke(session.id).await?;
    let remaining = (revoked.expires_at - Utc::now())
        .to_std()
        .unwrap_or_default();
    state
        .jwt
        .revoke_jti(revoked.refresh_token_jti, remaining)
        .await?;

    info!(device_session = %session_id, "device session revoked");
    Ok(Json(json!({ "revoked": session_id })))
}

#[derive(Debug, Deserialize)]
pub struct BulkRevokeQuery {
    /// Keep the session whose refresh JTI matches the caller's token.
    #[serde(default)]
    pub keep_current: bool,
}

/// Bulk revocation: every device session (optionally except the calling
/// one), each cascading to its JTI.
pub async fn revoke_all_device_sessions(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<BulkRevokeQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let keep = if query.keep_current {
        state
            .device_sessions
            .list_active(&principal.user_id)
            .await?
            .into_iter()
            .find(|s| s.refresh_token_jti == principal.jti || current_access_of(s, &principal))
            .map(|s| s.id)
    } else {
        None
    };

    let revoked = state
        .device_sessions
        .revoke_all(&principal.user_id, keep)
        .await?;
    for session in &revoked {
        let remaining = (session.expires_at - Utc::now()).to_std().unwrap_or_default();
        state
            .jwt
            .revoke_jti(session.refresh_token_jti, remaining)
            .await?;
    }

    info!(
        user_id = %principal.user_id,
        count = revoked.len(),
        keep_current = query.keep_current,
        "bulk device-session revocation"
    );
    Ok(Json(json!({ "revoked": revoked.len() })))
}

/// Access tokens carry their own JTI, not the refresh token's; without a
/// recorded linkage the freshest session is the best stand-in for "the
/// one I'm using right now".
fn current_access_of(session: &DeviceSession, _principal: &Principal) -> bool {
    (Utc::now() - session.last_active_at).num_seconds() < 60
}
