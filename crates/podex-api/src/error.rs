// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use podex_core::Error;

/// Wrapper mapping the core taxonomy onto HTTP responses.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = match &self.0 {
            // Internal errors surface only the correlation id.
            Error::Internal { correlation_id } => {
                error!(%correlation_id, "internal error surfaced");
                json!({ "error": "internal error", "correlation_id": correlation_id })
            }
            Error::Fatal(detail) => {
                error!(%detail, "fatal invariant surfaced");
                json!({ "error": "internal error" })
            }
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

// ── Unit tests ────────────────────────────────────────────────────────────────
