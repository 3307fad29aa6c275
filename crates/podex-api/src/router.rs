// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Route table and the handlers small enough not to warrant their own
//! module (messages, tasks, approvals, cluster status).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{middleware as axum_middleware, Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use podex_core::{Error, TaskPriority};
use podex_hub::{pod_ws_handler, session_ws_handler, WsState};
use podex_queue::EnqueueParams;

use crate::device;
use crate::error::ApiResult;
use crate::git;
use crate::middleware::{require_auth, require_csrf, Principal};
use crate::sessions::{self, owned_session};
use crate::state::ApiState;

/// Assemble the full HTTP/WS surface.
pub fn build_router(state: Arc<ApiState>) -> Router {
    let ws = Router::new()
        .route("/ws/session", get(session_ws_handler))
        .route("/ws/pod", get(pod_ws_handler))
        .with_state(WsState {
            hub: state.hub.clone(),
        });

    // The device grant endpoints are unauthenticated by design: the
    // device has no credentials yet.
    let public = Router::new()
        .route("/auth/device/code", post(device::request_code))
        .route("/auth/device/token", post(device::poll_token))
        .with_state(state.clone());

    let authed = Router::new()
        .route(
            "/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route(
            "/sessions/:id",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/sessions/:id/archive", post(sessions::archive_session))
        .route("/sessions/:id/unarchive", post(sessions::unarchive_session))
        .route("/sessions/:id/messages", post(post_message))
        .route("/sessions/:id/tasks", get(session_tasks))
        .route("/sessions/:id/git/status", get(git::status))
        .route("/sessions/:id/git/commit", post(git::commit))
        .route("/sessions/:id/git/push", post(git::push))
        .route("/sessions/:id/git/pull", post(git::pull))
        .route("/sessions/:id/git/branches", get(git::branches))
        .route("/sessions/:id/git/checkout", post(git::checkout))
        .route("/sessions/:id/git/compare", post(git::compare))
        .route("/sessions/:id/git/merge-preview", post(git::merge_preview))
        .route("/auth/device/authorize", post(device::authorize))
        .route(
            "/auth/sessions",
            get(device::list_device_sessions).delete(device::revoke_all_device_sessions),
        )
        .route("/auth/sessions/:id", delete(device::revoke_device_session))
        .route("/approvals/:id", post(resolve_approval))
        .route("/cluster/status", get(cluster_status))
        .layer(axum_middleware::from_fn(require_csrf))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ))
        .with_state(state);

    Router::new().merge(public).merge(authed).merge(ws)
}

// ── Small handlers ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessageBody {
    content: String,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default = "default_role")]
    agent_role: String,
}

fn default_role() -> String {
    "coder".into()
}

/// A user turn: enqueue a task for the session's agent worker.
async fn post_message(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
    Json(body): Json<MessageBody>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.content.trim().is_empty() {
        return Err(Error::Validation("message must not be empty".into()).into());
    }
    let session = owned_session(&state, &principal.user_id, &session_id).await?;
    if session.archived {
        return Err(Error::Conflict(format!("session {session_id} is archived")).into());
    }

    let priority = body
        .priority
        .as_deref()
        .map(TaskPriority::parse_lenient)
        .unwrap_or(TaskPriority::Medium);
    let task_id = state
        .queue
        .enqueue(EnqueueParams::new(
            &session.id,
            &body.agent_role,
            body.content.trim(),
            priority,
        ))
        .await?;
    Ok(Json(json!({ "task_id": task_id })))
}

async fn session_tasks(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = owned_session(&state, &principal.user_id, &session_id).await?;
    let stats = state.queue.session_stats(&session.id).await?;
    let pending = state.queue.pending_tasks(&session.id, None, 50).await?;
    let active = state.queue.active_tasks(&session.id).await?;
    Ok(Json(json!({
        "stats": stats,
        "pending": pending,
        "active": active,
    })))
}

#[derive(Debug, Deserialize)]
struct ResolveApprovalBody {
    approved: bool,
    #[serde(default)]
    add_to_allowlist: bool,
}

/// Resolve a pending tool approval. The second resolution of the same id
/// is 404 ("unknown approval").
async fn resolve_approval(
    State(state): State<Arc<ApiState>>,
    Extension(_principal): Extension<Principal>,
    Path(approval_id): Path<Uuid>,
    Json(body): Json<ResolveApprovalBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .approvals
        .resolve(approval_id, body.approved, body.add_to_allowlist)?;
    Ok(Json(json!({ "resolved": approval_id })))
}

async fn cluster_status(
    State(state): State<Arc<ApiState>>,
    Extension(_principal): Extension<Principal>,
) -> ApiResult<Json<serde_json::Value>> {
    let status = state.orchestrator.cluster_status().await;
    Ok(Json(serde_json::to_value(status).unwrap_or_default()))
}

// ── Integration tests over the assembled router ──────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tower::ServiceExt;

    use podex_auth::{DeviceAuth, JwtIssuer, MemoryDeviceSessionStore, TokenKind};
    use podex_core::HostCapacity;
    use podex_docker::MultiHostDocker;
    use podex_executor::ApprovalBroker;
    use podex_hub::{Hub, HubLimits, PodRegistry, YjsState};
    use podex_orchestrator::{
        HostInventory, MemoryWorkspaceStore, WorkspaceOrchestrator,
    };
    use podex_placement::PlacementEngine;
    use podex_queue::TaskQueue;
    use podex_redis::MemoryRedis;

    use crate::directory::CoordinatorDirectory;
    use crate::middleware::build_limiter;
    use crate::pods::MemoryPodStore;
    use crate::sessions::MemorySessionStore;

    struct NoFleet;

    #[async_trait::async_trait]
    impl HostInventory for NoFleet {
        async fn snapshot(&self) -> Vec<HostCapacity> {
            vec![]
        }
    }

    struct TestApi {
        router: Router,
        jwt: Arc<JwtIssuer>,
        state: Arc<ApiState>,
    }

    fn api() -> TestApi {
        let redis = Arc::new(MemoryRedis::new());
        let jwt = Arc::new(JwtIssuer::new(
            b"router-test-secret-32-bytes-long",
            redis.clone(),
            Duration::from_secs(900),
            Duration::from_secs(86400),
        ));
        let session_store = Arc::new(MemorySessionStore::new());
        let workspace_store = Arc::new(MemoryWorkspaceStore::new());
        let pods = Arc::new(PodRegistry::new());
        let hub = Arc::new(Hub::new(
            pods.clone(),
            Arc::new(CoordinatorDirectory::new(
                jwt.clone(),
                session_store.clone(),
                workspace_store.clone(),
                pods,
            )),
            Arc::new(MemoryPodStore::new()),
            Arc::new(YjsState::new(100, 1024 * 1024)),
            HubLimits::default(),
        ));
        let docker = Arc::new(MultiHostDocker::new());
        let orchestrator = Arc::new(WorkspaceOrchestrator::new(
            docker,
            workspace_store,
            Arc::new(NoFleet),
            PlacementEngine::new(true, 90),
            redis.clone(),
            "podex/workspace:latest",
        ));
        let device_auth = Arc::new(DeviceAuth::new(
            redis.clone(),
            jwt.clone(),
            "https://podex.dev/activate",
            900,
            0, // no slow-down throttling in tests
        ));
        let state = Arc::new(ApiState {
            sessions: session_store,
            orchestrator,
            queue: Arc::new(TaskQueue::new(redis, 300)),
            hub,
            jwt: jwt.clone(),
            device_auth,
            device_sessions: Arc::new(MemoryDeviceSessionStore::new()),
            approvals: Arc::new(ApprovalBroker::new(Duration::from_secs(600))),
            auth_limiter: build_limiter(5, 2),
            secure_cookies: false,
        });
        let router = build_router(state.clone())
            .layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 9], 4242))));
        TestApi {
            router,
            jwt,
            state,
        }
    }

    fn bearer(jwt: &JwtIssuer, user: &str) -> String {
        let (token, _) = jwt.issue(user, TokenKind::Access).unwrap();
        format!("Bearer {token}")
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    }

    #[tokio::test]
    async fn unauthenticated_requests_are_rejected() {
        let api = api();
        let response = api
            .router
            .oneshot(Request::get("/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn session_crud_with_archive_state_machine() {
        let api = api();
        let auth = bearer(&api.jwt, "u1");

        // Create.
        let response = api
            .router
            .clone()
            .oneshot(
                Request::post("/sessions")
                    .header("authorization", &auth)
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"title": "fix the login bug"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let session = body_json(response).await;
        let session_id = session["id"].as_str().unwrap().to_string();

        // Archive once: ok. Twice: conflict.
        for (round, expected) in [(1, StatusCode::OK), (2, StatusCode::BAD_REQUEST)] {
            let response = api
                .router
                .clone()
                .oneshot(
                    Request::post(format!("/sessions/{session_id}/archive"))
                        .header("authorization", &auth)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), expected, "archive round {round}");
        }

        // Unarchive: ok, then conflict.
        for expected in [StatusCode::OK, StatusCode::BAD_REQUEST] {
            let response = api
                .router
                .clone()
                .oneshot(
                    Request::post(format!("/sessions/{session_id}/unarchive"))
                        .header("authorization", &auth)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), expected);
        }
    }

    #[tokio::test]
    async fn foreign_sessions_are_indistinguishable_from_missing() {
        let api = api();
        let owner = bearer(&api.jwt, "owner");
        let stranger = bearer(&api.jwt, "stranger");

        let response = api
            .router
            .clone()
            .oneshot(
                Request::post("/sessions")
                    .header("authorization", &owner)
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"title": "private"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let session_id = body_json(response).await["id"].as_str().unwrap().to_string();

        let response = api
            .router
            .clone()
            .oneshot(
                Request::get(format!("/sessions/{session_id}"))
                    .header("authorization", &stranger)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn device_grant_happy_path_over_http() {
        let api = api();

        // 1. Device asks for a code pair.
        let response = api
            .router
            .clone()
            .oneshot(
                Request::post("/auth/device/code")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"device_type": "cli"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let grant = body_json(response).await;
        assert_eq!(grant["interval"], 0);
        assert_eq!(grant["expires_in"], 900);
        let device_code = grant["device_code"].as_str().unwrap().to_string();
        let user_code = grant["user_code"].as_str().unwrap().to_string();

        // 2. Poll before approval: authorization_pending.
        let poll = |device_code: String| {
            Request::post("/auth/device/token")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "device_code": device_code }).to_string(),
                ))
                .unwrap()
        };
        let response = api.router.clone().oneshot(poll(device_code.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "authorization_pending");

        // 3. The signed-in user approves in the browser.
        let auth = bearer(&api.jwt, "u1");
        let response = api
            .router
            .clone()
            .oneshot(
                Request::post("/auth/device/authorize")
                    .header("authorization", &auth)
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({ "user_code": user_code, "action": "approve" }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // 4. The device exchanges the code for tokens — exactly once.
        let response = api.router.clone().oneshot(poll(device_code.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let tokens = body_json(response).await;
        assert!(tokens["access_token"].as_str().is_some());
        assert!(tokens["refresh_token"].as_str().is_some());

        // 5. A replay is invalid_grant.
        let response = api.router.clone().oneshot(poll(device_code)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn cookie_requests_without_csrf_header_are_refused() {
        let api = api();
        let (token, _) = api.jwt.issue("u1", TokenKind::Access).unwrap();

        let response = api
            .router
            .clone()
            .oneshot(
                Request::post("/sessions")
                    .header("cookie", format!("podex_access_token={token}"))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"title": "x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // With the matching header pair it goes through.
        let response = api
            .router
            .clone()
            .oneshot(
                Request::post("/sessions")
                    .header("cookie", format!("podex_access_token={token}; podex_csrf=abc"))
                    .header("x-csrf-token", "abc")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"title": "x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn messages_enqueue_tasks_for_the_session() {
        let api = api();
        let auth = bearer(&api.jwt, "u1");

        let response = api
            .router
            .clone()
            .oneshot(
                Request::post("/sessions")
                    .header("authorization", &auth)
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"title": "s"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let session_id = body_json(response).await["id"].as_str().unwrap().to_string();

        let response = api
            .router
            .clone()
            .oneshot(
                Request::post(format!("/sessions/{session_id}/messages"))
                    .header("authorization", &auth)
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"content": "add a login page", "priority": "high"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let stats = api.state.queue.session_stats(&session_id).await.unwrap();
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn approval_resolution_is_single_use_over_http() {
        let api = api();
        let auth = bearer(&api.jwt, "u1");
        let pending = api.state.approvals.request("s1");
        let id = pending.approval_id;

        let request = |id: Uuid| {
            Request::post(format!("/approvals/{id}"))
                .header("authorization", &auth)
                .header("content-type", "application/json")
                .body(Body::from(r#"{"approved": true}"#))
                .unwrap()
        };
        let response = api.router.clone().oneshot(request(id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = api.router.clone().oneshot(request(id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
