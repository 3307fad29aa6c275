// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use podex_auth::{DeviceAuth, DeviceSessionStore, JwtIssuer};
use podex_executor::ApprovalBroker;
use podex_hub::Hub;
use podex_orchestrator::WorkspaceOrchestrator;
use podex_queue::TaskQueue;

use crate::middleware::IpLimiter;
use crate::sessions::SessionStore;

/// Everything the route handlers need, assembled once at the composition
/// root and shared behind an `Arc`.
pub struct ApiState {
    pub sessions: Arc<dyn SessionStore>,
    pub orchestrator: Arc<WorkspaceOrchestrator>,
    pub queue: Arc<TaskQueue>,
    pub hub: Arc<Hub>,
    pub jwt: Arc<JwtIssuer>,
    pub device_auth: Arc<DeviceAuth>,
    pub device_sessions: Arc<dyn DeviceSessionStore>,
    pub approvals: Arc<ApprovalBroker>,
    pub auth_limiter: Arc<IpLimiter>,
    pub secure_cookies: bool,
}
