// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP handlers for the trigger endpoint.

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::TriggerError;
use crate::interaction::{ActivationRequest, InteractionResponse};
use crate::supervisor::{ServiceSupervisor, SupervisorStatus, TriggerDisposition};
use crate::verifier::TriggerVerifier;

/// Shared state for the handlers.
pub struct AppState {
    /// Signature verifier for triggers.
    pub verifier: TriggerVerifier,
    /// Lifecycle supervisor of the controlled service.
    pub supervisor: ServiceSupervisor,
    /// When the server started (for uptime calculation).
    pub start_time: Instant,
    /// Server version string.
    pub version: String,
}

impl AppState {
    /// Create handler state.
    pub fn new(verifier: TriggerVerifier, supervisor: ServiceSupervisor) -> Self {
        Self {
            verifier,
            supervisor,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Get uptime in milliseconds.
    pub fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }
}

/// Handle an activation trigger.
///
/// Verification comes first; nothing else happens for an unverified request.
/// Verified pings are acknowledged without touching the service.
pub async fn handle_trigger(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<InteractionResponse>, TriggerError> {
    let request = ActivationRequest::from_parts(&headers, body);

    let (Some(signature), Some(timestamp)) = (&request.signature, &request.timestamp) else {
        return Err(TriggerError::Unauthorized);
    };
    if !state
        .verifier
        .verify(timestamp, &request.raw_body, signature)
    {
        return Err(TriggerError::Unauthorized);
    }

    let interaction = request
        .parse()
        .map_err(|e| TriggerError::BadRequest(e.to_string()))?;
    if interaction.is_ping() {
        debug!("Acknowledging ping");
        return Ok(Json(InteractionResponse::pong()));
    }

    let service = state.supervisor.service();
    let content = match state.supervisor.activate().await? {
        TriggerDisposition::Started => format!(
            "Successfully set desired task count to 1 for service {} in cluster {}.",
            service.service, service.cluster
        ),
        TriggerDisposition::AlreadyActive(_) => format!(
            "Service {} in cluster {} is already starting or running.",
            service.service, service.cluster
        ),
        TriggerDisposition::ShuttingDown => return Err(TriggerError::ShuttingDown),
    };
    info!(service = %service, kind = interaction.kind, "Trigger handled");

    Ok(Json(InteractionResponse::message(content)))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    /// Whether the server is healthy.
    pub healthy: bool,
    /// Server version.
    pub version: String,
    /// Server uptime in milliseconds.
    pub uptime_ms: u64,
}

/// Handle health check request.
pub async fn handle_health_check(State(state): State<Arc<AppState>>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        healthy: true,
        version: state.version.clone(),
        uptime_ms: state.uptime_ms(),
    })
}

/// Handle status request.
pub async fn handle_status(State(state): State<Arc<AppState>>) -> Json<SupervisorStatus> {
    Json(state.supervisor.status())
}
