// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trigger HTTP server.
//!
//! | Route | Description |
//! |-------|-------------|
//! | `POST /interactions` | Signed activation trigger |
//! | `GET /health` | Liveness |
//! | `GET /status` | Session state of the controlled service |

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::handlers::{AppState, handle_health_check, handle_status, handle_trigger};

/// Build the router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/interactions", post(handle_trigger))
        .route("/health", get(handle_health_check))
        .route("/status", get(handle_status))
        .with_state(state)
}

/// Serve until `shutdown` fires, then drain in-flight requests.
pub async fn run_http_server(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "Trigger HTTP server starting");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Trigger HTTP server stopped");
    Ok(())
}
