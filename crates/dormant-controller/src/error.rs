// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for dormant-controller.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error};

use crate::platform::PlatformError;

/// Controller errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Platform call failed.
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Endpoint resolution failed.
    #[error("Resolve error: {0}")]
    Resolve(#[from] crate::resolver::ResolveError),

    /// DNS publication failed.
    #[error("Publish error: {0}")]
    Publish(#[from] crate::publisher::PublishError),

    /// The watch session failed.
    #[error("Watch error: {0}")]
    Watch(#[from] crate::watchdog::WatchError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using controller Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors answered to the trigger caller.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// Missing or invalid signature. No action was taken.
    #[error("invalid request signature")]
    Unauthorized,

    /// Verified body that could not be parsed.
    #[error("invalid request body: {0}")]
    BadRequest(String),

    /// Activation failed at the platform.
    #[error("Error setting desired task count: {0}")]
    Platform(#[from] PlatformError),

    /// The controller is shutting down and starts no new sessions.
    #[error("controller is shutting down")]
    ShuttingDown,
}

impl TriggerError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            TriggerError::Unauthorized => StatusCode::UNAUTHORIZED,
            TriggerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            TriggerError::Platform(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TriggerError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for TriggerError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Parse details stay in the log
        let message = match &self {
            TriggerError::Unauthorized => {
                debug!("Rejected trigger with invalid signature");
                self.to_string()
            }
            TriggerError::BadRequest(reason) => {
                debug!(reason = %reason, "Rejected malformed trigger body");
                "invalid request body".to_string()
            }
            TriggerError::Platform(e) => {
                error!(error = %e, "Trigger failed at the platform");
                self.to_string()
            }
            TriggerError::ShuttingDown => self.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
