// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trigger payloads exchanged with the chat platform.

use axum::http::HeaderMap;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Header carrying the hex-encoded ed25519 signature.
pub const SIGNATURE_HEADER: &str = "x-signature-ed25519";

/// Header carrying the signed timestamp.
pub const TIMESTAMP_HEADER: &str = "x-signature-timestamp";

/// Interaction type of a ping.
pub const PING: u8 = 1;

/// Response type acknowledging a ping.
pub const PONG: u8 = 1;

/// Response type carrying a message.
pub const CHANNEL_MESSAGE: u8 = 4;

/// An inbound activation request as received at the transport boundary.
#[derive(Debug, Clone)]
pub struct ActivationRequest {
    /// Signature header, if present
    pub signature: Option<String>,
    /// Timestamp header, if present
    pub timestamp: Option<String>,
    /// Body exactly as received
    pub raw_body: Bytes,
}

impl ActivationRequest {
    /// Build from request headers and body. Missing or non-text headers are
    /// kept as `None` and fail verification later.
    pub fn from_parts(headers: &HeaderMap, raw_body: Bytes) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            signature: header(SIGNATURE_HEADER),
            timestamp: header(TIMESTAMP_HEADER),
            raw_body,
        }
    }

    /// Parse the body. Only call after verification.
    pub fn parse(&self) -> Result<Interaction, serde_json::Error> {
        serde_json::from_slice(&self.raw_body)
    }
}

/// The part of an interaction payload the controller reads.
#[derive(Debug, Clone, Deserialize)]
pub struct Interaction {
    /// Interaction type (1 = ping, 2 = command, ...)
    #[serde(rename = "type")]
    pub kind: u8,
}

impl Interaction {
    /// Whether this is a ping that only needs acknowledging.
    pub fn is_ping(&self) -> bool {
        self.kind == PING
    }
}

/// Message content of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseData {
    /// Message text
    pub content: String,
}

/// Response to an interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionResponse {
    /// Response type
    #[serde(rename = "type")]
    pub kind: u8,
    /// Message, for message responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

impl InteractionResponse {
    /// Ping acknowledgement.
    pub fn pong() -> Self {
        Self {
            kind: PONG,
            data: None,
        }
    }

    /// Message response.
    pub fn message(content: impl Into<String>) -> Self {
        Self {
            kind: CHANNEL_MESSAGE,
            data: Some(ResponseData {
                content: content.into(),
            }),
        }
    }
}
