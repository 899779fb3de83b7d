// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! RCON-backed console connector.

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use dormant_console::{ConsoleClient, ConsoleClientConfig, ConsoleError};

use super::{ConsoleConnector, ConsoleSession};

/// Connects to the server's RCON port with the configured password.
#[derive(Clone)]
pub struct RconConnector {
    password: String,
    port: u16,
    config: ConsoleClientConfig,
}

impl std::fmt::Debug for RconConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RconConnector")
            .field("port", &self.port)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RconConnector {
    /// Create a connector.
    pub fn new(password: impl Into<String>, port: u16, config: ConsoleClientConfig) -> Self {
        Self {
            password: password.into(),
            port,
            config,
        }
    }
}

#[async_trait]
impl ConsoleConnector for RconConnector {
    async fn connect(&self, host: IpAddr) -> Result<Box<dyn ConsoleSession>, ConsoleError> {
        let client = ConsoleClient::connect(
            SocketAddr::new(host, self.port),
            &self.password,
            self.config.clone(),
        )
        .await?;
        Ok(Box::new(client))
    }
}

#[async_trait]
impl ConsoleSession for ConsoleClient {
    async fn command(&mut self, command: &str) -> Result<String, ConsoleError> {
        ConsoleClient::command(self, command).await
    }

    async fn close(&mut self) {
        ConsoleClient::close(self).await
    }
}
