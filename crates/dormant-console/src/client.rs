// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TCP client for the console (RCON) protocol.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

use crate::packet::{Packet, PacketCodec, PacketError, PacketType};

/// Request id the server uses to reject a login.
const AUTH_REJECTED_ID: i32 = -1;

/// Errors that can occur in the console client
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("connect error: {0}")]
    Connect(#[source] std::io::Error),

    #[error("authentication rejected by server")]
    AuthRejected,

    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("connection already closed")]
    Closed,
}

impl ConsoleError {
    /// Whether the underlying connection is gone (as opposed to a slow
    /// response on a connection that is still usable).
    ///
    /// An inbound stream that can no longer be framed counts as lost.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            ConsoleError::Closed | ConsoleError::Connect(_) => true,
            // Rejected before anything was written
            ConsoleError::Packet(PacketError::BodyTooLarge(_)) => false,
            ConsoleError::Packet(_) => true,
            _ => false,
        }
    }
}

/// Configuration for the console client
#[derive(Debug, Clone)]
pub struct ConsoleClientConfig {
    /// Bound on TCP connect plus login
    pub connect_timeout: Duration,
    /// Bound on a single command round trip
    pub command_timeout: Duration,
    /// Follow every command with an empty sentinel packet and collect
    /// response fragments until its echo arrives.
    ///
    /// Source-engine servers need this for output longer than one packet.
    /// Minecraft servers expect exactly one packet per read and drop the
    /// connection when a sentinel arrives in the same segment, so it is off
    /// by default.
    pub sentinel_reassembly: bool,
}

impl Default for ConsoleClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(10),
            sentinel_reassembly: false,
        }
    }
}

/// An authenticated console connection.
///
/// The connection is owned exclusively by one caller; commands are issued
/// sequentially and every round trip is bounded by
/// [`ConsoleClientConfig::command_timeout`]. A timed-out round trip leaves
/// the connection usable: partial replies stay buffered and late replies are
/// discarded by id. Once the connection is lost every later command fails
/// with [`ConsoleError::Closed`].
pub struct ConsoleClient {
    framed: Framed<TcpStream, PacketCodec>,
    addr: SocketAddr,
    next_id: i32,
    closed: bool,
    broken: bool,
    config: ConsoleClientConfig,
}

impl std::fmt::Debug for ConsoleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleClient")
            .field("addr", &self.addr)
            .field("closed", &self.closed)
            .field("broken", &self.broken)
            .finish()
    }
}

impl ConsoleClient {
    /// Connect to the server and log in with `password`.
    #[instrument(skip(password, config))]
    pub async fn connect(
        addr: SocketAddr,
        password: &str,
        config: ConsoleClientConfig,
    ) -> Result<Self, ConsoleError> {
        let timeout = config.connect_timeout;
        let timeout_ms = timeout.as_millis() as u64;

        tokio::time::timeout(timeout, Self::connect_and_login(addr, password, config))
            .await
            .map_err(|_| ConsoleError::Timeout(timeout_ms))?
    }

    async fn connect_and_login(
        addr: SocketAddr,
        password: &str,
        config: ConsoleClientConfig,
    ) -> Result<Self, ConsoleError> {
        info!(addr = %addr, "connecting to console");
        let stream = TcpStream::connect(addr)
            .await
            .map_err(ConsoleError::Connect)?;
        stream.set_nodelay(true).map_err(ConsoleError::Connect)?;

        let mut client = Self {
            framed: Framed::new(stream, PacketCodec),
            addr,
            next_id: 1,
            closed: false,
            broken: false,
            config,
        };

        let auth_id = client.allocate_id();
        client.framed.send(Packet::auth(auth_id, password)?).await?;

        // Some servers send an empty response value ahead of the auth response.
        loop {
            let packet = client.next_packet().await?;
            if packet.packet_type != PacketType::AUTH_RESPONSE {
                debug!(id = packet.id, "skipping pre-auth packet");
                continue;
            }
            if packet.id == AUTH_REJECTED_ID {
                warn!(addr = %addr, "console login rejected");
                return Err(ConsoleError::AuthRejected);
            }
            if packet.id == auth_id {
                break;
            }
        }

        info!(addr = %addr, "console login accepted");
        Ok(client)
    }

    /// Address this client is connected to
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Execute a command and return the response text.
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn command(&mut self, command: &str) -> Result<String, ConsoleError> {
        if self.closed || self.broken {
            return Err(ConsoleError::Closed);
        }

        let timeout = self.config.command_timeout;
        let result = match tokio::time::timeout(timeout, self.round_trip(command)).await {
            Ok(result) => result,
            Err(_) => Err(ConsoleError::Timeout(timeout.as_millis() as u64)),
        };

        if let Err(e) = &result
            && e.is_connection_lost()
        {
            warn!(addr = %self.addr, error = %e, "console connection lost");
            self.broken = true;
        }
        result
    }

    async fn round_trip(&mut self, command: &str) -> Result<String, ConsoleError> {
        let command_id = self.allocate_id();
        self.framed.send(Packet::command(command_id, command)?).await?;

        if !self.config.sentinel_reassembly {
            return Ok(self.reply_to(command_id).await?.body_text());
        }

        let sentinel_id = self.allocate_id();
        self.framed.send(Packet::sentinel(sentinel_id)).await?;

        let mut response = String::new();
        loop {
            let packet = self.next_packet().await?;
            if packet.id == sentinel_id {
                break;
            }
            if packet.id == command_id {
                response.push_str(&packet.body_text());
            } else {
                debug!(id = packet.id, "discarding stale packet");
            }
        }

        Ok(response)
    }

    /// First packet carrying `id`. Replies to earlier round trips that timed
    /// out are skipped.
    async fn reply_to(&mut self, id: i32) -> Result<Packet, PacketError> {
        loop {
            let packet = self.next_packet().await?;
            if packet.id == id {
                return Ok(packet);
            }
            debug!(id = packet.id, "discarding stale packet");
        }
    }

    async fn next_packet(&mut self) -> Result<Packet, PacketError> {
        match self.framed.next().await {
            Some(result) => result,
            None => Err(PacketError::ConnectionClosed),
        }
    }

    /// Close the connection. Calling this more than once is a no-op.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.framed.close().await {
            debug!(error = %e, "console shutdown returned error");
        }
        info!(addr = %self.addr, "console connection closed");
    }

    fn allocate_id(&mut self) -> i32 {
        let id = self.next_id;
        // Wrap before reaching the reserved rejection id.
        self.next_id = if self.next_id == i32::MAX {
            1
        } else {
            self.next_id + 1
        };
        id
    }
}
