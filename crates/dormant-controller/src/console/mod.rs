// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remote console access to the running server.
//!
//! The watchdog and the shutdown coordinator talk to the server through
//! [`ConsoleConnector`] and [`ConsoleSession`], so the wire protocol can be
//! swapped for a scripted mock in tests.

pub mod mock;
mod rcon;

use std::net::IpAddr;

use async_trait::async_trait;
use dormant_console::ConsoleError;

pub use mock::{MockConsole, ScriptedReply, StopBehavior};
pub use rcon::RconConnector;

/// Occupancy query command.
pub const LIST_COMMAND: &str = "list";

/// Graceful stop command.
pub const STOP_COMMAND: &str = "stop";

/// An open, authenticated console connection.
#[async_trait]
pub trait ConsoleSession: Send {
    /// Execute a command and return its response text.
    async fn command(&mut self, command: &str) -> Result<String, ConsoleError>;

    /// Close the connection. Idempotent.
    async fn close(&mut self);
}

/// Opens console sessions to a server address.
#[async_trait]
pub trait ConsoleConnector: Send + Sync {
    /// Connect and authenticate.
    async fn connect(&self, host: IpAddr) -> Result<Box<dyn ConsoleSession>, ConsoleError>;
}
