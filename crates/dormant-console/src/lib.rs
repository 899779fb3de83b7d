// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dormant Console - RCON command/response protocol
//!
//! This crate provides the wire protocol used to talk to the game server's
//! remote console: the packet codec and an authenticated TCP client.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      dormant-console                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Client: login, command round trips, stale reply filtering  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Codec: little-endian length-prefixed packets (tokio-util)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: TCP (tokio)                                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use dormant_console::{ConsoleClient, ConsoleClientConfig};
//!
//! let mut client = ConsoleClient::connect(
//!     "10.0.0.5:25575".parse()?,
//!     "password",
//!     ConsoleClientConfig::default(),
//! )
//! .await?;
//!
//! let players = client.command("list").await?;
//! client.close().await;
//! ```

pub mod client;
pub mod packet;

pub use client::{ConsoleClient, ConsoleClientConfig, ConsoleError};
pub use packet::{Packet, PacketCodec, PacketError, PacketType};
