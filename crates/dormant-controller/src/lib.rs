// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dormant Controller - On-Demand Game Server Lifecycle
//!
//! This crate keeps a containerised game server at zero instances until a
//! signed trigger arrives, then starts it, publishes its public address in
//! DNS, watches player occupancy over the remote console and scales it back
//! to zero once it has been idle long enough.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  Chat platform       │  signed POST /interactions
//! └──────────┬───────────┘
//!            ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    dormant-controller (This Crate)                       │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌────────────┐         │
//! │  │  Trigger   │─►│  Service   │─►│  Endpoint  │─►│  Address   │         │
//! │  │  Verifier  │  │  Activator │  │  Resolver  │  │  Publisher │         │
//! │  └────────────┘  └────────────┘  └────────────┘  └─────┬──────┘         │
//! │                                                        ▼                │
//! │                  ┌──────────────────┐           ┌────────────┐          │
//! │                  │     Shutdown     │◄──────────│    Idle    │          │
//! │                  │   Coordinator    │   idle    │  Watchdog  │          │
//! │                  └──────────────────┘           └─────┬──────┘          │
//! └───────────────────────────────────────────────────────┼─────────────────┘
//!        │ scale / describe          │ UPSERT A           │ RCON "list"/"stop"
//!        ▼                           ▼                    ▼
//! ┌──────────────┐          ┌──────────────┐     ┌──────────────────┐
//! │  ECS + EC2   │          │   Route 53   │     │   Game server    │
//! └──────────────┘          └──────────────┘     └──────────────────┘
//! ```
//!
//! One [`supervisor::ServiceSupervisor`] owns the service. A trigger claims
//! its slot and any further trigger is a no-op until the session ends.
//!
//! # Watchdog State Machine
//!
//! ```text
//!   WarmingUp ──► Connected ──► Polling ──► ShuttingDown ──► Closed
//!       │             │            │
//!       └─────────────┴────────────┴── cancel / fatal error ──► Closed
//! ```
//!
//! # HTTP Routes
//!
//! | Route | Description |
//! |-------|-------------|
//! | `POST /interactions` | Signed activation trigger |
//! | `GET /health` | Liveness and uptime |
//! | `GET /status` | Slot, watchdog state and last session |
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `DORMANT_CLUSTER` | Yes | - | Cluster of the controlled service |
//! | `DORMANT_SERVICE` | Yes | - | Controlled service |
//! | `DORMANT_HOSTED_ZONE_ID` | Yes | - | Hosted zone of the published record |
//! | `DORMANT_RECORD_NAME` | Yes | - | Record name to publish |
//! | `DORMANT_PUBLIC_KEY` | Yes | - | Hex ed25519 key that signs triggers |
//! | `DORMANT_RCON_PASSWORD` | Yes | - | Console password |
//! | `DORMANT_HTTP_PORT` | No | `8080` | Trigger endpoint port |
//! | `DORMANT_RCON_PORT` | No | `25575` | Console port |
//! | `DORMANT_IDLE_THRESHOLD` | No | `5` | Idle polls tolerated before shutdown |
//! | `DORMANT_POLL_INTERVAL_SECS` | No | `5` | Delay between occupancy polls |
//! | `DORMANT_WARMUP_SECS` | No | `300` | Delay before the first console connect |
//! | `DORMANT_MAX_POLL_FAILURES` | No | `12` | Consecutive failed polls before giving up |
//! | `DORMANT_CONSOLE_ADDRESS` | No | `public` | `public` or `private` console address |
//! | `DORMANT_CONNECT_TIMEOUT_SECS` | No | `10` | Console connect plus login bound |
//! | `DORMANT_COMMAND_TIMEOUT_SECS` | No | `10` | Console command and AWS request bound |
//! | `DORMANT_DNS_TTL_SECS` | No | `60` | Record TTL, capped at 60 |
//! | `DORMANT_TRIGGER_MAX_SKEW_SECS` | No | - | Reject triggers with older timestamps |
//! | `DORMANT_RESOLVE_MAX_ATTEMPTS` | No | `30` | Endpoint resolution attempts |
//! | `DORMANT_RESOLVE_INITIAL_DELAY_MS` | No | `2000` | First resolution backoff |
//! | `DORMANT_RESOLVE_MAX_DELAY_MS` | No | `30000` | Resolution backoff cap |
//! | `DORMANT_AWS_ENDPOINT` | No | - | Single endpoint for every AWS call |
//! | `AWS_REGION` | No | `eu-west-1` | AWS region |
//! | `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` | No* | - | Static keys (`AWS_SESSION_TOKEN` optional) |
//! | `AWS_CONTAINER_CREDENTIALS_RELATIVE_URI` | No* | - | Task-role credentials path on `169.254.170.2` |
//! | `AWS_CONTAINER_CREDENTIALS_FULL_URI` | No* | - | Full container credentials URL |
//! | `AWS_CONTAINER_AUTHORIZATION_TOKEN` | No | - | `Authorization` header for the credentials URL |
//!
//! \* One credentials source is required by the binary; static keys win.
//!
//! # Modules
//!
//! - [`activator`]: Scale the service to one instance
//! - [`config`]: Configuration from environment variables
//! - [`console`]: Remote console sessions
//! - [`error`]: Error types
//! - [`handlers`]: HTTP handlers
//! - [`interaction`]: Trigger request and response payloads
//! - [`platform`]: Orchestrator, network and DNS abstractions with AWS and mock backends
//! - [`publisher`]: DNS record publication
//! - [`resolver`]: Running instance and address lookup
//! - [`runtime`]: Embeddable runtime
//! - [`server`]: HTTP server
//! - [`shutdown`]: Scale-to-zero and console stop
//! - [`supervisor`]: Per-service single-flight sessions
//! - [`verifier`]: Trigger signature verification
//! - [`watchdog`]: Occupancy polling and idle detection

#![deny(missing_docs)]

/// Service activation.
pub mod activator;

/// Configuration loaded from environment variables.
pub mod config;

/// Remote console sessions.
pub mod console;

/// Error types.
pub mod error;

/// HTTP request handlers.
pub mod handlers;

/// Trigger payloads.
pub mod interaction;

/// Platform abstractions and backends.
pub mod platform;

/// DNS publication of the server address.
pub mod publisher;

/// Endpoint resolution.
pub mod resolver;

/// Embeddable runtime.
pub mod runtime;

/// HTTP server for the trigger endpoint.
pub mod server;

/// Shutdown coordination.
pub mod shutdown;

/// Per-service lifecycle supervision.
pub mod supervisor;

/// Trigger signature verification.
pub mod verifier;

/// Idle watchdog.
pub mod watchdog;

pub use config::Config;
pub use error::Error;
