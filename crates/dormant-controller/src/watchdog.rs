// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Idle watchdog.
//!
//! One watch session walks through
//!
//! ```text
//! WarmingUp ──► Connected ──► Polling ──► ShuttingDown ──► Closed
//!     │             │            │
//!     └─────────────┴────────────┴──(cancel / fatal error)──► Closed
//! ```
//!
//! After the warm-up delay the watchdog opens a console connection, queries
//! occupancy every poll interval and counts consecutive empty observations.
//! Once the count exceeds the idle threshold the shutdown coordinator runs.
//! A failed connect and a lost connection end the session without shutdown;
//! timeouts and unparseable responses only skip the current poll.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use dormant_console::ConsoleError;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::console::{ConsoleConnector, ConsoleSession, LIST_COMMAND};
use crate::platform::{AddressPreference, InstanceDescriptor, ServiceHandle};
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};

/// Watchdog timing and thresholds.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Wait before the first connection attempt
    pub warmup: Duration,
    /// Wait between occupancy polls
    pub poll_interval: Duration,
    /// Consecutive empty observations tolerated; one more triggers shutdown
    pub idle_threshold: u32,
    /// Consecutive failed polls after which the session gives up
    pub max_poll_failures: u32,
    /// Address used for the console connection
    pub address_preference: AddressPreference,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
            idle_threshold: 5,
            max_poll_failures: 12,
            address_preference: AddressPreference::Public,
        }
    }
}

/// Watch session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    /// Waiting for the server process to start
    WarmingUp,
    /// Console connection established
    Connected,
    /// Polling occupancy
    Polling,
    /// Tearing the server down
    ShuttingDown,
    /// Session over
    Closed,
}

impl std::fmt::Display for WatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WatchState::WarmingUp => "warming_up",
            WatchState::Connected => "connected",
            WatchState::Polling => "polling",
            WatchState::ShuttingDown => "shutting_down",
            WatchState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Consecutive-idle counter with an exclusive threshold.
#[derive(Debug, Clone)]
pub struct IdleCounter {
    consecutive: u32,
    threshold: u32,
}

impl IdleCounter {
    /// Counter that fires on the `threshold + 1`-th consecutive idle observation.
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold,
        }
    }

    /// Record an occupancy observation. Returns true when shutdown should fire.
    pub fn observe(&mut self, occupants: u32) -> bool {
        if occupants > 0 {
            self.consecutive = 0;
            return false;
        }
        self.consecutive = self.consecutive.saturating_add(1);
        self.consecutive > self.threshold
    }

    /// Current number of consecutive idle observations.
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// Extract the occupant count from an occupancy response.
///
/// Takes the first run of ASCII digits, which covers both
/// `There are 0 of a max of 20 players online` and `There are 0/20 players online`.
pub fn parse_occupancy(response: &str) -> Option<u32> {
    let start = response.find(|c: char| c.is_ascii_digit())?;
    let digits: &str = &response[start..];
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse().ok()
}

/// Fatal watch session errors.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The descriptor has no address usable for the console.
    #[error("instance {0} has no console address")]
    NoConsoleAddress(String),

    /// The initial console connection failed.
    #[error("console connect failed: {0}")]
    Connect(#[source] ConsoleError),

    /// The console connection dropped while polling.
    #[error("console connection lost after {observations} observations: {source}")]
    ConnectionLost {
        /// Successful occupancy observations before the loss
        observations: u64,
        /// Underlying error
        #[source]
        source: ConsoleError,
    },

    /// Too many polls in a row failed.
    #[error("{failures} consecutive polls failed")]
    TooManyFailures {
        /// Consecutive failures
        failures: u32,
    },
}

/// How a watch session ended.
#[derive(Debug)]
pub enum WatchOutcome {
    /// Idle threshold crossed and teardown ran
    ShutDown(ShutdownReport),
    /// Externally cancelled; the console connection was closed
    Cancelled,
    /// Fatal error; no teardown was attempted
    Failed(WatchError),
}

enum PollResult {
    Occupancy(u32),
    Transient(String),
    Lost(ConsoleError),
}

/// Monitors server occupancy and triggers shutdown after sustained idleness.
pub struct IdleWatchdog {
    connector: Arc<dyn ConsoleConnector>,
    coordinator: ShutdownCoordinator,
    config: WatchdogConfig,
    state: watch::Sender<WatchState>,
}

impl IdleWatchdog {
    /// Create a watchdog.
    pub fn new(
        connector: Arc<dyn ConsoleConnector>,
        coordinator: ShutdownCoordinator,
        config: WatchdogConfig,
    ) -> Self {
        let (state, _) = watch::channel(WatchState::Closed);
        Self {
            connector,
            coordinator,
            config,
            state,
        }
    }

    /// Current state.
    pub fn state(&self) -> WatchState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<WatchState> {
        self.state.subscribe()
    }

    /// Watchdog configuration.
    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    fn transition(&self, service: &ServiceHandle, next: WatchState) {
        let previous = self.state.send_replace(next);
        debug!(service = %service, from = %previous, to = %next, "Watch state transition");
    }

    /// Run one watch session against `descriptor`.
    pub async fn run(
        &self,
        service: &ServiceHandle,
        descriptor: &InstanceDescriptor,
        cancel: &CancellationToken,
    ) -> WatchOutcome {
        let outcome = self.run_session(service, descriptor, cancel).await;
        let last_state = self.state();
        self.transition(service, WatchState::Closed);

        match &outcome {
            WatchOutcome::ShutDown(report) => {
                info!(service = %service, clean = report.is_clean(), "Watch session finished with shutdown")
            }
            WatchOutcome::Cancelled => info!(service = %service, "Watch session cancelled"),
            WatchOutcome::Failed(e) => error!(
                service = %service,
                instance_id = %descriptor.instance_id,
                state = %last_state,
                error = %e,
                "Watch session failed"
            ),
        }
        outcome
    }

    async fn run_session(
        &self,
        service: &ServiceHandle,
        descriptor: &InstanceDescriptor,
        cancel: &CancellationToken,
    ) -> WatchOutcome {
        self.transition(service, WatchState::WarmingUp);
        info!(
            service = %service,
            instance_id = %descriptor.instance_id,
            warmup_secs = self.config.warmup.as_secs(),
            "Waiting for server warm-up"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return WatchOutcome::Cancelled,
            _ = tokio::time::sleep(self.config.warmup) => {}
        }

        let Some(address) = descriptor.console_address(self.config.address_preference) else {
            return WatchOutcome::Failed(WatchError::NoConsoleAddress(
                descriptor.instance_id.clone(),
            ));
        };

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => return WatchOutcome::Cancelled,
            result = self.connector.connect(IpAddr::V4(address)) => result,
        };
        let mut session = match connected {
            Ok(session) => session,
            Err(e) => return WatchOutcome::Failed(WatchError::Connect(e)),
        };
        self.transition(service, WatchState::Connected);
        info!(service = %service, address = %address, "Console connected");

        match self.poll_until_idle(service, session.as_mut(), cancel).await {
            Ok(()) => {
                self.transition(service, WatchState::ShuttingDown);
                let report = self.coordinator.shutdown(service, session.as_mut()).await;
                WatchOutcome::ShutDown(report)
            }
            Err(outcome) => {
                session.close().await;
                outcome
            }
        }
    }

    /// Poll until the idle threshold is crossed. `Err` carries the terminal
    /// outcome when the session ends any other way.
    async fn poll_until_idle(
        &self,
        service: &ServiceHandle,
        session: &mut dyn ConsoleSession,
        cancel: &CancellationToken,
    ) -> Result<(), WatchOutcome> {
        self.transition(service, WatchState::Polling);
        let mut counter = IdleCounter::new(self.config.idle_threshold);
        let mut failures: u32 = 0;
        let mut observations: u64 = 0;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WatchOutcome::Cancelled),
                result = session.command(LIST_COMMAND) => classify(result),
            };

            match result {
                PollResult::Occupancy(occupants) => {
                    failures = 0;
                    observations += 1;
                    let fire = counter.observe(occupants);
                    debug!(
                        service = %service,
                        occupants,
                        idle_observations = counter.consecutive(),
                        "Occupancy observed"
                    );
                    if fire {
                        info!(
                            service = %service,
                            idle_observations = counter.consecutive(),
                            threshold = self.config.idle_threshold,
                            "Idle threshold exceeded"
                        );
                        return Ok(());
                    }
                }
                PollResult::Transient(reason) => {
                    failures += 1;
                    warn!(
                        service = %service,
                        failures,
                        reason = %reason,
                        "Occupancy poll failed"
                    );
                    if failures >= self.config.max_poll_failures.max(1) {
                        return Err(WatchOutcome::Failed(WatchError::TooManyFailures {
                            failures,
                        }));
                    }
                }
                PollResult::Lost(source) => {
                    return Err(WatchOutcome::Failed(WatchError::ConnectionLost {
                        observations,
                        source,
                    }));
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WatchOutcome::Cancelled),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}

fn classify(result: Result<String, ConsoleError>) -> PollResult {
    match result {
        Ok(response) => match parse_occupancy(&response) {
            Some(occupants) => PollResult::Occupancy(occupants),
            None => PollResult::Transient(format!("unparseable response: {:?}", response)),
        },
        Err(e) if e.is_connection_lost() => PollResult::Lost(e),
        Err(e) => PollResult::Transient(e.to_string()),
    }
}
