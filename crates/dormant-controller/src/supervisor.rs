// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-service single-flight lifecycle supervisor.
//!
//! The supervisor owns the service's slot. A trigger claims the slot,
//! activates the service and spawns one session task that resolves the
//! endpoint, publishes it and runs the idle watchdog. While the slot is
//! claimed every further trigger is a no-op. The slot is released when the
//! session reaches a terminal outcome.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::activator::ServiceActivator;
use crate::platform::{PlatformError, ServiceHandle};
use crate::publisher::AddressPublisher;
use crate::resolver::{EndpointResolver, ResolveError, RetryPolicy};
use crate::shutdown::ShutdownReport;
use crate::watchdog::{IdleWatchdog, WatchOutcome, WatchState};

/// Occupancy of the service's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// No session; a trigger starts one
    Idle,
    /// Activation or endpoint resolution in progress
    Activating,
    /// Address published, watchdog running
    Watching,
}

/// What a trigger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDisposition {
    /// The service was activated and a new session started
    Started,
    /// A session was already in progress; nothing was done
    AlreadyActive(SlotState),
    /// The controller is shutting down; no session was started
    ShuttingDown,
}

/// Terminal outcome of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The server went idle and was torn down
    ShutDown {
        /// Teardown report
        report: ShutdownReport,
    },
    /// The session was cancelled (process shutdown)
    Cancelled,
    /// The endpoint never became ready
    ResolveFailed {
        /// Error description
        error: String,
    },
    /// The address could not be published
    PublishFailed {
        /// Error description
        error: String,
    },
    /// The watchdog hit a fatal error
    WatchFailed {
        /// Error description
        error: String,
    },
}

impl SessionOutcome {
    /// Whether the session ended in an error.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SessionOutcome::ResolveFailed { .. }
                | SessionOutcome::PublishFailed { .. }
                | SessionOutcome::WatchFailed { .. }
        )
    }
}

/// A finished session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    /// How it ended
    pub outcome: SessionOutcome,
    /// Instance the session watched, if resolved
    pub instance_id: Option<String>,
    /// Published address, if any
    pub address: Option<Ipv4Addr>,
    /// When it ended
    pub finished_at: DateTime<Utc>,
}

/// Snapshot for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    /// Controlled service
    pub service: ServiceHandle,
    /// Slot state
    pub slot: SlotState,
    /// Watchdog state
    pub watch_state: WatchState,
    /// Instance of the current session, once resolved
    pub instance_id: Option<String>,
    /// Address of the current session, once resolved
    pub address: Option<Ipv4Addr>,
    /// Sessions started since process start
    pub sessions_started: u64,
    /// Most recent finished session
    pub last_session: Option<SessionRecord>,
}

/// Components a supervisor drives.
pub struct SupervisorComponents {
    /// Scales the service up
    pub activator: ServiceActivator,
    /// Finds the running instance
    pub resolver: EndpointResolver,
    /// Publishes its address
    pub publisher: AddressPublisher,
    /// Watches it and shuts it down
    pub watchdog: IdleWatchdog,
    /// Backoff for endpoint resolution
    pub retry: RetryPolicy,
}

#[derive(Debug)]
struct Slot {
    state: SlotState,
    instance_id: Option<String>,
    address: Option<Ipv4Addr>,
    sessions_started: u64,
    last_session: Option<SessionRecord>,
}

struct Inner {
    service: ServiceHandle,
    components: SupervisorComponents,
    slot: Mutex<Slot>,
    task: Mutex<Option<JoinHandle<SessionOutcome>>>,
    cancel: CancellationToken,
}

/// Releases a claimed slot if activation is abandoned before a session starts.
struct ClaimGuard<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl ClaimGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut slot = lock(&self.inner.slot);
            slot.state = SlotState::Idle;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Single-flight lifecycle supervisor for one service.
#[derive(Clone)]
pub struct ServiceSupervisor {
    inner: Arc<Inner>,
}

impl ServiceSupervisor {
    /// Create a supervisor. Sessions stop when `cancel` fires.
    pub fn new(
        service: ServiceHandle,
        components: SupervisorComponents,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                service,
                components,
                slot: Mutex::new(Slot {
                    state: SlotState::Idle,
                    instance_id: None,
                    address: None,
                    sessions_started: 0,
                    last_session: None,
                }),
                task: Mutex::new(None),
                cancel,
            }),
        }
    }

    /// Controlled service.
    pub fn service(&self) -> &ServiceHandle {
        &self.inner.service
    }

    /// Current slot state.
    pub fn slot_state(&self) -> SlotState {
        lock(&self.inner.slot).state
    }

    /// Status snapshot.
    pub fn status(&self) -> SupervisorStatus {
        let slot = lock(&self.inner.slot);
        SupervisorStatus {
            service: self.inner.service.clone(),
            slot: slot.state,
            watch_state: self.inner.components.watchdog.state(),
            instance_id: slot.instance_id.clone(),
            address: slot.address,
            sessions_started: slot.sessions_started,
            last_session: slot.last_session.clone(),
        }
    }

    /// Claim the slot. Fails with the current state when it is not idle.
    pub fn try_begin(&self) -> Result<(), SlotState> {
        let mut slot = lock(&self.inner.slot);
        if slot.state != SlotState::Idle {
            return Err(slot.state);
        }
        slot.state = SlotState::Activating;
        slot.instance_id = None;
        slot.address = None;
        slot.sessions_started += 1;
        Ok(())
    }

    /// Handle a verified activation trigger.
    ///
    /// Returns once the service has been asked to start; the rest of the
    /// session runs in the background. A platform error releases the slot.
    pub async fn activate(&self) -> Result<TriggerDisposition, PlatformError> {
        let service = &self.inner.service;
        if self.inner.cancel.is_cancelled() {
            info!(service = %service, "Shutting down, ignoring trigger");
            return Ok(TriggerDisposition::ShuttingDown);
        }
        if let Err(state) = self.try_begin() {
            info!(service = %service, slot = ?state, "Session already active, ignoring trigger");
            return Ok(TriggerDisposition::AlreadyActive(state));
        }
        let guard = ClaimGuard {
            inner: &self.inner,
            armed: true,
        };

        self.inner.components.activator.activate(service).await?;

        // Shutdown began while the platform call was in flight
        if self.inner.cancel.is_cancelled() {
            warn!(service = %service, "Shutdown began during activation, no session started");
            return Ok(TriggerDisposition::ShuttingDown);
        }

        let supervisor = self.clone();
        let handle = tokio::spawn(async move { supervisor.run_claimed_session().await });
        *lock(&self.inner.task) = Some(handle);
        guard.disarm();

        info!(service = %service, "Session started");
        Ok(TriggerDisposition::Started)
    }

    /// Run one session inline against an already running service, without
    /// activating it. Fails with the current state if a session is active.
    pub async fn watch_once(&self) -> Result<SessionOutcome, SlotState> {
        self.try_begin()?;
        Ok(self.run_claimed_session().await)
    }

    /// Cancel the active session and wait for it to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handle = lock(&self.inner.task).take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Session task ended abnormally");
        }
    }

    async fn run_claimed_session(&self) -> SessionOutcome {
        let outcome = self.run_session().await;
        let mut slot = lock(&self.inner.slot);
        slot.last_session = Some(SessionRecord {
            outcome: outcome.clone(),
            instance_id: slot.instance_id.clone(),
            address: slot.address,
            finished_at: Utc::now(),
        });
        slot.state = SlotState::Idle;
        outcome
    }

    async fn run_session(&self) -> SessionOutcome {
        let inner = &self.inner;
        let service = &inner.service;
        let components = &inner.components;

        let endpoint = match components
            .resolver
            .resolve_with_retry(service, &components.retry, &inner.cancel)
            .await
        {
            Ok(endpoint) => endpoint,
            Err(ResolveError::Cancelled) => return SessionOutcome::Cancelled,
            Err(e) => {
                error!(service = %service, error = %e, "Endpoint resolution failed");
                return SessionOutcome::ResolveFailed {
                    error: e.to_string(),
                };
            }
        };

        {
            let mut slot = lock(&inner.slot);
            slot.instance_id = Some(endpoint.descriptor().instance_id.clone());
            slot.address = Some(endpoint.public_address());
        }

        if let Err(e) = components.publisher.publish(&endpoint).await {
            return SessionOutcome::PublishFailed {
                error: e.to_string(),
            };
        }

        lock(&inner.slot).state = SlotState::Watching;

        match components
            .watchdog
            .run(service, endpoint.descriptor(), &inner.cancel)
            .await
        {
            WatchOutcome::ShutDown(report) => SessionOutcome::ShutDown { report },
            WatchOutcome::Cancelled => SessionOutcome::Cancelled,
            WatchOutcome::Failed(e) => SessionOutcome::WatchFailed {
                error: e.to_string(),
            },
        }
    }
}
