// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Best-effort teardown of an idle server.
//!
//! Scale-down is requested before the in-band stop command so a platform
//! restart policy cannot bring the task straight back. Failures are logged
//! and reported; nothing is retried or rolled back.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::console::{ConsoleSession, STOP_COMMAND};
use crate::platform::{Orchestrator, ServiceHandle};

/// Desired count requested on shutdown.
pub const STOPPED_COUNT: u32 = 0;

/// What the teardown managed to do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Desired count was set to zero
    pub scaled_down: bool,
    /// Stop command was delivered (or the server dropped the connection while stopping)
    pub stop_sent: bool,
    /// Error from the scale-down call, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_error: Option<String>,
    /// Error from the stop command, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_error: Option<String>,
}

impl ShutdownReport {
    /// Both steps succeeded.
    pub fn is_clean(&self) -> bool {
        self.scaled_down && self.stop_sent
    }
}

/// Scales the service to zero, stops the server and closes the console.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    orchestrator: Arc<dyn Orchestrator>,
}

impl ShutdownCoordinator {
    /// Create a coordinator.
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Run the teardown. The session is always closed on return.
    pub async fn shutdown(
        &self,
        service: &ServiceHandle,
        session: &mut dyn ConsoleSession,
    ) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        match self
            .orchestrator
            .set_desired_count(service, STOPPED_COUNT)
            .await
        {
            Ok(()) => {
                info!(service = %service, "Service scaled to zero");
                report.scaled_down = true;
            }
            Err(e) => {
                warn!(service = %service, error = %e, "Failed to scale service to zero");
                report.scale_error = Some(e.to_string());
            }
        }

        match session.command(STOP_COMMAND).await {
            Ok(response) => {
                info!(service = %service, response = %response.trim(), "Stop command accepted");
                report.stop_sent = true;
            }
            Err(e) if e.is_connection_lost() => {
                // The server commonly exits before answering.
                info!(service = %service, "Server closed the connection while stopping");
                report.stop_sent = true;
            }
            Err(e) => {
                warn!(service = %service, error = %e, "Failed to send stop command");
                report.stop_error = Some(e.to_string());
            }
        }

        session.close().await;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{ConsoleConnector, MockConsole, StopBehavior};
    use crate::platform::{CallLog, FailPoint, InstanceTemplate, MockPlatform, RecordedCall};
    use std::net::{IpAddr, Ipv4Addr};

    fn setup(stop: StopBehavior) -> (MockPlatform, MockConsole, CallLog) {
        let platform = MockPlatform::running(InstanceTemplate::ready(
            "task-1",
            "eni-1",
            Ipv4Addr::new(3, 3, 3, 3),
            Ipv4Addr::new(10, 0, 0, 5),
        ));
        let log = platform.call_log();
        let console = MockConsole::new(log.clone()).with_stop_behavior(stop);
        (platform, console, log)
    }

    fn host() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(3, 3, 3, 3))
    }

    #[tokio::test]
    async fn test_scale_down_precedes_stop() {
        let (platform, console, log) = setup(StopBehavior::Reply("Stopping".into()));
        let coordinator = ShutdownCoordinator::new(Arc::new(platform.clone()));
        let mut session = console.connect(host()).await.unwrap();

        let report = coordinator
            .shutdown(&ServiceHandle::new("games", "minecraft"), session.as_mut())
            .await;

        assert!(report.is_clean());
        assert_eq!(platform.desired_count(), 0);
        let calls = log.calls();
        let scale = calls
            .iter()
            .position(|c| *c == RecordedCall::SetDesiredCount(0))
            .unwrap();
        let stop = calls
            .iter()
            .position(|c| *c == RecordedCall::ConsoleCommand("stop".into()))
            .unwrap();
        let close = calls
            .iter()
            .position(|c| *c == RecordedCall::ConsoleClose)
            .unwrap();
        assert!(scale < stop && stop < close);
    }

    #[tokio::test]
    async fn test_disconnect_during_stop_is_tolerated() {
        let (platform, console, _) = setup(StopBehavior::Disconnect);
        let coordinator = ShutdownCoordinator::new(Arc::new(platform));
        let mut session = console.connect(host()).await.unwrap();

        let report = coordinator
            .shutdown(&ServiceHandle::new("games", "minecraft"), session.as_mut())
            .await;

        assert!(report.stop_sent);
        assert_eq!(report.stop_error, None);
        assert_eq!(console.closed(), 1);
    }

    #[tokio::test]
    async fn test_scale_failure_still_stops_and_closes() {
        let (platform, console, _) = setup(StopBehavior::Reply("Stopping".into()));
        platform.fail_on(FailPoint::SetDesiredCount);
        let coordinator = ShutdownCoordinator::new(Arc::new(platform.clone()));
        let mut session = console.connect(host()).await.unwrap();

        let report = coordinator
            .shutdown(&ServiceHandle::new("games", "minecraft"), session.as_mut())
            .await;

        assert!(!report.scaled_down);
        assert!(report.scale_error.is_some());
        assert!(report.stop_sent);
        assert_eq!(console.closed(), 1);
        assert_eq!(platform.desired_count(), 1);
    }
}
