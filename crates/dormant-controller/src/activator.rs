// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service activation: scale the workload to one running instance.

use std::sync::Arc;

use tracing::{error, info};

use crate::platform::{Orchestrator, PlatformError, ServiceHandle};

/// Desired count requested on activation.
pub const ACTIVE_COUNT: u32 = 1;

/// Starts the service by setting its desired count to one.
///
/// Calling this while the service already runs is a no-op at the platform
/// level. Failures are returned as-is; retries are up to the caller.
#[derive(Clone)]
pub struct ServiceActivator {
    orchestrator: Arc<dyn Orchestrator>,
}

impl ServiceActivator {
    /// Create an activator.
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Request one running instance of `service`.
    pub async fn activate(&self, service: &ServiceHandle) -> Result<(), PlatformError> {
        match self
            .orchestrator
            .set_desired_count(service, ACTIVE_COUNT)
            .await
        {
            Ok(()) => {
                info!(service = %service, "Service activation requested");
                Ok(())
            }
            Err(e) => {
                error!(service = %service, error = %e, "Failed to activate service");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{FailPoint, MockPlatform, RecordedCall};

    #[tokio::test]
    async fn test_activate_sets_count_to_one() {
        let platform = MockPlatform::new();
        let activator = ServiceActivator::new(Arc::new(platform.clone()));
        let service = ServiceHandle::new("games", "minecraft");

        activator.activate(&service).await.unwrap();
        activator.activate(&service).await.unwrap();

        assert_eq!(platform.desired_count(), 1);
        assert_eq!(
            platform.call_log().calls(),
            vec![
                RecordedCall::SetDesiredCount(1),
                RecordedCall::SetDesiredCount(1)
            ]
        );
    }

    #[tokio::test]
    async fn test_activate_surfaces_platform_error() {
        let platform = MockPlatform::new();
        platform.fail_on(FailPoint::SetDesiredCount);
        let activator = ServiceActivator::new(Arc::new(platform.clone()));

        let result = activator
            .activate(&ServiceHandle::new("games", "minecraft"))
            .await;

        assert!(matches!(result, Err(PlatformError::Api { .. })));
        // Not retried
        assert_eq!(platform.call_log().calls().len(), 1);
    }
}
