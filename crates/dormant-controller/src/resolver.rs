// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Endpoint resolution: find the running instance and its reachable address.
//!
//! Resolution is eventually consistent with instance startup. Right after
//! activation the service usually has no task yet, then a task without a
//! network interface, then an interface without a public address. Callers
//! poll [`EndpointResolver::resolve_with_retry`] until all three are present.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::platform::{
    InstanceDescriptor, NetworkInterfaces, Orchestrator, PlatformError, ServiceHandle,
};

/// Errors from endpoint resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The service has no running instance.
    #[error("no running instance of service")]
    NoInstanceRunning,

    /// The instance has no network interface yet (still provisioning).
    #[error("instance {instance_id} has no network interface attached")]
    InterfaceNotAttached {
        /// Instance that was inspected
        instance_id: String,
    },

    /// The interface has no public address association yet.
    #[error("interface {interface_id} of instance {instance_id} has no public address")]
    AddressNotAssigned {
        /// Instance that was inspected
        instance_id: String,
        /// Interface without an address
        interface_id: String,
    },

    /// The instance that was resolved is no longer the one running.
    #[error("instance {expected} was replaced (now running: {current:?})")]
    InstanceReplaced {
        /// Instance the descriptor was resolved from
        expected: String,
        /// Instance currently listed first, if any
        current: Option<String>,
    },

    /// Resolution was cancelled.
    #[error("resolution cancelled")]
    Cancelled,

    /// Every attempt failed.
    #[error("endpoint not ready after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error of the final attempt
        last: Box<ResolveError>,
    },

    /// A platform call failed.
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
}

impl ResolveError {
    /// Whether the instance may simply not be ready yet.
    pub fn is_retryable(&self) -> bool {
        match self {
            ResolveError::NoInstanceRunning
            | ResolveError::InterfaceNotAttached { .. }
            | ResolveError::AddressNotAssigned { .. }
            | ResolveError::InstanceReplaced { .. } => true,
            ResolveError::Platform(e) => matches!(
                e,
                PlatformError::Timeout(_) | PlatformError::Transport(_) | PlatformError::NotFound(_)
            ),
            ResolveError::Cancelled | ResolveError::RetriesExhausted { .. } => false,
        }
    }
}

/// Exponential backoff between resolution attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts before giving up (at least one attempt is always made)
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth factor between delays
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

/// A descriptor re-checked against the platform and known to carry a
/// public address.
///
/// Only [`EndpointResolver::confirm`] creates these, so an address can only be
/// published after it was confirmed for the instance currently running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedEndpoint {
    descriptor: InstanceDescriptor,
    public_address: Ipv4Addr,
}

impl ConfirmedEndpoint {
    /// The confirmed instance.
    pub fn descriptor(&self) -> &InstanceDescriptor {
        &self.descriptor
    }

    /// The confirmed public address.
    pub fn public_address(&self) -> Ipv4Addr {
        self.public_address
    }

    /// Consume into the descriptor.
    pub fn into_descriptor(self) -> InstanceDescriptor {
        self.descriptor
    }
}

/// Resolves the running instance of a service to its network addresses.
#[derive(Clone)]
pub struct EndpointResolver {
    orchestrator: Arc<dyn Orchestrator>,
    network: Arc<dyn NetworkInterfaces>,
}

impl EndpointResolver {
    /// Create a resolver over the given collaborators.
    pub fn new(orchestrator: Arc<dyn Orchestrator>, network: Arc<dyn NetworkInterfaces>) -> Self {
        Self {
            orchestrator,
            network,
        }
    }

    /// Resolve once.
    ///
    /// Fails with [`ResolveError::NoInstanceRunning`] without any further
    /// lookups when the service has no running instance.
    pub async fn resolve(&self, service: &ServiceHandle) -> Result<InstanceDescriptor, ResolveError> {
        let instances = self.orchestrator.list_running_instances(service).await?;
        let Some(instance_id) = instances.into_iter().next() else {
            debug!(service = %service, "No running instance");
            return Err(ResolveError::NoInstanceRunning);
        };

        let attachments = self
            .orchestrator
            .describe_instance(service, &instance_id)
            .await?;
        let interface_id = attachments
            .iter()
            .find(|a| a.is_network_interface())
            .and_then(|a| a.detail(crate::platform::Attachment::INTERFACE_ID_DETAIL))
            .map(str::to_string)
            .ok_or_else(|| ResolveError::InterfaceNotAttached {
                instance_id: instance_id.clone(),
            })?;

        let addresses = self.network.describe_interface(&interface_id).await?;
        if addresses.public.is_none() {
            return Err(ResolveError::AddressNotAssigned {
                instance_id,
                interface_id,
            });
        }

        debug!(
            service = %service,
            instance_id = %instance_id,
            interface_id = %interface_id,
            "Resolved instance endpoint"
        );

        Ok(InstanceDescriptor {
            instance_id,
            interface_id,
            public_address: addresses.public,
            private_address: addresses.private,
        })
    }

    /// Check that `descriptor` still describes the instance currently running.
    pub async fn confirm(
        &self,
        service: &ServiceHandle,
        descriptor: InstanceDescriptor,
    ) -> Result<ConfirmedEndpoint, ResolveError> {
        let instances = self.orchestrator.list_running_instances(service).await?;
        let current = instances.into_iter().next();
        if current.as_deref() != Some(descriptor.instance_id.as_str()) {
            warn!(
                service = %service,
                expected = %descriptor.instance_id,
                current = ?current,
                "Resolved instance is no longer running"
            );
            return Err(ResolveError::InstanceReplaced {
                expected: descriptor.instance_id,
                current,
            });
        }

        let Some(public_address) = descriptor.public_address else {
            return Err(ResolveError::AddressNotAssigned {
                instance_id: descriptor.instance_id,
                interface_id: descriptor.interface_id,
            });
        };

        Ok(ConfirmedEndpoint {
            descriptor,
            public_address,
        })
    }

    /// Resolve and confirm, retrying not-ready results with backoff.
    pub async fn resolve_with_retry(
        &self,
        service: &ServiceHandle,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<ConfirmedEndpoint, ResolveError> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match self.resolve(service).await {
                Ok(descriptor) => self.confirm(service, descriptor).await,
                Err(e) => Err(e),
            };

            let error = match result {
                Ok(endpoint) => {
                    info!(
                        service = %service,
                        instance_id = %endpoint.descriptor().instance_id,
                        address = %endpoint.public_address(),
                        attempt,
                        "Endpoint resolved"
                    );
                    return Ok(endpoint);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                warn!(service = %service, attempts = attempt, error = %error, "Giving up on endpoint resolution");
                return Err(ResolveError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = policy.delay_for(attempt);
            debug!(
                service = %service,
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %error,
                "Endpoint not ready, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_growth_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for(60), Duration::from_secs(5));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ResolveError::NoInstanceRunning.is_retryable());
        assert!(
            ResolveError::AddressNotAssigned {
                instance_id: "t".into(),
                interface_id: "e".into()
            }
            .is_retryable()
        );
        assert!(ResolveError::Platform(PlatformError::Timeout(100)).is_retryable());
        assert!(
            !ResolveError::Platform(PlatformError::Api {
                code: "AccessDeniedException".into(),
                message: "denied".into()
            })
            .is_retryable()
        );
        assert!(!ResolveError::Cancelled.is_retryable());
    }
}
