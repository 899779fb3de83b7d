// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for dormant-controller tests.
//!
//! Provides a [`TestContext`] wiring the mock platform and the scripted
//! console into the lifecycle components, plus trigger signing helpers.

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::{Signer, SigningKey};
use tokio_util::sync::CancellationToken;

use dormant_controller::activator::ServiceActivator;
use dormant_controller::console::MockConsole;
use dormant_controller::platform::{CallLog, InstanceTemplate, MockPlatform, ServiceHandle};
use dormant_controller::publisher::AddressPublisher;
use dormant_controller::resolver::{EndpointResolver, RetryPolicy};
use dormant_controller::shutdown::ShutdownCoordinator;
use dormant_controller::supervisor::{ServiceSupervisor, SupervisorComponents};
use dormant_controller::verifier::TriggerVerifier;
use dormant_controller::watchdog::{IdleWatchdog, WatchdogConfig};

pub const ZONE_ID: &str = "Z0123456789";
pub const RECORD_NAME: &str = "mc.example.com";
pub const PUBLIC_IP: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 10);
pub const PRIVATE_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 10);

pub fn service() -> ServiceHandle {
    ServiceHandle::new("games", "minecraft")
}

pub fn template() -> InstanceTemplate {
    InstanceTemplate::ready("task-1", "eni-1", PUBLIC_IP, PRIVATE_IP)
}

/// Key that signs test triggers.
pub fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

pub fn public_key_hex() -> String {
    hex::encode(signing_key().verifying_key().to_bytes())
}

pub fn verifier() -> TriggerVerifier {
    TriggerVerifier::from_hex(&public_key_hex()).unwrap()
}

/// Hex signature over `timestamp ++ body`.
pub fn sign(timestamp: &str, body: &[u8]) -> String {
    let mut message = timestamp.as_bytes().to_vec();
    message.extend_from_slice(body);
    hex::encode(signing_key().sign(&message).to_bytes())
}

/// Watchdog timings suited to paused-clock tests.
pub fn fast_watchdog() -> WatchdogConfig {
    WatchdogConfig {
        warmup: Duration::from_secs(30),
        poll_interval: Duration::from_secs(5),
        idle_threshold: 5,
        max_poll_failures: 4,
        ..WatchdogConfig::default()
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        multiplier: 2.0,
    }
}

/// Mock collaborators sharing one call log.
pub struct TestContext {
    pub platform: Arc<MockPlatform>,
    pub console: MockConsole,
    pub log: CallLog,
    pub watchdog: WatchdogConfig,
    pub retry: RetryPolicy,
}

impl TestContext {
    /// Service scaled to zero; scaling up launches [`template`].
    pub fn dormant() -> Self {
        Self::with_platform(MockPlatform::new().launch_on_scale_up(template()))
    }

    /// Service already running [`template`].
    pub fn running() -> Self {
        Self::with_platform(MockPlatform::running(template()))
    }

    pub fn with_platform(platform: MockPlatform) -> Self {
        let log = platform.call_log();
        Self {
            platform: Arc::new(platform),
            console: MockConsole::new(log.clone()),
            log,
            watchdog: fast_watchdog(),
            retry: fast_retry(),
        }
    }

    pub fn resolver(&self) -> EndpointResolver {
        EndpointResolver::new(self.platform.clone(), self.platform.clone())
    }

    pub fn publisher(&self) -> AddressPublisher {
        AddressPublisher::new(self.platform.clone(), ZONE_ID, RECORD_NAME, 60)
    }

    pub fn idle_watchdog(&self) -> IdleWatchdog {
        IdleWatchdog::new(
            Arc::new(self.console.clone()),
            ShutdownCoordinator::new(self.platform.clone()),
            self.watchdog.clone(),
        )
    }

    pub fn supervisor(&self, cancel: CancellationToken) -> ServiceSupervisor {
        let components = SupervisorComponents {
            activator: ServiceActivator::new(self.platform.clone()),
            resolver: self.resolver(),
            publisher: self.publisher(),
            watchdog: self.idle_watchdog(),
            retry: self.retry.clone(),
        };
        ServiceSupervisor::new(service(), components, cancel)
    }
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
