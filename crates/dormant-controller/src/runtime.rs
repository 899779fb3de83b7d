// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for dormant-controller.
//!
//! [`ControllerRuntime`] wires the platform collaborators, the console
//! connector and the lifecycle components together and serves the trigger
//! endpoint.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dormant_controller::platform::aws::{AwsConfig, AwsPlatform, CredentialsSource};
//! use dormant_controller::runtime::ControllerRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = dormant_controller::Config::from_env()?;
//!     let credentials = CredentialsSource::from_env().expect("credentials");
//!     let platform = Arc::new(AwsPlatform::new(AwsConfig::default(), credentials)?);
//!
//!     let runtime = ControllerRuntime::builder()
//!         .config(&config)
//!         .platform(platform)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dormant_console::ConsoleClientConfig;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::activator::ServiceActivator;
use crate::config::Config;
use crate::console::{ConsoleConnector, RconConnector};
use crate::handlers::AppState;
use crate::platform::{DnsRecords, NetworkInterfaces, Orchestrator, ServiceHandle};
use crate::publisher::{AddressPublisher, MAX_TTL_SECS};
use crate::resolver::{EndpointResolver, RetryPolicy};
use crate::server::run_http_server;
use crate::shutdown::ShutdownCoordinator;
use crate::supervisor::{ServiceSupervisor, SupervisorComponents};
use crate::verifier::TriggerVerifier;
use crate::watchdog::{IdleWatchdog, WatchdogConfig};

/// Builder for creating a [`ControllerRuntime`].
pub struct ControllerRuntimeBuilder {
    orchestrator: Option<Arc<dyn Orchestrator>>,
    network: Option<Arc<dyn NetworkInterfaces>>,
    dns: Option<Arc<dyn DnsRecords>>,
    connector: Option<Arc<dyn ConsoleConnector>>,
    service: Option<ServiceHandle>,
    hosted_zone_id: Option<String>,
    record_name: Option<String>,
    public_key: Option<String>,
    trigger_max_skew: Option<Duration>,
    dns_ttl_secs: u32,
    bind_addr: SocketAddr,
    watchdog: WatchdogConfig,
    retry: RetryPolicy,
}

impl Default for ControllerRuntimeBuilder {
    fn default() -> Self {
        Self {
            orchestrator: None,
            network: None,
            dns: None,
            connector: None,
            service: None,
            hosted_zone_id: None,
            record_name: None,
            public_key: None,
            trigger_max_skew: None,
            dns_ttl_secs: MAX_TTL_SECS,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            watchdog: WatchdogConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ControllerRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every setting from a loaded [`Config`], including an RCON
    /// connector built from its console settings.
    pub fn config(mut self, config: &Config) -> Self {
        self.service = Some(config.service.clone());
        self.hosted_zone_id = Some(config.hosted_zone_id.clone());
        self.record_name = Some(config.record_name.clone());
        self.public_key = Some(config.public_key.clone());
        self.trigger_max_skew = config.trigger_max_skew;
        self.dns_ttl_secs = config.dns_ttl_secs;
        self.bind_addr = config.http_addr;
        self.watchdog = config.watchdog.clone();
        self.retry = config.retry.clone();
        self.connector = Some(Arc::new(RconConnector::new(
            config.rcon_password.clone(),
            config.rcon_port,
            ConsoleClientConfig {
                connect_timeout: config.connect_timeout,
                command_timeout: config.command_timeout,
                ..ConsoleClientConfig::default()
            },
        )));
        self
    }

    /// Use one implementation for orchestrator, network and DNS.
    pub fn platform<P>(mut self, platform: Arc<P>) -> Self
    where
        P: Orchestrator + NetworkInterfaces + DnsRecords + 'static,
    {
        self.orchestrator = Some(platform.clone());
        self.network = Some(platform.clone());
        self.dns = Some(platform);
        self
    }

    /// Set the orchestrator (required unless [`platform`](Self::platform) is used).
    pub fn orchestrator(mut self, orchestrator: Arc<dyn Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Set the network lookup (required unless [`platform`](Self::platform) is used).
    pub fn network(mut self, network: Arc<dyn NetworkInterfaces>) -> Self {
        self.network = Some(network);
        self
    }

    /// Set the DNS service (required unless [`platform`](Self::platform) is used).
    pub fn dns(mut self, dns: Arc<dyn DnsRecords>) -> Self {
        self.dns = Some(dns);
        self
    }

    /// Set the console connector (required unless [`config`](Self::config) is used).
    pub fn connector(mut self, connector: Arc<dyn ConsoleConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set the controlled service (required).
    pub fn service(mut self, service: ServiceHandle) -> Self {
        self.service = Some(service);
        self
    }

    /// Set the hosted zone and record name to publish (required).
    pub fn record(
        mut self,
        hosted_zone_id: impl Into<String>,
        record_name: impl Into<String>,
    ) -> Self {
        self.hosted_zone_id = Some(hosted_zone_id.into());
        self.record_name = Some(record_name.into());
        self
    }

    /// Set the hex-encoded trigger public key (required).
    pub fn public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = Some(public_key.into());
        self
    }

    /// Set the HTTP bind address.
    ///
    /// Default: `0.0.0.0:8080`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the watchdog configuration.
    pub fn watchdog(mut self, config: WatchdogConfig) -> Self {
        self.watchdog = config;
        self
    }

    /// Set the endpoint resolution backoff.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<ControllerRuntimeConfig> {
        let orchestrator = self
            .orchestrator
            .ok_or_else(|| anyhow::anyhow!("orchestrator is required"))?;
        let network = self
            .network
            .ok_or_else(|| anyhow::anyhow!("network is required"))?;
        let dns = self.dns.ok_or_else(|| anyhow::anyhow!("dns is required"))?;
        let connector = self
            .connector
            .ok_or_else(|| anyhow::anyhow!("connector is required"))?;
        let service = self
            .service
            .ok_or_else(|| anyhow::anyhow!("service is required"))?;
        let hosted_zone_id = self
            .hosted_zone_id
            .ok_or_else(|| anyhow::anyhow!("hosted zone is required"))?;
        let record_name = self
            .record_name
            .ok_or_else(|| anyhow::anyhow!("record name is required"))?;
        let public_key = self
            .public_key
            .ok_or_else(|| anyhow::anyhow!("public key is required"))?;

        let mut verifier = TriggerVerifier::from_hex(&public_key)?;
        if let Some(skew) = self.trigger_max_skew {
            verifier = verifier.with_max_skew(skew);
        }

        let cancel = CancellationToken::new();
        let components = SupervisorComponents {
            activator: ServiceActivator::new(orchestrator.clone()),
            resolver: EndpointResolver::new(orchestrator.clone(), network),
            publisher: AddressPublisher::new(
                dns,
                hosted_zone_id,
                record_name,
                self.dns_ttl_secs,
            ),
            watchdog: IdleWatchdog::new(
                connector,
                ShutdownCoordinator::new(orchestrator),
                self.watchdog,
            ),
            retry: self.retry,
        };
        let supervisor = ServiceSupervisor::new(service, components, cancel.child_token());

        Ok(ControllerRuntimeConfig {
            verifier,
            supervisor,
            bind_addr: self.bind_addr,
            cancel,
        })
    }
}

/// Configuration for a [`ControllerRuntime`].
pub struct ControllerRuntimeConfig {
    verifier: TriggerVerifier,
    supervisor: ServiceSupervisor,
    bind_addr: SocketAddr,
    cancel: CancellationToken,
}

impl ControllerRuntimeConfig {
    /// The supervisor, for running a session without the HTTP server.
    pub fn supervisor(&self) -> &ServiceSupervisor {
        &self.supervisor
    }

    /// Bind the HTTP listener and start serving triggers.
    pub async fn start(self) -> Result<ControllerRuntime> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        let bind_addr = listener.local_addr()?;

        let state = Arc::new(AppState::new(self.verifier, self.supervisor.clone()));
        let server_shutdown = self.cancel.child_token();
        let server_handle = tokio::spawn(run_http_server(
            listener,
            state.clone(),
            server_shutdown,
        ));

        info!(
            bind_addr = %bind_addr,
            service = %self.supervisor.service(),
            "ControllerRuntime started"
        );

        Ok(ControllerRuntime {
            server_handle,
            supervisor: self.supervisor,
            cancel: self.cancel,
            state,
            bind_addr,
        })
    }
}

/// A running controller: the trigger server plus the active session, if any.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ControllerRuntime {
    server_handle: JoinHandle<Result<()>>,
    supervisor: ServiceSupervisor,
    cancel: CancellationToken,
    state: Arc<AppState>,
    bind_addr: SocketAddr,
}

impl ControllerRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ControllerRuntimeBuilder {
        ControllerRuntimeBuilder::new()
    }

    /// Address the HTTP server is bound to.
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Get a reference to the shared handler state.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// The lifecycle supervisor.
    pub fn supervisor(&self) -> &ServiceSupervisor {
        &self.supervisor
    }

    /// Gracefully shut down the runtime.
    ///
    /// Cancels the active session (closing its console connection), stops
    /// the HTTP server and waits for both.
    pub async fn shutdown(self) -> Result<()> {
        info!("ControllerRuntime shutting down...");
        self.cancel.cancel();

        self.supervisor.shutdown().await;

        match self.server_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "HTTP server exited with error"),
            Err(e) => error!(error = %e, "HTTP server task panicked"),
        }

        info!("ControllerRuntime stopped");
        Ok(())
    }
}
