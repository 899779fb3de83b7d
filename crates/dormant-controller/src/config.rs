// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for dormant-controller.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::platform::aws::{AwsConfig, CredentialsSource, DEFAULT_REGION};
use crate::platform::{AddressPreference, ServiceHandle};
use crate::publisher::MAX_TTL_SECS;
use crate::resolver::RetryPolicy;
use crate::watchdog::WatchdogConfig;

/// Controller configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Controlled service
    pub service: ServiceHandle,
    /// Hosted zone of the published record
    pub hosted_zone_id: String,
    /// Fully qualified record name
    pub record_name: String,
    /// TTL of the published record (at most 60)
    pub dns_ttl_secs: u32,
    /// Hex-encoded ed25519 key that signs triggers
    pub public_key: String,
    /// Accepted trigger timestamp skew; `None` disables the check
    pub trigger_max_skew: Option<Duration>,
    /// HTTP address for the trigger endpoint
    pub http_addr: SocketAddr,
    /// Console (RCON) port of the server
    pub rcon_port: u16,
    /// Console password
    pub rcon_password: String,
    /// Bound on console connect plus login
    pub connect_timeout: Duration,
    /// Bound on a console command round trip
    pub command_timeout: Duration,
    /// Watchdog settings
    pub watchdog: WatchdogConfig,
    /// Endpoint resolution backoff
    pub retry: RetryPolicy,
    /// AWS region and endpoint override
    pub aws: AwsConfig,
    /// Where AWS credentials come from, when the environment names a source
    pub aws_credentials: Option<CredentialsSource>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("service", &self.service)
            .field("hosted_zone_id", &self.hosted_zone_id)
            .field("record_name", &self.record_name)
            .field("dns_ttl_secs", &self.dns_ttl_secs)
            .field("http_addr", &self.http_addr)
            .field("rcon_port", &self.rcon_port)
            .field("watchdog", &self.watchdog)
            .field("retry", &self.retry)
            .field("aws", &self.aws)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);

        let service = ServiceHandle::new(
            vars.required("DORMANT_CLUSTER")?,
            vars.required("DORMANT_SERVICE")?,
        );
        let hosted_zone_id = vars.required("DORMANT_HOSTED_ZONE_ID")?;
        let record_name = vars.required("DORMANT_RECORD_NAME")?;
        let public_key = vars.required("DORMANT_PUBLIC_KEY")?;
        crate::verifier::TriggerVerifier::from_hex(&public_key).map_err(|e| {
            ConfigError::Invalid {
                var: "DORMANT_PUBLIC_KEY",
                reason: e.to_string(),
            }
        })?;
        let rcon_password = vars.required("DORMANT_RCON_PASSWORD")?;

        let http_port: u16 = vars.parsed("DORMANT_HTTP_PORT", 8080)?;
        let rcon_port: u16 = vars.parsed("DORMANT_RCON_PORT", 25575)?;

        let idle_threshold: u32 = vars.parsed("DORMANT_IDLE_THRESHOLD", 5)?;
        if idle_threshold == 0 {
            return Err(ConfigError::Invalid {
                var: "DORMANT_IDLE_THRESHOLD",
                reason: "must be at least 1".to_string(),
            });
        }
        let poll_interval_secs: u64 = vars.positive("DORMANT_POLL_INTERVAL_SECS", 5)?;
        let warmup_secs: u64 = vars.parsed("DORMANT_WARMUP_SECS", 300)?;
        let max_poll_failures: u32 = vars.parsed("DORMANT_MAX_POLL_FAILURES", 12)?;
        let address_preference: AddressPreference =
            vars.parsed("DORMANT_CONSOLE_ADDRESS", AddressPreference::Public)?;

        let command_timeout_secs: u64 = vars.positive("DORMANT_COMMAND_TIMEOUT_SECS", 10)?;
        let connect_timeout_secs: u64 = vars.positive("DORMANT_CONNECT_TIMEOUT_SECS", 10)?;

        let dns_ttl_secs: u32 = vars.parsed("DORMANT_DNS_TTL_SECS", MAX_TTL_SECS)?;
        let trigger_max_skew = vars
            .optional::<u64>("DORMANT_TRIGGER_MAX_SKEW_SECS")?
            .map(Duration::from_secs);

        let retry = RetryPolicy {
            max_attempts: vars.parsed("DORMANT_RESOLVE_MAX_ATTEMPTS", 30)?,
            initial_delay: Duration::from_millis(
                vars.parsed("DORMANT_RESOLVE_INITIAL_DELAY_MS", 2000)?,
            ),
            max_delay: Duration::from_millis(vars.parsed("DORMANT_RESOLVE_MAX_DELAY_MS", 30_000)?),
            ..RetryPolicy::default()
        };

        let aws = AwsConfig {
            region: vars
                .get("AWS_REGION")
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            endpoint: vars.get("DORMANT_AWS_ENDPOINT"),
            request_timeout: Duration::from_secs(command_timeout_secs),
        };

        Ok(Self {
            service,
            hosted_zone_id,
            record_name,
            dns_ttl_secs: dns_ttl_secs.min(MAX_TTL_SECS),
            public_key,
            trigger_max_skew,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            rcon_port,
            rcon_password,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            command_timeout: Duration::from_secs(command_timeout_secs),
            watchdog: WatchdogConfig {
                warmup: Duration::from_secs(warmup_secs),
                poll_interval: Duration::from_secs(poll_interval_secs),
                idle_threshold,
                max_poll_failures,
                address_preference,
            },
            retry,
            aws,
            aws_credentials: CredentialsSource::from_lookup(&lookup),
        })
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    /// Non-empty value of a variable.
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.get(var).ok_or(ConfigError::MissingEnvVar(var))
    }

    fn optional<T: FromStr>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        self.get(var)
            .map(|raw| {
                raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                    var,
                    reason: format!("'{}': {}", raw, e),
                })
            })
            .transpose()
    }

    fn parsed<T: FromStr>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        Ok(self.optional(var)?.unwrap_or(default))
    }

    /// Like [`parsed`](Self::parsed), rejecting zero.
    fn positive(&self, var: &'static str, default: u64) -> Result<u64, ConfigError> {
        match self.parsed(var, default)? {
            0 => Err(ConfigError::Invalid {
                var,
                reason: "must be at least 1".to_string(),
            }),
            value => Ok(value),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A variable has an unusable value.
    #[error("Invalid value for {var}: {reason}")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// What is wrong with it
        reason: String,
    },
}
