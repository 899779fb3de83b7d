// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Platform trait definitions.
//!
//! Defines the narrow interfaces the controller consumes from the
//! orchestration platform, the network layer and the DNS service.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Errors from platform operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlatformError {
    /// The call did not complete within its time bound.
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// The platform could not be reached.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The platform rejected the call (permission denied, unknown service, ...).
    #[error("API error [{code}]: {message}")]
    Api {
        /// Error code reported by the platform.
        code: String,
        /// Human-readable message.
        message: String,
    },

    /// A referenced resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The platform answered with something we could not interpret.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for platform operations.
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Identity of the workload being controlled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ServiceHandle {
    /// Cluster the service runs in
    pub cluster: String,
    /// Service name within the cluster
    pub service: String,
}

impl ServiceHandle {
    /// Create a new service handle.
    pub fn new(cluster: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            service: service.into(),
        }
    }
}

impl fmt::Display for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster, self.service)
    }
}

/// A single name/value detail on an instance attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentDetail {
    /// Detail name (e.g. `networkInterfaceId`)
    pub name: String,
    /// Detail value
    pub value: String,
}

/// Resource attached to a running instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    /// Attachment kind (e.g. `ElasticNetworkInterface`)
    pub kind: String,
    /// Attachment status as reported by the platform, if any
    pub status: Option<String>,
    /// Name/value details
    pub details: Vec<AttachmentDetail>,
}

impl Attachment {
    /// Attachment kind for a network interface.
    pub const NETWORK_INTERFACE: &'static str = "ElasticNetworkInterface";

    /// Detail name carrying the network interface identifier.
    pub const INTERFACE_ID_DETAIL: &'static str = "networkInterfaceId";

    /// Build a network interface attachment with the given interface id.
    pub fn network_interface(interface_id: impl Into<String>) -> Self {
        Self {
            kind: Self::NETWORK_INTERFACE.to_string(),
            status: Some("ATTACHED".to_string()),
            details: vec![AttachmentDetail {
                name: Self::INTERFACE_ID_DETAIL.to_string(),
                value: interface_id.into(),
            }],
        }
    }

    /// Whether this attachment is a network interface.
    pub fn is_network_interface(&self) -> bool {
        self.kind == Self::NETWORK_INTERFACE
    }

    /// Look up a detail value by name.
    pub fn detail(&self, name: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.value.as_str())
    }
}

/// Addresses associated with a network interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceAddresses {
    /// Publicly reachable address, once associated
    pub public: Option<Ipv4Addr>,
    /// Address inside the private network
    pub private: Option<Ipv4Addr>,
}

/// Which resolved address the console connection should use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressPreference {
    /// Connect over the public address
    #[default]
    Public,
    /// Connect over the private address, falling back to the public one
    Private,
}

impl std::str::FromStr for AddressPreference {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(AddressPreference::Public),
            "private" => Ok(AddressPreference::Private),
            other => Err(format!("expected 'public' or 'private', got '{}'", other)),
        }
    }
}

/// The currently running instance of a service and its addresses.
///
/// Valid only for the instance it was resolved from; never carried across
/// lifecycle generations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceDescriptor {
    /// Platform instance (task) id
    pub instance_id: String,
    /// Attached network interface id
    pub interface_id: String,
    /// Public address, if associated
    pub public_address: Option<Ipv4Addr>,
    /// Private address, if known
    pub private_address: Option<Ipv4Addr>,
}

impl InstanceDescriptor {
    /// Address the console connection should target.
    pub fn console_address(&self, preference: AddressPreference) -> Option<Ipv4Addr> {
        match preference {
            AddressPreference::Public => self.public_address,
            AddressPreference::Private => self.private_address.or(self.public_address),
        }
    }
}

/// DNS record type. Only address records are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordType {
    /// IPv4 address record
    A,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => f.write_str("A"),
        }
    }
}

/// Address record to upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsRecord {
    /// Hosted zone id
    pub zone_id: String,
    /// Fully qualified record name
    pub name: String,
    /// Record type
    pub record_type: RecordType,
    /// Time to live in seconds
    pub ttl_secs: u32,
    /// Record value
    pub value: Ipv4Addr,
}

/// Orchestration platform running the workload.
///
/// Implementations are pure API bindings: they hold no controller state and
/// must bound every call in time.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Platform identifier (e.g. "ecs", "mock")
    fn platform_type(&self) -> &'static str;

    /// List running instance ids of the service, in platform order.
    async fn list_running_instances(&self, service: &ServiceHandle) -> Result<Vec<String>>;

    /// Describe an instance's attachments.
    async fn describe_instance(
        &self,
        service: &ServiceHandle,
        instance_id: &str,
    ) -> Result<Vec<Attachment>>;

    /// Set the desired running-instance count. Idempotent.
    async fn set_desired_count(&self, service: &ServiceHandle, count: u32) -> Result<()>;
}

/// Network layer lookups.
#[async_trait]
pub trait NetworkInterfaces: Send + Sync {
    /// Describe a network interface's addresses.
    async fn describe_interface(&self, interface_id: &str) -> Result<InterfaceAddresses>;
}

/// Name-resolution publishing service.
#[async_trait]
pub trait DnsRecords: Send + Sync {
    /// Create the record or replace its value if it exists.
    async fn upsert_record(&self, record: &DnsRecord) -> Result<()>;
}
