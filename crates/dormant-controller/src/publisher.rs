// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Address publication under a stable hostname.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use crate::platform::{DnsRecord, DnsRecords, PlatformError, RecordType};
use crate::resolver::ConfirmedEndpoint;

/// Upper bound on the TTL of published records.
pub const MAX_TTL_SECS: u32 = 60;

/// DNS publication failed. The service may be running but unreachable by name.
#[derive(Debug, Error)]
#[error("failed to publish {name} -> {value}: {source}")]
pub struct PublishError {
    /// Record name
    pub name: String,
    /// Address that was not published
    pub value: std::net::Ipv4Addr,
    /// Underlying platform error
    #[source]
    pub source: PlatformError,
}

/// Upserts the address record pointing at the current instance.
#[derive(Clone)]
pub struct AddressPublisher {
    dns: Arc<dyn DnsRecords>,
    zone_id: String,
    record_name: String,
    ttl_secs: u32,
}

impl AddressPublisher {
    /// Create a publisher. `ttl_secs` is clamped to `1..=MAX_TTL_SECS`.
    pub fn new(
        dns: Arc<dyn DnsRecords>,
        zone_id: impl Into<String>,
        record_name: impl Into<String>,
        ttl_secs: u32,
    ) -> Self {
        Self {
            dns,
            zone_id: zone_id.into(),
            record_name: record_name.into(),
            ttl_secs: ttl_secs.clamp(1, MAX_TTL_SECS),
        }
    }

    /// Record name being published.
    pub fn record_name(&self) -> &str {
        &self.record_name
    }

    /// TTL used for published records.
    pub fn ttl_secs(&self) -> u32 {
        self.ttl_secs
    }

    /// Upsert the A record for a confirmed endpoint.
    pub async fn publish(&self, endpoint: &ConfirmedEndpoint) -> Result<DnsRecord, PublishError> {
        let record = DnsRecord {
            zone_id: self.zone_id.clone(),
            name: self.record_name.clone(),
            record_type: RecordType::A,
            ttl_secs: self.ttl_secs,
            value: endpoint.public_address(),
        };

        match self.dns.upsert_record(&record).await {
            Ok(()) => {
                info!(
                    name = %record.name,
                    value = %record.value,
                    ttl = record.ttl_secs,
                    instance_id = %endpoint.descriptor().instance_id,
                    "Published address record"
                );
                Ok(record)
            }
            Err(source) => {
                error!(
                    name = %record.name,
                    value = %record.value,
                    error = %source,
                    "Address record not published; server is unreachable by name"
                );
                Err(PublishError {
                    name: record.name,
                    value: record.value,
                    source,
                })
            }
        }
    }
}
