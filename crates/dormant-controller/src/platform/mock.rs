// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock platform for testing.
//!
//! An in-memory implementation of every platform trait that simulates an
//! orchestrator with a single service, the network layer and a DNS zone.
//! Every call is appended to a shared [`CallLog`] so tests can assert on
//! ordering across components.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};

use super::traits::*;

/// A call observed by a mock collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    /// `Orchestrator::list_running_instances`
    ListRunningInstances,
    /// `Orchestrator::describe_instance`
    DescribeInstance(String),
    /// `Orchestrator::set_desired_count`
    SetDesiredCount(u32),
    /// `NetworkInterfaces::describe_interface`
    DescribeInterface(String),
    /// `DnsRecords::upsert_record`
    UpsertRecord(DnsRecord),
    /// Console connection opened
    ConsoleConnect(IpAddr),
    /// Console command sent
    ConsoleCommand(String),
    /// Console connection closed
    ConsoleClose,
}

/// Ordered, shareable log of calls made against mock collaborators.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl CallLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a call.
    pub fn record(&self, call: RecordedCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    /// Snapshot of all calls so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Position of the first call matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&RecordedCall) -> bool) -> Option<usize> {
        self.calls().iter().position(predicate)
    }

    /// Number of calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&RecordedCall) -> bool) -> usize {
        self.calls().iter().filter(|c| predicate(c)).count()
    }
}

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `list_running_instances`
    ListRunningInstances,
    /// `describe_instance`
    DescribeInstance,
    /// `set_desired_count`
    SetDesiredCount,
    /// `describe_interface`
    DescribeInterface,
    /// `upsert_record`
    UpsertRecord,
}

/// Instance created when the mock scales from zero to one.
#[derive(Debug, Clone)]
pub struct InstanceTemplate {
    /// Instance id
    pub instance_id: String,
    /// Network interface id (None simulates a still-provisioning instance)
    pub interface_id: Option<String>,
    /// Addresses of the interface
    pub addresses: InterfaceAddresses,
    /// Number of interface lookups answered without a public address before
    /// the public address shows up
    pub address_delay_polls: u32,
}

impl InstanceTemplate {
    /// A fully provisioned instance with public and private addresses.
    pub fn ready(instance_id: &str, interface_id: &str, public: Ipv4Addr, private: Ipv4Addr) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            interface_id: Some(interface_id.to_string()),
            addresses: InterfaceAddresses {
                public: Some(public),
                private: Some(private),
            },
            address_delay_polls: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct MockInterface {
    addresses: InterfaceAddresses,
    pending_polls: u32,
}

#[derive(Debug, Default)]
struct MockState {
    desired_count: u32,
    instances: Vec<(String, Vec<Attachment>)>,
    interfaces: HashMap<String, MockInterface>,
    records: HashMap<(String, String), DnsRecord>,
    failures: HashSet<FailPoint>,
    launch_template: Option<InstanceTemplate>,
}

/// Mock platform for testing.
#[derive(Clone, Default)]
pub struct MockPlatform {
    state: Arc<Mutex<MockState>>,
    log: CallLog,
}

impl MockPlatform {
    /// Create a new mock platform with nothing running.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock whose service is already running `template`.
    pub fn running(template: InstanceTemplate) -> Self {
        let platform = Self::new();
        platform.with_state(|state| {
            state.desired_count = 1;
            install_instance(state, &template);
        });
        platform
    }

    /// Instance to create whenever desired count goes from zero to one.
    pub fn launch_on_scale_up(self, template: InstanceTemplate) -> Self {
        self.with_state(|state| state.launch_template = Some(template));
        self
    }

    /// Make an operation fail until [`clear_failure`](Self::clear_failure).
    pub fn fail_on(&self, point: FailPoint) {
        self.with_state(|state| {
            state.failures.insert(point);
        });
    }

    /// Stop failing an operation.
    pub fn clear_failure(&self, point: FailPoint) {
        self.with_state(|state| {
            state.failures.remove(&point);
        });
    }

    /// Shared call log.
    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }

    /// Current desired count.
    pub fn desired_count(&self) -> u32 {
        self.with_state(|state| state.desired_count)
    }

    /// Ids of instances currently running.
    pub fn running_instances(&self) -> Vec<String> {
        self.with_state(|state| state.instances.iter().map(|(id, _)| id.clone()).collect())
    }

    /// Replace the running instance (simulates the platform restarting the task).
    pub fn replace_instance(&self, template: InstanceTemplate) {
        self.with_state(|state| {
            state.instances.clear();
            install_instance(state, &template);
        });
    }

    /// Published record for `name` in `zone_id`, if any.
    pub fn record(&self, zone_id: &str, name: &str) -> Option<DnsRecord> {
        self.with_state(|state| {
            state
                .records
                .get(&(zone_id.to_string(), name.to_string()))
                .cloned()
        })
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn check(&self, point: FailPoint) -> Result<()> {
        if self.with_state(|state| state.failures.contains(&point)) {
            return Err(PlatformError::Api {
                code: "MockFailure".to_string(),
                message: format!("injected failure at {:?}", point),
            });
        }
        Ok(())
    }
}

fn install_instance(state: &mut MockState, template: &InstanceTemplate) {
    let attachments = match &template.interface_id {
        Some(interface_id) => {
            state.interfaces.insert(
                interface_id.clone(),
                MockInterface {
                    addresses: template.addresses,
                    pending_polls: template.address_delay_polls,
                },
            );
            vec![Attachment::network_interface(interface_id.clone())]
        }
        None => Vec::new(),
    };
    state
        .instances
        .push((template.instance_id.clone(), attachments));
}

#[async_trait]
impl Orchestrator for MockPlatform {
    fn platform_type(&self) -> &'static str {
        "mock"
    }

    async fn list_running_instances(&self, _service: &ServiceHandle) -> Result<Vec<String>> {
        self.log.record(RecordedCall::ListRunningInstances);
        self.check(FailPoint::ListRunningInstances)?;
        Ok(self.running_instances())
    }

    async fn describe_instance(
        &self,
        _service: &ServiceHandle,
        instance_id: &str,
    ) -> Result<Vec<Attachment>> {
        self.log
            .record(RecordedCall::DescribeInstance(instance_id.to_string()));
        self.check(FailPoint::DescribeInstance)?;
        self.with_state(|state| {
            state
                .instances
                .iter()
                .find(|(id, _)| id == instance_id)
                .map(|(_, attachments)| attachments.clone())
                .ok_or_else(|| PlatformError::NotFound(format!("instance {}", instance_id)))
        })
    }

    async fn set_desired_count(&self, _service: &ServiceHandle, count: u32) -> Result<()> {
        self.log.record(RecordedCall::SetDesiredCount(count));
        self.check(FailPoint::SetDesiredCount)?;
        self.with_state(|state| {
            let previous = state.desired_count;
            state.desired_count = count;
            if count == 0 {
                state.instances.clear();
            } else if previous == 0
                && state.instances.is_empty()
                && let Some(template) = state.launch_template.clone()
            {
                install_instance(state, &template);
            }
        });
        Ok(())
    }
}

#[async_trait]
impl NetworkInterfaces for MockPlatform {
    async fn describe_interface(&self, interface_id: &str) -> Result<InterfaceAddresses> {
        self.log
            .record(RecordedCall::DescribeInterface(interface_id.to_string()));
        self.check(FailPoint::DescribeInterface)?;
        self.with_state(|state| {
            let interface = state
                .interfaces
                .get_mut(interface_id)
                .ok_or_else(|| PlatformError::NotFound(format!("interface {}", interface_id)))?;
            if interface.pending_polls > 0 {
                interface.pending_polls -= 1;
                return Ok(InterfaceAddresses {
                    public: None,
                    private: interface.addresses.private,
                });
            }
            Ok(interface.addresses)
        })
    }
}

#[async_trait]
impl DnsRecords for MockPlatform {
    async fn upsert_record(&self, record: &DnsRecord) -> Result<()> {
        self.log.record(RecordedCall::UpsertRecord(record.clone()));
        self.check(FailPoint::UpsertRecord)?;
        self.with_state(|state| {
            state.records.insert(
                (record.zone_id.clone(), record.name.clone()),
                record.clone(),
            );
        });
        Ok(())
    }
}
