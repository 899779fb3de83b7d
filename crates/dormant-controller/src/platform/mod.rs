// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Platform module - orchestrator, network and DNS bindings.

pub mod aws;
pub mod mock;
mod traits;

pub use mock::{CallLog, FailPoint, InstanceTemplate, MockPlatform, RecordedCall};
pub use traits::*;
