// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the embeddable runtime over a real listener.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use common::*;
use dormant_controller::interaction::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use dormant_controller::runtime::{ControllerRuntime, ControllerRuntimeBuilder};
use dormant_controller::supervisor::SlotState;

fn builder(ctx: &TestContext) -> ControllerRuntimeBuilder {
    ControllerRuntime::builder()
        .platform(ctx.platform.clone())
        .connector(Arc::new(ctx.console.clone()))
        .service(service())
        .record(ZONE_ID, RECORD_NAME)
        .public_key(public_key_hex())
        .bind_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
        .watchdog(ctx.watchdog.clone())
        .retry(ctx.retry.clone())
}

#[test]
fn test_build_requires_collaborators() {
    let ctx = TestContext::dormant();

    let err = ControllerRuntime::builder()
        .service(service())
        .build()
        .err()
        .unwrap();
    assert!(err.to_string().contains("orchestrator is required"));

    let err = ControllerRuntime::builder()
        .platform(ctx.platform.clone())
        .connector(Arc::new(ctx.console.clone()))
        .service(service())
        .record(ZONE_ID, RECORD_NAME)
        .public_key("zz")
        .build()
        .err()
        .unwrap();
    assert!(!err.to_string().is_empty());
}

#[tokio::test]
async fn test_serves_triggers_until_shutdown() {
    let ctx = TestContext::dormant();
    let runtime = builder(&ctx).build().unwrap().start().await.unwrap();
    let base = format!("http://{}", runtime.bind_addr());
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["healthy"], true);

    let body = r#"{"type":2,"id":"9"}"#;
    let response = client
        .post(format!("{}/interactions", base))
        .header(SIGNATURE_HEADER, sign("1700000000", body.as_bytes()))
        .header(TIMESTAMP_HEADER, "1700000000")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(ctx.platform.desired_count(), 1);
    assert_ne!(runtime.supervisor().slot_state(), SlotState::Idle);

    let response = client
        .post(format!("{}/interactions", base))
        .header(SIGNATURE_HEADER, "00".repeat(64))
        .header(TIMESTAMP_HEADER, "1700000000")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    let supervisor = runtime.supervisor().clone();
    runtime.shutdown().await.unwrap();

    assert_eq!(supervisor.slot_state(), SlotState::Idle);
    assert_eq!(
        supervisor.status().last_session.map(|s| s.outcome.is_failure()),
        Some(false)
    );
}
