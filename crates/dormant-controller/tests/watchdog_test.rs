// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the idle watchdog against the scripted console.

mod common;

use std::time::Duration;

use common::*;
use dormant_controller::console::{ScriptedReply, StopBehavior};
use dormant_controller::platform::{InstanceDescriptor, RecordedCall};
use dormant_controller::watchdog::{WatchError, WatchOutcome, WatchState};
use tokio_util::sync::CancellationToken;

async fn descriptor(ctx: &TestContext) -> InstanceDescriptor {
    ctx.resolver().resolve(&service()).await.unwrap()
}

fn list_count(ctx: &TestContext) -> usize {
    ctx.console
        .commands()
        .iter()
        .filter(|c| c.as_str() == "list")
        .count()
}

fn scaled_to_zero(ctx: &TestContext) -> bool {
    ctx.log
        .position(|c| *c == RecordedCall::SetDesiredCount(0))
        .is_some()
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_fires_on_observation_after_threshold() {
    let ctx = TestContext::running();
    let descriptor = descriptor(&ctx).await;
    let watchdog = ctx.idle_watchdog();

    let outcome = watchdog
        .run(&service(), &descriptor, &CancellationToken::new())
        .await;

    let WatchOutcome::ShutDown(report) = outcome else {
        panic!("expected shutdown, got {:?}", outcome);
    };
    assert!(report.is_clean());
    // Threshold 5 is exclusive: the sixth idle poll fires
    assert_eq!(list_count(&ctx), 6);
    assert_eq!(ctx.console.commands().last().map(String::as_str), Some("stop"));
    assert_eq!(ctx.platform.desired_count(), 0);
    assert_eq!(ctx.console.closed(), 1);
    assert_eq!(watchdog.state(), WatchState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_console_connects_to_public_address_after_warmup() {
    let ctx = TestContext::running();
    let descriptor = descriptor(&ctx).await;
    let watchdog = ctx.idle_watchdog();
    let service = service();
    let cancel = CancellationToken::new();
    let started = tokio::time::Instant::now();

    let (outcome, ()) = tokio::join!(
        watchdog.run(&service, &descriptor, &cancel),
        async {
            tokio::time::sleep(Duration::from_secs(29)).await;
            assert_eq!(ctx.console.opened(), 0);
            assert_eq!(watchdog.state(), WatchState::WarmingUp);
        }
    );

    assert!(matches!(outcome, WatchOutcome::ShutDown(_)));
    assert_eq!(
        ctx.log
            .count(|c| *c == RecordedCall::ConsoleConnect(PUBLIC_IP.into())),
        1
    );
    // warm-up plus five intervals between six polls
    assert!(started.elapsed() >= Duration::from_secs(30 + 5 * 5));
}

#[tokio::test(start_paused = true)]
async fn test_occupant_resets_idle_count() {
    let mut ctx = TestContext::running();
    ctx.watchdog.idle_threshold = 2;
    ctx.console = ctx.console.clone().with_replies([
        ScriptedReply::players(0),
        ScriptedReply::players(0),
        ScriptedReply::players(3),
        ScriptedReply::players(0),
        ScriptedReply::players(0),
    ]);
    let descriptor = descriptor(&ctx).await;

    let outcome = ctx
        .idle_watchdog()
        .run(&service(), &descriptor, &CancellationToken::new())
        .await;

    assert!(matches!(outcome, WatchOutcome::ShutDown(_)));
    // 0, 0, 3 resets, then 0, 0, 0 fires
    assert_eq!(list_count(&ctx), 6);
}

#[tokio::test(start_paused = true)]
async fn test_connection_lost_is_fatal_without_shutdown() {
    let ctx = TestContext::running();
    ctx.console.push_reply(ScriptedReply::players(1));
    ctx.console.push_reply(ScriptedReply::players(1));
    ctx.console.push_reply(ScriptedReply::players(1));
    ctx.console.push_reply(ScriptedReply::players(1));
    ctx.console.push_reply(ScriptedReply::players(1));
    ctx.console.push_reply(ScriptedReply::Disconnect);
    let descriptor = descriptor(&ctx).await;

    let outcome = ctx
        .idle_watchdog()
        .run(&service(), &descriptor, &CancellationToken::new())
        .await;

    match outcome {
        WatchOutcome::Failed(WatchError::ConnectionLost { observations, .. }) => {
            assert_eq!(observations, 5)
        }
        other => panic!("expected connection loss, got {:?}", other),
    }
    assert!(!scaled_to_zero(&ctx));
    assert_eq!(ctx.platform.desired_count(), 1);
    assert!(!ctx.console.commands().contains(&"stop".to_string()));
    assert_eq!(ctx.log.count(|c| *c == RecordedCall::ConsoleClose), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_skip_poll() {
    let ctx = TestContext::running();
    ctx.console.push_reply(ScriptedReply::Timeout);
    ctx.console
        .push_reply(ScriptedReply::Text("Unknown command".to_string()));
    ctx.console.push_reply(ScriptedReply::players(0));
    ctx.console.push_reply(ScriptedReply::Timeout);
    let descriptor = descriptor(&ctx).await;

    let outcome = ctx
        .idle_watchdog()
        .run(&service(), &descriptor, &CancellationToken::new())
        .await;

    assert!(matches!(outcome, WatchOutcome::ShutDown(_)));
    // Three failed polls never count as observations
    assert_eq!(list_count(&ctx), 6 + 3);
    assert_eq!(ctx.console.opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_failures_give_up() {
    let mut ctx = TestContext::running();
    ctx.console = ctx
        .console
        .clone()
        .with_default_reply(ScriptedReply::Timeout);
    let descriptor = descriptor(&ctx).await;

    let outcome = ctx
        .idle_watchdog()
        .run(&service(), &descriptor, &CancellationToken::new())
        .await;

    assert!(matches!(
        outcome,
        WatchOutcome::Failed(WatchError::TooManyFailures { failures: 4 })
    ));
    assert!(!scaled_to_zero(&ctx));
    assert_eq!(ctx.console.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_is_fatal() {
    let mut ctx = TestContext::running();
    ctx.console = ctx.console.clone().fail_connects(1);
    let descriptor = descriptor(&ctx).await;

    let outcome = ctx
        .idle_watchdog()
        .run(&service(), &descriptor, &CancellationToken::new())
        .await;

    assert!(matches!(outcome, WatchOutcome::Failed(WatchError::Connect(_))));
    assert_eq!(list_count(&ctx), 0);
    assert!(!scaled_to_zero(&ctx));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_warmup() {
    let ctx = TestContext::running();
    let descriptor = descriptor(&ctx).await;
    let watchdog = ctx.idle_watchdog();
    let service = service();
    let cancel = CancellationToken::new();

    let (outcome, ()) = tokio::join!(watchdog.run(&service, &descriptor, &cancel), async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        cancel.cancel();
    });

    assert!(matches!(outcome, WatchOutcome::Cancelled));
    assert_eq!(ctx.console.opened(), 0);
    assert_eq!(watchdog.state(), WatchState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_polling_closes_console() {
    let mut ctx = TestContext::running();
    ctx.console = ctx
        .console
        .clone()
        .with_default_reply(ScriptedReply::players(4));
    let descriptor = descriptor(&ctx).await;
    let watchdog = ctx.idle_watchdog();
    let service = service();
    let cancel = CancellationToken::new();

    let (outcome, ()) = tokio::join!(watchdog.run(&service, &descriptor, &cancel), async {
        tokio::time::sleep(Duration::from_secs(52)).await;
        assert_eq!(watchdog.state(), WatchState::Polling);
        cancel.cancel();
    });

    assert!(matches!(outcome, WatchOutcome::Cancelled));
    assert_eq!(ctx.console.opened(), 1);
    assert_eq!(ctx.console.closed(), 1);
    assert!(!scaled_to_zero(&ctx));
    assert_eq!(ctx.platform.desired_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_disconnect_counts_as_sent() {
    let mut ctx = TestContext::running();
    ctx.console = ctx
        .console
        .clone()
        .with_stop_behavior(StopBehavior::Disconnect);
    let descriptor = descriptor(&ctx).await;

    let outcome = ctx
        .idle_watchdog()
        .run(&service(), &descriptor, &CancellationToken::new())
        .await;

    let WatchOutcome::ShutDown(report) = outcome else {
        panic!("expected shutdown, got {:?}", outcome);
    };
    assert!(report.scaled_down);
    assert!(report.stop_sent);
    let scale = ctx
        .log
        .position(|c| *c == RecordedCall::SetDesiredCount(0))
        .unwrap();
    let stop = ctx
        .log
        .position(|c| *c == RecordedCall::ConsoleCommand("stop".to_string()))
        .unwrap();
    assert!(scale < stop);
}
