//! Integration tests for supervisor start/stop orchestration.
//!
//! Covers:
//! - no-executable config sets start nothing and have no side effects
//! - all-or-nothing rollback on a mid-sequence failure
//! - cancellation before startup propagates after rollback
//! - `kill_one` is idempotent
//! - `kill_all` stops and disposes the engine handle exactly once

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use agent_warden::config::InstanceConfig;
use agent_warden::connector::start_one;
use agent_warden::context::Slot;
use agent_warden::engine::{LogStyle, Tasker};
use agent_warden::supervisor::{kill_all, kill_one, start_all, TaskerSlot};
use agent_warden::AppError;

use super::test_helpers::{
    empty_agent, sh_agent, RecordingSink, ScriptedFactory, ScriptedOutcome, StubTasker,
};

/// A config set where every entry lacks an executable returns an empty
/// list without creating clients or spawning processes.
#[tokio::test]
async fn start_all_with_no_executables_is_a_no_op() {
    let factory = ScriptedFactory::new(&[]);
    let sink = RecordingSink::new();
    let cancel = CancellationToken::new();
    let configs = vec![empty_agent(), empty_agent()];

    let contexts = start_all(
        &configs,
        &InstanceConfig::default(),
        sink.clone(),
        factory.clone(),
        &std::env::temp_dir(),
        &cancel,
    )
    .await
    .expect("no-op start must succeed");

    assert!(contexts.is_empty());
    assert_eq!(factory.created_count(), 0, "no client may be created");
    assert_eq!(factory.attempt_count(), 0, "no handshake may run");
}

/// When a later agent fails, every earlier agent is killed and the call
/// reports an empty list rather than a partial one.
#[cfg(unix)]
#[tokio::test]
async fn start_all_rolls_back_on_mid_sequence_failure() {
    let factory = ScriptedFactory::new(&[ScriptedOutcome::Linked, ScriptedOutcome::Fatal]);
    let sink = RecordingSink::new();
    let cancel = CancellationToken::new();
    let configs = vec![sh_agent("sleep 30"), sh_agent("sleep 30")];

    let contexts = start_all(
        &configs,
        &InstanceConfig::default(),
        sink.clone(),
        factory.clone(),
        &std::env::temp_dir(),
        &cancel,
    )
    .await
    .expect("partial failure is reported as an empty list, not an error");

    assert!(contexts.is_empty(), "partial success is not allowed");
    assert!(
        factory.stop_count() >= 1,
        "the already-started agent must be stopped during rollback"
    );
    assert!(
        sink.entries()
            .iter()
            .any(|(_, style)| *style == LogStyle::Error),
        "the aggregated failure must reach the sink"
    );
}

/// A token cancelled before the first agent starts triggers rollback and
/// propagates cancellation to the caller.
#[tokio::test]
async fn start_all_propagates_cancellation() {
    let factory = ScriptedFactory::new(&[]);
    let sink = RecordingSink::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = start_all(
        &[sh_agent("sleep 30")],
        &InstanceConfig::default(),
        sink,
        factory.clone(),
        &std::env::temp_dir(),
        &cancel,
    )
    .await;

    assert!(matches!(result, Err(AppError::Cancelled)));
    assert_eq!(factory.created_count(), 0);
}

/// `kill_one` called twice does not fail, and the second call is a no-op.
#[cfg(unix)]
#[tokio::test]
async fn kill_one_twice_is_a_no_op() {
    let factory = ScriptedFactory::new(&[ScriptedOutcome::Linked]);
    let sink = RecordingSink::new();
    let cancel = CancellationToken::new();

    let ctx = start_one(
        &sh_agent("sleep 30"),
        &InstanceConfig::default(),
        sink,
        factory.clone(),
        &std::env::temp_dir(),
        &cancel,
    )
    .await
    .expect("agent must link");
    assert!(ctx.has_live_process());

    kill_one(&ctx).await;
    assert!(!ctx.has_live_process());
    assert_eq!(factory.stop_count(), 1);

    kill_one(&ctx).await;
    assert_eq!(
        factory.stop_count(),
        1,
        "second kill must not stop the client again"
    );
}

/// `kill_all` stops a running engine handle exactly once; a repeat call
/// finds the slot already empty and does nothing.
#[tokio::test]
async fn kill_all_disposes_engine_handle_once() {
    let tasker = StubTasker::running();
    let handle: Arc<dyn Tasker> = tasker.clone();
    let slot: TaskerSlot = Slot::empty();
    let _ = slot.replace(handle);
    let mut contexts = Vec::new();

    kill_all(&mut contexts, &slot).await;
    assert_eq!(tasker.stop_count(), 1);
    assert!(slot.is_empty(), "handle must be disposed");

    kill_all(&mut contexts, &slot).await;
    assert_eq!(tasker.stop_count(), 1, "already-disposed handle is not an error");
}

/// An engine handle that is not running is disposed without a stop call.
#[tokio::test]
async fn kill_all_skips_stop_for_idle_engine() {
    let tasker = StubTasker::idle();
    let handle: Arc<dyn Tasker> = tasker.clone();
    let slot: TaskerSlot = Slot::empty();
    let _ = slot.replace(handle);
    let mut contexts = Vec::new();

    kill_all(&mut contexts, &slot).await;
    assert_eq!(tasker.stop_count(), 0);
    assert!(slot.is_empty());
}
