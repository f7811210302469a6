mod common;

use std::time::Duration;

use common::*;

use peercall::sim::SimBackends;
use peercall::types::{CallPhase, DropReason, SessionId, SignalingState, TerminationReason};
use peercall::{
    CallError, CallOptions, CallRegistry, CallRegistryConfig, CallSession, CallSessionConfig,
};
use tokio::time::Instant;

fn reason_of(phase: &CallPhase) -> Option<TerminationReason> {
    match phase {
        CallPhase::Terminated { reason, .. } => reason.clone(),
        _ => None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_hang_up_terminates_locally_when_signaling_is_silent() {
    init_logging();
    let sim = SimBackends::new();
    sim.signaling.set_confirm_drops(false);
    let session = start_outgoing(&sim, "GRACE1").await;
    let engine = connect(&sim, &session).await;

    let started = Instant::now();
    session.hang_up().await.unwrap();
    assert!(!session.snapshot().call_phase.is_terminal());

    let ended = wait_for_phase(&session, CallPhase::is_terminal).await;
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(1600), "terminated after {waited:?}");
    assert!(waited < Duration::from_millis(1700), "terminated after {waited:?}");
    assert_eq!(reason_of(&ended.call_phase), Some(TerminationReason::HUNG_UP));
    assert_eq!(sim.signaling.drops(), vec![DropReason::HangUp]);
    eventually(|| engine.stop_count() == 1).await;
}

#[tokio::test(start_paused = true)]
async fn test_second_hang_up_is_ignored() {
    init_logging();
    let sim = SimBackends::new();
    sim.signaling.set_confirm_drops(false);
    let session = start_outgoing(&sim, "GRACE2").await;
    connect(&sim, &session).await;

    session.hang_up().await.unwrap();
    session.hang_up().await.unwrap();
    wait_for_phase(&session, CallPhase::is_terminal).await;
    session.hang_up().await.unwrap();
    assert_eq!(sim.signaling.drops(), vec![DropReason::HangUp]);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_call_is_dropped_after_ring_timeout() {
    init_logging();
    let sim = SimBackends::new();
    let session = start_outgoing(&sim, "RING1").await;
    sim.signaling
        .push(session.id(), SignalingState::Requesting { ringing: false });
    wait_for_phase(&session, |p| matches!(p, CallPhase::Requesting { .. })).await;

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(sim.signaling.drops().is_empty());

    let ended = wait_for_phase(&session, CallPhase::is_terminal).await;
    assert_eq!(sim.signaling.drops(), vec![DropReason::Busy]);
    // Signaling confirms the busy drop.
    assert_eq!(reason_of(&ended.call_phase), Some(TerminationReason::BUSY));
}

#[tokio::test(start_paused = true)]
async fn test_connected_call_outlives_the_watchdogs() {
    init_logging();
    let sim = SimBackends::new();
    let session = start_outgoing(&sim, "RING2").await;
    connect(&sim, &session).await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(matches!(session.snapshot().call_phase, CallPhase::Active { .. }));
    assert!(sim.signaling.drops().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stuck_connecting_is_dropped_as_disconnect() {
    init_logging();
    let sim = SimBackends::new();
    let session = start_outgoing(&sim, "CONN1").await;
    sim.signaling
        .push(session.id(), SignalingState::Active(sample_call()));
    wait_for_engine(&sim).await;
    wait_for_phase(&session, |p| matches!(p, CallPhase::Connecting { .. })).await;

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(sim.signaling.drops().is_empty());

    let ended = wait_for_phase(&session, CallPhase::is_terminal).await;
    assert_eq!(sim.signaling.drops(), vec![DropReason::Disconnect]);
    assert!(matches!(
        reason_of(&ended.call_phase),
        Some(TerminationReason::Error(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_removable_after_removal_delay() {
    init_logging();
    let sim = SimBackends::new();
    let session = start_outgoing(&sim, "RM1").await;
    connect(&sim, &session).await;

    sim.signaling.push(
        session.id(),
        SignalingState::terminated(TerminationReason::HUNG_UP),
    );
    wait_for_phase(&session, CallPhase::is_terminal).await;
    let ended_at = Instant::now();
    assert!(!session.is_removable());

    session.can_be_removed().await;
    assert!(ended_at.elapsed() >= Duration::from_millis(1600));
    assert!(session.is_removable());
}

#[tokio::test(start_paused = true)]
async fn test_registry_reaps_finished_sessions() {
    init_logging();
    let sim = SimBackends::new();
    let registry = CallRegistry::new(
        CallRegistryConfig {
            max_concurrent_calls: 2,
        },
        CallSessionConfig::default(),
        sim.backends(),
    );

    let first = registry
        .start_call(CallOptions::outgoing(SessionId::new("REG1")))
        .await
        .unwrap();
    let second = registry
        .start_call(CallOptions::incoming(SessionId::new("REG2")))
        .await
        .unwrap();
    assert!(matches!(
        registry
            .start_call(CallOptions::outgoing(SessionId::new("REG3")))
            .await,
        Err(CallError::AlreadyExists(_))
    ));
    assert_eq!(registry.active_count().await, 2);

    registry.hang_up_all().await;
    wait_for_phase(&first, CallPhase::is_terminal).await;
    wait_for_phase(&second, CallPhase::is_terminal).await;
    drop(first);
    drop(second);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(registry.active_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_with_full_queue_tears_down() {
    init_logging();
    let sim = SimBackends::new();
    let config = CallSessionConfig {
        event_queue_capacity: 1,
        ..CallSessionConfig::default()
    };
    let session = CallSession::start(
        CallOptions::outgoing(SessionId::new("DROP1")),
        sim.backends(),
        config,
    )
    .await
    .unwrap();
    let engine = connect(&sim, &session).await;

    // Leave a command sitting in the single queue slot, then let go.
    session.set_muted(true).await.unwrap();
    drop(session);

    eventually(|| engine.stop_count() == 1).await;
}
