#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use peercall::sim::{SimBackends, SimMediaEngine};
use peercall::types::{ActiveCall, CallId, CallPhase, PresentationState, SessionId, SignalingState};
use peercall::{CallOptions, CallSession, CallSessionConfig};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn sample_call() -> ActiveCall {
    ActiveCall {
        id: CallId::new(7, 0x7070),
        encryption_key: vec![0x11; 256],
        key_visual_hash: vec![1, 2, 3, 4],
        transport: Vec::new(),
        max_layer: 92,
        version: "test".to_string(),
        custom_params: None,
        allows_p2p: true,
        supports_conference: true,
    }
}

pub async fn start(sim: &SimBackends, options: CallOptions) -> CallSession {
    CallSession::start(options, sim.backends(), CallSessionConfig::default())
        .await
        .expect("session should start")
}

pub async fn start_outgoing(sim: &SimBackends, id: &str) -> CallSession {
    start(sim, CallOptions::outgoing(SessionId::new(id))).await
}

/// Wait until the published phase satisfies `pred` and return that snapshot.
pub async fn wait_for_phase(
    session: &CallSession,
    pred: impl Fn(&CallPhase) -> bool,
) -> PresentationState {
    let mut state = session.state();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| pred(&s.call_phase)))
        .await
        .expect("phase not reached in time")
        .expect("session dropped its state channel");
    snapshot.clone()
}

/// Poll `cond` for up to one second of (possibly paused) time.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never became true");
}

pub async fn wait_for_engine(sim: &SimBackends) -> Arc<SimMediaEngine> {
    eventually(|| sim.media.last_engine().is_some()).await;
    sim.media.last_engine().expect("engine exists")
}

/// Ring, answer and bring the media engine to `Connected`.
pub async fn connect(sim: &SimBackends, session: &CallSession) -> Arc<SimMediaEngine> {
    let id = session.id();
    sim.signaling.push(id, SignalingState::Requesting { ringing: true });
    wait_for_phase(session, |p| matches!(p, CallPhase::Requesting { ringing: true })).await;
    sim.signaling.push(id, SignalingState::Active(sample_call()));
    let engine = wait_for_engine(sim).await;
    engine.set_connectivity(peercall::types::Connectivity::Connected);
    wait_for_phase(session, |p| matches!(p, CallPhase::Active { .. })).await;
    engine
}
