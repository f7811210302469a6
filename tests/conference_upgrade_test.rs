mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;

use peercall::sim::{MediaCommand, SignalingCommand, SimBackends, ToneEvent};
use peercall::types::{
    CallPhase, ConferenceReference, ConferenceState, MessageRef, PeerId, SessionId,
    SignalingState, TerminationOptions, TerminationReason,
};
use peercall::{CallError, CallOptions};
use tokio::time::Instant;

fn create_requests(sim: &SimBackends) -> usize {
    sim.signaling
        .commands()
        .iter()
        .filter(|c| matches!(c, SignalingCommand::CreateConference(_)))
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_upgrades_share_one_conference() {
    init_logging();
    let sim = SimBackends::new();
    let session = start_outgoing(&sim, "CONF1").await;
    let engine = connect(&sim, &session).await;

    let (first, second) = tokio::join!(
        session.upgrade_to_conference(vec![PeerId(2)]),
        session.upgrade_to_conference(vec![PeerId(3)]),
    );
    let first = first.expect("first upgrade");
    let second = second.expect("second upgrade");
    assert!(Arc::ptr_eq(&first, &second));

    assert_eq!(sim.conference.created(), 1);
    assert_eq!(create_requests(&sim), 1);
    assert_eq!(
        *session.conference_state().borrow(),
        Some(ConferenceState::Ready)
    );

    let conference = sim.conference.last_conference().unwrap();
    assert_eq!(
        conference.params().reference,
        ConferenceReference::Link {
            slug: "sim-room".to_string()
        }
    );
    let mut invited = conference.invited();
    invited.sort_by_key(|p| p.0);
    assert_eq!(invited, vec![PeerId(2), PeerId(3)]);

    // The engine now belongs to the conference.
    assert!(conference.has_adopted_engine());
    let before = engine.commands().len();
    session.set_muted(true).await.unwrap();
    let mut state = session.state();
    state.wait_for(|s| s.is_muted).await.unwrap();
    assert_eq!(engine.commands().len(), before);

    // A later request is answered with the same conference.
    let third = session
        .upgrade_to_conference(vec![PeerId(4)])
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&first, &third));
    assert_eq!(sim.conference.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_switch_terminates_without_stopping_transferred_engine() {
    init_logging();
    let sim = SimBackends::new();
    let session = start_outgoing(&sim, "CONF2").await;
    let engine = connect(&sim, &session).await;

    session
        .upgrade_to_conference(vec![PeerId(9)])
        .await
        .unwrap();
    sim.signaling.push(
        session.id(),
        SignalingState::Terminated {
            id: None,
            reason: Some(TerminationReason::switched_to_conference("sim-room")),
            options: TerminationOptions::default(),
        },
    );
    let ended = wait_for_phase(&session, CallPhase::is_terminal).await;
    assert!(matches!(
        ended.call_phase,
        CallPhase::Terminated { reason: Some(ref r), .. } if r.is_switched_to_conference()
    ));

    session.can_be_removed().await;
    assert_eq!(engine.stop_count(), 0);
    assert!(
        !engine
            .commands()
            .iter()
            .any(|c| matches!(c, MediaCommand::Stop { .. }))
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_creation_rolls_back_the_call() {
    init_logging();
    let sim = SimBackends::new();
    sim.conference.set_fail(true);
    let session = start_outgoing(&sim, "CONF3").await;
    let engine = connect(&sim, &session).await;

    let err = session
        .upgrade_to_conference(vec![PeerId(2)])
        .await
        .err()
        .expect("upgrade should fail");
    assert!(matches!(err, CallError::Conference(_)));
    assert_eq!(sim.conference.attempts(), 1);

    let ended = wait_for_phase(&session, CallPhase::is_terminal).await;
    match ended.call_phase {
        CallPhase::Terminated { reason, .. } => {
            assert_eq!(reason, Some(TerminationReason::switched_to_conference("")));
        }
        other => panic!("unexpected phase {other:?}"),
    }
    assert_eq!(*session.conference_state().borrow(), None);
    eventually(|| engine.stop_count() == 1).await;
}

#[tokio::test(start_paused = true)]
async fn test_readiness_deadline_fails_open() {
    init_logging();
    let sim = SimBackends::new();
    sim.conference.set_auto_ready(false);
    let session = start_outgoing(&sim, "CONF4").await;
    connect(&sim, &session).await;

    let started = Instant::now();
    let conference = session
        .upgrade_to_conference(vec![PeerId(2)])
        .await
        .expect("upgrade proceeds after the deadline");
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(conference.members().borrow().is_none());
    assert_eq!(
        *session.conference_state().borrow(),
        Some(ConferenceState::Ready)
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_upgrade_leaves_others_waiting() {
    init_logging();
    let sim = SimBackends::new();
    sim.conference.set_auto_ready(false);
    let session = Arc::new(start_outgoing(&sim, "CONF5").await);
    connect(&sim, &session).await;

    let cancelled = {
        let session = session.clone();
        tokio::spawn(async move { session.upgrade_to_conference(vec![PeerId(2)]).await })
    };
    eventually(|| sim.conference.created() == 1).await;
    cancelled.abort();

    let conference = sim.conference.last_conference().unwrap();
    conference.publish_ready(vec![PeerId(1), PeerId(2)]);

    let handle = session
        .upgrade_to_conference(vec![PeerId(3)])
        .await
        .unwrap();
    assert_eq!(handle.members().borrow().as_ref().map(Vec::len), Some(2));
    assert_eq!(sim.conference.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_accepting_invitation_joins_conference() {
    init_logging();
    let sim = SimBackends::new();
    let invitation = MessageRef {
        peer: PeerId(5),
        id: 77,
    };
    let session = start(
        &sim,
        CallOptions::conference_invitation(SessionId::new("INV1"), invitation, vec![PeerId(5)]),
    )
    .await;
    assert_eq!(session.snapshot().call_phase, CallPhase::Ringing);
    assert_eq!(session.snapshot().conference_reference, Some(invitation));

    sim.signaling
        .push_invitation(&invitation, SignalingState::Ringing);
    session.accept().await.unwrap();

    let mut conference_state = session.conference_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        conference_state.wait_for(|s| *s == Some(ConferenceState::Ready)),
    )
    .await
    .expect("conference never became ready")
    .unwrap();

    let conference = sim.conference.last_conference().unwrap();
    assert_eq!(
        conference.params().reference,
        ConferenceReference::Message(invitation)
    );
    assert!(
        !sim.signaling
            .commands()
            .iter()
            .any(|c| matches!(c, SignalingCommand::Accept(_) | SignalingCommand::CreateConference(_)))
    );
}

#[tokio::test(start_paused = true)]
async fn test_accepted_invitation_outlives_ring_timeout() {
    init_logging();
    let sim = SimBackends::new();
    let invitation = MessageRef {
        peer: PeerId(6),
        id: 12,
    };
    let session = start(
        &sim,
        CallOptions::conference_invitation(SessionId::new("INV2"), invitation, vec![PeerId(6)]),
    )
    .await;
    sim.signaling
        .push_invitation(&invitation, SignalingState::Ringing);
    eventually(|| sim.tones.played() == vec!["opening.m4a".to_string()]).await;

    session.accept().await.unwrap();
    let snapshot = wait_for_phase(&session, |p| matches!(p, CallPhase::Connecting { .. })).await;
    assert_eq!(
        snapshot.call_phase,
        CallPhase::Connecting {
            key_visual_hash: None
        }
    );
    let mut conference_state = session.conference_state();
    conference_state
        .wait_for(|s| *s == Some(ConferenceState::Ready))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(40)).await;
    assert!(!session.snapshot().call_phase.is_terminal());
    assert!(sim.signaling.drops().is_empty());
    assert_eq!(sim.tones.played(), vec!["opening.m4a".to_string()]);
    assert_eq!(sim.tones.events().last(), Some(&ToneEvent::Stop));
}

#[tokio::test(start_paused = true)]
async fn test_mute_shows_while_conference_prepares() {
    init_logging();
    let sim = SimBackends::new();
    sim.conference.set_auto_ready(false);
    let session = start_outgoing(&sim, "CONF6").await;
    connect(&sim, &session).await;

    sim.signaling.push(
        session.id(),
        SignalingState::SwitchedToConference {
            slug: "room".to_string(),
        },
    );
    eventually(|| sim.conference.created() == 1).await;

    session.toggle_mute().await.unwrap();
    let mut state = session.state();
    tokio::time::timeout(Duration::from_secs(1), state.wait_for(|s| s.is_muted))
        .await
        .expect("mute never reached the presentation")
        .unwrap();
    assert!(matches!(session.snapshot().call_phase, CallPhase::Active { .. }));
}
