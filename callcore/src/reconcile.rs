//! Session reconciliation: merges signaling state, media-engine state and
//! local toggles into one [`PresentationState`].
//!
//! [`Reconciler`] is an accumulator folded over the session's event stream.
//! Each pass returns a [`Reconciliation`] describing the snapshot to publish
//! (if any), the tone to play and the side effects the runtime must carry
//! out. The reconciler itself performs no I/O.

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::media_map::{MappedMedia, MediaStateMapper, VideoCapabilities};
use crate::tone::{Tone, select_tone};
use crate::types::{
    ActiveCall, CallDirection, CallId, CallPhase, ConferenceReference, Connectivity, DropReason,
    MediaEngineState, MessageRef, PeerId, PresentationState, RemoteAudioState, RemoteBatteryLevel,
    RemoteVideoState, SignalingState,
};

/// Reconciler-owned local switches, applied on top of every snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalToggles {
    pub is_muted: bool,
    pub is_outgoing_video_paused: bool,
    pub is_screen_capture: bool,
}

/// Media engine ownership as tracked by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineLifecycle {
    NotCreated,
    Running,
    Stopped,
    /// Handed over to a conference call; never commanded again.
    Transferred,
}

/// Work the runtime must perform after a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    CreateMediaEngine(ActiveCall),
    StopMediaEngine {
        call_id: Option<CallId>,
        send_debug_logs: bool,
    },
    Drop(DropReason),
    JoinConference(ConferenceReference),
    ScheduleRemoval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToneCommand {
    Play(Tone),
    Stop,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub presentation: Option<PresentationState>,
    /// `None` leaves whatever is playing untouched.
    pub tone: Option<ToneCommand>,
    pub effects: Vec<Effect>,
}

/// Fixed facts about a session, known when it is created.
#[derive(Debug, Clone)]
pub struct SessionSetup {
    pub direction: CallDirection,
    pub video: VideoCapabilities,
    pub participants: Vec<PeerId>,
    pub conference_reference: Option<MessageRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// A new signaling, media or reception input arrived.
    Input,
    /// Local toggles changed; inputs are the last known ones.
    Toggle,
}

pub struct Reconciler {
    direction: CallDirection,
    video: VideoCapabilities,
    toggles: LocalToggles,
    participants: Vec<PeerId>,
    conference_reference: Option<MessageRef>,
    supports_conference_calls: bool,
    mapper: MediaStateMapper,
    engine: EngineLifecycle,
    active_since: Option<DateTime<Utc>>,
    previous: Option<SignalingState>,
    last_media: Option<MediaEngineState>,
    last_reception: Option<i32>,
    latest: PresentationState,
    failure_reported: bool,
    conference_requested: bool,
    terminated: bool,
}

impl Reconciler {
    pub fn new(setup: SessionSetup) -> Self {
        let initial_phase = if setup.direction.is_outgoing() {
            CallPhase::Waiting
        } else {
            CallPhase::Ringing
        };
        let video_state = if setup.video.is_video && setup.video.is_video_possible {
            setup.video.initial_video_state()
        } else {
            crate::types::VideoState::NotAvailable
        };
        let latest = PresentationState {
            call_phase: initial_phase,
            video_state,
            remote_video_state: RemoteVideoState::Inactive,
            is_muted: false,
            is_outgoing_video_paused: false,
            remote_aspect_ratio: 0.0,
            remote_audio_state: RemoteAudioState::Active,
            remote_battery_level: RemoteBatteryLevel::Normal,
            is_screen_capture: false,
            participants: setup.participants.clone(),
            conference_reference: setup.conference_reference,
            supports_conference_calls: true,
        };

        Self {
            direction: setup.direction,
            video: setup.video,
            toggles: LocalToggles::default(),
            participants: setup.participants,
            conference_reference: setup.conference_reference,
            supports_conference_calls: true,
            mapper: MediaStateMapper::new(),
            engine: EngineLifecycle::NotCreated,
            active_since: None,
            previous: None,
            last_media: None,
            last_reception: None,
            latest,
            failure_reported: false,
            conference_requested: false,
            terminated: false,
        }
    }

    /// Last published snapshot (the initial one before any input).
    pub fn latest(&self) -> &PresentationState {
        &self.latest
    }

    pub fn signaling(&self) -> Option<&SignalingState> {
        self.previous.as_ref()
    }

    pub fn media(&self) -> Option<&MediaEngineState> {
        self.last_media.as_ref()
    }

    pub fn toggles(&self) -> LocalToggles {
        self.toggles
    }

    pub fn video(&self) -> VideoCapabilities {
        self.video
    }

    pub fn engine(&self) -> EngineLifecycle {
        self.engine
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Full contract: reconcile an explicit `(signaling, media, reception)`
    /// triple. Identical inputs give identical snapshots.
    pub fn reconcile(
        &mut self,
        signaling: SignalingState,
        media: Option<MediaEngineState>,
        reception: Option<i32>,
        now: DateTime<Utc>,
    ) -> Reconciliation {
        self.last_media = media;
        self.last_reception = reception;
        self.pass(signaling, Pass::Input, now)
    }

    pub fn on_signaling(&mut self, signaling: SignalingState, now: DateTime<Utc>) -> Reconciliation {
        self.pass(signaling, Pass::Input, now)
    }

    pub fn on_media(&mut self, media: MediaEngineState, now: DateTime<Utc>) -> Reconciliation {
        if matches!(self.engine, EngineLifecycle::Stopped | EngineLifecycle::Transferred) {
            debug!(target: "Call/Reconcile", "Ignoring media report from a released engine");
            return Reconciliation::default();
        }
        self.last_media = Some(media);
        self.rerun(Pass::Input, now)
    }

    pub fn on_reception(&mut self, reception: Option<i32>, now: DateTime<Utc>) -> Reconciliation {
        self.last_reception = reception;
        self.rerun(Pass::Input, now)
    }

    /// Re-run with the last known inputs after a local toggle changed.
    pub fn reapply(&mut self, now: DateTime<Utc>) -> Reconciliation {
        self.rerun(Pass::Toggle, now)
    }

    fn rerun(&mut self, pass: Pass, now: DateTime<Utc>) -> Reconciliation {
        match self.previous.clone() {
            Some(signaling) => self.pass(signaling, pass, now),
            // Nothing from signaling yet: only the toggles change.
            None if pass == Pass::Toggle => Reconciliation {
                presentation: Some(self.retoggle_latest()),
                ..Default::default()
            },
            None => Reconciliation::default(),
        }
    }

    /// The last published snapshot with the current toggles applied.
    fn retoggle_latest(&mut self) -> PresentationState {
        let mut snapshot = self.latest.clone();
        self.apply_toggles(&mut snapshot);
        self.latest = snapshot.clone();
        snapshot
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.toggles.is_muted = muted;
    }

    /// Turn on camera video. Leaves screen capture.
    pub fn request_video(&mut self) {
        self.video.is_video = true;
        self.video.force_disabled = false;
        self.toggles.is_screen_capture = false;
        self.toggles.is_outgoing_video_paused = false;
    }

    pub fn disable_video(&mut self) {
        self.video.force_disabled = true;
        self.toggles.is_screen_capture = false;
        self.toggles.is_outgoing_video_paused = true;
    }

    pub fn enable_screen_capture(&mut self) {
        self.video.force_disabled = false;
        self.toggles.is_screen_capture = true;
        self.toggles.is_outgoing_video_paused = true;
    }

    pub fn disable_screen_capture(&mut self) {
        self.video.force_disabled = true;
        self.toggles.is_screen_capture = false;
        self.toggles.is_outgoing_video_paused = true;
    }

    /// The engine requested by [`Effect::CreateMediaEngine`] could not start.
    pub fn engine_failed_to_start(&mut self) {
        self.engine = EngineLifecycle::Stopped;
        self.last_media = None;
    }

    /// Ownership of the engine moved to a conference call.
    pub fn transfer_engine(&mut self) {
        if self.engine == EngineLifecycle::Running {
            self.engine = EngineLifecycle::Transferred;
        }
        self.last_media = None;
    }

    fn pass(&mut self, signaling: SignalingState, pass: Pass, now: DateTime<Utc>) -> Reconciliation {
        if self.terminated {
            let mut outcome = Reconciliation::default();
            if self.engine == EngineLifecycle::Running {
                self.engine = EngineLifecycle::Stopped;
                outcome.effects.push(Effect::StopMediaEngine {
                    call_id: None,
                    send_debug_logs: false,
                });
            }
            self.previous = Some(signaling);
            return outcome;
        }

        let mut effects = Vec::new();

        // Signaling wins over a failed engine reading it cannot explain.
        let mut media = self.last_media.clone();
        if let Some(reading) = &media
            && reading.connectivity == Connectivity::Failed
            && !signaling.is_active()
        {
            warn!(
                target: "Call/Reconcile",
                "Engine failed while signaling is {}, discarding reading",
                signaling.name()
            );
            media = None;
            self.last_media = None;
            if self.engine == EngineLifecycle::Running {
                self.engine = EngineLifecycle::Stopped;
                effects.push(Effect::StopMediaEngine {
                    call_id: None,
                    send_debug_logs: false,
                });
            }
        }

        let mapped = self.mapper.map(media.as_ref(), &self.video);
        let phase = self.phase_for(&signaling, media.as_ref(), now, &mut effects);

        if self.engine == EngineLifecycle::Running {
            match &signaling {
                SignalingState::Terminated { id, options, .. } => {
                    self.engine = EngineLifecycle::Stopped;
                    effects.push(Effect::StopMediaEngine {
                        call_id: *id,
                        send_debug_logs: options.send_debug_logs,
                    });
                }
                SignalingState::Dropping { .. } => {
                    self.engine = EngineLifecycle::Stopped;
                    effects.push(Effect::StopMediaEngine {
                        call_id: None,
                        send_debug_logs: false,
                    });
                }
                _ => {}
            }
            if self.engine == EngineLifecycle::Stopped {
                self.last_media = None;
            }
        }

        let previous = self.previous.replace(signaling);

        let Some(phase) = phase else {
            // A conference switch has no phase of its own, but toggles made
            // while it prepares still show on the last snapshot.
            let presentation = (pass == Pass::Toggle
                && matches!(self.previous, Some(SignalingState::SwitchedToConference { .. })))
            .then(|| self.retoggle_latest());
            return Reconciliation {
                presentation,
                tone: None,
                effects,
            };
        };

        if phase.is_terminal() {
            self.terminated = true;
            effects.push(Effect::ScheduleRemoval);
        }

        let tone = match pass {
            Pass::Toggle => None,
            Pass::Input => {
                let connectivity = media.as_ref().map(|m| m.connectivity);
                let is_outgoing = self.direction.is_outgoing();
                Some(
                    match select_tone(previous.as_ref(), &phase, connectivity, is_outgoing) {
                        Some(tone) => ToneCommand::Play(tone),
                        None => ToneCommand::Stop,
                    },
                )
            }
        };

        let snapshot = self.snapshot(phase, &mapped);
        self.latest = snapshot.clone();
        Reconciliation {
            presentation: Some(snapshot),
            tone,
            effects,
        }
    }

    /// Phase for the current inputs; `None` suppresses the snapshot.
    fn phase_for(
        &mut self,
        signaling: &SignalingState,
        media: Option<&MediaEngineState>,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) -> Option<CallPhase> {
        let phase = match signaling {
            SignalingState::Waiting => CallPhase::Waiting,
            SignalingState::Ringing => CallPhase::Ringing,
            SignalingState::Requesting { ringing } => CallPhase::Requesting { ringing: *ringing },
            SignalingState::Accepting => CallPhase::Connecting {
                key_visual_hash: None,
            },
            SignalingState::Dropping { reason } => CallPhase::Terminating {
                reason: Some(reason.clone()),
            },
            SignalingState::Terminated {
                id,
                reason,
                options,
            } => CallPhase::Terminated {
                id: *id,
                reason: reason.clone(),
                should_prompt_rating: options.report_rating,
            },
            SignalingState::SwitchedToConference { slug } => {
                if !self.conference_requested {
                    self.conference_requested = true;
                    effects.push(Effect::JoinConference(ConferenceReference::Link {
                        slug: slug.clone(),
                    }));
                }
                return None;
            }
            SignalingState::Active(call) => {
                self.supports_conference_calls = call.supports_conference;
                if self.engine == EngineLifecycle::NotCreated {
                    debug!(target: "Call/Reconcile", "Signaling active, creating media engine for {:?}", call.id);
                    self.engine = EngineLifecycle::Running;
                    effects.push(Effect::CreateMediaEngine(call.clone()));
                    return Some(CallPhase::Connecting {
                        key_visual_hash: Some(call.key_visual_hash.clone()),
                    });
                }
                let hash = call.key_visual_hash.clone();
                let reception = self.last_reception;
                match media.map(|m| m.connectivity) {
                    None | Some(Connectivity::Initializing) => CallPhase::Connecting {
                        key_visual_hash: Some(hash),
                    },
                    Some(Connectivity::Connected) => CallPhase::Active {
                        since: *self.active_since.get_or_insert(now),
                        reception,
                        key_visual_hash: hash,
                    },
                    Some(Connectivity::Reconnecting) => CallPhase::Reconnecting {
                        since: *self.active_since.get_or_insert(now),
                        reception,
                        key_visual_hash: hash,
                    },
                    Some(Connectivity::Failed) => {
                        if !self.failure_reported {
                            self.failure_reported = true;
                            warn!(target: "Call/Reconcile", "Media engine failed, dropping call {:?}", call.id);
                            effects.push(Effect::Drop(DropReason::Disconnect));
                        }
                        return None;
                    }
                }
            }
        };
        Some(phase)
    }

    fn snapshot(&self, phase: CallPhase, media: &MappedMedia) -> PresentationState {
        let mut snapshot = PresentationState {
            call_phase: phase,
            video_state: media.video_state,
            remote_video_state: media.remote_video_state,
            is_muted: false,
            is_outgoing_video_paused: false,
            remote_aspect_ratio: media.remote_aspect_ratio,
            remote_audio_state: media.remote_audio_state,
            remote_battery_level: media.remote_battery_level,
            is_screen_capture: false,
            participants: self.participants.clone(),
            conference_reference: self.conference_reference,
            supports_conference_calls: self.supports_conference_calls,
        };
        self.apply_toggles(&mut snapshot);
        snapshot
    }

    fn apply_toggles(&self, snapshot: &mut PresentationState) {
        snapshot.is_muted = self.toggles.is_muted;
        snapshot.is_outgoing_video_paused = self.toggles.is_outgoing_video_paused;
        snapshot.is_screen_capture = self.toggles.is_screen_capture;
    }
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.presentation.is_none() && self.tone.is_none() && self.effects.is_empty()
    }

    pub fn drop_requested(&self) -> Option<DropReason> {
        self.effects.iter().find_map(|e| match e {
            Effect::Drop(reason) => Some(*reason),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallFailure, TerminationOptions, TerminationReason, VideoState};
    use chrono::Duration;

    fn setup(direction: CallDirection) -> SessionSetup {
        SessionSetup {
            direction,
            video: VideoCapabilities::new(false, true, true),
            participants: vec![],
            conference_reference: None,
        }
    }

    fn active_call() -> ActiveCall {
        ActiveCall {
            id: CallId::new(1, 99),
            encryption_key: vec![7; 256],
            key_visual_hash: vec![0xAB, 0xCD],
            transport: vec![],
            max_layer: 92,
            version: "11.0.0".into(),
            custom_params: None,
            allows_p2p: true,
            supports_conference: true,
        }
    }

    fn media(connectivity: Connectivity) -> MediaEngineState {
        MediaEngineState::initializing().with_connectivity(connectivity)
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    /// Flow: Requesting(false) → Requesting(true) → Active → Initializing → Connected
    #[test]
    fn test_outgoing_scenario_phases_and_tones() {
        let mut r = Reconciler::new(setup(CallDirection::Outgoing));
        assert_eq!(r.latest().call_phase, CallPhase::Waiting);

        let out = r.on_signaling(SignalingState::Requesting { ringing: false }, t(0));
        assert_eq!(
            out.presentation.unwrap().call_phase,
            CallPhase::Requesting { ringing: false }
        );
        assert_eq!(out.tone, Some(ToneCommand::Play(Tone::Ringback)));

        let out = r.on_signaling(SignalingState::Requesting { ringing: true }, t(1));
        assert_eq!(
            out.presentation.unwrap().call_phase,
            CallPhase::Requesting { ringing: true }
        );
        assert_eq!(out.tone, Some(ToneCommand::Play(Tone::Ringback)));

        let out = r.on_signaling(SignalingState::Active(active_call()), t(2));
        assert_eq!(
            out.presentation.unwrap().call_phase,
            CallPhase::Connecting {
                key_visual_hash: Some(vec![0xAB, 0xCD])
            }
        );
        assert_eq!(out.tone, Some(ToneCommand::Play(Tone::Ringback)));
        assert_eq!(out.effects, vec![Effect::CreateMediaEngine(active_call())]);

        let out = r.on_media(media(Connectivity::Initializing), t(3));
        assert!(matches!(
            out.presentation.unwrap().call_phase,
            CallPhase::Connecting { .. }
        ));
        assert_eq!(out.tone, Some(ToneCommand::Play(Tone::Connecting)));

        let out = r.on_media(media(Connectivity::Connected), t(4));
        assert_eq!(
            out.presentation.unwrap().call_phase,
            CallPhase::Active {
                since: t(4),
                reception: None,
                key_visual_hash: vec![0xAB, 0xCD]
            }
        );
        assert_eq!(out.tone, Some(ToneCommand::Stop));
    }

    #[test]
    fn test_same_inputs_give_identical_snapshots() {
        let mut r = Reconciler::new(setup(CallDirection::Outgoing));
        r.on_signaling(SignalingState::Active(active_call()), t(0));

        let first = r.reconcile(
            SignalingState::Active(active_call()),
            Some(media(Connectivity::Connected)),
            Some(4),
            t(1),
        );
        let second = r.reconcile(
            SignalingState::Active(active_call()),
            Some(media(Connectivity::Connected)),
            Some(4),
            t(50),
        );
        assert_eq!(first.presentation, second.presentation);
        assert!(second.effects.is_empty());
    }

    #[test]
    fn test_active_timestamp_survives_reconnecting() {
        let mut r = Reconciler::new(setup(CallDirection::Incoming));
        r.on_signaling(SignalingState::Active(active_call()), t(0));
        r.on_media(media(Connectivity::Connected), t(10));

        let out = r.on_media(media(Connectivity::Reconnecting), t(20));
        assert_eq!(out.presentation.unwrap().call_phase.active_since(), Some(t(10)));
        assert_eq!(out.tone, Some(ToneCommand::Play(Tone::Connecting)));

        let out = r.on_media(media(Connectivity::Connected), t(30));
        assert_eq!(out.presentation.unwrap().call_phase.active_since(), Some(t(10)));
    }

    #[test]
    fn test_engine_created_once_and_stopped_once() {
        let mut r = Reconciler::new(setup(CallDirection::Outgoing));
        let creations = |out: &Reconciliation| {
            out.effects
                .iter()
                .filter(|e| matches!(e, Effect::CreateMediaEngine(_)))
                .count()
        };

        let out = r.on_signaling(SignalingState::Requesting { ringing: true }, t(0));
        assert_eq!(creations(&out), 0);
        let out = r.on_signaling(SignalingState::Active(active_call()), t(1));
        assert_eq!(creations(&out), 1);
        let out = r.on_signaling(SignalingState::Active(active_call()), t(2));
        assert_eq!(creations(&out), 0);

        let out = r.on_signaling(
            SignalingState::Terminated {
                id: Some(CallId::new(1, 99)),
                reason: Some(TerminationReason::HUNG_UP),
                options: TerminationOptions {
                    report_rating: true,
                    send_debug_logs: true,
                },
            },
            t(3),
        );
        assert!(out.effects.contains(&Effect::StopMediaEngine {
            call_id: Some(CallId::new(1, 99)),
            send_debug_logs: true,
        }));
        assert!(out.effects.contains(&Effect::ScheduleRemoval));
        assert_eq!(
            out.presentation.unwrap().call_phase,
            CallPhase::Terminated {
                id: Some(CallId::new(1, 99)),
                reason: Some(TerminationReason::HUNG_UP),
                should_prompt_rating: true,
            }
        );
        assert_eq!(r.engine(), EngineLifecycle::Stopped);

        // Terminal: later inputs publish nothing.
        let out = r.on_signaling(SignalingState::Active(active_call()), t(4));
        assert!(out.is_empty());
    }

    #[test]
    fn test_failed_engine_requests_disconnect_without_snapshot() {
        let mut r = Reconciler::new(setup(CallDirection::Outgoing));
        r.on_signaling(SignalingState::Active(active_call()), t(0));
        let out = r.on_media(media(Connectivity::Failed), t(1));
        assert!(out.presentation.is_none());
        assert_eq!(out.drop_requested(), Some(DropReason::Disconnect));

        // Reported once only.
        let out = r.on_reception(Some(2), t(2));
        assert!(out.drop_requested().is_none());
    }

    #[test]
    fn test_failed_reading_discarded_when_signaling_disagrees() {
        let mut r = Reconciler::new(setup(CallDirection::Outgoing));
        let out = r.reconcile(
            SignalingState::Requesting { ringing: false },
            Some(media(Connectivity::Failed)),
            None,
            t(0),
        );
        assert_eq!(
            out.presentation.as_ref().unwrap().call_phase,
            CallPhase::Requesting { ringing: false }
        );
        assert!(out.drop_requested().is_none());
    }

    #[test]
    fn test_dropping_maps_to_terminating() {
        let mut r = Reconciler::new(setup(CallDirection::Incoming));
        let reason = TerminationReason::Error(CallFailure::Generic);
        let out = r.on_signaling(
            SignalingState::Dropping {
                reason: reason.clone(),
            },
            t(0),
        );
        assert_eq!(
            out.presentation.unwrap().call_phase,
            CallPhase::Terminating {
                reason: Some(reason)
            }
        );
    }

    #[test]
    fn test_toggles_visible_before_engine_exists() {
        let mut r = Reconciler::new(setup(CallDirection::Outgoing));
        r.set_muted(true);
        let out = r.reapply(t(0));
        let snapshot = out.presentation.unwrap();
        assert!(snapshot.is_muted);
        assert_eq!(snapshot.call_phase, CallPhase::Waiting);
        assert_eq!(out.tone, None);

        r.on_signaling(SignalingState::Requesting { ringing: true }, t(1));
        r.enable_screen_capture();
        let snapshot = r.reapply(t(2)).presentation.unwrap();
        assert!(snapshot.is_muted);
        assert!(snapshot.is_screen_capture);
        assert!(snapshot.is_outgoing_video_paused);
    }

    #[test]
    fn test_reception_merges_without_phase_change() {
        let mut r = Reconciler::new(setup(CallDirection::Outgoing));
        r.on_signaling(SignalingState::Active(active_call()), t(0));
        r.on_media(media(Connectivity::Connected), t(1));
        let out = r.on_reception(Some(3), t(2));
        match out.presentation.unwrap().call_phase {
            CallPhase::Active { reception, since, .. } => {
                assert_eq!(reception, Some(3));
                assert_eq!(since, t(1));
            }
            other => panic!("unexpected phase {other:?}"),
        }
    }

    #[test]
    fn test_switched_to_conference_requests_join_once() {
        let mut r = Reconciler::new(setup(CallDirection::Outgoing));
        let state = SignalingState::SwitchedToConference {
            slug: "abc".into(),
        };
        let out = r.on_signaling(state.clone(), t(0));
        assert!(out.presentation.is_none());
        assert_eq!(
            out.effects,
            vec![Effect::JoinConference(ConferenceReference::Link {
                slug: "abc".into()
            })]
        );
        assert!(r.on_signaling(state, t(1)).effects.is_empty());
    }

    #[test]
    fn test_toggles_show_while_conference_prepares() {
        let mut r = Reconciler::new(setup(CallDirection::Outgoing));
        r.on_signaling(SignalingState::Active(active_call()), t(0));
        r.on_media(media(Connectivity::Connected), t(1));
        r.on_signaling(
            SignalingState::SwitchedToConference {
                slug: "abc".into(),
            },
            t(2),
        );

        r.set_muted(true);
        let out = r.reapply(t(3));
        let snapshot = out.presentation.expect("toggle must publish");
        assert!(snapshot.is_muted);
        assert!(matches!(snapshot.call_phase, CallPhase::Active { .. }));
        assert_eq!(out.tone, None);

        // Engine reports still publish nothing on their own.
        assert!(r.on_media(media(Connectivity::Connected), t(4)).presentation.is_none());
    }

    #[test]
    fn test_disable_video_masks_engine_video() {
        let mut r = Reconciler::new(SessionSetup {
            direction: CallDirection::Outgoing,
            video: VideoCapabilities::new(true, true, true),
            participants: vec![],
            conference_reference: None,
        });
        r.on_signaling(SignalingState::Active(active_call()), t(0));
        let mut reading = media(Connectivity::Connected);
        reading.video_state = crate::types::EngineVideoState::Active;
        let out = r.on_media(reading, t(1));
        assert_eq!(
            out.presentation.unwrap().video_state,
            VideoState::Active { available: true }
        );

        r.disable_video();
        let snapshot = r.reapply(t(2)).presentation.unwrap();
        assert_eq!(snapshot.video_state, VideoState::Inactive { available: true });
        assert!(snapshot.is_outgoing_video_paused);
    }
}
