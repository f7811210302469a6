//! In-memory collaborators that record every command they receive.
//!
//! Used by the integration tests and the `call_sim` binary. Nothing here
//! touches the network or audio hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;
use tokio::sync::{mpsc, watch};

use callcore::types::{
    CallFailure, CallId, CaptureSource, Connectivity, DeviceSelection, DropReason,
    MediaEngineState, MessageRef, PeerId, SessionId, SignalingState, TerminationOptions,
    TerminationReason,
};

use crate::ports::{
    CallBackends, ConferenceCall, ConferenceFactory, ConferenceNetworkState, ConferenceParams,
    DeviceRegistry, MediaEngine, MediaEngineFactory, MediaEngineParams, SignalingChannel,
    TonePlayer,
};

const SIGNALING_BUFFER: usize = 32;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingCommand {
    Accept(SessionId),
    Drop(SessionId, DropReason),
    CreateConference(SessionId),
}

/// Scripted signaling server.
///
/// By default it confirms every drop with a matching `Terminated` update and
/// answers conference requests with `SwitchedToConference`.
pub struct SimSignaling {
    lines: DashMap<String, mpsc::Sender<SignalingState>>,
    commands: Mutex<Vec<SignalingCommand>>,
    confirm_drops: AtomicBool,
    conference_slug: Mutex<Option<String>>,
}

impl Default for SimSignaling {
    fn default() -> Self {
        Self {
            lines: DashMap::new(),
            commands: Mutex::new(Vec::new()),
            confirm_drops: AtomicBool::new(true),
            conference_slug: Mutex::new(Some("sim-room".to_string())),
        }
    }
}

impl SimSignaling {
    fn invitation_key(invitation: &MessageRef) -> String {
        format!("invitation:{}:{}", invitation.peer.0, invitation.id)
    }

    fn open_line(&self, key: String) -> mpsc::Receiver<SignalingState> {
        let (tx, rx) = mpsc::channel(SIGNALING_BUFFER);
        self.lines.insert(key, tx);
        rx
    }

    fn send_on(&self, key: &str, state: SignalingState) -> bool {
        match self.lines.get(key) {
            Some(line) => line.try_send(state).is_ok(),
            None => false,
        }
    }

    /// Deliver a signaling update to a subscribed session.
    pub fn push(&self, session: &SessionId, state: SignalingState) -> bool {
        self.send_on(session.as_str(), state)
    }

    pub fn push_invitation(&self, invitation: &MessageRef, state: SignalingState) -> bool {
        self.send_on(&Self::invitation_key(invitation), state)
    }

    /// Close the signaling stream of a session.
    pub fn hang_up_line(&self, session: &SessionId) {
        self.lines.remove(session.as_str());
    }

    pub fn set_confirm_drops(&self, confirm: bool) {
        self.confirm_drops.store(confirm, Ordering::SeqCst);
    }

    /// `None` leaves conference requests unanswered.
    pub fn set_conference_slug(&self, slug: Option<&str>) {
        *lock(&self.conference_slug) = slug.map(str::to_string);
    }

    pub fn commands(&self) -> Vec<SignalingCommand> {
        lock(&self.commands).clone()
    }

    pub fn drops(&self) -> Vec<DropReason> {
        lock(&self.commands)
            .iter()
            .filter_map(|c| match c {
                SignalingCommand::Drop(_, reason) => Some(*reason),
                _ => None,
            })
            .collect()
    }

    fn record(&self, command: SignalingCommand) {
        debug!(target: "Sim/Signaling", "{:?}", command);
        lock(&self.commands).push(command);
    }

    fn confirmation_for(reason: DropReason) -> TerminationReason {
        match reason {
            DropReason::HangUp => TerminationReason::HUNG_UP,
            DropReason::Busy => TerminationReason::BUSY,
            DropReason::Missed => TerminationReason::MISSED,
            DropReason::Disconnect => TerminationReason::Error(CallFailure::Disconnected),
        }
    }
}

#[async_trait]
impl SignalingChannel for SimSignaling {
    async fn subscribe(
        &self,
        session: &SessionId,
    ) -> Result<mpsc::Receiver<SignalingState>, anyhow::Error> {
        Ok(self.open_line(session.as_str().to_string()))
    }

    async fn subscribe_invitation(
        &self,
        invitation: &MessageRef,
    ) -> Result<mpsc::Receiver<SignalingState>, anyhow::Error> {
        Ok(self.open_line(Self::invitation_key(invitation)))
    }

    async fn accept(&self, session: &SessionId) -> Result<(), anyhow::Error> {
        self.record(SignalingCommand::Accept(session.clone()));
        Ok(())
    }

    async fn drop_call(&self, session: &SessionId, reason: DropReason) -> Result<(), anyhow::Error> {
        self.record(SignalingCommand::Drop(session.clone(), reason));
        if self.confirm_drops.load(Ordering::SeqCst) {
            self.push(
                session,
                SignalingState::Terminated {
                    id: None,
                    reason: Some(Self::confirmation_for(reason)),
                    options: TerminationOptions::default(),
                },
            );
        }
        Ok(())
    }

    async fn create_conference(&self, session: &SessionId) -> Result<(), anyhow::Error> {
        self.record(SignalingCommand::CreateConference(session.clone()));
        let slug = lock(&self.conference_slug).clone();
        if let Some(slug) = slug {
            self.push(session, SignalingState::SwitchedToConference { slug });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaCommand {
    SetMuted(bool),
    RequestVideo(CaptureSource),
    DisableVideo,
    SwitchVideoInput(String),
    SwitchAudioInput(String),
    SwitchAudioOutput(String),
    SetRequestedVideoAspect(f32),
    Stop {
        call_id: Option<CallId>,
        send_debug_logs: bool,
    },
}

/// A media engine whose reports are driven by the test.
pub struct SimMediaEngine {
    params: MediaEngineParams,
    state: watch::Sender<MediaEngineState>,
    reception: watch::Sender<Option<i32>>,
    audio_level: watch::Sender<f32>,
    commands: Mutex<Vec<MediaCommand>>,
}

impl SimMediaEngine {
    fn new(params: MediaEngineParams) -> Self {
        Self {
            params,
            state: watch::Sender::new(MediaEngineState::initializing()),
            reception: watch::Sender::new(None),
            audio_level: watch::Sender::new(0.0),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn params(&self) -> &MediaEngineParams {
        &self.params
    }

    pub fn set_state(&self, state: MediaEngineState) {
        self.state.send_replace(state);
    }

    pub fn set_connectivity(&self, connectivity: Connectivity) {
        self.state.send_modify(|state| state.connectivity = connectivity);
    }

    pub fn set_reception(&self, reception: Option<i32>) {
        self.reception.send_replace(reception);
    }

    pub fn set_audio_level(&self, level: f32) {
        self.audio_level.send_replace(level);
    }

    pub fn commands(&self) -> Vec<MediaCommand> {
        lock(&self.commands).clone()
    }

    pub fn stop_count(&self) -> usize {
        lock(&self.commands)
            .iter()
            .filter(|c| matches!(c, MediaCommand::Stop { .. }))
            .count()
    }

    fn record(&self, command: MediaCommand) -> Result<(), anyhow::Error> {
        debug!(target: "Sim/Media", "{:?}", command);
        lock(&self.commands).push(command);
        Ok(())
    }
}

#[async_trait]
impl MediaEngine for SimMediaEngine {
    fn state(&self) -> watch::Receiver<MediaEngineState> {
        self.state.subscribe()
    }

    fn reception(&self) -> watch::Receiver<Option<i32>> {
        self.reception.subscribe()
    }

    fn audio_level(&self) -> watch::Receiver<f32> {
        self.audio_level.subscribe()
    }

    async fn set_muted(&self, muted: bool) -> Result<(), anyhow::Error> {
        self.record(MediaCommand::SetMuted(muted))
    }

    async fn request_video(&self, source: CaptureSource) -> Result<(), anyhow::Error> {
        self.record(MediaCommand::RequestVideo(source))
    }

    async fn disable_video(&self) -> Result<(), anyhow::Error> {
        self.record(MediaCommand::DisableVideo)
    }

    async fn switch_video_input(&self, device_id: &str) -> Result<(), anyhow::Error> {
        self.record(MediaCommand::SwitchVideoInput(device_id.to_string()))
    }

    async fn switch_audio_input(&self, device_id: &str) -> Result<(), anyhow::Error> {
        self.record(MediaCommand::SwitchAudioInput(device_id.to_string()))
    }

    async fn switch_audio_output(&self, device_id: &str) -> Result<(), anyhow::Error> {
        self.record(MediaCommand::SwitchAudioOutput(device_id.to_string()))
    }

    async fn set_requested_video_aspect(&self, aspect: f32) -> Result<(), anyhow::Error> {
        self.record(MediaCommand::SetRequestedVideoAspect(aspect))
    }

    async fn stop(&self, call_id: Option<CallId>, send_debug_logs: bool) -> Result<(), anyhow::Error> {
        self.record(MediaCommand::Stop {
            call_id,
            send_debug_logs,
        })
    }
}

#[derive(Default)]
pub struct SimMediaFactory {
    engines: Mutex<Vec<Arc<SimMediaEngine>>>,
    fail_next: AtomicBool,
}

impl SimMediaFactory {
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        lock(&self.engines).len()
    }

    pub fn last_engine(&self) -> Option<Arc<SimMediaEngine>> {
        lock(&self.engines).last().cloned()
    }
}

#[async_trait]
impl MediaEngineFactory for SimMediaFactory {
    async fn create(
        &self,
        params: MediaEngineParams,
    ) -> Result<Arc<dyn MediaEngine>, anyhow::Error> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            anyhow::bail!("simulated media engine failure");
        }
        let engine = Arc::new(SimMediaEngine::new(params));
        lock(&self.engines).push(engine.clone());
        Ok(engine)
    }
}

pub struct SimConference {
    params: ConferenceParams,
    state: watch::Sender<Option<ConferenceNetworkState>>,
    members: watch::Sender<Option<Vec<PeerId>>>,
    invited: Mutex<Vec<PeerId>>,
    adopted: Mutex<Option<Arc<dyn MediaEngine>>>,
}

impl SimConference {
    fn new(params: ConferenceParams) -> Self {
        Self {
            params,
            state: watch::Sender::new(None),
            members: watch::Sender::new(None),
            invited: Mutex::new(Vec::new()),
            adopted: Mutex::new(None),
        }
    }

    pub fn params(&self) -> &ConferenceParams {
        &self.params
    }

    /// Report a connected network state and a member list.
    pub fn publish_ready(&self, members: Vec<PeerId>) {
        self.state.send_replace(Some(ConferenceNetworkState::Connected));
        self.members.send_replace(Some(members));
    }

    pub fn invited(&self) -> Vec<PeerId> {
        lock(&self.invited).clone()
    }

    pub fn has_adopted_engine(&self) -> bool {
        lock(&self.adopted).is_some()
    }
}

#[async_trait]
impl ConferenceCall for SimConference {
    fn state(&self) -> watch::Receiver<Option<ConferenceNetworkState>> {
        self.state.subscribe()
    }

    fn members(&self) -> watch::Receiver<Option<Vec<PeerId>>> {
        self.members.subscribe()
    }

    async fn invite(&self, peer: PeerId) -> Result<(), anyhow::Error> {
        lock(&self.invited).push(peer);
        Ok(())
    }

    fn adopt_media_engine(&self, engine: Arc<dyn MediaEngine>) {
        *lock(&self.adopted) = Some(engine);
    }
}

/// Conference factory. New conferences report ready immediately unless
/// `set_auto_ready(false)` was called.
pub struct SimConferenceFactory {
    conferences: Mutex<Vec<Arc<SimConference>>>,
    fail: AtomicBool,
    auto_ready: AtomicBool,
    attempts: AtomicUsize,
}

impl Default for SimConferenceFactory {
    fn default() -> Self {
        Self {
            conferences: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            auto_ready: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
        }
    }
}

impl SimConferenceFactory {
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_auto_ready(&self, auto_ready: bool) {
        self.auto_ready.store(auto_ready, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        lock(&self.conferences).len()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn last_conference(&self) -> Option<Arc<SimConference>> {
        lock(&self.conferences).last().cloned()
    }
}

#[async_trait]
impl ConferenceFactory for SimConferenceFactory {
    async fn create(
        &self,
        params: ConferenceParams,
    ) -> Result<Arc<dyn ConferenceCall>, anyhow::Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("simulated key material failure");
        }
        let conference = Arc::new(SimConference::new(params));
        if self.auto_ready.load(Ordering::SeqCst) {
            conference.publish_ready(Vec::new());
        }
        lock(&self.conferences).push(conference.clone());
        Ok(conference)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToneEvent {
    Play(String, Option<u32>),
    Stop,
}

#[derive(Default)]
pub struct SimTonePlayer {
    events: Mutex<Vec<ToneEvent>>,
}

impl SimTonePlayer {
    pub fn events(&self) -> Vec<ToneEvent> {
        lock(&self.events).clone()
    }

    /// Resources played so far, in order.
    pub fn played(&self) -> Vec<String> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                ToneEvent::Play(resource, _) => Some(resource.clone()),
                ToneEvent::Stop => None,
            })
            .collect()
    }
}

#[async_trait]
impl TonePlayer for SimTonePlayer {
    async fn play(&self, resource: &str, loops: Option<u32>) -> Result<(), anyhow::Error> {
        lock(&self.events).push(ToneEvent::Play(resource.to_string(), loops));
        Ok(())
    }

    async fn stop(&self) -> Result<(), anyhow::Error> {
        lock(&self.events).push(ToneEvent::Stop);
        Ok(())
    }
}

pub struct SimDevices {
    selection: watch::Sender<DeviceSelection>,
}

impl Default for SimDevices {
    fn default() -> Self {
        Self {
            selection: watch::Sender::new(DeviceSelection {
                camera: Some("sim-camera".to_string()),
                microphone: Some("sim-mic".to_string()),
                output: Some("sim-speaker".to_string()),
            }),
        }
    }
}

impl SimDevices {
    pub fn select(&self, selection: DeviceSelection) {
        self.selection.send_replace(selection);
    }
}

impl DeviceRegistry for SimDevices {
    fn current(&self) -> DeviceSelection {
        self.selection.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<DeviceSelection> {
        self.selection.subscribe()
    }
}

/// One of each simulated collaborator.
#[derive(Clone, Default)]
pub struct SimBackends {
    pub signaling: Arc<SimSignaling>,
    pub media: Arc<SimMediaFactory>,
    pub conference: Arc<SimConferenceFactory>,
    pub tones: Arc<SimTonePlayer>,
    pub devices: Arc<SimDevices>,
}

impl SimBackends {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backends(&self) -> CallBackends {
        CallBackends {
            signaling: self.signaling.clone(),
            media: self.media.clone(),
            conference: self.conference.clone(),
            tones: self.tones.clone(),
            devices: self.devices.clone(),
        }
    }
}
