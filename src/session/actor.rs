//! The per-session event loop.
//!
//! Every input (signaling, media reports, timers, user commands) arrives on
//! one queue and is handled to completion before the next one, so the
//! reconciler is only ever touched from this task.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use callcore::lifecycle::{WatchdogKind, drop_reason_for, hang_up_reason};
use callcore::types::{
    ActiveCall, CallDirection, CallFailure, CallId, CaptureSource, ConferenceReference,
    ConferenceState, DeviceSelection, MessageRef, PresentationState, SessionId, SignalingState,
    TerminationOptions, TerminationReason,
};
use callcore::{Effect, EngineLifecycle, Reconciler, Reconciliation, ToneCommand};

use super::events::{SessionCommand, SessionEvent};
use super::watchdog::Watchdog;
use crate::conference::{ConferenceOrchestrator, UpgradeAction};
use crate::config::CallSessionConfig;
use crate::error::CallError;
use crate::ports::{CallBackends, ConferenceParams, MediaEngine, MediaEngineParams};
use crate::tone::ToneController;

/// Output channels the public handle reads from.
pub(crate) struct SessionOutputs {
    pub state: watch::Sender<PresentationState>,
    pub audio_level: Arc<watch::Sender<f32>>,
    pub conference: watch::Sender<Option<ConferenceState>>,
    pub removable: watch::Sender<bool>,
}

pub(crate) struct SessionActor {
    id: SessionId,
    direction: CallDirection,
    invitation: Option<MessageRef>,
    config: CallSessionConfig,
    backends: CallBackends,
    reconciler: Reconciler,
    events_rx: mpsc::Receiver<SessionEvent>,
    events: mpsc::WeakSender<SessionEvent>,
    state_tx: watch::Sender<PresentationState>,
    audio_level_tx: Arc<watch::Sender<f32>>,
    removable_tx: watch::Sender<bool>,
    tones: ToneController,
    watchdog: Watchdog,
    conference: ConferenceOrchestrator,

    engine: Option<Arc<dyn MediaEngine>>,
    engine_creation: Option<JoinHandle<()>>,
    engine_tasks: Vec<JoinHandle<()>>,
    signaling_task: Option<JoinHandle<()>>,
    device_task: Option<JoinHandle<()>>,

    devices: DeviceSelection,
    capture: Option<CaptureSource>,
    mute_on_engine_start: bool,
    requested_aspect: Option<f32>,

    pending_termination: Option<TerminationReason>,
    grace_timer: Option<JoinHandle<()>>,
    removal_timer: Option<JoinHandle<()>>,
    removal_scheduled: bool,
}

impl SessionActor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: SessionId,
        invitation: Option<MessageRef>,
        config: CallSessionConfig,
        backends: CallBackends,
        reconciler: Reconciler,
        events_rx: mpsc::Receiver<SessionEvent>,
        events: mpsc::WeakSender<SessionEvent>,
        outputs: SessionOutputs,
    ) -> Self {
        let SessionOutputs {
            state,
            audio_level,
            conference: conference_state,
            removable,
        } = outputs;
        let tones = ToneController::new(backends.tones.clone());
        let watchdog = Watchdog::new(config.ring_timeout(), config.connect_timeout(), events.clone());
        let conference = ConferenceOrchestrator::new(
            backends.conference.clone(),
            config.conference_ready_deadline(),
            config.conference_fail_open,
            conference_state,
            events.clone(),
        );
        let devices = backends.devices.current();
        let direction = reconciler.direction();
        let capture = if reconciler.video().is_video && reconciler.video().is_video_possible {
            Some(CaptureSource::Camera {
                device_id: devices.camera.clone().unwrap_or_default(),
            })
        } else {
            None
        };
        Self {
            id,
            direction,
            invitation,
            config,
            backends,
            reconciler,
            events_rx,
            events,
            state_tx: state,
            audio_level_tx: audio_level,
            removable_tx: removable,
            tones,
            watchdog,
            conference,
            engine: None,
            engine_creation: None,
            engine_tasks: Vec::new(),
            signaling_task: None,
            device_task: None,
            devices,
            capture,
            mute_on_engine_start: false,
            requested_aspect: None,
            pending_termination: None,
            grace_timer: None,
            removal_timer: None,
            removal_scheduled: false,
        }
    }

    pub(crate) async fn run(
        mut self,
        signaling: mpsc::Receiver<SignalingState>,
        mut released: oneshot::Receiver<()>,
    ) {
        info!(target: "Call/Session", "Session {} started ({:?})", self.id, self.direction);
        self.signaling_task = self.spawn_signaling_forwarder(signaling);
        self.device_task = self.spawn_device_forwarder();
        self.track_watchdog();

        let mut shutdown_ack = None;
        loop {
            // Release is checked ahead of the queue, which may be full.
            let event = tokio::select! {
                biased;
                _ = &mut released => {
                    debug!(target: "Call/Session", "Handle for {} released", self.id);
                    break;
                }
                event = self.events_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            debug!(target: "Call/Session", "Session {} handling {}", self.id, event.name());
            match event {
                SessionEvent::Command(SessionCommand::Shutdown(ack)) => {
                    shutdown_ack = Some(ack);
                    break;
                }
                SessionEvent::Command(command) => self.handle_command(command).await,
                SessionEvent::Signaling(state) => {
                    let outcome = self.reconciler.on_signaling(state, Utc::now());
                    self.apply(outcome).await;
                }
                SessionEvent::SignalingClosed => {
                    debug!(target: "Call/Session", "Signaling stream for {} closed", self.id);
                }
                SessionEvent::Media(state) => {
                    let outcome = self.reconciler.on_media(state, Utc::now());
                    self.apply(outcome).await;
                }
                SessionEvent::Reception(reception) => {
                    let outcome = self.reconciler.on_reception(reception, Utc::now());
                    self.apply(outcome).await;
                }
                SessionEvent::Devices(selection) => self.on_devices(selection).await,
                SessionEvent::EngineCreated(result) => self.on_engine_created(result).await,
                SessionEvent::WatchdogFired { kind, epoch } => {
                    if self.watchdog.take_expiry(kind, epoch)
                        && kind.guards(&self.reconciler.latest().call_phase)
                    {
                        self.on_watchdog_expired(kind).await;
                    }
                }
                SessionEvent::HangUpGraceElapsed => self.on_grace_elapsed().await,
                SessionEvent::RemovalDelayElapsed => {
                    info!(target: "Call/Session", "Session {} can be removed", self.id);
                    self.removable_tx.send_replace(true);
                }
                SessionEvent::ConferenceCreated(result) => {
                    let action = self.conference.on_created(result).await;
                    self.perform_upgrade_action(action).await;
                }
                SessionEvent::ConferenceReadiness { timed_out } => {
                    let action = self.conference.on_readiness(timed_out);
                    self.perform_upgrade_action(action).await;
                }
            }
        }

        self.teardown().await;
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
        info!(target: "Call/Session", "Session {} stopped", self.id);
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Accept(reply) => {
                let result = self.accept().await;
                let _ = reply.send(result);
            }
            SessionCommand::HangUp(reply) => {
                self.hang_up().await;
                let _ = reply.send(Ok(()));
            }
            SessionCommand::ToggleMute => {
                let muted = !self.reconciler.toggles().is_muted;
                self.set_muted(muted).await;
            }
            SessionCommand::SetMuted(muted) => self.set_muted(muted).await,
            SessionCommand::RequestVideo => {
                self.reconciler.request_video();
                let source = CaptureSource::Camera {
                    device_id: self.devices.camera.clone().unwrap_or_default(),
                };
                self.capture = Some(source.clone());
                if let Some(engine) = &self.engine
                    && let Err(e) = engine.request_video(source).await
                {
                    warn!(target: "Call/Session", "Failed to request video: {e}");
                }
                self.reapply().await;
            }
            SessionCommand::DisableVideo => {
                self.reconciler.disable_video();
                self.capture = None;
                self.engine_disable_video().await;
                self.reapply().await;
            }
            SessionCommand::EnableScreenCapture(source_id) => {
                self.enable_screen_capture(source_id).await;
            }
            SessionCommand::DisableScreenCapture => self.disable_screen_capture().await,
            SessionCommand::ToggleScreenCapture(source_id) => {
                if self.reconciler.toggles().is_screen_capture {
                    self.disable_screen_capture().await;
                } else {
                    self.enable_screen_capture(source_id).await;
                }
            }
            SessionCommand::SetRequestedVideoAspect(aspect) => {
                self.requested_aspect = Some(aspect);
                if let Some(engine) = &self.engine
                    && let Err(e) = engine.set_requested_video_aspect(aspect).await
                {
                    warn!(target: "Call/Session", "Failed to set video aspect: {e}");
                }
            }
            SessionCommand::UpgradeToConference { invitees, reply } => {
                let action = self.conference.request_upgrade(invitees, reply).await;
                self.perform_upgrade_action(action).await;
            }
            SessionCommand::Shutdown(_) => {}
        }
    }

    async fn accept(&mut self) -> Result<(), CallError> {
        if let Some(invitation) = self.invitation {
            // Joining an existing conference: the invitation stream is no
            // longer relevant once the user picked up.
            info!(target: "Call/Session", "Accepting conference invitation {:?}", invitation);
            if let Some(task) = self.signaling_task.take() {
                task.abort();
            }
            if let UpgradeAction::Create(reference) =
                self.conference.room_known(ConferenceReference::Message(invitation))
            {
                self.spawn_conference_creation(reference);
            }
            let mut outcome = self.reconciler.on_signaling(SignalingState::Accepting, Utc::now());
            outcome.tone = Some(ToneCommand::Stop);
            self.apply(outcome).await;
            return Ok(());
        }
        self.backends
            .signaling
            .accept(&self.id)
            .await
            .map_err(CallError::Signaling)
    }

    async fn hang_up(&mut self) {
        if self.reconciler.is_terminated() {
            return;
        }
        let reason = hang_up_reason(&self.reconciler.latest().call_phase, self.direction);
        info!(target: "Call/Session", "Hanging up {} with {:?}", self.id, reason);
        let never_had_engine = self.reconciler.engine() == EngineLifecycle::NotCreated;
        self.discard(reason).await;
        if self.direction.is_outgoing() && never_had_engine {
            self.removable_tx.send_replace(true);
        }
    }

    /// Ask signaling to end the call and guarantee a terminal phase within
    /// the grace period regardless of its answer.
    async fn discard(&mut self, reason: TerminationReason) {
        if self.pending_termination.is_some() {
            return;
        }
        if let Some(drop_reason) = drop_reason_for(&reason)
            && let Err(e) = self.backends.signaling.drop_call(&self.id, drop_reason).await
        {
            warn!(target: "Call/Session", "Failed to drop call {}: {e}", self.id);
        }
        self.pending_termination = Some(reason);
        self.grace_timer = self.spawn_after(self.config.hangup_grace(), SessionEvent::HangUpGraceElapsed);
    }

    async fn on_grace_elapsed(&mut self) {
        self.grace_timer = None;
        if self.reconciler.is_terminated() {
            return;
        }
        let Some(reason) = self.pending_termination.clone() else {
            return;
        };
        warn!(
            target: "Call/Session",
            "Signaling did not confirm termination of {} in time, terminating locally",
            self.id
        );
        self.terminate_locally(reason).await;
    }

    async fn terminate_locally(&mut self, reason: TerminationReason) {
        let outcome = self.reconciler.on_signaling(
            SignalingState::Terminated {
                id: None,
                reason: Some(reason),
                options: TerminationOptions::default(),
            },
            Utc::now(),
        );
        self.apply(outcome).await;
    }

    async fn on_watchdog_expired(&mut self, kind: WatchdogKind) {
        warn!(
            target: "Call/Watchdog",
            "Session {} stuck in {}, discarding",
            self.id,
            self.reconciler.latest().call_phase.name()
        );
        self.discard(kind.expiry_reason()).await;
    }

    async fn set_muted(&mut self, muted: bool) {
        self.reconciler.set_muted(muted);
        match &self.engine {
            Some(engine) => {
                if let Err(e) = engine.set_muted(muted).await {
                    warn!(target: "Call/Session", "Failed to set mute: {e}");
                }
            }
            None => self.mute_on_engine_start = muted,
        }
        self.reapply().await;
    }

    async fn enable_screen_capture(&mut self, source_id: String) {
        self.reconciler.enable_screen_capture();
        let source = CaptureSource::Screen { source_id };
        self.capture = Some(source.clone());
        if let Some(engine) = &self.engine
            && let Err(e) = engine.request_video(source).await
        {
            warn!(target: "Call/Session", "Failed to start screen capture: {e}");
        }
        self.reapply().await;
    }

    async fn disable_screen_capture(&mut self) {
        self.reconciler.disable_screen_capture();
        self.capture = None;
        self.engine_disable_video().await;
        self.reapply().await;
    }

    async fn engine_disable_video(&self) {
        if let Some(engine) = &self.engine
            && let Err(e) = engine.disable_video().await
        {
            warn!(target: "Call/Session", "Failed to disable video: {e}");
        }
    }

    async fn reapply(&mut self) {
        let outcome = self.reconciler.reapply(Utc::now());
        self.apply(outcome).await;
    }

    /// Publish a pass and carry out its effects.
    async fn apply(&mut self, outcome: Reconciliation) {
        if let Some(snapshot) = outcome.presentation {
            if snapshot.call_phase.is_terminal() {
                self.watchdog.cancel();
                if let Some(timer) = self.grace_timer.take() {
                    timer.abort();
                }
            }
            debug!(target: "Call/Session", "Session {} is {}", self.id, snapshot.call_phase.name());
            self.state_tx.send_replace(snapshot);
            if !self.reconciler.is_terminated() {
                self.track_watchdog();
            }
        }
        if let Some(tone) = outcome.tone {
            self.tones.apply(tone).await;
        }
        for effect in outcome.effects {
            match effect {
                Effect::CreateMediaEngine(call) => self.spawn_engine(call),
                Effect::StopMediaEngine {
                    call_id,
                    send_debug_logs,
                } => self.stop_engine(call_id, send_debug_logs).await,
                Effect::Drop(reason) => {
                    debug!(target: "Call/Session", "Media failure, dropping {} with {}", self.id, reason);
                    self.discard(TerminationReason::Error(CallFailure::Disconnected)).await;
                }
                Effect::JoinConference(reference) => {
                    if let UpgradeAction::Create(reference) = self.conference.room_known(reference) {
                        self.spawn_conference_creation(reference);
                    }
                    self.track_watchdog();
                }
                Effect::ScheduleRemoval => self.schedule_removal(),
            }
        }
    }

    async fn perform_upgrade_action(&mut self, action: UpgradeAction) {
        let action = match action {
            UpgradeAction::RequestRoom => {
                match self.backends.signaling.create_conference(&self.id).await {
                    Ok(()) => UpgradeAction::None,
                    Err(e) => self.conference.room_request_failed(&e),
                }
            }
            other => other,
        };
        match action {
            UpgradeAction::None | UpgradeAction::RequestRoom => {}
            UpgradeAction::Create(reference) => self.spawn_conference_creation(reference),
            UpgradeAction::RollBack => {
                info!(target: "Call/Conference", "Rolling back session {} after failed upgrade", self.id);
                self.terminate_locally(TerminationReason::switched_to_conference(""))
                    .await;
            }
            UpgradeAction::TransferControl => self.transfer_engine(),
        }
        if !self.reconciler.is_terminated() {
            self.track_watchdog();
        }
    }

    /// Ring and connect timers only guard a point-to-point call; once a
    /// conference takes over they stay off.
    fn track_watchdog(&mut self) {
        if self.conference.has_taken_over() {
            self.watchdog.cancel();
        } else {
            self.watchdog.track(&self.reconciler.latest().call_phase);
        }
    }

    fn spawn_conference_creation(&mut self, reference: ConferenceReference) {
        let params = ConferenceParams {
            session: self.id.clone(),
            reference,
            capture: self.capture.clone(),
            is_muted: self.reconciler.toggles().is_muted,
        };
        self.conference.spawn_creation(params);
    }

    fn transfer_engine(&mut self) {
        for task in self.engine_tasks.drain(..) {
            task.abort();
        }
        self.reconciler.transfer_engine();
        let Some(conference) = self.conference.conference().cloned() else {
            return;
        };
        if let Some(engine) = self.engine.take() {
            info!(target: "Call/Conference", "Handing media engine of {} to the conference", self.id);
            conference.adopt_media_engine(engine);
        }
    }

    fn spawn_engine(&mut self, call: ActiveCall) {
        let Some(events) = self.events.upgrade() else {
            return;
        };
        info!(target: "Call/Session", "Creating media engine for {}", call.id.log_name());
        let params = MediaEngineParams {
            session: self.id.clone(),
            call,
            direction: self.direction,
            capture: self.capture.clone(),
            devices: self.devices.clone(),
        };
        let factory = self.backends.media.clone();
        self.engine_creation = Some(tokio::spawn(async move {
            let result = factory.create(params).await;
            let _ = events.send(SessionEvent::EngineCreated(result)).await;
        }));
    }

    async fn on_engine_created(&mut self, result: Result<Arc<dyn MediaEngine>, anyhow::Error>) {
        self.engine_creation = None;
        let engine = match result {
            Ok(engine) => engine,
            Err(e) => {
                error!(target: "Call/Session", "Media engine for {} failed to start: {e}", self.id);
                self.reconciler.engine_failed_to_start();
                self.discard(TerminationReason::Error(CallFailure::Disconnected)).await;
                return;
            }
        };

        if self.reconciler.engine() != EngineLifecycle::Running {
            // The call ended while the engine was starting.
            debug!(target: "Call/Session", "Stopping late media engine for {}", self.id);
            if let Err(e) = engine.stop(None, false).await {
                warn!(target: "Call/Session", "Failed to stop media engine: {e}");
            }
            return;
        }

        if let Some(aspect) = self.requested_aspect
            && let Err(e) = engine.set_requested_video_aspect(aspect).await
        {
            warn!(target: "Call/Session", "Failed to set video aspect: {e}");
        }
        if std::mem::take(&mut self.mute_on_engine_start)
            && let Err(e) = engine.set_muted(true).await
        {
            warn!(target: "Call/Session", "Failed to apply queued mute: {e}");
        }

        self.engine_tasks = self.spawn_engine_forwarders(&engine);
        self.engine = Some(engine);
    }

    async fn stop_engine(&mut self, call_id: Option<CallId>, send_debug_logs: bool) {
        for task in self.engine_tasks.drain(..) {
            task.abort();
        }
        self.audio_level_tx.send_replace(0.0);
        if let Some(engine) = self.engine.take() {
            info!(target: "Call/Session", "Stopping media engine for {}", self.id);
            if let Err(e) = engine.stop(call_id, send_debug_logs).await {
                warn!(target: "Call/Session", "Failed to stop media engine: {e}");
            }
        }
    }

    async fn on_devices(&mut self, selection: DeviceSelection) {
        let previous = std::mem::replace(&mut self.devices, selection.clone());
        let Some(engine) = self.engine.clone() else {
            return;
        };
        let toggles = self.reconciler.toggles();
        let video_on = self.reconciler.video().is_video
            && !toggles.is_outgoing_video_paused
            && !toggles.is_screen_capture;

        if selection.camera != previous.camera
            && video_on
            && let Some(camera) = &selection.camera
        {
            self.capture = Some(CaptureSource::Camera {
                device_id: camera.clone(),
            });
            if let Err(e) = engine.switch_video_input(camera).await {
                warn!(target: "Call/Session", "Failed to switch camera: {e}");
            }
        }
        if selection.microphone != previous.microphone
            && let Some(microphone) = &selection.microphone
            && let Err(e) = engine.switch_audio_input(microphone).await
        {
            warn!(target: "Call/Session", "Failed to switch microphone: {e}");
        }
        if selection.output != previous.output
            && let Some(output) = &selection.output
            && let Err(e) = engine.switch_audio_output(output).await
        {
            warn!(target: "Call/Session", "Failed to switch output: {e}");
        }
    }

    fn schedule_removal(&mut self) {
        if self.removal_scheduled {
            return;
        }
        self.removal_scheduled = true;
        self.removal_timer =
            self.spawn_after(self.config.removal_delay(), SessionEvent::RemovalDelayElapsed);
    }

    fn spawn_after(
        &self,
        delay: std::time::Duration,
        event: SessionEvent,
    ) -> Option<JoinHandle<()>> {
        let events = self.events.upgrade()?;
        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event).await;
        }))
    }

    fn spawn_signaling_forwarder(
        &self,
        mut signaling: mpsc::Receiver<SignalingState>,
    ) -> Option<JoinHandle<()>> {
        let events = self.events.upgrade()?;
        Some(tokio::spawn(async move {
            while let Some(state) = signaling.recv().await {
                if events.send(SessionEvent::Signaling(state)).await.is_err() {
                    return;
                }
            }
            let _ = events.send(SessionEvent::SignalingClosed).await;
        }))
    }

    fn spawn_device_forwarder(&self) -> Option<JoinHandle<()>> {
        let events = self.events.upgrade()?;
        let mut devices = self.backends.devices.subscribe();
        Some(tokio::spawn(async move {
            while devices.changed().await.is_ok() {
                let selection = devices.borrow_and_update().clone();
                if events.send(SessionEvent::Devices(selection)).await.is_err() {
                    return;
                }
            }
        }))
    }

    fn spawn_engine_forwarders(&self, engine: &Arc<dyn MediaEngine>) -> Vec<JoinHandle<()>> {
        let Some(events) = self.events.upgrade() else {
            return Vec::new();
        };
        let mut tasks = Vec::with_capacity(3);

        let mut state = engine.state();
        let state_events = events.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                let current = state.borrow_and_update().clone();
                if state_events.send(SessionEvent::Media(current)).await.is_err() {
                    return;
                }
                if state.changed().await.is_err() {
                    return;
                }
            }
        }));

        let mut reception = engine.reception();
        tasks.push(tokio::spawn(async move {
            while reception.changed().await.is_ok() {
                let current = *reception.borrow_and_update();
                if events.send(SessionEvent::Reception(current)).await.is_err() {
                    return;
                }
            }
        }));

        let mut level = engine.audio_level();
        let audio_level = self.audio_level_tx.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                let current = *level.borrow_and_update();
                audio_level.send_replace(current);
                if level.changed().await.is_err() {
                    return;
                }
            }
        }));

        tasks
    }

    /// Stop timers and input streams; nothing can reach this session after.
    async fn teardown(&mut self) {
        self.watchdog.cancel();
        for task in [
            self.signaling_task.take(),
            self.device_task.take(),
            self.engine_creation.take(),
            self.grace_timer.take(),
            self.removal_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        self.conference.shutdown();
        self.tones.stop().await;
        if self.reconciler.engine() == EngineLifecycle::Running {
            self.stop_engine(None, false).await;
        }
        for task in self.engine_tasks.drain(..) {
            task.abort();
        }
        self.events_rx.close();
    }
}
