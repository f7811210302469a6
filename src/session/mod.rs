//! Public handle of a single call session.

mod actor;
pub(crate) mod events;
mod watchdog;

use std::sync::Arc;

use log::{debug, info};
use tokio::sync::{mpsc, oneshot, watch};

use callcore::types::{
    CallDirection, ConferenceState, MessageRef, PeerId, PresentationState, SessionId,
};
use callcore::{Reconciler, SessionSetup, VideoCapabilities};

use crate::config::CallSessionConfig;
use crate::error::CallError;
use crate::ports::{CallBackends, ConferenceCall};

use actor::{SessionActor, SessionOutputs};
use events::{SessionCommand, SessionEvent};

/// Options for starting a call session.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub id: SessionId,
    pub direction: CallDirection,
    /// Whether the call starts with the camera on.
    pub video: bool,
    pub is_video_possible: bool,
    /// Camera permission granted.
    pub is_video_available: bool,
    pub participants: Vec<PeerId>,
    /// Set when this session is an invitation to an existing conference.
    pub invitation: Option<MessageRef>,
}

impl CallOptions {
    pub fn outgoing(id: SessionId) -> Self {
        Self {
            id,
            direction: CallDirection::Outgoing,
            video: false,
            is_video_possible: true,
            is_video_available: true,
            participants: Vec::new(),
            invitation: None,
        }
    }

    pub fn incoming(id: SessionId) -> Self {
        Self {
            direction: CallDirection::Incoming,
            ..Self::outgoing(id)
        }
    }

    pub fn conference_invitation(id: SessionId, invitation: MessageRef, participants: Vec<PeerId>) -> Self {
        Self {
            participants,
            invitation: Some(invitation),
            ..Self::incoming(id)
        }
    }

    pub fn with_video(mut self, video: bool) -> Self {
        self.video = video;
        self
    }

    fn setup(&self) -> SessionSetup {
        SessionSetup {
            direction: self.direction,
            video: VideoCapabilities::new(self.video, self.is_video_possible, self.is_video_available),
            participants: self.participants.clone(),
            conference_reference: self.invitation,
        }
    }
}

/// Handle to a running call session.
///
/// All operations are forwarded to the session's event loop and take effect
/// in arrival order. Dropping the handle shuts the session down.
#[derive(Debug)]
pub struct CallSession {
    id: SessionId,
    direction: CallDirection,
    commands: mpsc::Sender<SessionEvent>,
    released: Option<oneshot::Sender<()>>,
    state: watch::Receiver<PresentationState>,
    audio_level: watch::Receiver<f32>,
    conference_state: watch::Receiver<Option<ConferenceState>>,
    removable: watch::Receiver<bool>,
}

impl CallSession {
    /// Subscribe to the signaling layer and start the session's event loop.
    pub async fn start(
        options: CallOptions,
        backends: CallBackends,
        config: CallSessionConfig,
    ) -> Result<Self, CallError> {
        let signaling = match &options.invitation {
            Some(invitation) => backends.signaling.subscribe_invitation(invitation).await,
            None => backends.signaling.subscribe(&options.id).await,
        }
        .map_err(CallError::Signaling)?;

        let reconciler = Reconciler::new(options.setup());
        let (state_tx, state_rx) = watch::channel(reconciler.latest().clone());
        let (audio_tx, audio_rx) = watch::channel(0.0f32);
        let (conference_tx, conference_rx) = watch::channel(None);
        let (removable_tx, removable_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity.max(1));
        let (released_tx, released_rx) = oneshot::channel();

        let actor = SessionActor::new(
            options.id.clone(),
            options.invitation,
            config,
            backends,
            reconciler,
            events_rx,
            events_tx.downgrade(),
            SessionOutputs {
                state: state_tx,
                audio_level: Arc::new(audio_tx),
                conference: conference_tx,
                removable: removable_tx,
            },
        );
        tokio::spawn(actor.run(signaling, released_rx));
        info!(target: "Call/Session", "Started {:?} session {}", options.direction, options.id);

        Ok(Self {
            id: options.id,
            direction: options.direction,
            commands: events_tx,
            released: Some(released_tx),
            state: state_rx,
            audio_level: audio_rx,
            conference_state: conference_rx,
            removable: removable_rx,
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    async fn send(&self, command: SessionCommand) -> Result<(), CallError> {
        self.commands
            .send(SessionEvent::Command(command))
            .await
            .map_err(|_| CallError::SessionClosed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(events::Reply<T>) -> SessionCommand,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| CallError::SessionClosed)?
    }

    pub async fn accept(&self) -> Result<(), CallError> {
        self.request(SessionCommand::Accept).await
    }

    /// End the call. The reason is derived from the current phase, and a
    /// terminal phase is published within the hang-up grace period even if
    /// signaling never confirms.
    pub async fn hang_up(&self) -> Result<(), CallError> {
        self.request(SessionCommand::HangUp).await
    }

    pub async fn toggle_mute(&self) -> Result<(), CallError> {
        self.send(SessionCommand::ToggleMute).await
    }

    pub async fn set_muted(&self, muted: bool) -> Result<(), CallError> {
        self.send(SessionCommand::SetMuted(muted)).await
    }

    pub async fn request_video(&self) -> Result<(), CallError> {
        self.send(SessionCommand::RequestVideo).await
    }

    pub async fn disable_video(&self) -> Result<(), CallError> {
        self.send(SessionCommand::DisableVideo).await
    }

    pub async fn enable_screen_capture(&self, source_id: impl Into<String>) -> Result<(), CallError> {
        self.send(SessionCommand::EnableScreenCapture(source_id.into()))
            .await
    }

    pub async fn disable_screen_capture(&self) -> Result<(), CallError> {
        self.send(SessionCommand::DisableScreenCapture).await
    }

    /// Start sharing `source_id`, or stop sharing if already capturing.
    pub async fn toggle_screen_capture(&self, source_id: impl Into<String>) -> Result<(), CallError> {
        self.send(SessionCommand::ToggleScreenCapture(source_id.into()))
            .await
    }

    pub async fn set_requested_video_aspect(&self, aspect: f32) -> Result<(), CallError> {
        self.send(SessionCommand::SetRequestedVideoAspect(aspect))
            .await
    }

    /// Promote the call to a conference and wait until it is ready.
    ///
    /// Concurrent calls share one conference. Dropping the returned future
    /// only withdraws this caller.
    pub async fn upgrade_to_conference(
        &self,
        invitees: Vec<PeerId>,
    ) -> Result<Arc<dyn ConferenceCall>, CallError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::UpgradeToConference { invitees, reply })
            .await?;
        match rx.await {
            Ok(Ok(conference)) => Ok(conference),
            Ok(Err(message)) => Err(CallError::Conference(message)),
            Err(_) => Err(CallError::UpgradeCancelled),
        }
    }

    /// Latest presentation snapshot.
    pub fn snapshot(&self) -> PresentationState {
        self.state.borrow().clone()
    }

    pub fn state(&self) -> watch::Receiver<PresentationState> {
        self.state.clone()
    }

    pub fn audio_level(&self) -> watch::Receiver<f32> {
        self.audio_level.clone()
    }

    pub fn conference_state(&self) -> watch::Receiver<Option<ConferenceState>> {
        self.conference_state.clone()
    }

    pub fn is_removable(&self) -> bool {
        *self.removable.borrow()
    }

    /// Resolves once the session may be discarded.
    pub async fn can_be_removed(&self) {
        let mut removable = self.removable.clone();
        if removable.wait_for(|r| *r).await.is_err() {
            debug!(target: "Call/Session", "Session {} loop ended before removal", self.id);
        }
    }

    /// Stop the event loop, its timers and every input stream.
    pub async fn close(&self) {
        let (ack, done) = oneshot::channel();
        if self
            .send(SessionCommand::Shutdown(ack))
            .await
            .is_ok()
        {
            let _ = done.await;
        }
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        if let Some(released) = self.released.take() {
            let _ = released.send(());
        }
    }
}
