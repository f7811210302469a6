use std::sync::Arc;

use tokio::sync::oneshot;

use callcore::lifecycle::WatchdogKind;
use callcore::types::{DeviceSelection, MediaEngineState, PeerId, SignalingState};

use crate::error::CallError;
use crate::ports::{ConferenceCall, MediaEngine};

pub(crate) type Reply<T> = oneshot::Sender<Result<T, CallError>>;
pub(crate) type UpgradeReply = oneshot::Sender<Result<Arc<dyn ConferenceCall>, String>>;

/// Requests issued through the public session handle.
pub(crate) enum SessionCommand {
    Accept(Reply<()>),
    HangUp(Reply<()>),
    ToggleMute,
    SetMuted(bool),
    RequestVideo,
    DisableVideo,
    EnableScreenCapture(String),
    DisableScreenCapture,
    ToggleScreenCapture(String),
    SetRequestedVideoAspect(f32),
    UpgradeToConference {
        invitees: Vec<PeerId>,
        reply: UpgradeReply,
    },
    Shutdown(oneshot::Sender<()>),
}

/// Everything the session actor reacts to, in arrival order.
pub(crate) enum SessionEvent {
    Command(SessionCommand),
    Signaling(SignalingState),
    SignalingClosed,
    Media(MediaEngineState),
    Reception(Option<i32>),
    Devices(DeviceSelection),
    EngineCreated(Result<Arc<dyn MediaEngine>, anyhow::Error>),
    WatchdogFired { kind: WatchdogKind, epoch: u64 },
    HangUpGraceElapsed,
    RemovalDelayElapsed,
    ConferenceCreated(Result<Arc<dyn ConferenceCall>, anyhow::Error>),
    ConferenceReadiness { timed_out: bool },
}

impl SessionEvent {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            SessionEvent::Command(_) => "command",
            SessionEvent::Signaling(_) => "signaling",
            SessionEvent::SignalingClosed => "signaling_closed",
            SessionEvent::Media(_) => "media",
            SessionEvent::Reception(_) => "reception",
            SessionEvent::Devices(_) => "devices",
            SessionEvent::EngineCreated(_) => "engine_created",
            SessionEvent::WatchdogFired { .. } => "watchdog",
            SessionEvent::HangUpGraceElapsed => "hangup_grace",
            SessionEvent::RemovalDelayElapsed => "removal_delay",
            SessionEvent::ConferenceCreated(_) => "conference_created",
            SessionEvent::ConferenceReadiness { .. } => "conference_readiness",
        }
    }
}
