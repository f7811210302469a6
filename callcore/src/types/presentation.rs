//! The merged snapshot exposed to UI callers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::call::{CallId, MessageRef, PeerId};
use super::media::{RemoteAudioState, RemoteBatteryLevel, RemoteVideoState};
use super::signaling::TerminationReason;

/// Externally visible phase of a call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CallPhase {
    /// Outgoing call created, nothing heard from signaling yet.
    Waiting,
    Ringing,
    Requesting { ringing: bool },
    Connecting { key_visual_hash: Option<Vec<u8>> },
    Active {
        since: DateTime<Utc>,
        reception: Option<i32>,
        key_visual_hash: Vec<u8>,
    },
    Reconnecting {
        since: DateTime<Utc>,
        reception: Option<i32>,
        key_visual_hash: Vec<u8>,
    },
    Terminating { reason: Option<TerminationReason> },
    Terminated {
        id: Option<CallId>,
        reason: Option<TerminationReason>,
        should_prompt_rating: bool,
    },
}

impl CallPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Active { .. } | Self::Reconnecting { .. })
    }

    /// Timestamp of the first `Connected` report, if reached.
    pub fn active_since(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Active { since, .. } | Self::Reconnecting { since, .. } => Some(*since),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Ringing => "ringing",
            Self::Requesting { .. } => "requesting",
            Self::Connecting { .. } => "connecting",
            Self::Active { .. } => "active",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Terminating { .. } => "terminating",
            Self::Terminated { .. } => "terminated",
        }
    }
}

/// Local video state. The flag tells whether the camera may be used at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VideoState {
    NotAvailable,
    Inactive { available: bool },
    Active { available: bool },
    Paused { available: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresentationState {
    pub call_phase: CallPhase,
    pub video_state: VideoState,
    pub remote_video_state: RemoteVideoState,
    pub is_muted: bool,
    pub is_outgoing_video_paused: bool,
    pub remote_aspect_ratio: f32,
    pub remote_audio_state: RemoteAudioState,
    pub remote_battery_level: RemoteBatteryLevel,
    pub is_screen_capture: bool,
    pub participants: Vec<PeerId>,
    pub conference_reference: Option<MessageRef>,
    pub supports_conference_calls: bool,
}

/// Progress of a conference upgrade as shown to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConferenceState {
    Preparing,
    Ready,
}
