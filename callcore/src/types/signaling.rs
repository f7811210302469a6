//! Signaling-layer call state, as delivered by the signaling channel.

use serde::Serialize;
use std::fmt;

use super::call::CallId;

/// Authoritative negotiation state of one call.
///
/// Produced externally and delivered as a stream; the session never
/// requests a particular value, it only reacts to the latest one.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingState {
    Waiting,
    Ringing,
    Requesting { ringing: bool },
    Accepting,
    Active(ActiveCall),
    SwitchedToConference { slug: String },
    Dropping { reason: TerminationReason },
    Terminated {
        id: Option<CallId>,
        reason: Option<TerminationReason>,
        options: TerminationOptions,
    },
}

impl SignalingState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }

    pub fn terminated(reason: TerminationReason) -> Self {
        Self::Terminated {
            id: None,
            reason: Some(reason),
            options: TerminationOptions::default(),
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Ringing => "ringing",
            Self::Requesting { ringing: false } => "requesting",
            Self::Requesting { ringing: true } => "requesting(ringing)",
            Self::Accepting => "accepting",
            Self::Active(_) => "active",
            Self::SwitchedToConference { .. } => "switched_to_conference",
            Self::Dropping { .. } => "dropping",
            Self::Terminated { .. } => "terminated",
        }
    }
}

/// Negotiated parameters carried by [`SignalingState::Active`].
#[derive(Clone, PartialEq)]
pub struct ActiveCall {
    pub id: CallId,
    pub encryption_key: Vec<u8>,
    pub key_visual_hash: Vec<u8>,
    pub transport: Vec<TransportDescriptor>,
    pub max_layer: i32,
    pub version: String,
    pub custom_params: Option<String>,
    pub allows_p2p: bool,
    pub supports_conference: bool,
}

impl fmt::Debug for ActiveCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveCall")
            .field("id", &self.id)
            .field("encryption_key", &format_args!("[{} bytes]", self.encryption_key.len()))
            .field("key_visual_hash", &hex::encode(&self.key_visual_hash))
            .field("transport", &self.transport)
            .field("max_layer", &self.max_layer)
            .field("version", &self.version)
            .field("allows_p2p", &self.allows_p2p)
            .field("supports_conference", &self.supports_conference)
            .finish()
    }
}

/// One reflector or peer-to-peer endpoint offered by the signaling layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportDescriptor {
    pub id: i64,
    pub host: String,
    pub port: u16,
    pub peer_tag: Vec<u8>,
    pub is_tcp: bool,
}

/// Why a call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TerminationReason {
    Ended(EndedReason),
    Error(CallFailure),
}

impl TerminationReason {
    pub const HUNG_UP: Self = Self::Ended(EndedReason::HungUp);
    pub const BUSY: Self = Self::Ended(EndedReason::Busy);
    pub const MISSED: Self = Self::Ended(EndedReason::Missed);

    pub fn switched_to_conference(slug: impl Into<String>) -> Self {
        Self::Ended(EndedReason::SwitchedToConference { slug: slug.into() })
    }

    pub fn is_switched_to_conference(&self) -> bool {
        matches!(self, Self::Ended(EndedReason::SwitchedToConference { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EndedReason {
    HungUp,
    Busy,
    Missed,
    SwitchedToConference { slug: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CallFailure {
    Generic,
    PrivacyRestricted,
    NotSupportedByPeer { is_video: bool },
    ServerProvided(String),
    Disconnected,
}

/// Flags the signaling layer attaches to a terminated call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerminationOptions {
    pub report_rating: bool,
    pub send_debug_logs: bool,
}

/// Reason sent to the signaling layer when this side drops a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    HangUp,
    Busy,
    Disconnect,
    Missed,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::HangUp => "hang_up",
            Self::Busy => "busy",
            Self::Disconnect => "disconnect",
            Self::Missed => "missed",
        };
        f.write_str(s)
    }
}
