//! Identifiers shared by the signaling, media and conference layers.

use serde::Serialize;
use std::fmt;

/// Internal identifier of one call attempt on this device.
///
/// Generated locally; never sent to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random 16 hex character id.
    pub fn generate() -> Self {
        let bytes: [u8; 8] = rand::random();
        Self(hex::encode_upper(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-side call identifier reported once the call is negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CallId {
    pub id: i64,
    pub access_hash: i64,
}

impl CallId {
    pub fn new(id: i64, access_hash: i64) -> Self {
        Self { id, access_hash }
    }

    /// Name used for the media engine's log file.
    pub fn log_name(&self) -> String {
        format!("{}_{}", self.id, self.access_hash)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PeerId(pub i64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer:{}", self.0)
    }
}

/// Reference to the chat message that carries a conference invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MessageRef {
    pub peer: PeerId,
    pub id: i32,
}

/// How a conference room is located when joining it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ConferenceReference {
    /// Room announced by the signaling layer after the peer switched.
    Link { slug: String },
    /// Room announced through an invitation message.
    Message(MessageRef),
}

/// Whether this device placed the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

impl CallDirection {
    pub fn is_outgoing(self) -> bool {
        matches!(self, Self::Outgoing)
    }
}
