//! Conference upgrade stage machine.
//!
//! The runtime owns the actual conference object and the waiting futures;
//! this module only decides which transitions are legal and keeps the
//! ticket of pending invitees and waiters.

use thiserror::Error;

use crate::types::{ConferenceReference, ConferenceState, PeerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeStage {
    Idle,
    Requested { reference: Option<ConferenceReference> },
    Preparing,
    Ready,
    Failed,
}

impl UpgradeStage {
    /// Whether an upgrade is under way and new requests should join it.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Requested { .. } | Self::Preparing)
    }

    /// State published to the UI.
    pub fn conference_state(&self) -> Option<ConferenceState> {
        match self {
            Self::Idle | Self::Failed => None,
            Self::Requested { .. } | Self::Preparing => Some(ConferenceState::Preparing),
            Self::Ready => Some(ConferenceState::Ready),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeEvent {
    /// Local request, or a room reference learned from signaling.
    Requested { reference: Option<ConferenceReference> },
    /// The room reference for an existing request became known.
    ReferenceResolved(ConferenceReference),
    ConferenceCreated,
    BecameReady,
    CreationFailed,
}

#[derive(Debug, Clone, Error)]
#[error("invalid upgrade transition {attempted} in stage {current_stage}")]
pub struct InvalidUpgradeTransition {
    pub current_stage: String,
    pub attempted: String,
}

/// Pending upgrade bookkeeping. `W` is the runtime's waiter handle.
#[derive(Debug)]
pub struct UpgradeTicket<W> {
    pending_invitees: Vec<PeerId>,
    waiters: Vec<W>,
}

impl<W> Default for UpgradeTicket<W> {
    fn default() -> Self {
        Self {
            pending_invitees: Vec::new(),
            waiters: Vec::new(),
        }
    }
}

impl<W> UpgradeTicket<W> {
    pub fn add_invitees(&mut self, invitees: impl IntoIterator<Item = PeerId>) {
        for peer in invitees {
            if !self.pending_invitees.contains(&peer) {
                self.pending_invitees.push(peer);
            }
        }
    }

    pub fn add_waiter(&mut self, waiter: W) {
        self.waiters.push(waiter);
    }

    pub fn take_invitees(&mut self) -> Vec<PeerId> {
        std::mem::take(&mut self.pending_invitees)
    }

    pub fn pending_invitees(&self) -> &[PeerId] {
        &self.pending_invitees
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Remove waiters the caller no longer cares about.
    pub fn retain_waiters(&mut self, keep: impl FnMut(&W) -> bool) {
        self.waiters.retain(keep);
    }

    /// Consume the ticket, yielding every waiter exactly once.
    pub fn into_waiters(self) -> Vec<W> {
        self.waiters
    }
}

#[derive(Debug)]
pub struct ConferenceUpgrade<W> {
    stage: UpgradeStage,
    ticket: Option<UpgradeTicket<W>>,
}

impl<W> Default for ConferenceUpgrade<W> {
    fn default() -> Self {
        Self {
            stage: UpgradeStage::Idle,
            ticket: None,
        }
    }
}

impl<W> ConferenceUpgrade<W> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> &UpgradeStage {
        &self.stage
    }

    pub fn ticket_mut(&mut self) -> Option<&mut UpgradeTicket<W>> {
        self.ticket.as_mut()
    }

    /// Register a request. Returns `true` when this request started the
    /// upgrade and the caller must create the conference.
    pub fn request(
        &mut self,
        reference: Option<ConferenceReference>,
        invitees: Vec<PeerId>,
        waiter: Option<W>,
    ) -> Result<bool, InvalidUpgradeTransition> {
        let started = match &self.stage {
            UpgradeStage::Idle => {
                self.apply(UpgradeEvent::Requested { reference })?;
                true
            }
            UpgradeStage::Requested { .. } | UpgradeStage::Preparing => {
                if let Some(reference) = reference {
                    self.apply(UpgradeEvent::ReferenceResolved(reference))?;
                }
                false
            }
            UpgradeStage::Ready | UpgradeStage::Failed => {
                return Err(self.invalid(&UpgradeEvent::Requested { reference }));
            }
        };
        let ticket = self.ticket.get_or_insert_with(UpgradeTicket::default);
        ticket.add_invitees(invitees);
        if let Some(waiter) = waiter {
            ticket.add_waiter(waiter);
        }
        Ok(started)
    }

    /// Room reference recorded by the current request, if known.
    pub fn reference(&self) -> Option<&ConferenceReference> {
        match &self.stage {
            UpgradeStage::Requested { reference } => reference.as_ref(),
            _ => None,
        }
    }

    /// Move to `Ready`, handing back the ticket whose waiters must be resolved.
    pub fn complete(&mut self) -> Result<UpgradeTicket<W>, InvalidUpgradeTransition> {
        self.apply(UpgradeEvent::BecameReady)?;
        Ok(self.ticket.take().unwrap_or_default())
    }

    /// Move to `Failed`, handing back the ticket so waiters can be released.
    pub fn fail(&mut self) -> Result<UpgradeTicket<W>, InvalidUpgradeTransition> {
        self.apply(UpgradeEvent::CreationFailed)?;
        Ok(self.ticket.take().unwrap_or_default())
    }

    pub fn apply(&mut self, event: UpgradeEvent) -> Result<(), InvalidUpgradeTransition> {
        let next = match (&self.stage, &event) {
            (UpgradeStage::Idle, UpgradeEvent::Requested { reference }) => {
                UpgradeStage::Requested {
                    reference: reference.clone(),
                }
            }
            (UpgradeStage::Requested { .. }, UpgradeEvent::ReferenceResolved(reference)) => {
                UpgradeStage::Requested {
                    reference: Some(reference.clone()),
                }
            }
            // The conference already exists; a late reference changes nothing.
            (UpgradeStage::Preparing, UpgradeEvent::ReferenceResolved(_)) => UpgradeStage::Preparing,
            (UpgradeStage::Requested { .. }, UpgradeEvent::ConferenceCreated) => {
                UpgradeStage::Preparing
            }
            (UpgradeStage::Preparing, UpgradeEvent::BecameReady) => UpgradeStage::Ready,
            (
                UpgradeStage::Requested { .. } | UpgradeStage::Preparing,
                UpgradeEvent::CreationFailed,
            ) => UpgradeStage::Failed,
            _ => return Err(self.invalid(&event)),
        };
        self.stage = next;
        Ok(())
    }

    fn invalid(&self, event: &UpgradeEvent) -> InvalidUpgradeTransition {
        InvalidUpgradeTransition {
            current_stage: format!("{:?}", self.stage),
            attempted: format!("{:?}", event),
        }
    }
}
