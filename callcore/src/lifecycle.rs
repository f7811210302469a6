//! Lifecycle rules shared by the facade and the watchdog.

use crate::types::{CallDirection, CallFailure, CallPhase, DropReason, EndedReason, TerminationReason};

/// Termination reason for a local hang-up in the given phase.
///
/// Before pickup an incoming call is declined as busy and an unanswered
/// outgoing call counts as missed.
pub fn hang_up_reason(phase: &CallPhase, direction: CallDirection) -> TerminationReason {
    match (phase, direction) {
        (CallPhase::Ringing, CallDirection::Incoming) => TerminationReason::BUSY,
        (CallPhase::Waiting | CallPhase::Requesting { .. }, CallDirection::Outgoing) => {
            TerminationReason::MISSED
        }
        _ => TerminationReason::HUNG_UP,
    }
}

/// What to tell the signaling layer when discarding a call for `reason`.
///
/// `None` when the signaling layer already owns the teardown.
pub fn drop_reason_for(reason: &TerminationReason) -> Option<DropReason> {
    match reason {
        TerminationReason::Ended(EndedReason::Busy | EndedReason::Missed) => Some(DropReason::Busy),
        TerminationReason::Ended(EndedReason::HungUp) => Some(DropReason::HangUp),
        TerminationReason::Ended(EndedReason::SwitchedToConference { .. }) => None,
        TerminationReason::Error(_) => Some(DropReason::Disconnect),
    }
}

/// Timers that discard calls which stop making progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchdogKind {
    /// Waiting for the peer (outgoing) or the user (incoming) to pick up.
    Ring,
    /// Waiting for media to connect after negotiation.
    Connect,
}

impl WatchdogKind {
    pub const ALL: [WatchdogKind; 2] = [WatchdogKind::Ring, WatchdogKind::Connect];

    /// Whether this timer still guards a call sitting in `phase`.
    pub fn guards(self, phase: &CallPhase) -> bool {
        match self {
            WatchdogKind::Ring => matches!(
                phase,
                CallPhase::Waiting | CallPhase::Ringing | CallPhase::Requesting { .. }
            ),
            WatchdogKind::Connect => matches!(phase, CallPhase::Connecting { .. }),
        }
    }

    /// The watchdog that should be armed while in `phase`, if any.
    pub fn for_phase(phase: &CallPhase) -> Option<WatchdogKind> {
        Self::ALL.into_iter().find(|kind| kind.guards(phase))
    }

    /// Reason used to discard the call on expiry.
    pub fn expiry_reason(self) -> TerminationReason {
        match self {
            WatchdogKind::Ring => TerminationReason::MISSED,
            WatchdogKind::Connect => TerminationReason::Error(CallFailure::Disconnected),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WatchdogKind::Ring => "ring",
            WatchdogKind::Connect => "connect",
        }
    }
}
