//! Feedback tone selection.

use serde::Serialize;

use crate::types::{CallPhase, Connectivity, EndedReason, SignalingState, TerminationReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Tone {
    Ringback,
    Busy,
    Connecting,
    Failed,
    Ended,
    Ringing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loops {
    Infinite,
    Count(u32),
}

/// Audio resource and repeat count for a tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToneSpec {
    pub resource: &'static str,
    pub loops: Loops,
}

impl Tone {
    pub fn spec(self) -> ToneSpec {
        let (resource, loops) = match self {
            Tone::Busy => ("voip_busy.caf", Loops::Count(3)),
            Tone::Ringback => ("voip_ringback.caf", Loops::Infinite),
            Tone::Connecting => ("voip_connecting.mp3", Loops::Infinite),
            Tone::Failed => ("voip_fail.caf", Loops::Count(1)),
            Tone::Ended => ("voip_end.caf", Loops::Count(1)),
            Tone::Ringing => ("opening.m4a", Loops::Infinite),
        };
        ToneSpec { resource, loops }
    }
}

/// Pick the tone for a new presentation phase. `None` means silence.
///
/// A reconnecting engine always wins and a terminal phase takes the tone of
/// its reason. Otherwise the tone follows the signaling transition; with no previous signaling state the session is
/// brand new and rings (incoming) or rings back (outgoing).
pub fn select_tone(
    previous: Option<&SignalingState>,
    next: &CallPhase,
    connectivity: Option<Connectivity>,
    is_outgoing: bool,
) -> Option<Tone> {
    if connectivity == Some(Connectivity::Reconnecting) {
        return Some(Tone::Connecting);
    }

    // Terminal tones follow the reason alone.
    if let CallPhase::Terminated { reason, .. } = next {
        return reason.as_ref().and_then(tone_for_reason);
    }

    let Some(previous) = previous else {
        if connectivity.is_some() {
            return None;
        }
        return Some(if is_outgoing {
            Tone::Ringback
        } else {
            Tone::Ringing
        });
    };

    match previous {
        SignalingState::Accepting
        | SignalingState::Active(_)
        | SignalingState::Dropping { .. }
        | SignalingState::Requesting { .. } => {}
        _ => return None,
    }

    match next {
        CallPhase::Connecting { .. } => match previous {
            SignalingState::Requesting { ringing: true } => Some(Tone::Ringback),
            _ => Some(Tone::Connecting),
        },
        CallPhase::Requesting { ringing: true } => Some(Tone::Ringback),
        CallPhase::Ringing => Some(Tone::Ringing),
        _ => None,
    }
}

fn tone_for_reason(reason: &TerminationReason) -> Option<Tone> {
    match reason {
        TerminationReason::Ended(EndedReason::Busy) => Some(Tone::Busy),
        TerminationReason::Ended(EndedReason::HungUp | EndedReason::Missed) => Some(Tone::Ended),
        TerminationReason::Ended(EndedReason::SwitchedToConference { .. }) => None,
        TerminationReason::Error(_) => Some(Tone::Failed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallFailure, TerminationOptions};

    fn terminated(reason: TerminationReason) -> CallPhase {
        CallPhase::Terminated {
            id: None,
            reason: Some(reason),
            should_prompt_rating: false,
        }
    }

    fn requesting(ringing: bool) -> SignalingState {
        SignalingState::Requesting { ringing }
    }

    #[test]
    fn test_reconnecting_overrides_everything() {
        let tone = select_tone(
            Some(&requesting(true)),
            &terminated(TerminationReason::BUSY),
            Some(Connectivity::Reconnecting),
            true,
        );
        assert_eq!(tone, Some(Tone::Connecting));
    }

    #[test]
    fn test_first_state_rings_or_rings_back() {
        assert_eq!(
            select_tone(None, &CallPhase::Waiting, None, true),
            Some(Tone::Ringback)
        );
        assert_eq!(
            select_tone(None, &CallPhase::Ringing, None, false),
            Some(Tone::Ringing)
        );
    }

    #[test]
    fn test_ringing_peer_then_connecting_keeps_ringback() {
        let phase = CallPhase::Connecting {
            key_visual_hash: Some(vec![1, 2]),
        };
        assert_eq!(
            select_tone(Some(&requesting(true)), &phase, None, true),
            Some(Tone::Ringback)
        );
        assert_eq!(
            select_tone(Some(&requesting(false)), &phase, None, true),
            Some(Tone::Connecting)
        );
    }

    #[test]
    fn test_termination_tones() {
        let prev = requesting(true);
        assert_eq!(
            select_tone(Some(&prev), &terminated(TerminationReason::BUSY), None, true),
            Some(Tone::Busy)
        );
        assert_eq!(
            select_tone(Some(&prev), &terminated(TerminationReason::HUNG_UP), None, true),
            Some(Tone::Ended)
        );
        assert_eq!(
            select_tone(Some(&prev), &terminated(TerminationReason::MISSED), None, true),
            Some(Tone::Ended)
        );
        assert_eq!(
            select_tone(
                Some(&prev),
                &terminated(TerminationReason::Error(CallFailure::Generic)),
                None,
                true
            ),
            Some(Tone::Failed)
        );
        assert_eq!(
            select_tone(
                Some(&prev),
                &terminated(TerminationReason::switched_to_conference("room")),
                None,
                true
            ),
            None
        );
    }

    #[test]
    fn test_busy_after_ringing_still_plays_busy() {
        assert_eq!(
            select_tone(
                Some(&SignalingState::Ringing),
                &terminated(TerminationReason::BUSY),
                None,
                false
            ),
            Some(Tone::Busy)
        );
    }

    #[test]
    fn test_terminated_previous_is_silent() {
        let prev = SignalingState::Terminated {
            id: None,
            reason: None,
            options: TerminationOptions::default(),
        };
        assert_eq!(
            select_tone(Some(&prev), &CallPhase::Ringing, None, false),
            None
        );
    }

    #[test]
    fn test_tone_specs() {
        assert_eq!(Tone::Busy.spec().loops, Loops::Count(3));
        assert_eq!(Tone::Ringback.spec().loops, Loops::Infinite);
        assert_eq!(Tone::Ended.spec().loops, Loops::Count(1));
        assert_eq!(Tone::Ringing.spec().resource, "opening.m4a");
    }
}
