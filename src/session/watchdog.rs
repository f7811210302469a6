//! Ring and connect timers.
//!
//! At most one timer is armed at a time. Every arm or cancel bumps the epoch,
//! and the actor drops any expiry whose epoch is no longer current, so an
//! expiry already queued behind a phase change is ignored.

use std::time::Duration;

use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use callcore::lifecycle::WatchdogKind;
use callcore::types::CallPhase;

use super::events::SessionEvent;

struct Armed {
    kind: WatchdogKind,
    epoch: u64,
    task: JoinHandle<()>,
}

pub(crate) struct Watchdog {
    ring_timeout: Duration,
    connect_timeout: Duration,
    events: mpsc::WeakSender<SessionEvent>,
    armed: Option<Armed>,
    epoch: u64,
}

impl Watchdog {
    pub(crate) fn new(
        ring_timeout: Duration,
        connect_timeout: Duration,
        events: mpsc::WeakSender<SessionEvent>,
    ) -> Self {
        Self {
            ring_timeout,
            connect_timeout,
            events,
            armed: None,
            epoch: 0,
        }
    }

    /// Arm, keep or cancel the timer for the phase just published.
    pub(crate) fn track(&mut self, phase: &CallPhase) {
        let wanted = WatchdogKind::for_phase(phase);
        if let (Some(armed), Some(kind)) = (&self.armed, wanted)
            && armed.kind == kind
        {
            return;
        }
        self.cancel();
        if let Some(kind) = wanted {
            self.arm(kind);
        }
    }

    fn arm(&mut self, kind: WatchdogKind) {
        let Some(events) = self.events.upgrade() else {
            return;
        };
        self.epoch += 1;
        let epoch = self.epoch;
        let timeout = match kind {
            WatchdogKind::Ring => self.ring_timeout,
            WatchdogKind::Connect => self.connect_timeout,
        };
        debug!(target: "Call/Watchdog", "Arming {} timer for {:?}", kind.name(), timeout);
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(SessionEvent::WatchdogFired { kind, epoch }).await;
        });
        self.armed = Some(Armed { kind, epoch, task });
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(armed) = self.armed.take() {
            debug!(target: "Call/Watchdog", "Cancelling {} timer", armed.kind.name());
            armed.task.abort();
            self.epoch += 1;
        }
    }

    /// Whether an expiry report still refers to the armed timer. Consumes it.
    pub(crate) fn take_expiry(&mut self, kind: WatchdogKind, epoch: u64) -> bool {
        match &self.armed {
            Some(armed) if armed.kind == kind && armed.epoch == epoch => {
                info!(target: "Call/Watchdog", "{} timer expired", kind.name());
                self.armed = None;
                true
            }
            _ => {
                debug!(target: "Call/Watchdog", "Ignoring stale {} expiry", kind.name());
                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn armed_kind(&self) -> Option<WatchdogKind> {
        self.armed.as_ref().map(|a| a.kind)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watchdog(events: &mpsc::Sender<SessionEvent>) -> Watchdog {
        Watchdog::new(
            Duration::from_secs(30),
            Duration::from_secs(30),
            events.downgrade(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_timeout() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut dog = watchdog(&tx);
        dog.track(&CallPhase::Requesting { ringing: false });
        assert_eq!(dog.armed_kind(), Some(WatchdogKind::Ring));

        tokio::time::sleep(Duration::from_secs(31)).await;
        match rx.try_recv() {
            Ok(SessionEvent::WatchdogFired { kind, epoch }) => {
                assert_eq!(kind, WatchdogKind::Ring);
                assert!(dog.take_expiry(kind, epoch));
            }
            _ => panic!("expected watchdog expiry"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ringing_upgrade_keeps_timer() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut dog = watchdog(&tx);
        dog.track(&CallPhase::Requesting { ringing: false });
        tokio::time::sleep(Duration::from_secs(20)).await;
        dog.track(&CallPhase::Requesting { ringing: true });

        // Not restarted: still expires 30s after the first arm.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(matches!(
            rx.try_recv(),
            Ok(SessionEvent::WatchdogFired { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut dog = watchdog(&tx);
        dog.track(&CallPhase::Requesting { ringing: false });
        let stale_epoch = dog.epoch;
        dog.track(&CallPhase::Active {
            since: chrono::Utc::now(),
            reception: None,
            key_visual_hash: vec![],
        });
        assert_eq!(dog.armed_kind(), None);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
        assert!(!dog.take_expiry(WatchdogKind::Ring, stale_epoch));
    }
}
