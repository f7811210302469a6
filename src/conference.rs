//! Conference upgrade orchestration.
//!
//! Owned by the session actor. Creation and the readiness wait run in
//! spawned tasks that report back through the session's event queue, so the
//! actor never blocks on them.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use callcore::conference::{ConferenceUpgrade, UpgradeEvent, UpgradeStage};
use callcore::types::{ConferenceReference, ConferenceState, PeerId};

use crate::ports::{ConferenceCall, ConferenceFactory, ConferenceParams};
use crate::session::events::{SessionEvent, UpgradeReply};

/// What the session must do after the orchestrator handled an input.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum UpgradeAction {
    None,
    /// Ask the signaling layer for a room.
    RequestRoom,
    /// Start creating the conference for this room.
    Create(ConferenceReference),
    /// Terminate the point-to-point call: the upgrade could not complete.
    RollBack,
    /// Stop driving the media engine and hand it to the conference.
    TransferControl,
}

pub(crate) struct ConferenceOrchestrator {
    upgrade: ConferenceUpgrade<UpgradeReply>,
    factory: Arc<dyn ConferenceFactory>,
    conference: Option<Arc<dyn ConferenceCall>>,
    creating: bool,
    deadline: Duration,
    fail_open: bool,
    state_tx: watch::Sender<Option<ConferenceState>>,
    events: mpsc::WeakSender<SessionEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConferenceOrchestrator {
    pub(crate) fn new(
        factory: Arc<dyn ConferenceFactory>,
        deadline: Duration,
        fail_open: bool,
        state_tx: watch::Sender<Option<ConferenceState>>,
        events: mpsc::WeakSender<SessionEvent>,
    ) -> Self {
        Self {
            upgrade: ConferenceUpgrade::new(),
            factory,
            conference: None,
            creating: false,
            deadline,
            fail_open,
            state_tx,
            events,
            tasks: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn stage(&self) -> &UpgradeStage {
        self.upgrade.stage()
    }

    pub(crate) fn conference(&self) -> Option<&Arc<dyn ConferenceCall>> {
        self.conference.as_ref()
    }

    /// Whether the call is moving to, or already in, a conference.
    pub(crate) fn has_taken_over(&self) -> bool {
        let stage = self.upgrade.stage();
        stage.is_pending() || matches!(stage, UpgradeStage::Ready)
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.upgrade.stage().conference_state());
    }

    /// Explicit upgrade request from the user.
    pub(crate) async fn request_upgrade(
        &mut self,
        invitees: Vec<PeerId>,
        reply: UpgradeReply,
    ) -> UpgradeAction {
        match self.upgrade.stage() {
            UpgradeStage::Ready => {
                if let Some(conference) = &self.conference {
                    let _ = reply.send(Ok(conference.clone()));
                }
                return UpgradeAction::None;
            }
            UpgradeStage::Failed => {
                let _ = reply.send(Err("conference upgrade already failed".to_string()));
                return UpgradeAction::None;
            }
            UpgradeStage::Preparing => {
                if let Some(conference) = self.conference.clone() {
                    invite_all(&conference, &invitees).await;
                }
            }
            UpgradeStage::Idle | UpgradeStage::Requested { .. } => {}
        }

        if let Some(ticket) = self.upgrade.ticket_mut() {
            ticket.retain_waiters(|waiter| !waiter.is_closed());
        }

        match self.upgrade.request(None, invitees, Some(reply)) {
            Ok(true) => {
                info!(target: "Call/Conference", "Upgrade requested");
                self.publish();
                UpgradeAction::RequestRoom
            }
            Ok(false) => {
                debug!(target: "Call/Conference", "Upgrade already under way, waiting on it");
                UpgradeAction::None
            }
            Err(e) => {
                warn!(target: "Call/Conference", "Rejected upgrade request: {e}");
                UpgradeAction::None
            }
        }
    }

    /// The room for the upgrade is known: signaling switched the call to a
    /// conference, or an incoming invitation was accepted.
    pub(crate) fn room_known(&mut self, reference: ConferenceReference) -> UpgradeAction {
        match self.upgrade.request(Some(reference), Vec::new(), None) {
            Ok(started) => {
                if started {
                    info!(target: "Call/Conference", "Upgrade started by signaling");
                }
                self.publish();
            }
            Err(e) => {
                debug!(target: "Call/Conference", "Ignoring room reference: {e}");
                return UpgradeAction::None;
            }
        }
        match (self.creating, self.upgrade.reference()) {
            (false, Some(reference)) => {
                self.creating = true;
                UpgradeAction::Create(reference.clone())
            }
            _ => UpgradeAction::None,
        }
    }

    /// Spawn the factory call. The result arrives as `ConferenceCreated`.
    pub(crate) fn spawn_creation(&mut self, params: ConferenceParams) {
        let Some(events) = self.events.upgrade() else {
            return;
        };
        info!(target: "Call/Conference", "Creating conference for {:?}", params.reference);
        let factory = self.factory.clone();
        self.tasks.push(tokio::spawn(async move {
            let result = factory.create(params).await;
            let _ = events.send(SessionEvent::ConferenceCreated(result)).await;
        }));
    }

    pub(crate) async fn on_created(
        &mut self,
        result: Result<Arc<dyn ConferenceCall>, anyhow::Error>,
    ) -> UpgradeAction {
        let conference = match result {
            Ok(conference) => conference,
            Err(e) => {
                warn!(target: "Call/Conference", "Conference creation failed: {e}");
                return self.fail(format!("conference creation failed: {e}"));
            }
        };
        if let Err(e) = self.upgrade.apply(UpgradeEvent::ConferenceCreated) {
            warn!(target: "Call/Conference", "Discarding created conference: {e}");
            return UpgradeAction::None;
        }
        self.publish();

        let invitees = self
            .upgrade
            .ticket_mut()
            .map(|ticket| ticket.take_invitees())
            .unwrap_or_default();
        invite_all(&conference, &invitees).await;

        self.conference = Some(conference.clone());
        self.spawn_readiness_wait(conference);
        UpgradeAction::None
    }

    fn spawn_readiness_wait(&mut self, conference: Arc<dyn ConferenceCall>) {
        let Some(events) = self.events.upgrade() else {
            return;
        };
        let deadline = self.deadline;
        self.tasks.push(tokio::spawn(async move {
            let timed_out = tokio::time::timeout(deadline, wait_until_ready(conference))
                .await
                .is_err();
            let _ = events
                .send(SessionEvent::ConferenceReadiness { timed_out })
                .await;
        }));
    }

    pub(crate) fn on_readiness(&mut self, timed_out: bool) -> UpgradeAction {
        if timed_out {
            if !self.fail_open {
                warn!(target: "Call/Conference", "Conference not ready within {:?}", self.deadline);
                return self.fail("conference not ready before deadline".to_string());
            }
            info!(target: "Call/Conference", "Readiness deadline passed, proceeding anyway");
        }
        let Some(conference) = self.conference.clone() else {
            return UpgradeAction::None;
        };
        let ticket = match self.upgrade.complete() {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!(target: "Call/Conference", "Readiness report out of order: {e}");
                return UpgradeAction::None;
            }
        };
        self.publish();
        let waiters = ticket.into_waiters();
        info!(target: "Call/Conference", "Conference ready, notifying {} waiter(s)", waiters.len());
        for waiter in waiters {
            let _ = waiter.send(Ok(conference.clone()));
        }
        UpgradeAction::TransferControl
    }

    fn fail(&mut self, message: String) -> UpgradeAction {
        self.creating = false;
        match self.upgrade.fail() {
            Ok(ticket) => {
                for waiter in ticket.into_waiters() {
                    let _ = waiter.send(Err(message.clone()));
                }
                self.publish();
                UpgradeAction::RollBack
            }
            Err(e) => {
                debug!(target: "Call/Conference", "Upgrade not pending: {e}");
                UpgradeAction::None
            }
        }
    }

    /// The signaling layer refused to open a room.
    pub(crate) fn room_request_failed(&mut self, error: &anyhow::Error) -> UpgradeAction {
        warn!(target: "Call/Conference", "Room request failed: {error}");
        self.fail(format!("room request failed: {error}"))
    }

    /// Abort background work. Pending waiters are released unresolved.
    pub(crate) fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

async fn invite_all(conference: &Arc<dyn ConferenceCall>, invitees: &[PeerId]) {
    for peer in invitees {
        if let Err(e) = conference.invite(*peer).await {
            warn!(target: "Call/Conference", "Failed to invite {peer}: {e}");
        }
    }
}

/// Resolves once the conference reported both a network state and a member
/// list.
async fn wait_until_ready(conference: Arc<dyn ConferenceCall>) {
    let mut state = conference.state();
    let mut members = conference.members();
    loop {
        if state.borrow_and_update().is_some() && members.borrow_and_update().is_some() {
            return;
        }
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            changed = members.changed() => {
                if changed.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}
