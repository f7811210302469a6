//! Tracks live call sessions.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use log::{debug, info, warn};
use tokio::sync::RwLock;

use callcore::types::SessionId;

use crate::config::{CallRegistryConfig, CallSessionConfig};
use crate::error::CallError;
use crate::ports::CallBackends;
use crate::session::{CallOptions, CallSession};

pub struct CallRegistry {
    config: CallRegistryConfig,
    session_config: CallSessionConfig,
    backends: CallBackends,
    sessions: RwLock<HashMap<SessionId, Arc<CallSession>>>,
}

impl CallRegistry {
    pub fn new(
        config: CallRegistryConfig,
        session_config: CallSessionConfig,
        backends: CallBackends,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            session_config,
            backends,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Start a session and forget it once it reports removable.
    pub async fn start_call(self: &Arc<Self>, options: CallOptions) -> Result<Arc<CallSession>, CallError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&options.id) {
            return Err(CallError::AlreadyExists(options.id.to_string()));
        }
        if sessions.len() >= self.config.max_concurrent_calls {
            warn!(target: "Call/Registry", "Rejecting {}: {} call(s) already live", options.id, sessions.len());
            return Err(CallError::AlreadyExists(
                "max concurrent calls reached".into(),
            ));
        }

        let id = options.id.clone();
        let session = Arc::new(
            CallSession::start(options, self.backends.clone(), self.session_config.clone()).await?,
        );
        sessions.insert(id.clone(), session.clone());
        drop(sessions);
        info!(target: "Call/Registry", "Registered session {id}");

        tokio::spawn(Self::reap_when_removable(
            Arc::downgrade(self),
            id,
            Arc::downgrade(&session),
        ));
        Ok(session)
    }

    async fn reap_when_removable(
        registry: Weak<Self>,
        id: SessionId,
        session: Weak<CallSession>,
    ) {
        let _guard = scopeguard::guard((registry.clone(), id.clone()), |(registry, id)| {
            if let Some(registry) = registry.upgrade() {
                tokio::spawn(async move {
                    if registry.sessions.write().await.remove(&id).is_some() {
                        debug!(target: "Call/Registry", "Forgot session {id}");
                    }
                });
            }
        });

        let Some(session) = session.upgrade() else {
            return;
        };
        session.can_be_removed().await;
        session.close().await;
    }

    pub async fn get(&self, id: &SessionId) -> Result<Arc<CallSession>, CallError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CallError::NotFound(id.to_string()))
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Hang up every live session.
    pub async fn hang_up_all(&self) {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        let results = join_all(sessions.iter().map(|session| session.hang_up())).await;
        for (session, result) in sessions.iter().zip(results) {
            if let Err(e) = result {
                debug!(target: "Call/Registry", "Hang-up of {} failed: {e}", session.id());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBackends;
    use std::time::Duration;

    fn registry(sim: &SimBackends) -> Arc<CallRegistry> {
        CallRegistry::new(
            CallRegistryConfig::default(),
            CallSessionConfig::default(),
            sim.backends(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_beyond_limit_and_forgets_removed() {
        let sim = SimBackends::new();
        let registry = registry(&sim);

        let first = SessionId::new("A1");
        let session = registry
            .start_call(CallOptions::outgoing(first.clone()))
            .await
            .unwrap();
        let err = registry
            .start_call(CallOptions::outgoing(SessionId::new("B2")))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::AlreadyExists(_)));
        assert!(matches!(
            registry.get(&SessionId::new("B2")).await,
            Err(CallError::NotFound(_))
        ));

        // Outgoing and never connected: removable right after hang-up.
        session.hang_up().await.unwrap();
        drop(session);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.active_count().await, 0);

        registry
            .start_call(CallOptions::outgoing(SessionId::new("C3")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let sim = SimBackends::new();
        let registry = CallRegistry::new(
            CallRegistryConfig {
                max_concurrent_calls: 4,
            },
            CallSessionConfig::default(),
            sim.backends(),
        );
        let id = SessionId::new("DUP");
        registry.start_call(CallOptions::incoming(id.clone())).await.unwrap();
        assert!(matches!(
            registry.start_call(CallOptions::incoming(id)).await,
            Err(CallError::AlreadyExists(_))
        ));
    }
}
