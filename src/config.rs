use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::CallError;

/// Timing knobs for a single call session.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CallSessionConfig {
    /// How long a call may sit in `Waiting`/`Ringing`/`Requesting`.
    pub ring_timeout_secs: u64,
    /// How long a call may sit in `Connecting`.
    pub connect_timeout_secs: u64,
    /// Fail-safe after a local hang-up the signaling layer never confirms.
    pub hangup_grace_ms: u64,
    pub removal_delay_ms: u64,
    pub conference_ready_deadline_secs: u64,
    /// Treat a conference that misses its readiness deadline as ready.
    pub conference_fail_open: bool,
    pub event_queue_capacity: usize,
}

impl Default for CallSessionConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: 30,
            connect_timeout_secs: 30,
            hangup_grace_ms: 1600,
            removal_delay_ms: 1600,
            conference_ready_deadline_secs: 10,
            conference_fail_open: true,
            event_queue_capacity: 64,
        }
    }
}

impl CallSessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, CallError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| CallError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CallError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| CallError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    fn validate(&self) -> Result<(), CallError> {
        if self.event_queue_capacity == 0 {
            return Err(CallError::Config(
                "event_queue_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn hangup_grace(&self) -> Duration {
        Duration::from_millis(self.hangup_grace_ms)
    }

    pub fn removal_delay(&self) -> Duration {
        Duration::from_millis(self.removal_delay_ms)
    }

    pub fn conference_ready_deadline(&self) -> Duration {
        Duration::from_secs(self.conference_ready_deadline_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CallRegistryConfig {
    pub max_concurrent_calls: usize,
}

impl Default for CallRegistryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 1,
        }
    }
}
