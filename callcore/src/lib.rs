//! Platform-agnostic call-session logic.
//!
//! Everything here is synchronous and free of I/O: the runtime crate feeds
//! inputs in and carries out the effects that come back.

pub mod conference;
pub mod lifecycle;
pub mod media_map;
pub mod reconcile;
pub mod tone;
pub mod types;

pub use conference::{ConferenceUpgrade, InvalidUpgradeTransition, UpgradeStage, UpgradeTicket};
pub use media_map::{MappedMedia, MediaStateMapper, VideoCapabilities};
pub use reconcile::{
    Effect, EngineLifecycle, LocalToggles, Reconciler, Reconciliation, SessionSetup, ToneCommand,
};
pub use tone::{Loops, Tone, ToneSpec, select_tone};
