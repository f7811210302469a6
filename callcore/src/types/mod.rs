pub mod call;
pub mod media;
pub mod presentation;
pub mod signaling;

pub use call::{CallDirection, CallId, ConferenceReference, MessageRef, PeerId, SessionId};
pub use media::{
    CaptureSource, Connectivity, DeviceSelection, EngineVideoState, MediaEngineState,
    RemoteAudioState, RemoteBatteryLevel, RemoteVideoState,
};
pub use presentation::{CallPhase, ConferenceState, PresentationState, VideoState};
pub use signaling::{
    ActiveCall, CallFailure, DropReason, EndedReason, SignalingState, TerminationOptions,
    TerminationReason, TransportDescriptor,
};
