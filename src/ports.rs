//! Collaborators a call session drives but does not implement.
//!
//! Everything behind these traits is opaque: the session only relies on the
//! streams they expose and the commands they accept.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use callcore::types::{
    ActiveCall, CallDirection, CallId, CaptureSource, ConferenceReference, DeviceSelection,
    DropReason, MediaEngineState, MessageRef, PeerId, SessionId, SignalingState,
};

/// The authoritative source of call negotiation state.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Stream of signaling updates for a point-to-point call.
    async fn subscribe(&self, session: &SessionId)
    -> Result<mpsc::Receiver<SignalingState>, anyhow::Error>;

    /// Stream of status updates for an invitation to an existing conference.
    async fn subscribe_invitation(
        &self,
        invitation: &MessageRef,
    ) -> Result<mpsc::Receiver<SignalingState>, anyhow::Error>;

    async fn accept(&self, session: &SessionId) -> Result<(), anyhow::Error>;

    async fn drop_call(&self, session: &SessionId, reason: DropReason)
    -> Result<(), anyhow::Error>;

    /// Ask the server to turn the call into a conference. The room arrives
    /// later as `SignalingState::SwitchedToConference`.
    async fn create_conference(&self, session: &SessionId) -> Result<(), anyhow::Error>;
}

/// Everything the media engine needs to start.
#[derive(Debug, Clone)]
pub struct MediaEngineParams {
    pub session: SessionId,
    pub call: ActiveCall,
    pub direction: CallDirection,
    pub capture: Option<CaptureSource>,
    pub devices: DeviceSelection,
}

#[async_trait]
pub trait MediaEngineFactory: Send + Sync {
    async fn create(&self, params: MediaEngineParams)
    -> Result<Arc<dyn MediaEngine>, anyhow::Error>;
}

/// A running audio/video pipe.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    fn state(&self) -> watch::Receiver<MediaEngineState>;
    fn reception(&self) -> watch::Receiver<Option<i32>>;
    fn audio_level(&self) -> watch::Receiver<f32>;

    async fn set_muted(&self, muted: bool) -> Result<(), anyhow::Error>;
    async fn request_video(&self, source: CaptureSource) -> Result<(), anyhow::Error>;
    async fn disable_video(&self) -> Result<(), anyhow::Error>;
    async fn switch_video_input(&self, device_id: &str) -> Result<(), anyhow::Error>;
    async fn switch_audio_input(&self, device_id: &str) -> Result<(), anyhow::Error>;
    async fn switch_audio_output(&self, device_id: &str) -> Result<(), anyhow::Error>;
    async fn set_requested_video_aspect(&self, aspect: f32) -> Result<(), anyhow::Error>;
    async fn stop(&self, call_id: Option<CallId>, send_debug_logs: bool)
    -> Result<(), anyhow::Error>;
}

/// Initial output handed to a new conference so outgoing media keeps flowing.
#[derive(Debug, Clone)]
pub struct ConferenceParams {
    pub session: SessionId,
    pub reference: ConferenceReference,
    pub capture: Option<CaptureSource>,
    pub is_muted: bool,
}

#[async_trait]
pub trait ConferenceFactory: Send + Sync {
    async fn create(&self, params: ConferenceParams)
    -> Result<Arc<dyn ConferenceCall>, anyhow::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConferenceNetworkState {
    Connecting,
    Connected,
}

#[async_trait]
pub trait ConferenceCall: Send + Sync {
    /// `None` until the conference reports its first network state.
    fn state(&self) -> watch::Receiver<Option<ConferenceNetworkState>>;
    /// `None` until the member list is first known.
    fn members(&self) -> watch::Receiver<Option<Vec<PeerId>>>;

    async fn invite(&self, peer: PeerId) -> Result<(), anyhow::Error>;

    /// Take over the point-to-point media engine. The previous owner never
    /// touches it again.
    fn adopt_media_engine(&self, engine: Arc<dyn MediaEngine>);
}

#[async_trait]
pub trait TonePlayer: Send + Sync {
    /// `loops == None` repeats until stopped.
    async fn play(&self, resource: &str, loops: Option<u32>) -> Result<(), anyhow::Error>;
    async fn stop(&self) -> Result<(), anyhow::Error>;
}

/// Currently selected capture and output devices.
pub trait DeviceRegistry: Send + Sync {
    fn current(&self) -> DeviceSelection;
    fn subscribe(&self) -> watch::Receiver<DeviceSelection>;
}

/// The full set of collaborators a session needs.
#[derive(Clone)]
pub struct CallBackends {
    pub signaling: Arc<dyn SignalingChannel>,
    pub media: Arc<dyn MediaEngineFactory>,
    pub conference: Arc<dyn ConferenceFactory>,
    pub tones: Arc<dyn TonePlayer>,
    pub devices: Arc<dyn DeviceRegistry>,
}
