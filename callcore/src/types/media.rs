//! Raw status reported by the media engine.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Connectivity {
    Initializing,
    Connected,
    Reconnecting,
    Failed,
}

/// Local video as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineVideoState {
    NotAvailable,
    Active,
    Inactive,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RemoteVideoState {
    Inactive,
    Active,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RemoteAudioState {
    Active,
    Muted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RemoteBatteryLevel {
    Normal,
    Low,
}

/// One status report from a running media engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaEngineState {
    pub connectivity: Connectivity,
    pub video_state: EngineVideoState,
    pub remote_video_state: RemoteVideoState,
    pub remote_audio_state: RemoteAudioState,
    pub remote_battery_level: RemoteBatteryLevel,
    pub remote_aspect_ratio: f32,
    pub reception_quality: Option<i32>,
}

impl MediaEngineState {
    /// The report a freshly created engine starts with.
    pub fn initializing() -> Self {
        Self {
            connectivity: Connectivity::Initializing,
            video_state: EngineVideoState::NotAvailable,
            remote_video_state: RemoteVideoState::Inactive,
            remote_audio_state: RemoteAudioState::Active,
            remote_battery_level: RemoteBatteryLevel::Normal,
            remote_aspect_ratio: 0.0,
            reception_quality: None,
        }
    }

    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }
}

/// Device identifiers currently selected in the capture/device registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSelection {
    pub camera: Option<String>,
    pub microphone: Option<String>,
    pub output: Option<String>,
}

/// Source feeding the outgoing video track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CaptureSource {
    Camera { device_id: String },
    Screen { source_id: String },
}

impl CaptureSource {
    pub fn device_id(&self) -> &str {
        match self {
            Self::Camera { device_id } => device_id,
            Self::Screen { source_id } => source_id,
        }
    }

    pub fn is_screen(&self) -> bool {
        matches!(self, Self::Screen { .. })
    }
}
