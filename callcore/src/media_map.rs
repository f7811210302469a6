//! Translation of raw media-engine status into presentation vocabulary.
//!
//! The mapper remembers the last values it saw so a missing engine report
//! (engine not created yet, or torn down) keeps the UI on the last known
//! state instead of snapping back to defaults.

use crate::types::{
    EngineVideoState, MediaEngineState, RemoteAudioState, RemoteBatteryLevel, RemoteVideoState,
    VideoState,
};

/// What this device can do with video right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoCapabilities {
    /// The call carries (or was started with) video.
    pub is_video: bool,
    /// Video is allowed for this call and a camera exists.
    pub is_video_possible: bool,
    /// Camera permission granted (or not yet asked).
    pub is_video_available: bool,
    /// The user turned video off locally.
    pub force_disabled: bool,
}

impl VideoCapabilities {
    pub fn new(start_with_video: bool, is_video_possible: bool, is_video_available: bool) -> Self {
        Self {
            is_video: start_with_video,
            is_video_possible,
            is_video_available,
            force_disabled: !is_video_possible,
        }
    }

    /// Local video state used before any engine report exists.
    pub fn initial_video_state(&self) -> VideoState {
        let available = self.is_video_available;
        if self.force_disabled {
            if self.is_video_possible {
                VideoState::Inactive { available }
            } else {
                VideoState::NotAvailable
            }
        } else if self.is_video {
            VideoState::Active { available }
        } else if self.is_video_possible {
            VideoState::Inactive { available }
        } else {
            VideoState::NotAvailable
        }
    }
}

/// Media sub-fields of a presentation snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappedMedia {
    pub video_state: VideoState,
    pub remote_video_state: RemoteVideoState,
    pub remote_audio_state: RemoteAudioState,
    pub remote_battery_level: RemoteBatteryLevel,
    pub remote_aspect_ratio: f32,
}

#[derive(Debug, Clone, Default)]
pub struct MediaStateMapper {
    last_video_state: Option<VideoState>,
    last_remote_audio_state: Option<RemoteAudioState>,
    last_remote_battery_level: Option<RemoteBatteryLevel>,
}

impl MediaStateMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&mut self, media: Option<&MediaEngineState>, caps: &VideoCapabilities) -> MappedMedia {
        let Some(media) = media else {
            return MappedMedia {
                video_state: self
                    .last_video_state
                    .unwrap_or_else(|| caps.initial_video_state()),
                remote_video_state: RemoteVideoState::Inactive,
                remote_audio_state: self
                    .last_remote_audio_state
                    .unwrap_or(RemoteAudioState::Active),
                remote_battery_level: self
                    .last_remote_battery_level
                    .unwrap_or(RemoteBatteryLevel::Normal),
                remote_aspect_ratio: 0.0,
            };
        };

        let available = caps.is_video_available;
        let video_state = match media.video_state {
            EngineVideoState::NotAvailable => VideoState::NotAvailable,
            EngineVideoState::Active if caps.force_disabled => VideoState::Inactive { available },
            EngineVideoState::Active => VideoState::Active { available },
            EngineVideoState::Inactive => VideoState::Inactive { available },
            EngineVideoState::Paused => VideoState::Paused { available },
        };

        self.last_video_state = Some(video_state);
        self.last_remote_audio_state = Some(media.remote_audio_state);
        self.last_remote_battery_level = Some(media.remote_battery_level);

        MappedMedia {
            video_state,
            remote_video_state: media.remote_video_state,
            remote_audio_state: media.remote_audio_state,
            remote_battery_level: media.remote_battery_level,
            remote_aspect_ratio: media.remote_aspect_ratio,
        }
    }

    /// Drop remembered values, e.g. after the user disables video.
    pub fn forget_video(&mut self) {
        self.last_video_state = None;
    }
}
