//! Local media: stream/track handles, capture preferences and acquisition
//!
//! A `MediaStreamHandle` is a cheap, clonable view over a set of tracks.
//! Audio and video tracks fan out frames over broadcast channels so the
//! preview surface, the mixing graph and the encoder can all read the same
//! track at once. Stopping tracks is reserved to the session orchestrator.

mod acquire;
mod stream;

pub use acquire::{AcquisitionStrategy, DeviceClass, MediaAcquirer, MediaDevices};
pub use stream::{MediaStreamHandle, MediaTrack, TrackKind};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What the participant agreed to have recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RecordingPreference {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "audio")]
    Audio,
    #[default]
    #[serde(rename = "audio+video")]
    AudioVideo,
}

impl RecordingPreference {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Audio => "audio",
            Self::AudioVideo => "audio+video",
        }
    }

    pub fn wants_recording(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn wants_video(&self) -> bool {
        matches!(self, Self::AudioVideo)
    }
}

impl fmt::Display for RecordingPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordingPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "audio" => Ok(Self::Audio),
            "audio+video" | "video" => Ok(Self::AudioVideo),
            other => Err(format!(
                "Invalid recording preference: \"{other}\". Expected none, audio or audio+video"
            )),
        }
    }
}

/// Target frame shape for the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 4] = [
        Self::Landscape,
        Self::Portrait,
        Self::Standard,
        Self::Square,
    ];

    /// Ideal (width, height) requested from the camera
    pub const fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Landscape => (1280, 720),
            Self::Portrait => (720, 1280),
            Self::Standard => (640, 480),
            Self::Square => (720, 720),
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
            Self::Standard => "4:3",
            Self::Square => "1:1",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == s)
            .ok_or_else(|| format!("Invalid aspect ratio: \"{s}\". Expected 16:9, 9:16, 4:3 or 1:1"))
    }
}

/// Camera request. Width and height are preferences, never hard limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// One request to the platform's media devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaConstraints {
    pub video: Option<VideoConstraints>,
    pub audio: Option<AudioConstraints>,
}

impl MediaConstraints {
    /// Constraints for a preference, or `None` when nothing is to be captured
    pub fn for_preference(preference: RecordingPreference, ratio: AspectRatio) -> Option<Self> {
        match preference {
            RecordingPreference::None => None,
            RecordingPreference::Audio => Some(Self {
                video: None,
                audio: Some(AudioConstraints::default()),
            }),
            RecordingPreference::AudioVideo => {
                let (ideal_width, ideal_height) = ratio.dimensions();
                Some(Self {
                    video: Some(VideoConstraints {
                        ideal_width,
                        ideal_height,
                    }),
                    audio: Some(AudioConstraints::default()),
                })
            }
        }
    }

    pub fn video_only(&self) -> Self {
        Self {
            video: self.video,
            audio: None,
        }
    }

    pub fn audio_only(&self) -> Self {
        Self {
            video: None,
            audio: self.audio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_round_trips_through_strings() {
        for pref in [
            RecordingPreference::None,
            RecordingPreference::Audio,
            RecordingPreference::AudioVideo,
        ] {
            assert_eq!(pref.as_str().parse::<RecordingPreference>(), Ok(pref));
        }
        assert!("loud".parse::<RecordingPreference>().is_err());
    }

    #[test]
    fn preference_serializes_with_wire_names() {
        let json = serde_json::to_string(&RecordingPreference::AudioVideo).unwrap();
        assert_eq!(json, "\"audio+video\"");
        let ratio: AspectRatio = serde_json::from_str("\"9:16\"").unwrap();
        assert_eq!(ratio, AspectRatio::Portrait);
    }

    #[test]
    fn no_constraints_for_none() {
        assert!(MediaConstraints::for_preference(RecordingPreference::None, AspectRatio::Square).is_none());
    }

    #[test]
    fn audio_preference_skips_camera() {
        let c = MediaConstraints::for_preference(RecordingPreference::Audio, AspectRatio::Landscape)
            .unwrap();
        assert!(c.video.is_none());
        assert!(c.audio.is_some());
    }
}
