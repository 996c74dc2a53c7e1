use std::time::Duration;

use crate::audio::MixerConfig;
use crate::bridge::DEFAULT_RETRY_DELAY;
use crate::capture::{CaptureConfig, AUDIO_CANDIDATES, VIDEO_CANDIDATES};
use crate::media::{AspectRatio, RecordingPreference};

/// Configuration for one orchestrated session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// What to record (none, audio, audio+video)
    pub preference: RecordingPreference,

    /// Camera shape requested when recording video
    pub aspect_ratio: AspectRatio,

    /// Interval between capture fragments
    /// Default: 1 second
    pub chunk_interval: Duration,

    /// Mixing graph output format and backlog bound
    pub mixer: MixerConfig,

    /// Wait before the remote audio bridge's single retry
    pub bridge_retry_delay: Duration,

    /// Bound on each metadata write during stop
    pub save_timeout: Duration,

    /// Bound on the artifact upload during stop
    pub upload_timeout: Duration,

    pub agent_id: Option<String>,
    pub participant_id: Option<String>,
    pub scenario_id: Option<String>,
}

impl SessionConfig {
    /// Capture settings with candidates matching the preference
    pub fn capture_config(&self) -> CaptureConfig {
        let candidates = if self.preference.wants_video() {
            VIDEO_CANDIDATES
        } else {
            AUDIO_CANDIDATES
        };

        CaptureConfig {
            timeslice: self.chunk_interval,
            ..CaptureConfig::new(candidates)
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            preference: RecordingPreference::AudioVideo,
            aspect_ratio: AspectRatio::Landscape,
            chunk_interval: Duration::from_secs(1),
            mixer: MixerConfig::default(),
            bridge_retry_delay: DEFAULT_RETRY_DELAY,
            save_timeout: Duration::from_secs(30),
            upload_timeout: Duration::from_secs(30),
            agent_id: None,
            participant_id: None,
            scenario_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_only_sessions_probe_audio_formats() {
        let config = SessionConfig {
            preference: RecordingPreference::Audio,
            ..Default::default()
        };
        let capture = config.capture_config();
        assert!(capture.candidates.iter().all(|c| c.starts_with("audio/")));
        assert_eq!(capture.timeslice, Duration::from_secs(1));
    }

    #[test]
    fn video_sessions_probe_video_formats_first() {
        let capture = SessionConfig::default().capture_config();
        assert_eq!(capture.candidates[0], "video/webm;codecs=vp9,opus");
    }
}
