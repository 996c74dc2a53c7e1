use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::capture::{Chunk, EncodingFormat, RecordingChunks};
use crate::media::{AspectRatio, RecordingPreference};

/// One capture lifecycle, from session start to stop
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub preference: RecordingPreference,
    pub aspect_ratio: AspectRatio,
    pub format: Option<EncodingFormat>,
    active: bool,
}

impl RecordingSession {
    pub fn new(
        session_id: String,
        preference: RecordingPreference,
        aspect_ratio: AspectRatio,
    ) -> Self {
        Self {
            session_id,
            started_at: Utc::now(),
            preference,
            aspect_ratio,
            format: None,
            active: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Freeze the session with the chunks its capture produced
    pub fn finalize(mut self, recorded: RecordingChunks) -> FinalizedRecording {
        self.active = false;
        FinalizedRecording {
            session_id: self.session_id,
            started_at: self.started_at,
            ended_at: Utc::now(),
            preference: self.preference,
            aspect_ratio: self.aspect_ratio,
            format: recorded.format.or(self.format),
            audio_spec: recorded.audio_spec,
            chunks: recorded.chunks,
            capture_duration: recorded.duration,
        }
    }
}

/// Immutable result of a stopped session
#[derive(Debug, Clone)]
pub struct FinalizedRecording {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub preference: RecordingPreference,
    pub aspect_ratio: AspectRatio,
    pub format: Option<EncodingFormat>,
    pub audio_spec: Option<crate::audio::AudioSpec>,
    pub chunks: Vec<Chunk>,
    pub capture_duration: Duration,
}

impl FinalizedRecording {
    pub fn has_media(&self) -> bool {
        !self.chunks.is_empty()
    }

    /// `{session_id}-video-{timestamp}.{ext}`
    pub fn artifact_path(&self, timestamp_ms: i64) -> Option<String> {
        let format = self.format.as_ref()?;
        Some(format!(
            "{}-video-{}.{}",
            self.session_id,
            timestamp_ms,
            format.extension()
        ))
    }
}

/// Session metadata as persisted by the metadata store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub participant_id: Option<String>,
    pub scenario_id: Option<String>,
    pub agent_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Wall-clock session length in seconds
    pub duration_secs: f64,
    pub recording_preference: RecordingPreference,
    pub aspect_ratio: AspectRatio,

    // Recording outputs; null when nothing was recorded or the upload failed
    pub recording_format: Option<String>,
    pub recording_duration_secs: Option<f64>,
    pub recording_url: Option<String>,
    pub recording_size_bytes: Option<u64>,
}

impl SessionRecord {
    pub fn apply(&mut self, update: &RecordingUpdate) {
        self.recording_url = Some(update.recording_url.clone());
        self.recording_size_bytes = Some(update.recording_size_bytes);
        self.recording_duration_secs = Some(update.recording_duration_secs);
    }
}

/// Finalization fields written after a successful upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingUpdate {
    pub recording_url: String,
    pub recording_size_bytes: u64,
    pub recording_duration_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_freezes_session() {
        let session = RecordingSession::new(
            "abc".to_string(),
            RecordingPreference::AudioVideo,
            AspectRatio::Landscape,
        );
        assert!(session.is_active());

        let recorded = RecordingChunks {
            format: Some(EncodingFormat::new("video/webm")),
            chunks: vec![Chunk {
                index: 0,
                timestamp_ms: 1000,
                data: vec![1, 2, 3],
            }],
            duration: Duration::from_secs(1),
            ..Default::default()
        };

        let finalized = session.finalize(recorded);
        assert!(finalized.has_media());
        assert_eq!(
            finalized.artifact_path(1700000000000).as_deref(),
            Some("abc-video-1700000000000.webm")
        );
    }

    #[test]
    fn no_artifact_path_without_format() {
        let session =
            RecordingSession::new("x".to_string(), RecordingPreference::None, AspectRatio::Square);
        let finalized = session.finalize(RecordingChunks::default());
        assert!(!finalized.has_media());
        assert!(finalized.artifact_path(1).is_none());
    }
}
