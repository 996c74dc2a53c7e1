use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::{AudioFrame, VideoFrame};

const TRACK_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

enum TrackFeed {
    Audio(broadcast::Sender<AudioFrame>),
    Video(broadcast::Sender<VideoFrame>),
}

struct TrackInner {
    id: Uuid,
    label: String,
    feed: TrackFeed,
    stopped: CancellationToken,
}

/// A single audio or video track
///
/// Clones share the same underlying feed; any number of readers can
/// subscribe while the producer publishes frames.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn audio(label: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(TRACK_CHANNEL_CAPACITY);
        Self::with_feed(label.into(), TrackFeed::Audio(tx))
    }

    pub fn video(label: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(TRACK_CHANNEL_CAPACITY);
        Self::with_feed(label.into(), TrackFeed::Video(tx))
    }

    fn with_feed(label: String, feed: TrackFeed) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4(),
                label,
                feed,
                stopped: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn kind(&self) -> TrackKind {
        match self.inner.feed {
            TrackFeed::Audio(_) => TrackKind::Audio,
            TrackFeed::Video(_) => TrackKind::Video,
        }
    }

    /// Publish an audio frame. Returns false for video tracks or stopped tracks.
    pub fn push_audio(&self, frame: AudioFrame) -> bool {
        match &self.inner.feed {
            TrackFeed::Audio(tx) if !self.is_stopped() => {
                // No subscribers is not an error; the frame is simply unheard.
                let _ = tx.send(frame);
                true
            }
            _ => false,
        }
    }

    /// Publish a video frame. Returns false for audio tracks or stopped tracks.
    pub fn push_video(&self, frame: VideoFrame) -> bool {
        match &self.inner.feed {
            TrackFeed::Video(tx) if !self.is_stopped() => {
                let _ = tx.send(frame);
                true
            }
            _ => false,
        }
    }

    pub fn subscribe_audio(&self) -> Option<broadcast::Receiver<AudioFrame>> {
        match &self.inner.feed {
            TrackFeed::Audio(tx) => Some(tx.subscribe()),
            TrackFeed::Video(_) => None,
        }
    }

    pub fn subscribe_video(&self) -> Option<broadcast::Receiver<VideoFrame>> {
        match &self.inner.feed {
            TrackFeed::Video(tx) => Some(tx.subscribe()),
            TrackFeed::Audio(_) => None,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.is_cancelled()
    }

    /// Resolves once the track has been stopped. Producers select on this.
    pub async fn stopped(&self) {
        self.inner.stopped.cancelled().await
    }

    pub(crate) fn stop(&self) {
        self.inner.stopped.cancel();
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("kind", &self.kind())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

struct StreamInner {
    id: Uuid,
    tracks: Vec<MediaTrack>,
}

/// A set of tracks obtained together (or combined after the fact)
#[derive(Clone)]
pub struct MediaStreamHandle {
    inner: Arc<StreamInner>,
}

impl MediaStreamHandle {
    pub fn from_tracks(tracks: Vec<MediaTrack>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: Uuid::new_v4(),
                tracks,
            }),
        }
    }

    /// Identity of this stream instance. Clones share it; combining tracks
    /// into a new handle does not.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.inner.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.inner
            .tracks
            .iter()
            .filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.inner
            .tracks
            .iter()
            .filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn has_video(&self) -> bool {
        self.video_tracks().next().is_some()
    }

    pub fn all_stopped(&self) -> bool {
        self.inner.tracks.iter().all(MediaTrack::is_stopped)
    }

    pub(crate) fn stop_tracks(&self) {
        for track in &self.inner.tracks {
            track.stop();
        }
    }
}

impl std::fmt::Debug for MediaStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStreamHandle")
            .field("id", &self.inner.id)
            .field("tracks", &self.inner.tracks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SourceKind;

    fn frame() -> AudioFrame {
        AudioFrame {
            samples: vec![1, 2, 3],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: 0,
            source: SourceKind::Microphone,
        }
    }

    #[tokio::test]
    async fn every_subscriber_sees_each_frame() {
        let track = MediaTrack::audio("mic");
        let mut preview = track.subscribe_audio().unwrap();
        let mut encoder = track.subscribe_audio().unwrap();

        assert!(track.push_audio(frame()));

        assert_eq!(preview.recv().await.unwrap().samples, vec![1, 2, 3]);
        assert_eq!(encoder.recv().await.unwrap().samples, vec![1, 2, 3]);
    }

    #[test]
    fn stopped_track_rejects_frames() {
        let track = MediaTrack::audio("mic");
        track.stop();
        assert!(!track.push_audio(frame()));
        assert!(track.is_stopped());
    }

    #[test]
    fn combined_stream_gets_new_identity() {
        let audio = MediaTrack::audio("mic");
        let video = MediaTrack::video("cam");
        let a = MediaStreamHandle::from_tracks(vec![audio.clone()]);
        let b = MediaStreamHandle::from_tracks(vec![video, audio]);

        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
        assert!(b.has_video());
        assert_eq!(b.audio_tracks().count(), 1);
    }
}
