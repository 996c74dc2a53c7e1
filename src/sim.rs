//! In-process stand-ins for the platform and remote collaborators
//!
//! Synthetic camera/microphone tracks, a scripted conversational transport,
//! a codec table and in-memory persistence. The `simulate` command runs a
//! whole session against these, and the integration tests use them to
//! script edge cases.

use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audio::{AudioFrame, AudioSpec, SourceKind, VideoFrame};
use crate::capture::{CodecSupport, EncodingFormat, FragmentEncoder, PcmFragmentEncoder};
use crate::error::{MediaAccessError, TransportError};
use crate::media::{MediaConstraints, MediaDevices, MediaStreamHandle, MediaTrack};
use crate::session::{RecordingUpdate, SessionRecord};
use crate::storage::{BlobStorage, MetadataStore};
use crate::transport::{ContextLoader, ConversationTransport, TransportConfig, TransportEvent};

/// Interval between synthetic audio and video frames
pub const FRAME_INTERVAL: Duration = Duration::from_millis(100);

const DESKTOP_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Ordered log of collaborator calls, shared between fakes
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Index of the first matching entry
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

/// Feed a sine tone into an audio track until the track is stopped
pub fn spawn_tone(track: MediaTrack, frequency: f32, spec: AudioSpec) -> JoinHandle<()> {
    tokio::spawn(async move {
        let frames_per_tick =
            (spec.sample_rate as u64 * FRAME_INTERVAL.as_millis() as u64 / 1000) as usize;
        let mut ticker = tokio::time::interval(FRAME_INTERVAL);
        let mut phase = 0f32;
        let step = TAU * frequency / spec.sample_rate as f32;
        let mut timestamp_ms = 0u64;

        loop {
            tokio::select! {
                _ = track.stopped() => break,
                _ = ticker.tick() => {
                    let mut samples = Vec::with_capacity(frames_per_tick * spec.channels as usize);
                    for _ in 0..frames_per_tick {
                        let value = (phase.sin() * i16::MAX as f32 * 0.25) as i16;
                        phase = (phase + step) % TAU;
                        for _ in 0..spec.channels {
                            samples.push(value);
                        }
                    }

                    let frame = AudioFrame {
                        samples,
                        sample_rate: spec.sample_rate,
                        channels: spec.channels,
                        timestamp_ms,
                        source: SourceKind::Microphone,
                    };
                    if !track.push_audio(frame) {
                        break;
                    }
                    timestamp_ms += FRAME_INTERVAL.as_millis() as u64;
                }
            }
        }

        debug!("Tone generator for {} stopped", track.label());
    })
}

/// Feed marker frames into a video track until the track is stopped
///
/// The payload is a short marker, not pixel data.
pub fn spawn_camera(track: MediaTrack, width: u32, height: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(FRAME_INTERVAL);
        let mut timestamp_ms = 0u64;
        let mut sequence = 0u32;

        loop {
            tokio::select! {
                _ = track.stopped() => break,
                _ = ticker.tick() => {
                    let frame = VideoFrame {
                        width,
                        height,
                        timestamp_ms,
                        data: sequence.to_le_bytes().to_vec(),
                    };
                    if !track.push_video(frame) {
                        break;
                    }
                    sequence += 1;
                    timestamp_ms += FRAME_INTERVAL.as_millis() as u64;
                }
            }
        }

        debug!("Camera generator for {} stopped", track.label());
    })
}

/// A one-track audio stream carrying a sine tone
pub fn synthetic_audio_stream(label: &str, frequency: f32, spec: AudioSpec) -> MediaStreamHandle {
    let track = MediaTrack::audio(label);
    spawn_tone(track.clone(), frequency, spec);
    MediaStreamHandle::from_tracks(vec![track])
}

/// How simulated devices answer a media request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceBehaviour {
    #[default]
    Grant,
    DenyPermission,
    NoDevice,
}

/// Camera and microphone backed by generators
pub struct SimulatedDevices {
    user_agent: String,
    behaviour: DeviceBehaviour,
    spec: AudioSpec,
    journal: Option<Journal>,
    requests: Mutex<Vec<MediaConstraints>>,
}

impl SimulatedDevices {
    pub fn new() -> Self {
        Self {
            user_agent: DESKTOP_USER_AGENT.to_string(),
            behaviour: DeviceBehaviour::Grant,
            spec: AudioSpec::default(),
            journal: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_behaviour(mut self, behaviour: DeviceBehaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    pub fn with_audio_spec(mut self, spec: AudioSpec) -> Self {
        self.spec = spec;
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Constraints of every request made so far
    pub fn requests(&self) -> Vec<MediaConstraints> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for SimulatedDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MediaDevices for SimulatedDevices {
    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStreamHandle, MediaAccessError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*constraints);
        if let Some(journal) = &self.journal {
            journal.record("media.acquire");
        }

        match self.behaviour {
            DeviceBehaviour::DenyPermission => return Err(MediaAccessError::PermissionDenied),
            DeviceBehaviour::NoDevice => return Err(MediaAccessError::NoDevice),
            DeviceBehaviour::Grant => {}
        }

        let mut tracks = Vec::new();
        if let Some(video) = constraints.video {
            let track = MediaTrack::video("simulated-camera");
            spawn_camera(track.clone(), video.ideal_width, video.ideal_height);
            tracks.push(track);
        }
        if constraints.audio.is_some() {
            let track = MediaTrack::audio("simulated-microphone");
            spawn_tone(track.clone(), 440.0, self.spec);
            tracks.push(track);
        }

        Ok(MediaStreamHandle::from_tracks(tracks))
    }
}

/// Conversational transport driven by the test (or the simulate command)
///
/// `Connected` is sent `connect_delay` after `initialize`; everything else is
/// pushed explicitly through `emit`.
pub struct ScriptedTransport {
    connect_delay: Duration,
    failure: Option<TransportError>,
    journal: Option<Journal>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    remote: Mutex<Option<MediaStreamHandle>>,
    initialized: AtomicUsize,
    stopped: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            connect_delay: Duration::from_millis(50),
            failure: None,
            journal: None,
            events: Mutex::new(None),
            remote: Mutex::new(None),
            initialized: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
        }
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Make `initialize` fail with `error`
    pub fn failing(mut self, error: TransportError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Deliver an event to the orchestrator; false when nobody listens
    pub async fn emit(&self, event: TransportEvent) -> bool {
        let sender = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Expose the agent's audio without announcing it
    pub fn set_remote(&self, stream: MediaStreamHandle) {
        *self.remote.lock().unwrap_or_else(PoisonError::into_inner) = Some(stream);
    }

    /// Expose the agent's audio and announce it
    pub async fn publish_remote(&self, stream: MediaStreamHandle) -> bool {
        self.set_remote(stream.clone());
        self.emit(TransportEvent::RemoteAudioTrackAvailable(stream))
            .await
    }

    pub fn initialize_count(&self) -> usize {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConversationTransport for ScriptedTransport {
    async fn initialize(
        &self,
        config: TransportConfig,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError> {
        self.initialized.fetch_add(1, Ordering::SeqCst);
        if let Some(journal) = &self.journal {
            journal.record("transport.initialize");
        }

        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        info!(
            "Scripted transport connecting session {} (agent: {})",
            config.session_id,
            config.agent_id.as_deref().unwrap_or("default")
        );

        *self.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(events.clone());

        let delay = self.connect_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(TransportEvent::Connected).await;
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        if let Some(journal) = &self.journal {
            journal.record("transport.stop");
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    fn remote_audio_stream(&self) -> Option<MediaStreamHandle> {
        self.remote
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Fixed context handed to the transport
pub struct StaticContext(pub serde_json::Value);

#[async_trait::async_trait]
impl ContextLoader for StaticContext {
    async fn load(&self, _session_id: &str) -> Result<serde_json::Value> {
        Ok(self.0.clone())
    }
}

/// Codec table with PCM fragment encoders behind every supported MIME type
pub struct SimulatedCodecs {
    supported: HashSet<String>,
    default: EncodingFormat,
    journal: Option<Journal>,
}

impl SimulatedCodecs {
    pub fn new(supported: &[&str]) -> Self {
        let default = supported
            .first()
            .map(|mime| EncodingFormat::new(*mime))
            .unwrap_or_else(|| EncodingFormat::new("video/webm"));

        Self {
            supported: supported.iter().map(|s| s.to_string()).collect(),
            default,
            journal: None,
        }
    }

    /// What a typical desktop browser offers
    pub fn browser() -> Self {
        Self::new(&[
            "video/webm;codecs=vp8,opus",
            "video/webm",
            "audio/webm;codecs=opus",
            "audio/webm",
        ])
    }

    pub fn with_default(mut self, mime: &str) -> Self {
        self.default = EncodingFormat::new(mime);
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }
}

impl CodecSupport for SimulatedCodecs {
    fn is_supported(&self, mime: &str) -> bool {
        self.supported.contains(mime)
    }

    fn default_format(&self) -> EncodingFormat {
        self.default.clone()
    }

    fn create_encoder(&self, format: &EncodingFormat) -> Result<Box<dyn FragmentEncoder>> {
        if let Some(journal) = &self.journal {
            journal.record("capture.encoder");
        }
        debug!("Creating simulated encoder for {}", format);
        Ok(Box::new(PcmFragmentEncoder::new(true)))
    }
}

/// Blob storage held in memory, with an optional artificial upload latency
#[derive(Default)]
pub struct MemoryBlobStorage {
    upload_delay: Duration,
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .map(|(data, _)| data.clone())
    }

    pub fn content_type(&self, path: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .map(|(_, content_type)| content_type.clone())
    }

    pub fn paths(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn upload(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<String> {
        if !self.upload_delay.is_zero() {
            tokio::time::sleep(self.upload_delay).await;
        }

        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), (data, content_type.to_string()));
        Ok(path.to_string())
    }

    fn public_url(&self, path: &str) -> String {
        format!("memory://recordings/{}", path)
    }
}

/// Session records held in memory
#[derive(Default)]
pub struct MemoryMetadataStore {
    records: Mutex<HashMap<String, SessionRecord>>,
    creates: AtomicUsize,
    updates: AtomicUsize,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create(&self, record: &SessionRecord) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, session_id: &str, update: &RecordingUpdate) -> Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(record) = records.get_mut(session_id) else {
            bail!("Unknown session {}", session_id);
        };
        record.apply(update);
        Ok(())
    }
}
