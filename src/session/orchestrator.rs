use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::SessionConfig;
use super::record::{FinalizedRecording, RecordingSession, RecordingUpdate, SessionRecord};
use super::state::SessionState;
use crate::audio::{AudioGraph, ClipFetcher, HttpClipFetcher};
use crate::bridge::RemoteAudioBridge;
use crate::capture::{ChunkedCapture, CodecSupport, RecordingChunks};
use crate::error::{InvalidStateTransition, NetworkTimeoutError, TransportError};
use crate::media::{MediaAcquirer, MediaDevices, MediaStreamHandle, MediaTrack};
use crate::storage::{BlobStorage, MetadataStore};
use crate::transport::{ContextLoader, ConversationTransport, TransportConfig, TransportEvent};

/// External collaborators the orchestrator drives
#[derive(Clone)]
pub struct SessionPorts {
    pub devices: Arc<dyn MediaDevices>,
    pub codecs: Arc<dyn CodecSupport>,
    pub transport: Arc<dyn ConversationTransport>,
    pub storage: Arc<dyn BlobStorage>,
    pub metadata: Arc<dyn MetadataStore>,
    pub context: Option<Arc<dyn ContextLoader>>,
    pub clip_fetcher: Option<Arc<dyn ClipFetcher>>,
}

/// What a `start()` call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session is under way; it becomes active once the transport connects
    Started { session_id: String },
    /// A session was already starting, active or stopping
    Ignored(SessionState),
    /// `stop()` arrived while starting; the remaining steps were skipped
    Cancelled,
}

/// Result of the (single) save performed by `stop()`
#[derive(Debug, Clone, Default)]
pub struct StopReport {
    pub session_id: Option<String>,
    pub chunks: RecordingChunks,
    /// The record as persisted (recording fields stay empty when nothing was uploaded)
    pub record: Option<SessionRecord>,
    pub record_created: bool,
    pub artifact_url: Option<String>,
    /// Non-fatal problems hit while saving
    pub warnings: Vec<String>,
}

/// Resources owned by the live session
struct ActiveSession {
    session: RecordingSession,
    started: Instant,
    media: Option<MediaStreamHandle>,
    graph: Option<Arc<AudioGraph>>,
    capture: Option<ChunkedCapture>,
    bridge: Option<RemoteAudioBridge>,
    events: Option<JoinHandle<()>>,
    transport_initialized: bool,
}

impl ActiveSession {
    fn new(session: RecordingSession) -> Self {
        Self {
            session,
            started: Instant::now(),
            media: None,
            graph: None,
            capture: None,
            bridge: None,
            events: None,
            transport_initialized: false,
        }
    }

    /// Tear down capture, graph and media tracks (in that order)
    async fn release(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.shutdown();
        }
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.stop().await {
                warn!("Failed to stop capture during teardown: {:#}", e);
            }
        }
        if let Some(graph) = self.graph.take() {
            graph.close().await;
        }
        if let Some(media) = self.media.take() {
            media.stop_tracks();
            info!("Released camera/microphone (stream {})", media.id());
        }
    }
}

struct Inner {
    config: SessionConfig,
    ports: SessionPorts,
    acquirer: MediaAcquirer,
    state: watch::Sender<SessionState>,
    saving: AtomicBool,
    lifecycle: tokio::sync::Mutex<()>,
    active: Mutex<Option<ActiveSession>>,
    report: OnceCell<StopReport>,
    last_error: Mutex<Option<String>>,
}

impl Inner {
    fn set_last_error(&self, message: String) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = Some(message);
        }
    }

    fn take_active(&self) -> Option<ActiveSession> {
        self.active.lock().ok().and_then(|mut a| a.take())
    }

    fn with_active<T>(&self, f: impl FnOnce(&ActiveSession) -> Option<T>) -> Option<T> {
        self.active.lock().ok().and_then(|a| a.as_ref().and_then(f))
    }
}

/// Sequences acquisition, capture, the conversation and persistence for a
/// single session
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    pub fn new(config: SessionConfig, ports: SessionPorts) -> Self {
        let acquirer = MediaAcquirer::probe(Arc::clone(&ports.devices));
        let (state, _) = watch::channel(SessionState::Idle);

        Self {
            inner: Arc::new(Inner {
                config,
                ports,
                acquirer,
                state,
                saving: AtomicBool::new(false),
                lifecycle: tokio::sync::Mutex::new(()),
                active: Mutex::new(None),
                report: OnceCell::new(),
                last_error: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner
            .with_active(|a| Some(a.session.session_id.clone()))
    }

    /// Time since the session started
    pub fn elapsed(&self) -> Option<Duration> {
        self.inner.with_active(|a| Some(a.started.elapsed()))
    }

    /// Local camera/microphone stream for a preview surface (read-only)
    pub fn preview_stream(&self) -> Option<MediaStreamHandle> {
        self.inner.with_active(|a| a.media.clone())
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().ok().and_then(|e| e.clone())
    }

    /// Whether the agent's audio has been patched into the mix
    pub fn remote_audio_bridged(&self) -> bool {
        self.inner
            .with_active(|a| a.bridge.as_ref().map(RemoteAudioBridge::is_bridged))
            .unwrap_or(false)
    }

    /// Streams currently connected to the mixing graph
    pub fn audio_connections(&self) -> Option<usize> {
        self.inner
            .with_active(|a| a.graph.as_ref().map(|g| g.connection_count()))
    }

    /// Splice an auxiliary clip into the recording without waiting for it
    pub fn inject_clip(&self, data: Vec<u8>) -> Option<JoinHandle<()>> {
        let graph = self.inner.with_active(|a| a.graph.clone());
        match graph {
            Some(graph) => Some(graph.inject_decoded_buffer(data)),
            None => {
                debug!("No active audio graph; clip dropped");
                None
            }
        }
    }

    /// Fetch a clip and splice it into the recording without waiting for it
    pub fn inject_clip_url(&self, url: impl Into<String>) -> Option<JoinHandle<()>> {
        let graph = self.inner.with_active(|a| a.graph.clone())?;
        let fetcher: Arc<dyn ClipFetcher> = match &self.inner.ports.clip_fetcher {
            Some(fetcher) => Arc::clone(fetcher),
            None => Arc::new(HttpClipFetcher::new()),
        };
        Some(graph.injector().inject_url(fetcher, url.into()))
    }

    /// Start a session
    ///
    /// Media is acquired and capture is recording before the transport is
    /// initialized. The session becomes `Active` when the transport reports
    /// `Connected`.
    pub async fn start(&self) -> Result<StartOutcome> {
        let inner = &self.inner;

        // Holding the lifecycle lock before leaving Idle keeps a concurrent
        // stop() from seeing Starting without a session to tear down
        let Ok(_lifecycle) = inner.lifecycle.try_lock() else {
            let current = self.state();
            if current.is_terminal() {
                return Err(InvalidStateTransition {
                    current_state: current,
                    action: "start a session".to_string(),
                }
                .into());
            }
            warn!("start() ignored: lifecycle busy in state {}", current);
            return Ok(StartOutcome::Ignored(current));
        };

        let mut observed = SessionState::Idle;
        let claimed = inner.state.send_if_modified(|state| {
            observed = *state;
            if *state == SessionState::Idle {
                *state = SessionState::Starting;
                true
            } else {
                false
            }
        });

        if !claimed {
            if observed.is_busy() {
                warn!("start() ignored: session already {}", observed);
                return Ok(StartOutcome::Ignored(observed));
            }
            return Err(InvalidStateTransition {
                current_state: observed,
                action: "start a session".to_string(),
            }
            .into());
        }

        let session_id = Uuid::new_v4().to_string();
        info!(
            "Starting session {} (recording: {}, {})",
            session_id, inner.config.preference, inner.config.aspect_ratio
        );

        let mut active = ActiveSession::new(RecordingSession::new(
            session_id.clone(),
            inner.config.preference,
            inner.config.aspect_ratio,
        ));

        match self.run_start(&mut active).await {
            Ok(completed) => {
                if let Ok(mut slot) = inner.active.lock() {
                    *slot = Some(active);
                }

                if completed {
                    info!("Session {} started; waiting for conversation", session_id);
                    Ok(StartOutcome::Started { session_id })
                } else {
                    info!("Session {} start cancelled by stop()", session_id);
                    Ok(StartOutcome::Cancelled)
                }
            }
            Err(e) => {
                error!("Failed to start session {}: {:#}", session_id, e);
                active.release().await;
                if let Some(events) = active.events.take() {
                    events.abort();
                }
                inner.set_last_error(format!("{:#}", e));
                inner.state.send_replace(SessionState::Failed);
                Err(e)
            }
        }
    }

    fn stop_requested(&self) -> bool {
        self.inner.saving.load(Ordering::SeqCst)
    }

    /// Returns Ok(false) when a stop request cut the sequence short
    async fn run_start(&self, active: &mut ActiveSession) -> Result<bool> {
        let inner = &self.inner;
        let config = &inner.config;
        let transport = Arc::clone(&inner.ports.transport);

        if config.preference.wants_recording() {
            let media = inner
                .acquirer
                .acquire(config.preference, config.aspect_ratio)
                .await
                .context("Failed to acquire camera/microphone")?;
            active.media = Some(media.clone());

            if self.stop_requested() {
                return Ok(false);
            }

            let graph = Arc::new(
                AudioGraph::build(&media, None, config.mixer.clone())
                    .context("Failed to build audio graph")?,
            );
            active.graph = Some(Arc::clone(&graph));

            let mut tracks: Vec<MediaTrack> = media.video_tracks().cloned().collect();
            tracks.push(graph.destination());
            let combined = MediaStreamHandle::from_tracks(tracks);

            let mut capture =
                ChunkedCapture::new(config.capture_config(), Arc::clone(&inner.ports.codecs));
            let format = capture
                .start(&combined)
                .await
                .context("Failed to start capture")?;
            active.session.format = Some(format);
            active.capture = Some(capture);

            active.bridge = Some(RemoteAudioBridge::new(
                graph,
                Arc::clone(&transport),
                config.bridge_retry_delay,
            ));
        } else {
            info!("Recording disabled; skipping media acquisition");
        }

        if self.stop_requested() {
            return Ok(false);
        }

        let context = match &inner.ports.context {
            Some(loader) => match loader.load(&active.session.session_id).await {
                Ok(context) => context,
                Err(e) => {
                    warn!("Failed to load session context, continuing without: {:#}", e);
                    serde_json::Value::Null
                }
            },
            None => serde_json::Value::Null,
        };

        if self.stop_requested() {
            return Ok(false);
        }

        let (events_tx, events_rx) = mpsc::channel(64);
        active.events = Some(tokio::spawn(run_events(
            Arc::clone(&self.inner),
            events_rx,
            active.bridge.clone(),
        )));

        let transport_config = TransportConfig {
            session_id: active.session.session_id.clone(),
            agent_id: config.agent_id.clone(),
            context,
        };

        transport
            .initialize(transport_config, events_tx)
            .await
            .context("Failed to connect conversational transport")?;
        active.transport_initialized = true;

        Ok(true)
    }

    /// Stop the session and persist it
    ///
    /// Safe to call at any time: before `start()` it returns an empty report;
    /// concurrent calls share one save and receive the same report.
    pub async fn stop(&self) -> Result<StopReport> {
        let current = self.state();
        if current == SessionState::Idle {
            info!("stop() without a session; nothing to save");
            return Ok(StopReport::default());
        }
        if current == SessionState::Failed {
            debug!("stop() after failed start; nothing to save");
            return Ok(StopReport::default());
        }

        if self.inner.saving.swap(true, Ordering::SeqCst) {
            info!("Save already in progress; waiting for it");
        }

        let report = self.inner.report.get_or_init(|| self.save()).await;
        Ok(report.clone())
    }

    async fn save(&self) -> StopReport {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;

        let Some(mut active) = inner.take_active() else {
            info!("No session resources to save");
            return StopReport::default();
        };

        let session_id = active.session.session_id.clone();
        inner.state.send_replace(SessionState::Stopping);
        info!("Stopping session {}", session_id);

        let mut report = StopReport {
            session_id: Some(session_id.clone()),
            ..Default::default()
        };

        if active.transport_initialized {
            if let Err(e) = inner.ports.transport.stop().await {
                warn!("Failed to disconnect transport: {}", e);
                report.warnings.push(e.to_string());
            }
        }
        if let Some(events) = active.events.take() {
            events.abort();
        }

        // Stop feeding the mix, then let the mixer publish what it still holds
        if let Some(media) = &active.media {
            media.stop_tracks();
        }
        if let Some(graph) = &active.graph {
            graph.drain().await;
        }

        let recorded = match active.capture.take() {
            Some(mut capture) => match capture.stop().await {
                Ok(recorded) => recorded,
                Err(e) => {
                    warn!("Capture flush failed: {:#}", e);
                    report.warnings.push(format!("{:#}", e));
                    RecordingChunks::default()
                }
            },
            None => RecordingChunks::default(),
        };
        if let Some(failure) = &recorded.failure {
            report.warnings.push(format!("Capture ended early: {}", failure));
        }
        active.release().await;

        report.chunks = recorded.clone();
        let finalized = active.session.finalize(recorded);
        let mut record = self.build_record(&finalized);

        match timeout(inner.config.save_timeout, inner.ports.metadata.create(&record)).await {
            Ok(Ok(())) => {
                report.record_created = true;
                info!("Session record {} created", session_id);
            }
            Ok(Err(e)) => {
                warn!("Failed to create session record: {:#}", e);
                report.warnings.push(format!("{:#}", e));
            }
            Err(_) => {
                let err = NetworkTimeoutError {
                    operation: "session record save".to_string(),
                    after: inner.config.save_timeout,
                };
                warn!("{}; continuing", err);
                report.warnings.push(err.to_string());
            }
        }

        if finalized.has_media() {
            self.upload_artifact(&finalized, &mut record, &mut report).await;
        }

        report.record = Some(record);
        inner.state.send_replace(SessionState::Saved);
        info!("Session {} saved", session_id);

        report
    }

    async fn upload_artifact(
        &self,
        finalized: &FinalizedRecording,
        record: &mut SessionRecord,
        report: &mut StopReport,
    ) {
        let inner = &self.inner;
        let Some(format) = finalized.format.clone() else {
            return;
        };
        let Some(path) = finalized.artifact_path(Utc::now().timestamp_millis()) else {
            return;
        };

        let spec = finalized.audio_spec.unwrap_or(inner.config.mixer.spec);
        let artifact = match inner.ports.codecs.assemble(&format, spec, &finalized.chunks) {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!("Failed to assemble artifact: {:#}", e);
                report.warnings.push(format!("{:#}", e));
                return;
            }
        };
        let size = artifact.len() as u64;

        info!("Uploading {} ({} bytes)", path, size);
        let upload = inner
            .ports
            .storage
            .upload(&path, artifact, format.content_type());

        let stored = match timeout(inner.config.upload_timeout, upload).await {
            Ok(Ok(stored)) => stored,
            Ok(Err(e)) => {
                warn!("Artifact upload failed: {:#}", e);
                report.warnings.push(format!("{:#}", e));
                return;
            }
            Err(_) => {
                let err = NetworkTimeoutError {
                    operation: "artifact upload".to_string(),
                    after: inner.config.upload_timeout,
                };
                warn!("{}; recording left unattached", err);
                report.warnings.push(err.to_string());
                return;
            }
        };

        let url = inner.ports.storage.public_url(&stored);
        report.artifact_url = Some(url.clone());

        let update = RecordingUpdate {
            recording_url: url,
            recording_size_bytes: size,
            recording_duration_secs: finalized.capture_duration.as_secs_f64(),
        };

        match timeout(
            inner.config.save_timeout,
            inner.ports.metadata.update(&finalized.session_id, &update),
        )
        .await
        {
            Ok(Ok(())) => record.apply(&update),
            Ok(Err(e)) => {
                warn!("Failed to attach recording to session record: {:#}", e);
                report.warnings.push(format!("{:#}", e));
            }
            Err(_) => {
                let err = NetworkTimeoutError {
                    operation: "session record update".to_string(),
                    after: inner.config.save_timeout,
                };
                warn!("{}", err);
                report.warnings.push(err.to_string());
            }
        }
    }

    fn build_record(&self, finalized: &FinalizedRecording) -> SessionRecord {
        let config = &self.inner.config;
        let has_media = finalized.has_media();
        let elapsed = finalized.ended_at - finalized.started_at;

        SessionRecord {
            session_id: finalized.session_id.clone(),
            participant_id: config.participant_id.clone(),
            scenario_id: config.scenario_id.clone(),
            agent_id: config.agent_id.clone(),
            started_at: finalized.started_at,
            ended_at: finalized.ended_at,
            duration_secs: elapsed.num_milliseconds() as f64 / 1000.0,
            recording_preference: finalized.preference,
            aspect_ratio: finalized.aspect_ratio,
            recording_format: finalized
                .format
                .as_ref()
                .filter(|_| has_media)
                .map(|f| f.mime.clone()),
            recording_duration_secs: has_media
                .then(|| finalized.capture_duration.as_secs_f64()),
            recording_url: None,
            recording_size_bytes: None,
        }
    }
}

async fn run_events(
    inner: Arc<Inner>,
    mut events: mpsc::Receiver<TransportEvent>,
    bridge: Option<RemoteAudioBridge>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected => {
                let activated = inner.state.send_if_modified(|state| {
                    if *state == SessionState::Starting {
                        *state = SessionState::Active;
                        true
                    } else {
                        false
                    }
                });
                if activated {
                    info!("Conversation connected; session active");
                } else {
                    debug!("Connected event ignored in state {}", *inner.state.borrow());
                }
            }
            TransportEvent::Disconnected => info!("Conversational transport disconnected"),
            TransportEvent::AgentStartSpeaking => {
                debug!("Agent started speaking");
                if let Some(bridge) = &bridge {
                    bridge.on_agent_start_speaking();
                }
            }
            TransportEvent::AgentStartListening => debug!("Agent listening"),
            TransportEvent::RemoteAudioTrackAvailable(stream) => {
                if let Some(bridge) = &bridge {
                    bridge.on_remote_track_available(&stream);
                }
            }
            TransportEvent::Error(message) => {
                let err = TransportError::Remote(message);
                error!("{}", err);
                inner.set_last_error(err.to_string());
            }
        }
    }
    debug!("Transport event stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{
        MemoryBlobStorage, MemoryMetadataStore, ScriptedTransport, SimulatedCodecs,
        SimulatedDevices,
    };

    fn orchestrator() -> SessionOrchestrator {
        let ports = SessionPorts {
            devices: Arc::new(SimulatedDevices::new()),
            codecs: Arc::new(SimulatedCodecs::browser()),
            transport: Arc::new(ScriptedTransport::new()),
            storage: Arc::new(MemoryBlobStorage::new()),
            metadata: Arc::new(MemoryMetadataStore::new()),
            context: None,
            clip_fetcher: None,
        };
        SessionOrchestrator::new(SessionConfig::default(), ports)
    }

    #[tokio::test(start_paused = true)]
    async fn start_stays_idle_while_lifecycle_is_held() -> Result<()> {
        let orch = orchestrator();

        let guard = orch.inner.lifecycle.lock().await;
        let outcome = orch.start().await?;
        assert_eq!(outcome, StartOutcome::Ignored(SessionState::Idle));
        assert_eq!(orch.state(), SessionState::Idle);
        drop(guard);

        // Nothing was claimed, so a later start still runs
        let outcome = orch.start().await?;
        assert!(matches!(outcome, StartOutcome::Started { .. }));

        let report = orch.stop().await?;
        assert!(report.session_id.is_some());
        assert_eq!(orch.state(), SessionState::Saved);

        Ok(())
    }
}
