use anyhow::{bail, Context, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec::{negotiate, CodecSupport, EncodingFormat, FragmentEncoder};
use crate::audio::{AudioFrame, AudioSpec, VideoFrame};
use crate::media::MediaStreamHandle;

/// Capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Interval between emitted fragments (default: 1 second)
    pub timeslice: Duration,
    /// Encodings to probe, in order of preference
    pub candidates: Vec<String>,
}

impl CaptureConfig {
    pub fn new(candidates: &[&str]) -> Self {
        Self {
            timeslice: Duration::from_secs(1),
            candidates: candidates.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// One encoded fragment
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position in the recording (0-indexed)
    pub index: usize,
    /// Emission time in milliseconds since capture started
    pub timestamp_ms: u64,
    pub data: Vec<u8>,
}

/// Everything a capture produced, in order
#[derive(Debug, Clone, Default)]
pub struct RecordingChunks {
    pub format: Option<EncodingFormat>,
    /// Audio layout of the encoded PCM, once a frame has been seen
    pub audio_spec: Option<AudioSpec>,
    pub chunks: Vec<Chunk>,
    /// Time between capture start and stop
    pub duration: Duration,
    /// Why the capture task ended abnormally; the chunks may be incomplete
    pub failure: Option<String>,
}

impl RecordingChunks {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(|c| c.data.len()).sum()
    }
}

#[derive(Default)]
struct Shared {
    chunks: Vec<Chunk>,
    audio_spec: Option<AudioSpec>,
}

struct Running {
    stop: CancellationToken,
    task: JoinHandle<Result<()>>,
}

/// Encodes a combined stream into an ordered list of timed fragments
pub struct ChunkedCapture {
    config: CaptureConfig,
    codecs: Arc<dyn CodecSupport>,
    shared: Arc<Mutex<Shared>>,
    format: Option<EncodingFormat>,
    running: Option<Running>,
    started_at: Option<Instant>,
    duration: Duration,
    failure: Option<String>,
}

impl ChunkedCapture {
    pub fn new(config: CaptureConfig, codecs: Arc<dyn CodecSupport>) -> Self {
        Self {
            config,
            codecs,
            shared: Arc::new(Mutex::new(Shared::default())),
            format: None,
            running: None,
            started_at: None,
            duration: Duration::ZERO,
            failure: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.running.is_some()
    }

    pub fn format(&self) -> Option<&EncodingFormat> {
        self.format.as_ref()
    }

    /// Negotiate an encoding and begin emitting fragments
    ///
    /// Returns once the capture task is running.
    pub async fn start(&mut self, stream: &MediaStreamHandle) -> Result<EncodingFormat> {
        if self.started_at.is_some() {
            bail!("Capture already started");
        }
        if self.config.timeslice.is_zero() {
            bail!("Capture timeslice must be greater than zero");
        }

        let format = negotiate(self.codecs.as_ref(), &self.config.candidates);
        let encoder = self
            .codecs
            .create_encoder(&format)
            .with_context(|| format!("Failed to create encoder for {}", format))?;

        let audio_rx = stream.audio_tracks().next().and_then(|t| t.subscribe_audio());
        let video_rx = stream.video_tracks().next().and_then(|t| t.subscribe_video());

        if audio_rx.is_none() {
            warn!("Capturing stream {} without an audio track", stream.id());
        }

        let stop = CancellationToken::new();
        let started_at = Instant::now();
        let task = tokio::spawn(run_capture(
            encoder,
            audio_rx,
            video_rx,
            self.config.timeslice,
            started_at,
            stop.clone(),
            Arc::clone(&self.shared),
        ));

        self.running = Some(Running { stop, task });
        self.started_at = Some(started_at);
        self.format = Some(format.clone());

        info!(
            "Chunked capture started: {} ({}ms fragments)",
            format,
            self.config.timeslice.as_millis()
        );

        Ok(format)
    }

    /// Stop capturing; resolves after the final fragment has been appended
    ///
    /// Without an active capture this only returns what already exists.
    pub async fn stop(&mut self) -> Result<RecordingChunks> {
        if let Some(running) = self.running.take() {
            running.stop.cancel();

            match running.task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Capture ended with error: {:#}", e);
                    self.failure = Some(format!("{:#}", e));
                }
                Err(e) => {
                    error!("Capture task panicked: {}", e);
                    self.failure = Some(format!("capture task failed: {}", e));
                }
            }

            if let Some(started_at) = self.started_at {
                self.duration = started_at.elapsed();
            }
        } else {
            debug!("stop() without an active capture");
        }

        let chunks = self.snapshot();
        if self.started_at.is_some() {
            info!(
                "Chunked capture complete: {} chunks, {} bytes, {:.1}s",
                chunks.len(),
                chunks.total_bytes(),
                chunks.duration.as_secs_f64()
            );
        }

        Ok(chunks)
    }

    /// Chunks appended so far
    pub fn snapshot(&self) -> RecordingChunks {
        let (chunks, audio_spec) = self
            .shared
            .lock()
            .map(|s| (s.chunks.clone(), s.audio_spec))
            .unwrap_or_default();

        RecordingChunks {
            format: self.format.clone(),
            audio_spec,
            chunks,
            duration: self.duration,
            failure: self.failure.clone(),
        }
    }
}

async fn recv_or_pending<T: Clone>(
    rx: &mut Option<broadcast::Receiver<T>>,
) -> Result<T, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn run_capture(
    mut encoder: Box<dyn FragmentEncoder>,
    mut audio_rx: Option<broadcast::Receiver<AudioFrame>>,
    mut video_rx: Option<broadcast::Receiver<VideoFrame>>,
    timeslice: Duration,
    started_at: Instant,
    stop: CancellationToken,
    shared: Arc<Mutex<Shared>>,
) -> Result<()> {
    let mut ticker = tokio::time::interval_at(started_at + timeslice, timeslice);
    let append = |data: Vec<u8>| {
        if data.is_empty() {
            return;
        }
        if let Ok(mut shared) = shared.lock() {
            let index = shared.chunks.len();
            let timestamp_ms = started_at.elapsed().as_millis() as u64;
            debug!("Chunk {} appended ({} bytes)", index, data.len());
            shared.chunks.push(Chunk {
                index,
                timestamp_ms,
                data,
            });
        }
    };

    loop {
        tokio::select! {
            biased;

            _ = stop.cancelled() => break,

            _ = ticker.tick() => {
                append(encoder.take_fragment()?);
            }

            frame = recv_or_pending(&mut audio_rx) => match frame {
                Ok(frame) => {
                    if let Ok(mut shared) = shared.lock() {
                        shared.audio_spec.get_or_insert(frame.spec());
                    }
                    encoder.push_audio(&frame)?;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Capture lagged behind audio; {} frames lost", n);
                }
                Err(broadcast::error::RecvError::Closed) => audio_rx = None,
            },

            frame = recv_or_pending(&mut video_rx) => match frame {
                Ok(frame) => encoder.push_video(&frame)?,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Capture lagged behind video; {} frames lost", n);
                }
                Err(broadcast::error::RecvError::Closed) => video_rx = None,
            },
        }
    }

    // Frames already published before the stop request still belong to the recording
    if let Some(rx) = audio_rx.as_mut() {
        while let Ok(frame) = rx.try_recv() {
            encoder.push_audio(&frame)?;
        }
    }
    if let Some(rx) = video_rx.as_mut() {
        while let Ok(frame) = rx.try_recv() {
            encoder.push_video(&frame)?;
        }
    }

    append(encoder.finish()?);
    Ok(())
}
