// Audio mixing graph for combining the participant and the agent
//
// The microphone drives the graph: every microphone frame yields one mixed
// frame on the destination track. Other live sources (the remote agent) and
// one-shot clips are buffered as sample queues and summed into the next
// microphone frames with clipping.

use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::{conform, AudioFrame, AudioSpec, SourceKind};
use super::inject::AudioInjector;
use crate::media::{MediaStreamHandle, MediaTrack};

/// Configuration for the mixing graph
#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Output format; sources are conformed to it
    pub spec: AudioSpec,
    /// Maximum backlog kept per live source in milliseconds (default: 200ms)
    /// Older samples are dropped to prevent unbounded buffering
    pub max_buffer_delay_ms: u64,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            spec: AudioSpec::default(),
            max_buffer_delay_ms: 200,
        }
    }
}

pub(crate) type SourceId = Uuid;

pub(crate) enum GraphInput {
    Frame { source: SourceId, frame: AudioFrame },
    OneShot { samples: Vec<i16> },
    /// Acknowledged once everything queued before it has been mixed
    Flush(oneshot::Sender<()>),
}

/// Sample-level mixing state, driven by the clock source
pub(crate) struct MixBus {
    config: MixerConfig,
    clock: SourceId,
    pending: HashMap<SourceId, VecDeque<i16>>,
    one_shots: Vec<VecDeque<i16>>,
}

impl MixBus {
    pub(crate) fn new(config: MixerConfig, clock: SourceId) -> Self {
        Self {
            config,
            clock,
            pending: HashMap::new(),
            one_shots: Vec::new(),
        }
    }

    /// Route a frame. Returns a mixed frame when the frame came from the clock.
    pub(crate) fn push(&mut self, source: SourceId, frame: AudioFrame) -> Option<AudioFrame> {
        let timestamp_ms = frame.timestamp_ms;
        let samples = self.conform_frame(frame);

        if source == self.clock {
            return Some(self.mix_clock_frame(samples, timestamp_ms));
        }

        let cap = self.max_backlog_samples();
        let buffer = self.pending.entry(source).or_default();
        buffer.extend(samples);

        if buffer.len() > cap {
            let excess = buffer.len() - cap;
            debug!("Dropping {} stale samples from live source {}", excess, source);
            buffer.drain(..excess);
        }

        None
    }

    /// Queue a clip to play once from the next clock frame
    pub(crate) fn push_one_shot(&mut self, samples: Vec<i16>) {
        if !samples.is_empty() {
            self.one_shots.push(samples.into());
        }
    }

    pub(crate) fn active_one_shots(&self) -> usize {
        self.one_shots.len()
    }

    fn conform_frame(&self, frame: AudioFrame) -> Vec<i16> {
        let spec = frame.spec();
        if spec == self.config.spec {
            frame.samples
        } else {
            conform(&frame.samples, spec, self.config.spec)
        }
    }

    fn max_backlog_samples(&self) -> usize {
        let spec = self.config.spec;
        (spec.sample_rate as u64 * spec.channels as u64 * self.config.max_buffer_delay_ms / 1000)
            as usize
    }

    fn mix_clock_frame(&mut self, clock: Vec<i16>, timestamp_ms: u64) -> AudioFrame {
        let len = clock.len();
        let mut acc: Vec<i32> = clock.into_iter().map(i32::from).collect();

        let queues = self.pending.values_mut().chain(self.one_shots.iter_mut());
        for queue in queues {
            let take = len.min(queue.len());
            for (slot, sample) in acc.iter_mut().zip(queue.drain(..take)) {
                *slot += sample as i32;
            }
        }

        self.one_shots.retain(|clip| !clip.is_empty());

        // Clip to prevent overflow
        let samples = acc
            .into_iter()
            .map(|s| s.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
            .collect();

        AudioFrame {
            samples,
            sample_rate: self.config.spec.sample_rate,
            channels: self.config.spec.channels,
            timestamp_ms,
            source: SourceKind::Mixed,
        }
    }
}

/// Per-session mixing graph: microphone + live sources + one-shot clips
/// converging on one destination track
pub struct AudioGraph {
    config: MixerConfig,
    destination: MediaTrack,
    inbox: mpsc::Sender<GraphInput>,
    connected: Mutex<HashSet<Uuid>>,
    forwarders: Mutex<Vec<(MediaTrack, JoinHandle<()>)>>,
    mixer_task: Mutex<Option<JoinHandle<()>>>,
}

impl AudioGraph {
    /// Connect the microphone (and optionally a second live source) to a
    /// fresh destination track. Must be called inside a tokio runtime.
    pub fn build(
        mic: &MediaStreamHandle,
        remote: Option<&MediaStreamHandle>,
        config: MixerConfig,
    ) -> Result<Self> {
        let Some(mic_track) = mic.audio_tracks().next() else {
            bail!("Microphone stream {} has no audio track", mic.id());
        };

        info!(
            "Audio graph initialized: {}Hz, {} channels, {}ms max backlog",
            config.spec.sample_rate, config.spec.channels, config.max_buffer_delay_ms
        );

        let (inbox, inbox_rx) = mpsc::channel(256);
        let destination = MediaTrack::audio("mixed-audio");
        let clock = mic_track.id();

        let bus = MixBus::new(config.clone(), clock);
        let mixer_task = tokio::spawn(run_mixer(bus, inbox_rx, destination.clone()));

        let graph = Self {
            config,
            destination,
            inbox,
            connected: Mutex::new(HashSet::new()),
            forwarders: Mutex::new(Vec::new()),
            mixer_task: Mutex::new(Some(mixer_task)),
        };

        graph.connect(mic, SourceKind::Microphone);
        if let Some(remote) = remote {
            graph.connect(remote, SourceKind::Remote);
        }

        Ok(graph)
    }

    /// The recordable mixed track
    pub fn destination(&self) -> MediaTrack {
        self.destination.clone()
    }

    pub fn spec(&self) -> AudioSpec {
        self.config.spec
    }

    /// Patch in a live source after construction
    ///
    /// Returns `false` without connecting anything when this stream
    /// instance is already part of the graph.
    pub fn add_live_source(&self, stream: &MediaStreamHandle) -> bool {
        self.connect(stream, SourceKind::Remote)
    }

    /// Number of distinct streams connected (microphone included)
    pub fn connection_count(&self) -> usize {
        self.connected.lock().map(|set| set.len()).unwrap_or(0)
    }

    /// Handle for splicing auxiliary clips into this graph
    pub fn injector(&self) -> AudioInjector {
        AudioInjector::new(self.inbox.clone(), self.config.spec)
    }

    /// Decode a clip in the background and play it once into the mix
    ///
    /// Returns immediately; decode failures are logged and dropped.
    pub fn inject_decoded_buffer(&self, data: Vec<u8>) -> JoinHandle<()> {
        self.injector().inject_decoded_buffer(data)
    }

    fn connect(&self, stream: &MediaStreamHandle, kind: SourceKind) -> bool {
        {
            let Ok(mut connected) = self.connected.lock() else {
                return false;
            };
            if !connected.insert(stream.id()) {
                debug!("Stream {} already connected to audio graph", stream.id());
                return false;
            }
        }

        let mut spawned = 0;
        for track in stream.audio_tracks() {
            if let Some(rx) = track.subscribe_audio() {
                let handle = tokio::spawn(forward_track(
                    track.clone(),
                    kind,
                    rx,
                    self.inbox.clone(),
                ));
                if let Ok(mut forwarders) = self.forwarders.lock() {
                    forwarders.push((track.clone(), handle));
                }
                spawned += 1;
            }
        }

        if spawned == 0 {
            warn!("Stream {} has no audio tracks to mix", stream.id());
        }

        info!(
            "Connected {:?} stream {} to audio graph ({} tracks)",
            kind,
            stream.id(),
            spawned
        );

        true
    }

    /// Mix out everything already published by sources whose tracks have
    /// been stopped; resolves once those frames are on the destination
    pub async fn drain(&self) {
        let finished: Vec<JoinHandle<()>> = match self.forwarders.lock() {
            Ok(mut forwarders) => {
                let (stopped, live): (Vec<_>, Vec<_>) = forwarders
                    .drain(..)
                    .partition(|(track, _)| track.is_stopped());
                *forwarders = live;
                stopped.into_iter().map(|(_, handle)| handle).collect()
            }
            Err(_) => Vec::new(),
        };
        futures::future::join_all(finished).await;

        let (ack, done) = oneshot::channel();
        if self.inbox.send(GraphInput::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
        debug!("Audio graph drained");
    }

    /// Tear the graph down: stop forwarding, stop mixing, end the destination
    pub async fn close(&self) {
        let forwarders: Vec<JoinHandle<()>> = self
            .forwarders
            .lock()
            .map(|mut f| f.drain(..).map(|(_, handle)| handle).collect())
            .unwrap_or_default();
        for handle in &forwarders {
            handle.abort();
        }
        futures::future::join_all(forwarders).await;

        let mixer = self.mixer_task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = mixer {
            task.abort();
            let _ = task.await;
        }

        self.destination.stop();
        info!("Audio graph closed");
    }
}

async fn forward_track(
    track: MediaTrack,
    kind: SourceKind,
    mut rx: broadcast::Receiver<AudioFrame>,
    inbox: mpsc::Sender<GraphInput>,
) {
    let source = track.id();
    loop {
        let received = tokio::select! {
            biased;
            received = rx.recv() => received,
            _ = track.stopped() => break,
        };

        match received {
            Ok(mut frame) => {
                frame.source = kind;
                if inbox.send(GraphInput::Frame { source, frame }).await.is_err() {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("{:?} source lagged; skipped {} frames", kind, n);
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }

    // Frames published before the track stopped still belong to the mix
    while let Ok(mut frame) = rx.try_recv() {
        frame.source = kind;
        if inbox.send(GraphInput::Frame { source, frame }).await.is_err() {
            return;
        }
    }
    debug!("{:?} source {} stopped", kind, source);
}

async fn run_mixer(mut bus: MixBus, mut inbox: mpsc::Receiver<GraphInput>, destination: MediaTrack) {
    while let Some(input) = inbox.recv().await {
        match input {
            GraphInput::Frame { source, frame } => {
                if let Some(mixed) = bus.push(source, frame) {
                    destination.push_audio(mixed);
                }
            }
            GraphInput::OneShot { samples } => {
                debug!("Mixing in one-shot clip ({} samples)", samples.len());
                bus.push_one_shot(samples);
            }
            GraphInput::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(samples: Vec<i16>, timestamp_ms: u64, source: SourceKind) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate: 16000,
            channels: 1,
            timestamp_ms,
            source,
        }
    }

    #[test]
    fn clock_frame_alone_passes_through() {
        let clock = Uuid::new_v4();
        let mut bus = MixBus::new(MixerConfig::default(), clock);

        let mixed = bus
            .push(clock, frame(vec![100, 200, 300], 40, SourceKind::Microphone))
            .unwrap();

        assert_eq!(mixed.samples, vec![100, 200, 300]);
        assert_eq!(mixed.timestamp_ms, 40);
        assert_eq!(mixed.source, SourceKind::Mixed);
    }

    #[test]
    fn remote_samples_are_summed_into_next_clock_frame() {
        let clock = Uuid::new_v4();
        let remote = Uuid::new_v4();
        let mut bus = MixBus::new(MixerConfig::default(), clock);

        assert!(bus.push(remote, frame(vec![50, 100], 0, SourceKind::Remote)).is_none());
        let mixed = bus
            .push(clock, frame(vec![100, 200, 300], 0, SourceKind::Microphone))
            .unwrap();

        assert_eq!(mixed.samples, vec![150, 300, 300]);
    }

    #[test]
    fn mixing_clips_to_i16_range() {
        let clock = Uuid::new_v4();
        let remote = Uuid::new_v4();
        let mut bus = MixBus::new(MixerConfig::default(), clock);

        bus.push(remote, frame(vec![200, -200], 0, SourceKind::Remote));
        let mixed = bus
            .push(
                clock,
                frame(vec![i16::MAX - 100, i16::MIN + 100], 0, SourceKind::Microphone),
            )
            .unwrap();

        assert_eq!(mixed.samples, vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn one_shot_plays_across_frames_then_ends() {
        let clock = Uuid::new_v4();
        let mut bus = MixBus::new(MixerConfig::default(), clock);
        bus.push_one_shot(vec![1, 2, 3, 4, 5]);

        let first = bus.push(clock, frame(vec![0; 3], 0, SourceKind::Microphone)).unwrap();
        assert_eq!(first.samples, vec![1, 2, 3]);
        assert_eq!(bus.active_one_shots(), 1);

        let second = bus.push(clock, frame(vec![0; 3], 1, SourceKind::Microphone)).unwrap();
        assert_eq!(second.samples, vec![4, 5, 0]);
        assert_eq!(bus.active_one_shots(), 0);
    }

    #[test]
    fn live_backlog_is_capped() {
        let clock = Uuid::new_v4();
        let remote = Uuid::new_v4();
        let config = MixerConfig {
            spec: AudioSpec::default(),
            max_buffer_delay_ms: 10, // 160 samples at 16kHz mono
        };
        let mut bus = MixBus::new(config, clock);

        bus.push(remote, frame(vec![1; 100], 0, SourceKind::Remote));
        bus.push(remote, frame(vec![2; 100], 6, SourceKind::Remote));

        assert_eq!(bus.pending[&remote].len(), 160);
        // The oldest samples went first
        assert_eq!(bus.pending[&remote].front(), Some(&1));
        assert_eq!(bus.pending[&remote].iter().filter(|&&s| s == 1).count(), 60);
    }

    #[test]
    fn mismatched_source_is_conformed() {
        let clock = Uuid::new_v4();
        let remote = Uuid::new_v4();
        let mut bus = MixBus::new(MixerConfig::default(), clock);

        let stereo_32k = AudioFrame {
            samples: vec![10, 30, 10, 30, 10, 30, 10, 30],
            sample_rate: 32000,
            channels: 2,
            timestamp_ms: 0,
            source: SourceKind::Remote,
        };
        bus.push(remote, stereo_32k);

        assert_eq!(bus.pending[&remote].len(), 2);
        assert!(bus.pending[&remote].iter().all(|&s| s == 20));
    }

    #[tokio::test]
    async fn drain_mixes_frames_published_before_stop() {
        let mic_track = MediaTrack::audio("mic");
        let mic = MediaStreamHandle::from_tracks(vec![mic_track.clone()]);
        let graph = AudioGraph::build(&mic, None, MixerConfig::default()).unwrap();
        let mut out = graph.destination().subscribe_audio().unwrap();

        for i in 0..5 {
            mic_track.push_audio(frame(vec![7; 1600], i * 100, SourceKind::Microphone));
        }
        mic.stop_tracks();
        graph.drain().await;

        let mut mixed = 0;
        while let Ok(frame) = out.try_recv() {
            assert!(frame.samples.iter().all(|&s| s == 7));
            mixed += 1;
        }
        assert_eq!(mixed, 5);

        graph.close().await;
    }
}
