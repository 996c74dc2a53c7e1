//! Patches the agent's audio into the mixing graph once it shows up
//!
//! The first "agent started speaking" signal triggers an attempt to grab the
//! remote stream; if the transport has not published it yet, one retry runs
//! after `retry_delay`. A "remote track available" signal bridges directly.
//! Whichever path wins, the stream is connected at most once per session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::audio::AudioGraph;
use crate::media::MediaStreamHandle;
use crate::transport::ConversationTransport;

/// Default wait before the single retry
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

struct BridgeState {
    graph: Arc<AudioGraph>,
    transport: Arc<dyn ConversationTransport>,
    retry_delay: Duration,
    bridged: AtomicBool,
    speaking_seen: AtomicBool,
    retry_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct RemoteAudioBridge {
    state: Arc<BridgeState>,
}

impl RemoteAudioBridge {
    pub fn new(
        graph: Arc<AudioGraph>,
        transport: Arc<dyn ConversationTransport>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            state: Arc::new(BridgeState {
                graph,
                transport,
                retry_delay,
                bridged: AtomicBool::new(false),
                speaking_seen: AtomicBool::new(false),
                retry_task: Mutex::new(None),
            }),
        }
    }

    pub fn is_bridged(&self) -> bool {
        self.state.bridged.load(Ordering::SeqCst)
    }

    /// The transport published the agent's audio
    pub fn on_remote_track_available(&self, stream: &MediaStreamHandle) -> bool {
        self.bridge(stream)
    }

    /// The agent started speaking. Only the first signal does anything.
    pub fn on_agent_start_speaking(&self) {
        if self.state.speaking_seen.swap(true, Ordering::SeqCst) || self.is_bridged() {
            return;
        }

        if let Some(stream) = self.state.transport.remote_audio_stream() {
            self.bridge(&stream);
            return;
        }

        debug!(
            "Remote audio not published yet; retrying in {}ms",
            self.state.retry_delay.as_millis()
        );

        let bridge = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(bridge.state.retry_delay).await;

            if bridge.is_bridged() {
                return;
            }

            match bridge.state.transport.remote_audio_stream() {
                Some(stream) => {
                    bridge.bridge(&stream);
                }
                None => error!(
                    "Remote audio still unavailable after {}ms; agent audio will be missing from the recording",
                    bridge.state.retry_delay.as_millis()
                ),
            }
        });

        if let Ok(mut slot) = self.state.retry_task.lock() {
            *slot = Some(task);
        }
    }

    /// Cancel a pending retry
    pub fn shutdown(&self) {
        if let Some(task) = self.state.retry_task.lock().ok().and_then(|mut t| t.take()) {
            task.abort();
        }
    }

    fn bridge(&self, stream: &MediaStreamHandle) -> bool {
        if self
            .state
            .bridged
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Remote audio already bridged; ignoring stream {}", stream.id());
            return false;
        }

        self.state.graph.add_live_source(stream);
        info!("Bridged remote agent audio (stream {})", stream.id());
        true
    }
}
