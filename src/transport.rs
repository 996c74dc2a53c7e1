//! Conversational transport boundary
//!
//! The real-time voice agent connection is an external collaborator. It
//! reports what happens through `TransportEvent`s on a channel handed over
//! at `initialize`, and exposes the agent's audio once it is published.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::media::MediaStreamHandle;

/// Everything the transport can tell the orchestrator
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    AgentStartSpeaking,
    AgentStartListening,
    /// The agent's audio has been published
    RemoteAudioTrackAvailable(MediaStreamHandle),
    Error(String),
}

/// Parameters for connecting the transport
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    pub session_id: String,
    pub agent_id: Option<String>,
    /// Auxiliary context (scenario, prompts, ...) loaded before connecting
    #[serde(default)]
    pub context: serde_json::Value,
}

#[async_trait::async_trait]
pub trait ConversationTransport: Send + Sync {
    /// Start connecting. Progress is reported on `events`; `Connected`
    /// arrives once the conversation is live.
    async fn initialize(
        &self,
        config: TransportConfig,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError>;

    /// Disconnect
    async fn stop(&self) -> Result<(), TransportError>;

    /// The agent's audio, if already published
    fn remote_audio_stream(&self) -> Option<MediaStreamHandle>;
}

/// Loads auxiliary context passed to the transport at connect time
#[async_trait::async_trait]
pub trait ContextLoader: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<serde_json::Value>;
}
