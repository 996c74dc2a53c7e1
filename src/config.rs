use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::{AudioSpec, MixerConfig};
use crate::media::{AspectRatio, RecordingPreference};
use crate::session::SessionConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub transport: TransportSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub preference: RecordingPreference,
    pub aspect_ratio: AspectRatio,
    pub chunk_interval_ms: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub max_buffer_delay_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            preference: RecordingPreference::AudioVideo,
            aspect_ratio: AspectRatio::Landscape,
            chunk_interval_ms: 1000,
            sample_rate: 16000,
            channels: 1,
            max_buffer_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub recordings_path: String,
    pub metadata_path: String,
    pub save_timeout_secs: u64,
    pub upload_timeout_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            recordings_path: "./recordings".to_string(),
            metadata_path: "./sessions".to_string(),
            save_timeout_secs: 30,
            upload_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub retry_delay_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { retry_delay_ms: 500 }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TransportSettings {
    pub agent_id: Option<String>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("COACH_CAPTURE").separator("__"))
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        let cfg: Self = settings.try_deserialize()?;
        if cfg.recording.chunk_interval_ms == 0 {
            bail!("recording.chunk_interval_ms must be greater than zero");
        }

        Ok(cfg)
    }

    /// Session settings derived from this file
    pub fn session_config(&self) -> SessionConfig {
        let recording = &self.recording;

        SessionConfig {
            preference: recording.preference,
            aspect_ratio: recording.aspect_ratio,
            chunk_interval: Duration::from_millis(recording.chunk_interval_ms),
            mixer: MixerConfig {
                spec: AudioSpec {
                    sample_rate: recording.sample_rate,
                    channels: recording.channels,
                },
                max_buffer_delay_ms: recording.max_buffer_delay_ms,
            },
            bridge_retry_delay: Duration::from_millis(self.bridge.retry_delay_ms),
            save_timeout: Duration::from_secs(self.persistence.save_timeout_secs),
            upload_timeout: Duration::from_secs(self.persistence.upload_timeout_secs),
            agent_id: self.transport.agent_id.clone(),
            ..SessionConfig::default()
        }
    }
}
