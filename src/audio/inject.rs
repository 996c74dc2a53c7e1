// Fire-and-forget splicing of auxiliary clips into the mixing graph
//
// Fetching and decoding happen in a detached task. Whatever goes wrong
// there is logged and dropped; nothing is reported back to the caller.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{conform, AudioSpec};
use super::decode::decode_clip;
use super::mixer::GraphInput;

/// Fetches clip bytes from wherever they live
#[async_trait::async_trait]
pub trait ClipFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Plain HTTP(S) clip fetcher
pub struct HttpClipFetcher {
    client: reqwest::Client,
}

impl HttpClipFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpClipFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ClipFetcher for HttpClipFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch clip {}", url))?
            .error_for_status()
            .with_context(|| format!("Clip request rejected: {}", url))?;

        let bytes = response
            .bytes()
            .await
            .context("Failed to read clip body")?;

        Ok(bytes.to_vec())
    }
}

/// Cheap handle for injecting clips into one graph
#[derive(Clone)]
pub struct AudioInjector {
    inbox: mpsc::Sender<GraphInput>,
    spec: AudioSpec,
}

impl AudioInjector {
    pub(crate) fn new(inbox: mpsc::Sender<GraphInput>, spec: AudioSpec) -> Self {
        Self { inbox, spec }
    }

    /// Decode `data` in the background and play it once into the mix
    pub fn inject_decoded_buffer(&self, data: Vec<u8>) -> JoinHandle<()> {
        let injector = self.clone();
        tokio::spawn(async move {
            injector.decode_and_mix(data).await;
        })
    }

    /// Fetch, decode and mix a clip in the background
    pub fn inject_url(&self, fetcher: Arc<dyn ClipFetcher>, url: String) -> JoinHandle<()> {
        let injector = self.clone();
        tokio::spawn(async move {
            match fetcher.fetch(&url).await {
                Ok(data) => injector.decode_and_mix(data).await,
                Err(e) => warn!("Dropping auxiliary clip {}: {:#}", url, e),
            }
        })
    }

    async fn decode_and_mix(&self, data: Vec<u8>) {
        let decoded = match tokio::task::spawn_blocking(move || decode_clip(data)).await {
            Ok(Ok(clip)) => clip,
            Ok(Err(e)) => {
                warn!("Dropping auxiliary clip: {}", e);
                return;
            }
            Err(e) => {
                warn!("Clip decoder task failed: {}", e);
                return;
            }
        };

        let samples = conform(&decoded.samples, decoded.spec, self.spec);
        info!("Injecting {:.2}s auxiliary clip into mix", decoded.duration_secs());

        if self.inbox.send(GraphInput::OneShot { samples }).await.is_err() {
            warn!("Audio graph closed before clip could be mixed");
        }
    }
}
