use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::stream::MediaStreamHandle;
use super::{AspectRatio, MediaConstraints, RecordingPreference};
use crate::error::MediaAccessError;

/// Platform media devices (camera + microphone)
#[async_trait::async_trait]
pub trait MediaDevices: Send + Sync {
    /// User agent / platform identification used by the capability probe
    fn user_agent(&self) -> String;

    /// Request a stream satisfying the constraints
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStreamHandle, MediaAccessError>;
}

/// Coarse device classification for choosing an acquisition strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    /// iOS WebKit, where one request with both camera and microphone
    /// constraints is unreliable
    MobileWebKit,
    Desktop,
}

impl DeviceClass {
    pub fn detect(user_agent: &str) -> Self {
        let ios = ["iPhone", "iPad", "iPod"]
            .iter()
            .any(|marker| user_agent.contains(marker));

        if ios {
            Self::MobileWebKit
        } else {
            Self::Desktop
        }
    }
}

/// How camera and microphone are requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionStrategy {
    /// One request carrying both constraints
    Combined,
    /// Camera and microphone requested separately, tracks merged afterwards
    Separate,
}

impl AcquisitionStrategy {
    pub fn for_device(class: DeviceClass) -> Self {
        match class {
            DeviceClass::MobileWebKit => Self::Separate,
            DeviceClass::Desktop => Self::Combined,
        }
    }
}

/// Obtains local media with the strategy selected at construction
pub struct MediaAcquirer {
    devices: Arc<dyn MediaDevices>,
    strategy: AcquisitionStrategy,
}

impl MediaAcquirer {
    /// Probe the platform once and pick the matching strategy
    pub fn probe(devices: Arc<dyn MediaDevices>) -> Self {
        let user_agent = devices.user_agent();
        let class = DeviceClass::detect(&user_agent);
        let strategy = AcquisitionStrategy::for_device(class);

        info!(
            "Media acquisition: {:?} device, {:?} strategy",
            class, strategy
        );

        Self { devices, strategy }
    }

    pub fn with_strategy(devices: Arc<dyn MediaDevices>, strategy: AcquisitionStrategy) -> Self {
        Self { devices, strategy }
    }

    pub fn strategy(&self) -> AcquisitionStrategy {
        self.strategy
    }

    /// Acquire camera and/or microphone for a preference
    ///
    /// Fails with `MediaAccessError` (attached to the anyhow error) when
    /// the platform refuses; `RecordingPreference::None` is rejected since
    /// there is nothing to acquire.
    pub async fn acquire(
        &self,
        preference: RecordingPreference,
        ratio: AspectRatio,
    ) -> Result<MediaStreamHandle> {
        let constraints = MediaConstraints::for_preference(preference, ratio)
            .ok_or_else(|| anyhow!("Nothing to acquire for recording preference '{}'", preference))?;

        if let Some(video) = constraints.video {
            debug!(
                "Requesting camera at ideal {}x{} ({})",
                video.ideal_width, video.ideal_height, ratio
            );
        }

        let stream = match (self.strategy, constraints.video.is_some()) {
            (AcquisitionStrategy::Separate, true) => self.acquire_separately(&constraints).await?,
            _ => self.devices.get_user_media(&constraints).await?,
        };

        info!(
            "Acquired media stream {} ({} audio, {} video tracks)",
            stream.id(),
            stream.audio_tracks().count(),
            stream.video_tracks().count()
        );

        Ok(stream)
    }

    async fn acquire_separately(&self, constraints: &MediaConstraints) -> Result<MediaStreamHandle> {
        let video = self.devices.get_user_media(&constraints.video_only()).await?;

        let audio = match self.devices.get_user_media(&constraints.audio_only()).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Microphone request failed after camera was granted: {}", e);
                video.stop_tracks();
                return Err(e.into());
            }
        };

        let tracks = video
            .tracks()
            .iter()
            .chain(audio.tracks())
            .cloned()
            .collect();

        Ok(MediaStreamHandle::from_tracks(tracks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_ios_user_agents() {
        let iphone = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15";
        let mac = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15";

        assert_eq!(DeviceClass::detect(iphone), DeviceClass::MobileWebKit);
        assert_eq!(DeviceClass::detect(mac), DeviceClass::Desktop);
    }

    #[test]
    fn strategy_follows_device_class() {
        assert_eq!(
            AcquisitionStrategy::for_device(DeviceClass::MobileWebKit),
            AcquisitionStrategy::Separate
        );
        assert_eq!(
            AcquisitionStrategy::for_device(DeviceClass::Desktop),
            AcquisitionStrategy::Combined
        );
    }
}
