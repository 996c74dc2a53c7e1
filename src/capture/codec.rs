use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use tracing::{info, warn};

use super::chunk::Chunk;
use crate::audio::{AudioFrame, AudioSpec, VideoFrame};
use crate::error::EncodingUnsupportedError;

/// Ordered video candidates, most capable first
pub const VIDEO_CANDIDATES: &[&str] = &[
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm",
    "video/mp4",
];

/// Ordered audio-only candidates, most capable first
pub const AUDIO_CANDIDATES: &[&str] = &[
    "audio/webm;codecs=opus",
    "audio/webm",
    "audio/ogg;codecs=opus",
    "audio/mp4",
    "audio/wav",
];

/// A negotiated encoding, identified by MIME type (with optional codecs)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncodingFormat {
    pub mime: String,
}

impl EncodingFormat {
    pub fn new(mime: impl Into<String>) -> Self {
        Self { mime: mime.into() }
    }

    /// Container MIME type without codec parameters
    pub fn content_type(&self) -> &str {
        self.mime.split(';').next().unwrap_or(&self.mime).trim()
    }

    /// File extension for the artifact
    pub fn extension(&self) -> &'static str {
        let container = self.content_type();
        if container.ends_with("/mp4") {
            "mp4"
        } else if container.ends_with("/ogg") {
            "ogg"
        } else if container.ends_with("/wav") {
            "wav"
        } else {
            "webm"
        }
    }
}

impl fmt::Display for EncodingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mime)
    }
}

/// Incremental encoder producing timed fragments
pub trait FragmentEncoder: Send {
    fn push_audio(&mut self, frame: &AudioFrame) -> Result<()>;

    fn push_video(&mut self, frame: &VideoFrame) -> Result<()>;

    /// Everything encoded since the previous fragment (empty when idle)
    fn take_fragment(&mut self) -> Result<Vec<u8>>;

    /// Flush whatever is still buffered
    fn finish(&mut self) -> Result<Vec<u8>> {
        self.take_fragment()
    }
}

/// Encoding capabilities of the current environment
pub trait CodecSupport: Send + Sync {
    fn is_supported(&self, mime: &str) -> bool;

    /// Format used when no candidate is supported
    fn default_format(&self) -> EncodingFormat;

    fn create_encoder(&self, format: &EncodingFormat) -> Result<Box<dyn FragmentEncoder>>;

    /// Build the final artifact from recorded fragments
    fn assemble(&self, _format: &EncodingFormat, _spec: AudioSpec, chunks: &[Chunk]) -> Result<Vec<u8>> {
        Ok(chunks.iter().flat_map(|c| c.data.iter().copied()).collect())
    }
}

/// Pick the first supported candidate, falling back to the default format
pub fn negotiate(codecs: &dyn CodecSupport, candidates: &[String]) -> EncodingFormat {
    if let Some(mime) = candidates.iter().find(|mime| codecs.is_supported(mime)) {
        info!("Negotiated encoding: {}", mime);
        return EncodingFormat::new(mime.as_str());
    }

    let fallback = codecs.default_format();
    let err = EncodingUnsupportedError {
        tried: candidates.to_vec(),
    };
    warn!("{}; falling back to {}", err, fallback);
    fallback
}

/// Raw little-endian PCM fragments (video frames appended verbatim when enabled)
pub struct PcmFragmentEncoder {
    include_video: bool,
    buffer: Vec<u8>,
}

impl PcmFragmentEncoder {
    pub fn new(include_video: bool) -> Self {
        Self {
            include_video,
            buffer: Vec::new(),
        }
    }
}

impl FragmentEncoder for PcmFragmentEncoder {
    fn push_audio(&mut self, frame: &AudioFrame) -> Result<()> {
        self.buffer
            .extend(frame.samples.iter().flat_map(|s| s.to_le_bytes()));
        Ok(())
    }

    fn push_video(&mut self, frame: &VideoFrame) -> Result<()> {
        if self.include_video {
            self.buffer.extend_from_slice(&frame.data);
        }
        Ok(())
    }

    fn take_fragment(&mut self) -> Result<Vec<u8>> {
        Ok(std::mem::take(&mut self.buffer))
    }
}

/// Built-in codec set: PCM fragments assembled into a WAV file
pub struct WavCodecs;

impl WavCodecs {
    pub const MIME: &'static str = "audio/wav";
}

impl CodecSupport for WavCodecs {
    fn is_supported(&self, mime: &str) -> bool {
        mime == Self::MIME
    }

    fn default_format(&self) -> EncodingFormat {
        EncodingFormat::new(Self::MIME)
    }

    fn create_encoder(&self, _format: &EncodingFormat) -> Result<Box<dyn FragmentEncoder>> {
        Ok(Box::new(PcmFragmentEncoder::new(false)))
    }

    fn assemble(&self, _format: &EncodingFormat, spec: AudioSpec, chunks: &[Chunk]) -> Result<Vec<u8>> {
        let wav_spec = hound::WavSpec {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, wav_spec)
                .context("Failed to create WAV writer")?;

            for chunk in chunks {
                for pair in chunk.data.chunks_exact(2) {
                    writer
                        .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                        .context("Failed to write sample to WAV")?;
                }
            }

            writer.finalize().context("Failed to finalize WAV artifact")?;
        }

        Ok(cursor.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_follows_container() {
        assert_eq!(EncodingFormat::new("video/webm;codecs=vp9,opus").extension(), "webm");
        assert_eq!(EncodingFormat::new("video/mp4").extension(), "mp4");
        assert_eq!(EncodingFormat::new("audio/ogg;codecs=opus").extension(), "ogg");
        assert_eq!(EncodingFormat::new("audio/wav").extension(), "wav");
    }

    #[test]
    fn content_type_strips_codecs() {
        let format = EncodingFormat::new("video/webm;codecs=vp8,opus");
        assert_eq!(format.content_type(), "video/webm");
    }

    #[test]
    fn wav_codecs_fall_back_for_video_candidates() {
        let candidates: Vec<String> = VIDEO_CANDIDATES.iter().map(|s| s.to_string()).collect();
        assert_eq!(negotiate(&WavCodecs, &candidates), EncodingFormat::new("audio/wav"));
    }

    #[test]
    fn wav_assembly_produces_readable_file() {
        let chunks = vec![
            Chunk {
                index: 0,
                timestamp_ms: 1000,
                data: [1i16, 2, 3].iter().flat_map(|s| s.to_le_bytes()).collect(),
            },
            Chunk {
                index: 1,
                timestamp_ms: 2000,
                data: [4i16, 5].iter().flat_map(|s| s.to_le_bytes()).collect(),
            },
        ];

        let bytes = WavCodecs
            .assemble(&WavCodecs.default_format(), AudioSpec::default(), &chunks)
            .unwrap();

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 2, 3, 4, 5]);
    }
}
