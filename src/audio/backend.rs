use serde::{Deserialize, Serialize};

/// Where a frame of audio came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Local participant's microphone
    Microphone,
    /// Remote conversational agent
    Remote,
    /// Auxiliary clip spliced into the mix
    Injected,
    /// Output of the mixing graph
    Mixed,
}

/// Sample format description (16-bit PCM, interleaved)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSpec {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
        }
    }
}

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since the producing track started
    pub timestamp_ms: u64,
    /// Which kind of source produced the frame
    pub source: SourceKind,
}

impl AudioFrame {
    pub fn spec(&self) -> AudioSpec {
        AudioSpec {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Duration covered by this frame in milliseconds
    pub fn duration_ms(&self) -> u64 {
        let per_second = self.sample_rate as u64 * self.channels.max(1) as u64;
        if per_second == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / per_second
    }
}

/// Encoded or raw camera frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Timestamp in milliseconds since the producing track started
    pub timestamp_ms: u64,
    pub data: Vec<u8>,
}

/// Convert interleaved samples from one spec to another.
///
/// Channel conversion happens first (down-mix by averaging, up-mix by
/// duplication), then linear-interpolation resampling.
pub fn conform(samples: &[i16], from: AudioSpec, to: AudioSpec) -> Vec<i16> {
    let remixed = remix_channels(samples, from.channels, to.channels);
    resample(&remixed, to.channels, from.sample_rate, to.sample_rate)
}

fn remix_channels(samples: &[i16], from: u16, to: u16) -> Vec<i16> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }

    let from = from as usize;
    let to = to as usize;
    let mut out = Vec::with_capacity(samples.len() / from * to);

    for frame in samples.chunks_exact(from) {
        if to == 1 {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            out.push((sum / from as i32) as i16);
        } else {
            for ch in 0..to {
                out.push(frame[ch.min(from - 1)]);
            }
        }
    }

    out
}

fn resample(samples: &[i16], channels: u16, from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let channels = channels.max(1) as usize;
    let in_frames = samples.len() / channels;
    if in_frames == 0 {
        return Vec::new();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_frames = (in_frames as f64 / ratio).ceil() as usize;
    let mut out = Vec::with_capacity(out_frames * channels);

    for i in 0..out_frames {
        let src = i as f64 * ratio;
        let lo = (src.floor() as usize).min(in_frames - 1);
        let hi = (lo + 1).min(in_frames - 1);
        let frac = src - lo as f64;

        for ch in 0..channels {
            let a = samples[lo * channels + ch] as f64;
            let b = samples[hi * channels + ch] as f64;
            out.push((a + (b - a) * frac).round() as i16);
        }
    }

    out
}
