use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use super::backend::AudioSpec;
use crate::error::DecodeError;

/// A fully decoded clip (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct DecodedClip {
    pub samples: Vec<i16>,
    pub spec: AudioSpec,
}

impl DecodedClip {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / (self.spec.sample_rate as f64 * self.spec.channels as f64)
    }
}

/// Decode an in-memory clip in any container symphonia understands
///
/// CPU-bound; run it on the blocking pool.
pub fn decode_clip(data: Vec<u8>) -> Result<DecodedClip, DecodeError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::Format(e.to_string()))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Codec(e.to_string()))?;

    let mut samples: Vec<i16> = Vec::new();
    let mut spec: Option<AudioSpec> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::Codec(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let signal = *decoded.spec();
                let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, signal);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());

                spec.get_or_insert(AudioSpec {
                    sample_rate: signal.rate,
                    channels: signal.channels.count() as u16,
                });
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping corrupt packet in clip: {}", e);
            }
            Err(e) => return Err(DecodeError::Codec(e.to_string())),
        }
    }

    let spec = spec.ok_or(DecodeError::Empty)?;
    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }

    let clip = DecodedClip { samples, spec };
    debug!(
        "Decoded clip: {:.2}s, {}Hz, {} channels",
        clip.duration_secs(),
        clip.spec.sample_rate,
        clip.spec.channels
    );

    Ok(clip)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_wav_clip() {
        let samples: Vec<i16> = (0..8000).map(|i| (i % 100) as i16).collect();
        let clip = decode_clip(wav_bytes(&samples, 8000, 1)).unwrap();

        assert_eq!(clip.spec, AudioSpec { sample_rate: 8000, channels: 1 });
        assert_eq!(clip.samples, samples);
        assert!((clip.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn garbage_is_a_format_error() {
        let err = decode_clip(b"definitely not audio".to_vec()).unwrap_err();
        assert!(matches!(err, DecodeError::Format(_)));
    }

    #[test]
    fn empty_input_fails() {
        assert!(decode_clip(Vec::new()).is_err());
    }
}
