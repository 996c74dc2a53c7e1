// Integration tests for chunked capture
//
// These tests verify encoding negotiation, that fragments are emitted once
// per timeslice, and that stop() flushes the final partial fragment.

use anyhow::Result;
use coach_capture::audio::AudioSpec;
use coach_capture::capture::{negotiate, CaptureConfig, AUDIO_CANDIDATES};
use coach_capture::sim::{synthetic_audio_stream, SimulatedCodecs};
use coach_capture::{ChunkedCapture, CodecSupport, WavCodecs};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[test]
fn test_negotiation_picks_first_supported_candidate() {
    let codecs = SimulatedCodecs::new(&["audio/webm", "audio/ogg"]);
    let candidates: Vec<String> = ["video/mp4", "audio/webm", "audio/ogg"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    assert_eq!(negotiate(&codecs, &candidates).mime, "audio/webm");
}

#[test]
fn test_negotiation_falls_back_to_default() {
    let codecs = SimulatedCodecs::new(&[]).with_default("video/webm");
    let candidates = vec!["video/x-unknown".to_string()];

    assert_eq!(negotiate(&codecs, &candidates).mime, "video/webm");
}

#[tokio::test]
async fn test_stop_before_start_returns_empty() -> Result<()> {
    let mut capture = ChunkedCapture::new(CaptureConfig::new(AUDIO_CANDIDATES), Arc::new(WavCodecs));

    let recorded = capture.stop().await?;

    assert!(recorded.is_empty());
    assert!(recorded.format.is_none());
    assert!(!capture.is_recording());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_five_timeslices_produce_about_five_chunks() -> Result<()> {
    let stream = synthetic_audio_stream("mic", 440.0, AudioSpec::default());
    let mut capture = ChunkedCapture::new(CaptureConfig::new(AUDIO_CANDIDATES), Arc::new(WavCodecs));

    let format = capture.start(&stream).await?;
    assert_eq!(format.mime, "audio/wav");
    assert!(capture.is_recording());

    sleep(Duration::from_millis(5000)).await;
    let recorded = capture.stop().await?;

    // Verify: one chunk per second, give or take the final flush
    assert!(
        (4..=6).contains(&recorded.len()),
        "expected 5±1 chunks, got {}",
        recorded.len()
    );
    for (i, chunk) in recorded.chunks.iter().enumerate() {
        assert_eq!(chunk.index, i);
        assert!(!chunk.data.is_empty());
    }
    assert!(recorded
        .chunks
        .windows(2)
        .all(|w| w[0].timestamp_ms <= w[1].timestamp_ms));
    assert!(recorded.duration >= Duration::from_secs(5));
    assert!(recorded.duration < Duration::from_millis(5200));
    assert_eq!(recorded.audio_spec, Some(AudioSpec::default()));

    // A second start on the same capture is refused
    assert!(capture.start(&stream).await.is_err());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_flushes_partial_fragment() -> Result<()> {
    let stream = synthetic_audio_stream("mic", 440.0, AudioSpec::default());
    let config = CaptureConfig {
        timeslice: Duration::from_secs(10),
        ..CaptureConfig::new(AUDIO_CANDIDATES)
    };
    let mut capture = ChunkedCapture::new(config, Arc::new(WavCodecs));

    capture.start(&stream).await?;
    sleep(Duration::from_millis(1500)).await;
    let recorded = capture.stop().await?;

    // No timeslice elapsed; everything lands in the flushed fragment
    assert_eq!(recorded.len(), 1);
    let bytes = recorded.chunks[0].data.len();
    assert!(bytes > 0);
    assert_eq!(bytes % 3200, 0, "whole 100ms frames of 16-bit mono");

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_wav_artifact_contains_every_sample() -> Result<()> {
    let spec = AudioSpec::default();
    let stream = synthetic_audio_stream("mic", 440.0, spec);
    let mut capture = ChunkedCapture::new(CaptureConfig::new(AUDIO_CANDIDATES), Arc::new(WavCodecs));

    let format = capture.start(&stream).await?;
    sleep(Duration::from_millis(2500)).await;
    let recorded = capture.stop().await?;

    let artifact = WavCodecs.assemble(&format, spec, &recorded.chunks)?;
    let reader = hound::WavReader::new(Cursor::new(artifact))?;

    assert_eq!(reader.spec().sample_rate, 16000);
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.len() as usize * 2, recorded.total_bytes());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeslice_is_rejected() -> Result<()> {
    let stream = synthetic_audio_stream("mic", 440.0, AudioSpec::default());
    let config = CaptureConfig {
        timeslice: Duration::ZERO,
        ..CaptureConfig::new(AUDIO_CANDIDATES)
    };
    let mut capture = ChunkedCapture::new(config, Arc::new(WavCodecs));

    let err = capture.start(&stream).await.unwrap_err();
    assert!(err.to_string().contains("timeslice"));
    assert!(!capture.is_recording());
    assert!(capture.format().is_none());

    // Nothing ran, so nothing failed either
    let recorded = capture.stop().await?;
    assert!(recorded.is_empty());
    assert!(recorded.failure.is_none());

    Ok(())
}
