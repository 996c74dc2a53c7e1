// Integration tests for the audio mixing graph
//
// These tests drive the graph through real tracks: the microphone clocks
// the output, the remote agent and injected clips are summed into it.

use anyhow::Result;
use coach_capture::audio::{AudioFrame, AudioSpec, SourceKind};
use coach_capture::{AudioGraph, MediaStreamHandle, MediaTrack, MixerConfig};
use std::io::Cursor;
use std::time::Duration;
use tokio::time::sleep;

fn frame(value: i16, timestamp_ms: u64) -> AudioFrame {
    AudioFrame {
        samples: vec![value; 1600],
        sample_rate: 16000,
        channels: 1,
        timestamp_ms,
        source: SourceKind::Microphone,
    }
}

fn wav_bytes(samples: &[i16], spec: AudioSpec) -> Vec<u8> {
    let wav_spec = hound::WavSpec {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, wav_spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

fn single_track(label: &str) -> (MediaTrack, MediaStreamHandle) {
    let track = MediaTrack::audio(label);
    let stream = MediaStreamHandle::from_tracks(vec![track.clone()]);
    (track, stream)
}

#[tokio::test(start_paused = true)]
async fn test_mic_passes_through_alone() -> Result<()> {
    let (mic_track, mic) = single_track("mic");
    let graph = AudioGraph::build(&mic, None, MixerConfig::default())?;
    let mut out = graph.destination().subscribe_audio().unwrap();

    mic_track.push_audio(frame(1234, 0));
    let mixed = out.recv().await?;

    assert_eq!(mixed.source, SourceKind::Mixed);
    assert!(mixed.samples.iter().all(|&s| s == 1234));
    assert_eq!(graph.connection_count(), 1);

    graph.close().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_remote_audio_is_summed_into_mic_frames() -> Result<()> {
    let (mic_track, mic) = single_track("mic");
    let (remote_track, remote) = single_track("agent");
    let graph = AudioGraph::build(&mic, Some(&remote), MixerConfig::default())?;
    let mut out = graph.destination().subscribe_audio().unwrap();

    remote_track.push_audio(frame(300, 0));
    // Let the remote frame reach the mixer before the clock frame
    sleep(Duration::from_millis(10)).await;
    mic_track.push_audio(frame(200, 0));

    let mixed = out.recv().await?;
    assert!(mixed.samples.iter().all(|&s| s == 500));
    assert_eq!(graph.connection_count(), 2);

    graph.close().await;
    Ok(())
}

#[tokio::test]
async fn test_adding_same_stream_twice_connects_once() -> Result<()> {
    let (_mic_track, mic) = single_track("mic");
    let (_remote_track, remote) = single_track("agent");
    let graph = AudioGraph::build(&mic, None, MixerConfig::default())?;

    assert!(graph.add_live_source(&remote));
    assert!(!graph.add_live_source(&remote));
    // A clone of the handle is the same stream instance
    assert!(!graph.add_live_source(&remote.clone()));

    assert_eq!(graph.connection_count(), 2);

    graph.close().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_injected_clip_is_audible() -> Result<()> {
    let spec = AudioSpec::default();
    let (mic_track, mic) = single_track("mic");
    let graph = AudioGraph::build(&mic, None, MixerConfig::default())?;
    let mut out = graph.destination().subscribe_audio().unwrap();

    // 200ms clip: two mic frames' worth
    graph
        .inject_decoded_buffer(wav_bytes(&vec![1000; 3200], spec))
        .await?;

    for i in 0..3 {
        mic_track.push_audio(frame(0, i * 100));
    }

    let first = out.recv().await?;
    let second = out.recv().await?;
    let third = out.recv().await?;

    assert!(first.samples.iter().all(|&s| s == 1000));
    assert!(second.samples.iter().all(|&s| s == 1000));
    assert!(third.samples.iter().all(|&s| s == 0), "clip plays once");

    graph.close().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_malformed_clip_is_dropped_without_disturbing_mix() -> Result<()> {
    let (mic_track, mic) = single_track("mic");
    let graph = AudioGraph::build(&mic, None, MixerConfig::default())?;
    let mut out = graph.destination().subscribe_audio().unwrap();

    // Returns immediately and the background task finishes without panicking
    let handle = graph.inject_decoded_buffer(b"definitely not audio".to_vec());
    handle.await?;

    mic_track.push_audio(frame(42, 0));
    let mixed = out.recv().await?;
    assert!(mixed.samples.iter().all(|&s| s == 42));

    graph.close().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_clip_at_other_rate_is_conformed() -> Result<()> {
    let (mic_track, mic) = single_track("mic");
    let graph = AudioGraph::build(&mic, None, MixerConfig::default())?;
    let mut out = graph.destination().subscribe_audio().unwrap();

    // 100ms of stereo 32kHz becomes 100ms of mono 16kHz
    let stereo = AudioSpec {
        sample_rate: 32000,
        channels: 2,
    };
    graph
        .inject_decoded_buffer(wav_bytes(&vec![800; 6400], stereo))
        .await?;

    mic_track.push_audio(frame(0, 0));
    let mixed = out.recv().await?;

    assert_eq!(mixed.samples.len(), 1600);
    assert!(mixed.samples.iter().filter(|&&s| s == 800).count() > 1500);

    graph.close().await;
    Ok(())
}

#[tokio::test]
async fn test_close_ends_destination_track() -> Result<()> {
    let (_mic_track, mic) = single_track("mic");
    let graph = AudioGraph::build(&mic, None, MixerConfig::default())?;
    let destination = graph.destination();

    assert!(!destination.is_stopped());
    graph.close().await;
    assert!(destination.is_stopped());

    Ok(())
}
