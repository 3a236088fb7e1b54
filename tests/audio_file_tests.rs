// Integration tests for file-backed audio capture
//
// WAV fixtures are generated with hound into a temp dir so the tests
// control the exact format and sample values.

use std::path::{Path, PathBuf};

use anyhow::Result;
use consult_session::audio::{AudioBackend, AudioBackendConfig, AudioFile, FileBackend};
use consult_session::SessionError;
use hound::{SampleFormat, WavSpec, WavWriter};
use tempfile::TempDir;

fn write_int_wav(dir: &Path, name: &str, sample_rate: u32, channels: u16, samples: &[i16]) -> PathBuf {
    let path = dir.join(name);
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&path, spec).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
    path
}

fn write_float_wav(dir: &Path, name: &str, sample_rate: u32, samples: &[f32]) -> PathBuf {
    let path = dir.join(name);
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(&path, spec).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
    path
}

#[test]
fn test_audio_file_open() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_int_wav(dir.path(), "consult.wav", 16000, 1, &vec![16384; 16000]);

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 16000);
    assert!((audio.duration_seconds - 1.0).abs() < 1e-9);
    assert!(audio.path.contains("consult.wav"));

    // 16-bit integers are scaled into [-1, 1]
    assert!((audio.samples[0] - 0.5).abs() < 1e-6);

    Ok(())
}

#[test]
fn test_audio_file_stereo_duration() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_int_wav(dir.path(), "stereo.wav", 8000, 2, &vec![0; 8000]);

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.channels, 2);
    assert!((audio.duration_seconds - 0.5).abs() < 1e-9);

    Ok(())
}

#[test]
fn test_audio_file_float_samples() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_float_wav(dir.path(), "float.wav", 16000, &[0.25, -0.75, 1.0]);

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.samples, vec![0.25, -0.75, 1.0]);

    Ok(())
}

#[test]
fn test_audio_file_nonexistent() {
    let result = AudioFile::open("/nonexistent/path/to/audio.wav");

    assert!(
        matches!(result, Err(SessionError::MediaAccess(_))),
        "Opening nonexistent file should fail with a media error"
    );
}

#[tokio::test(start_paused = true)]
async fn test_file_backend_streams_paced_frames() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_int_wav(dir.path(), "consult.wav", 16000, 1, &vec![16384; 16000]);

    let mut backend = FileBackend::new(
        path,
        AudioBackendConfig {
            target_sample_rate: 16000,
            target_channels: 1,
            buffer_size: 4000,
        },
    );
    let mut frames = backend.start().await?;
    assert!(backend.is_capturing());

    let mut received = Vec::new();
    while let Some(frame) = frames.recv().await {
        received.push(frame);
    }

    assert_eq!(received.len(), 4);
    let timestamps: Vec<u64> = received.iter().map(|f| f.timestamp_ms).collect();
    assert_eq!(timestamps, vec![0, 250, 500, 750]);
    assert!(received.iter().all(|f| f.samples.len() == 4000));
    assert!(!backend.is_capturing(), "Capture ends with the file");

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_file_backend_converts_to_target_format() -> Result<()> {
    let dir = TempDir::new()?;
    // 0.1s of 32kHz stereo
    let path = write_int_wav(dir.path(), "stereo.wav", 32000, 2, &vec![8192; 6400]);

    let mut backend = FileBackend::new(
        path,
        AudioBackendConfig {
            buffer_size: 3200,
            ..Default::default()
        },
    );
    let mut frames = backend.start().await?;

    let frame = frames.recv().await.expect("one frame");

    assert_eq!(frame.sample_rate, 16000);
    assert_eq!(frame.channels, 1);
    assert_eq!(frame.samples.len(), 1600);
    assert!((frame.samples[0] - 0.25).abs() < 1e-6);

    backend.stop().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_file_backend_stop_ends_stream() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_int_wav(dir.path(), "long.wav", 16000, 1, &vec![0; 160_000]);

    let mut backend = FileBackend::new(
        path,
        AudioBackendConfig {
            buffer_size: 1600,
            ..Default::default()
        },
    );
    let mut frames = backend.start().await?;
    assert!(frames.recv().await.is_some());

    backend.stop().await?;

    assert!(!backend.is_capturing());
    // Drain anything already buffered; the sender is gone after stop
    while frames.recv().await.is_some() {}

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_file_backend_zero_buffer_size() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_int_wav(dir.path(), "short.wav", 16000, 1, &vec![0; 160]);

    let mut backend = FileBackend::new(
        path,
        AudioBackendConfig {
            buffer_size: 0,
            ..Default::default()
        },
    );
    let mut frames = backend.start().await?;

    let mut received = 0;
    while let Some(frame) = frames.recv().await {
        assert_eq!(frame.samples.len(), 1);
        received += 1;
    }
    assert_eq!(received, 160);

    Ok(())
}

#[tokio::test]
async fn test_file_backend_start_twice() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_int_wav(dir.path(), "long.wav", 16000, 1, &vec![0; 160_000]);

    let mut backend = FileBackend::new(path, AudioBackendConfig::default());
    let _frames = backend.start().await?;

    let second = backend.start().await;
    assert!(matches!(second, Err(SessionError::InvalidState(_))));

    backend.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_file_backend_missing_file() {
    let mut backend = FileBackend::new(
        PathBuf::from("/nonexistent/consult.wav"),
        AudioBackendConfig::default(),
    );

    let result = backend.start().await;
    assert!(matches!(result, Err(SessionError::MediaAccess(_))));
    assert!(!backend.is_capturing());
}
