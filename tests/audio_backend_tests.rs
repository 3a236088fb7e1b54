// Unit tests for audio backend abstractions
//
// These tests verify the frame types, the PCM16 wire encoding and the
// format conversion applied before audio is streamed.

use consult_session::audio::{
    encode_pcm16, process_frame, AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame,
    AudioSource, FrameProcessor,
};
use consult_session::SessionError;

fn decode(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

#[test]
fn test_audio_frame_duration() {
    // 100ms at 16kHz mono
    let frame = AudioFrame {
        samples: vec![0.0; 1600],
        sample_rate: 16000,
        channels: 1,
        timestamp_ms: 0,
    };
    assert_eq!(frame.duration_ms(), 100);

    // Same duration, stereo interleaved
    let stereo = AudioFrame {
        samples: vec![0.0; 3200],
        sample_rate: 16000,
        channels: 2,
        timestamp_ms: 0,
    };
    assert_eq!(stereo.duration_ms(), 100);
}

#[test]
fn test_audio_frame_duration_degenerate() {
    let frame = AudioFrame {
        samples: vec![0.0; 10],
        sample_rate: 0,
        channels: 1,
        timestamp_ms: 0,
    };
    assert_eq!(frame.duration_ms(), 0);
}

#[test]
fn test_audio_backend_config_default() {
    let config = AudioBackendConfig::default();

    assert_eq!(config.target_sample_rate, 16000, "Default should be 16kHz for transcription");
    assert_eq!(config.target_channels, 1, "Default should be mono");
    assert_eq!(config.buffer_size, 2048);
}

#[test]
fn test_pcm16_full_scale_bytes() {
    // +1.0 -> 0x7FFF, -1.0 -> -0x8000, 0.0 -> 0
    assert_eq!(
        encode_pcm16(&[1.0, -1.0, 0.0]),
        vec![0xFF, 0x7F, 0x00, 0x80, 0x00, 0x00]
    );
}

#[test]
fn test_pcm16_asymmetric_scaling() {
    let values = decode(&encode_pcm16(&[0.25, -0.25, 0.999, -0.999]));

    // 0.25 * 32767 = 8191.75, -0.25 * 32768 = -8192
    assert_eq!(values, vec![8191, -8192, 32734, -32735]);
}

#[test]
fn test_pcm16_clamps_and_is_little_endian() {
    let bytes = encode_pcm16(&[3.0, -3.0, 0.5]);

    assert_eq!(bytes.len(), 6, "Two bytes per sample");
    assert_eq!(decode(&bytes), vec![i16::MAX, i16::MIN, 16383]);
    assert_eq!(&bytes[4..], &16383i16.to_le_bytes());
}

#[test]
fn test_pcm16_empty_input() {
    assert!(encode_pcm16(&[]).is_empty());
}

#[test]
fn test_process_frame_to_transcription_format() {
    // 48kHz stereo, 10ms
    let frame = AudioFrame {
        samples: (0..960).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect(),
        sample_rate: 48000,
        channels: 2,
        timestamp_ms: 250,
    };

    let out = process_frame(frame, 16000, 1);

    assert_eq!(out.sample_rate, 16000);
    assert_eq!(out.channels, 1);
    assert_eq!(out.samples.len(), 160);
    assert!(out.samples.iter().all(|s| s.abs() < 1e-6), "L/R cancel out");
    assert_eq!(out.timestamp_ms, 250);
    assert_eq!(out.duration_ms(), 10);
}

#[test]
fn test_process_frame_44k1_to_16k() {
    let frame = AudioFrame {
        samples: vec![0.1; 44100],
        sample_rate: 44100,
        channels: 1,
        timestamp_ms: 0,
    };

    let out = process_frame(frame, 16000, 1);

    assert_eq!(out.sample_rate, 16000);
    assert_eq!(out.samples.len(), 16000, "one second at 16kHz");
    assert!(out.samples.iter().all(|s| (s - 0.1).abs() < 1e-6));
}

#[test]
fn test_frame_processor_44k1_stream_to_16k() {
    // One second of 44.1kHz stereo in 2048-frame callbacks
    let input: Vec<f32> = vec![0.25; 44100 * 2];
    let mut processor = FrameProcessor::new(16000, 1);

    let mut total = 0;
    for chunk in input.chunks(2048 * 2) {
        let out = processor.process(AudioFrame {
            samples: chunk.to_vec(),
            sample_rate: 44100,
            channels: 2,
            timestamp_ms: 0,
        });
        assert_eq!(out.sample_rate, 16000);
        assert_eq!(out.channels, 1);
        total += out.samples.len();
    }

    assert_eq!(total, 16000);
}

#[test]
fn test_frame_processor_upsamples_8k() {
    let mut processor = FrameProcessor::new(16000, 1);

    let mut total = 0;
    for _ in 0..100 {
        let out = processor.process(AudioFrame {
            samples: vec![0.1; 80],
            sample_rate: 8000,
            channels: 1,
            timestamp_ms: 0,
        });
        assert_eq!(out.sample_rate, 16000);
        assert!(out.samples.iter().all(|s| (s - 0.1).abs() < 1e-6));
        total += out.samples.len();
    }

    // The last interpolated sample waits for audio that never comes
    assert_eq!(total, 15999);
}

#[test]
fn test_frame_processor_spacing_across_frames() {
    let input: Vec<f32> = (0..48000).map(|i| i as f32 / 48000.0).collect();
    let mut processor = FrameProcessor::new(16000, 1);

    let mut out = Vec::new();
    for chunk in input.chunks(2048) {
        out.extend(
            processor
                .process(AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate: 48000,
                    channels: 1,
                    timestamp_ms: 0,
                })
                .samples,
        );
    }

    let expected: Vec<f32> = input.iter().step_by(3).copied().collect();
    assert_eq!(out, expected);
}

#[test]
fn test_factory_microphone_unavailable() {
    let result = AudioBackendFactory::create(AudioSource::Microphone, AudioBackendConfig::default());
    assert!(matches!(result, Err(SessionError::MediaAccess(_))));
}

#[test]
fn test_factory_file_backend() {
    let backend = AudioBackendFactory::create(
        AudioSource::File("/tmp/consult.wav".into()),
        AudioBackendConfig::default(),
    );

    match backend {
        Ok(backend) => {
            assert_eq!(backend.name(), "file");
            assert!(!backend.is_capturing());
        }
        Err(e) => panic!("File backend should be created lazily: {}", e),
    }
}
