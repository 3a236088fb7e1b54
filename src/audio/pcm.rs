use super::backend::AudioFrame;

/// Encode float samples as 16-bit little-endian PCM
///
/// Samples are clamped to [-1, 1]; negatives scale by 0x8000 and positives
/// by 0x7FFF, truncating toward zero. The transcription backend relies on
/// this exact mapping.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    out
}

#[inline]
fn sample_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    let scaled = if s < 0.0 { s * 32768.0 } else { s * 32767.0 };
    // NaN maps to 0
    scaled as i16
}

/// Bring a single frame to the target rate and channel count
///
/// Each call starts a fresh resampler; use [`FrameProcessor`] for a stream
/// of frames so the interpolation phase carries over frame boundaries.
pub fn process_frame(frame: AudioFrame, target_sample_rate: u32, target_channels: u16) -> AudioFrame {
    FrameProcessor::new(target_sample_rate, target_channels).process(frame)
}

/// Converts a stream of captured frames to the transcription format
pub struct FrameProcessor {
    target_sample_rate: u32,
    target_channels: u16,
    resampler: Option<Resampler>,
}

impl FrameProcessor {
    pub fn new(target_sample_rate: u32, target_channels: u16) -> Self {
        Self {
            target_sample_rate,
            target_channels,
            resampler: None,
        }
    }

    pub fn process(&mut self, frame: AudioFrame) -> AudioFrame {
        let mut processed = frame;

        if processed.channels != self.target_channels && self.target_channels == 1 {
            processed = downmix_to_mono(processed);
        }

        if processed.sample_rate == self.target_sample_rate
            || processed.sample_rate == 0
            || self.target_sample_rate == 0
        {
            return processed;
        }

        // A format change mid-stream restarts the interpolation
        let rate = processed.sample_rate;
        let channels = processed.channels.max(1);
        if !self
            .resampler
            .as_ref()
            .is_some_and(|r| r.accepts(rate, self.target_sample_rate, channels))
        {
            self.resampler = Some(Resampler::new(rate, self.target_sample_rate, channels));
        }

        match self.resampler.as_mut() {
            Some(resampler) => AudioFrame {
                samples: resampler.process(&processed.samples),
                sample_rate: self.target_sample_rate,
                channels: processed.channels,
                timestamp_ms: processed.timestamp_ms,
            },
            None => processed,
        }
    }
}

/// Linear-interpolation sample rate converter for interleaved audio
///
/// Handles any ratio, up or down. The read position is kept as an exact
/// fraction so long streams do not drift.
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
    channels: usize,
    /// Next output position in input frames, scaled by `to_rate`, relative
    /// to the first frame of the next block. -1 frame refers to `last`.
    phase: i64,
    last: Option<Vec<f32>>,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> Self {
        Self {
            from_rate: from_rate.max(1),
            to_rate: to_rate.max(1),
            channels: channels.max(1) as usize,
            phase: 0,
            last: None,
        }
    }

    fn accepts(&self, from_rate: u32, to_rate: u32, channels: u16) -> bool {
        self.from_rate == from_rate && self.to_rate == to_rate && self.channels == channels as usize
    }

    /// Resample one block, continuing from where the previous block ended
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let channels = self.channels;
        let frames = samples.len() / channels;
        if frames == 0 {
            return Vec::new();
        }

        let to = self.to_rate as i64;
        let from = self.from_rate as i64;
        let n = frames as i64;
        let capacity = (frames as u64 * self.to_rate as u64 / self.from_rate as u64) as usize + 1;
        let mut out = Vec::with_capacity(capacity * channels);

        let last = self.last.take();
        let last = last.as_deref().unwrap_or(&samples[..channels]);
        loop {
            let index = self.phase.div_euclid(to);
            let rem = self.phase.rem_euclid(to);
            // Interpolating past the block end needs the next block
            if index >= n || (rem > 0 && index + 1 >= n) {
                break;
            }

            let a = frame_at(samples, last, channels, index);
            if rem == 0 {
                out.extend_from_slice(a);
            } else {
                let b = frame_at(samples, last, channels, index + 1);
                let t = rem as f32 / to as f32;
                out.extend(a.iter().zip(b).map(|(&x, &y)| x + (y - x) * t));
            }
            self.phase += from;
        }

        self.phase -= n * to;
        let tail = (frames - 1) * channels;
        self.last = Some(samples[tail..tail + channels].to_vec());
        out
    }
}

/// Frame `index` of the block; -1 is the final frame of the previous block
fn frame_at<'a>(samples: &'a [f32], last: &'a [f32], channels: usize, index: i64) -> &'a [f32] {
    match usize::try_from(index) {
        Ok(i) => &samples[i * channels..(i + 1) * channels],
        Err(_) => last,
    }
}

/// Average interleaved channels into one
fn downmix_to_mono(frame: AudioFrame) -> AudioFrame {
    if frame.channels <= 1 {
        return frame;
    }

    let channels = frame.channels as usize;
    let samples = frame
        .samples
        .chunks_exact(channels)
        .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
        .collect();

    AudioFrame {
        samples,
        sample_rate: frame.sample_rate,
        channels: 1,
        timestamp_ms: frame.timestamp_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_full_scale_and_silence_bit_exact() {
        let bytes = encode_pcm16(&[1.0, -1.0, 0.0]);
        assert_eq!(bytes, vec![0xFF, 0x7F, 0x00, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn clamps_out_of_range_samples() {
        let bytes = encode_pcm16(&[2.5, -7.0]);
        assert_eq!(bytes, vec![0xFF, 0x7F, 0x00, 0x80]);
    }

    #[test]
    fn truncates_toward_zero() {
        // 0.5 * 32767 = 16383.5 -> 16383, -0.5 * 32768 = -16384
        let bytes = encode_pcm16(&[0.5, -0.5]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 16383);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -16384);
    }

    #[test]
    fn nan_encodes_as_zero() {
        assert_eq!(encode_pcm16(&[f32::NAN]), vec![0x00, 0x00]);
    }

    #[test]
    fn process_frame_downmixes_and_resamples() {
        let frame = AudioFrame {
            // 4 stereo frames at 32kHz
            samples: vec![0.2, 0.4, 1.0, 1.0, -0.5, 0.5, 0.0, 0.0],
            sample_rate: 32000,
            channels: 2,
            timestamp_ms: 10,
        };

        let out = process_frame(frame, 16000, 1);
        assert_eq!(out.channels, 1);
        assert_eq!(out.sample_rate, 16000);
        assert_eq!(out.samples.len(), 2);
        assert!((out.samples[0] - 0.3).abs() < 1e-6);
        assert!((out.samples[1] - 0.0).abs() < 1e-6);
        assert_eq!(out.timestamp_ms, 10);
    }

    #[test]
    fn resampler_carries_phase_across_blocks() {
        // Ratio 3 with blocks that are not a multiple of 3
        let input: Vec<f32> = (0..4096).map(|i| i as f32).collect();
        let mut resampler = Resampler::new(48000, 16000, 1);

        let mut out = Vec::new();
        for block in input.chunks(2048) {
            out.extend(resampler.process(block));
        }

        let expected: Vec<f32> = input.iter().step_by(3).copied().collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn resampler_interpolates_over_block_boundary() {
        let mut resampler = Resampler::new(8000, 16000, 1);

        assert_eq!(resampler.process(&[0.0, 1.0]), vec![0.0, 0.5, 1.0]);
        // The midpoint between 1.0 and the next block's first sample
        assert_eq!(resampler.process(&[0.0]), vec![0.5, 0.0]);
    }

    #[test]
    fn resampler_keeps_channels_separate() {
        let mut resampler = Resampler::new(8000, 16000, 2);
        let out = resampler.process(&[0.0, 1.0, 1.0, 0.0]);
        assert_eq!(out, vec![0.0, 1.0, 0.5, 0.5, 1.0, 0.0]);
    }

    #[test]
    fn process_frame_leaves_target_format_untouched() {
        let frame = AudioFrame {
            samples: vec![0.1, 0.2, 0.3],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: 0,
        };
        let out = process_frame(frame, 16000, 1);
        assert_eq!(out.samples, vec![0.1, 0.2, 0.3]);
    }
}
