use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hound::{SampleFormat, WavReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::pcm::FrameProcessor;
use crate::error::{SessionError, SessionResult};

const MIN_FRAME_PERIOD: Duration = Duration::from_millis(1);

/// Decoded WAV file held as float samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> SessionResult<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).map_err(|e| {
            SessionError::MediaAccess(format!("cannot open {}: {}", path.display(), e))
        })?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>(),
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
            }
        }
        .map_err(|e| SessionError::MediaAccess(format!("failed to read samples: {}", e)))?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels.max(1) as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// Plays a WAV file as if it were live microphone input
pub struct FileBackend {
    path: PathBuf,
    config: AudioBackendConfig,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn new(path: PathBuf, config: AudioBackendConfig) -> Self {
        Self {
            path,
            config,
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> SessionResult<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            return Err(SessionError::InvalidState(
                "file capture already running".to_string(),
            ));
        }

        let file = AudioFile::open(&self.path)?;
        let (tx, rx) = mpsc::channel(32);

        let channels = file.channels.max(1);
        let buffer_size = self.config.buffer_size.max(1);
        let samples_per_frame = buffer_size * channels as usize;
        // interval() panics on a zero period
        let frame_period = Duration::from_micros(
            buffer_size as u64 * 1_000_000 / file.sample_rate.max(1) as u64,
        )
        .max(MIN_FRAME_PERIOD);
        let mut processor =
            FrameProcessor::new(self.config.target_sample_rate, self.config.target_channels);
        let capturing = Arc::clone(&self.capturing);
        capturing.store(true, Ordering::SeqCst);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_period);
            let mut timestamp_ms = 0u64;

            for chunk in file.samples.chunks(samples_per_frame) {
                ticker.tick().await;
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }

                let frame = AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate: file.sample_rate,
                    channels,
                    timestamp_ms,
                };
                timestamp_ms += frame.duration_ms();

                if tx
                    .send(processor.process(frame))
                    .await
                    .is_err()
                {
                    break;
                }
            }

            capturing.store(false, Ordering::SeqCst);
            info!("File capture finished: {}", file.path);
        });

        self.task = Some(task);
        Ok(rx)
    }

    async fn stop(&mut self) -> SessionResult<()> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("File capture task panicked: {}", e);
                }
            }
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "file"
    }
}
