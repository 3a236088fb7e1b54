pub mod backend;
pub mod file;
pub mod pcm;

pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource};
pub use file::{AudioFile, FileBackend};
pub use pcm::{encode_pcm16, process_frame, FrameProcessor, Resampler};
