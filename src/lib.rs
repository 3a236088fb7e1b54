pub mod audio;
pub mod billing;
pub mod config;
pub mod documentation;
pub mod error;
pub mod http;
pub mod rtc;
pub mod session;

pub use audio::{
    encode_pcm16, AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame,
    AudioSource, FileBackend,
};
pub use billing::{
    BillingOutcome, BillingReconciler, BillingRecord, BillingSubmitter, HttpBillingClient,
};
pub use config::Config;
pub use documentation::{ChannelSettings, ChannelStatus, Delivery, DocumentationChannel};
pub use error::{SessionError, SessionResult};
pub use http::{create_router, AppState};
pub use rtc::{LoopbackRoom, LoopbackRtc, MediaKind, RtcClient};
pub use session::{
    DocumentationSettings, SessionConfig, SessionController, SessionEvent, SessionStats,
    SessionStatus,
};
