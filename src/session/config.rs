use std::time::Duration;

use crate::audio::{AudioBackendConfig, AudioSource};
use crate::config::Config;
use crate::documentation::ChannelSettings;

/// Configuration for one consultation call
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// RTC channel to join
    pub channel_id: String,

    /// RTC application id
    pub app_id: String,

    /// Appointment this call belongs to (billing, documentation)
    pub appointment_id: String,

    /// Maximum callable/billable duration
    /// Default: 900 seconds (15 minutes)
    pub cap: Duration,

    /// Publish a camera track alongside the microphone
    pub video: bool,

    /// Documentation socket; `None` runs the call without documentation
    pub documentation: Option<DocumentationSettings>,
}

/// How to reach the AI medical session and what to stream to it
#[derive(Debug, Clone)]
pub struct DocumentationSettings {
    pub channel: ChannelSettings,
    pub access_token: String,
    /// Review to resume, if one was already assigned
    pub review_id: Option<String>,
    /// Capture source for streamed audio; `None` streams nothing
    pub audio_source: Option<AudioSource>,
    pub audio: AudioBackendConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel_id: format!("consult-{}", uuid::Uuid::new_v4()),
            app_id: String::new(),
            appointment_id: String::new(),
            cap: Duration::from_secs(900), // 15 minutes
            video: false,
            documentation: None,
        }
    }
}

impl SessionConfig {
    /// Per-call config from the service config
    pub fn from_config(cfg: &Config, channel_id: String, appointment_id: String) -> Self {
        Self {
            channel_id,
            app_id: cfg.session.app_id.clone(),
            appointment_id,
            cap: Duration::from_secs(cfg.session.cap_secs),
            video: cfg.session.video,
            documentation: None,
        }
    }

    pub fn with_documentation(mut self, settings: DocumentationSettings) -> Self {
        self.documentation = Some(settings);
        self
    }
}

impl DocumentationSettings {
    pub fn from_config(cfg: &Config, access_token: String, audio_source: Option<AudioSource>) -> Self {
        Self {
            channel: ChannelSettings::from(&cfg.documentation),
            access_token,
            review_id: None,
            audio_source,
            audio: AudioBackendConfig {
                target_sample_rate: cfg.session.sample_rate,
                target_channels: 1,
                buffer_size: cfg.session.buffer_size,
            },
        }
    }
}
