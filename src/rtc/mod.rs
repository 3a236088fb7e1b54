//! Real-time communication client surface
//!
//! The session controller only talks to the room through [`RtcClient`]:
//! - local track creation (microphone, camera)
//! - join/publish/subscribe/leave
//! - remote publish/unpublish and connection-state events
//!
//! [`LoopbackRtc`] is an in-process room used for local runs and tests.

mod loopback;

pub use loopback::{LoopbackRoom, LoopbackRtc};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Remote/local user id assigned by the room
pub type Uid = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
}

/// Callback surface of the room, delivered in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcEvent {
    UserPublished { uid: Uid, kind: MediaKind },
    UserUnpublished { uid: Uid, kind: MediaKind },
    ConnectionStateChange {
        current: ConnectionState,
        previous: ConnectionState,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RtcError {
    #[error("permission denied for {0:?} device")]
    PermissionDenied(MediaKind),

    #[error("join failed: {0}")]
    Join(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe to {uid} {kind:?} failed: {reason}")]
    Subscribe {
        uid: Uid,
        kind: MediaKind,
        reason: String,
    },

    #[error("leave failed: {0}")]
    Leave(String),
}

/// Result of a successful join
pub struct RtcSession {
    /// Local user id
    pub uid: Uid,
    /// Room events for this membership
    pub events: mpsc::Receiver<RtcEvent>,
}

/// Local microphone/camera track
#[async_trait::async_trait]
pub trait LocalTrack: Send + Sync {
    fn kind(&self) -> MediaKind;

    /// Mute/unmute in place without renegotiating other tracks
    async fn set_enabled(&self, enabled: bool) -> Result<(), RtcError>;

    fn is_enabled(&self) -> bool;

    /// Stop capture and release the device
    fn close(&self);
}

/// Subscribed remote track; the SDK owns the media, we only hold the handle
pub trait RemoteTrack: Send + Sync {
    fn kind(&self) -> MediaKind;

    fn play(&self);

    fn stop(&self);
}

/// Real-time communication client
#[async_trait::async_trait]
pub trait RtcClient: Send + Sync {
    async fn create_microphone_track(&self) -> Result<Box<dyn LocalTrack>, RtcError>;

    async fn create_camera_track(&self) -> Result<Box<dyn LocalTrack>, RtcError>;

    /// Join a channel; `token` is `None` for token-less app ids
    async fn join(
        &self,
        app_id: &str,
        channel: &str,
        token: Option<&str>,
    ) -> Result<RtcSession, RtcError>;

    async fn publish(&self, tracks: &[&dyn LocalTrack]) -> Result<(), RtcError>;

    async fn subscribe(&self, uid: Uid, kind: MediaKind) -> Result<Box<dyn RemoteTrack>, RtcError>;

    async fn leave(&self) -> Result<(), RtcError>;

    /// Get client name for logging
    fn name(&self) -> &str;
}
