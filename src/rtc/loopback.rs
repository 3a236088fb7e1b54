use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{
    ConnectionState, LocalTrack, MediaKind, RemoteTrack, RtcClient, RtcError, RtcEvent,
    RtcSession, Uid,
};

const LOCAL_UID: Uid = 1;

#[derive(Default)]
struct RoomState {
    deny_microphone: bool,
    deny_camera: bool,
    join_failure: Option<String>,
    events_tx: Option<mpsc::Sender<RtcEvent>>,
    channel: Option<String>,
    published: Vec<MediaKind>,
    join_count: usize,
    leave_count: usize,
    remote: HashSet<(Uid, MediaKind)>,
    local_tracks: Vec<Arc<LoopbackTrackState>>,
    remote_playing: HashMap<(Uid, MediaKind), Arc<AtomicBool>>,
}

struct LoopbackTrackState {
    kind: MediaKind,
    enabled: AtomicBool,
    closed: AtomicBool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<RoomState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RoomState> {
        // A poisoned lock only means a test panicked mid-update
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// In-process RTC client: one local user in a room driven by [`LoopbackRoom`]
pub struct LoopbackRtc {
    shared: Arc<Shared>,
}

/// Control handle for the loopback room (remote peers, device permissions)
#[derive(Clone)]
pub struct LoopbackRoom {
    shared: Arc<Shared>,
}

impl LoopbackRtc {
    pub fn new() -> (Self, LoopbackRoom) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            LoopbackRoom { shared },
        )
    }
}

impl LoopbackRoom {
    /// Make microphone track creation fail with a permission error
    pub fn deny_microphone(&self) {
        self.shared.lock().deny_microphone = true;
    }

    pub fn deny_camera(&self) {
        self.shared.lock().deny_camera = true;
    }

    pub fn fail_join(&self, reason: impl Into<String>) {
        self.shared.lock().join_failure = Some(reason.into());
    }

    /// A remote peer publishes a track; returns false if nobody is joined
    pub async fn publish_remote(&self, uid: Uid, kind: MediaKind) -> bool {
        let tx = {
            let mut state = self.shared.lock();
            state.remote.insert((uid, kind));
            state.events_tx.clone()
        };
        Self::deliver(tx, RtcEvent::UserPublished { uid, kind }).await
    }

    pub async fn unpublish_remote(&self, uid: Uid, kind: MediaKind) -> bool {
        let tx = {
            let mut state = self.shared.lock();
            state.remote.remove(&(uid, kind));
            state.events_tx.clone()
        };
        Self::deliver(tx, RtcEvent::UserUnpublished { uid, kind }).await
    }

    pub async fn change_connection_state(
        &self,
        current: ConnectionState,
        previous: ConnectionState,
    ) -> bool {
        let tx = self.shared.lock().events_tx.clone();
        Self::deliver(tx, RtcEvent::ConnectionStateChange { current, previous }).await
    }

    async fn deliver(tx: Option<mpsc::Sender<RtcEvent>>, event: RtcEvent) -> bool {
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.shared.lock().channel.is_some()
    }

    pub fn channel(&self) -> Option<String> {
        self.shared.lock().channel.clone()
    }

    pub fn join_count(&self) -> usize {
        self.shared.lock().join_count
    }

    pub fn leave_count(&self) -> usize {
        self.shared.lock().leave_count
    }

    pub fn published_kinds(&self) -> Vec<MediaKind> {
        self.shared.lock().published.clone()
    }

    /// Enabled flag of the most recently created local track of `kind`
    pub fn local_track_enabled(&self, kind: MediaKind) -> Option<bool> {
        self.shared
            .lock()
            .local_tracks
            .iter()
            .rev()
            .find(|t| t.kind == kind)
            .map(|t| t.enabled.load(Ordering::SeqCst))
    }

    pub fn all_local_tracks_closed(&self) -> bool {
        self.shared
            .lock()
            .local_tracks
            .iter()
            .all(|t| t.closed.load(Ordering::SeqCst))
    }

    pub fn remote_playing(&self, uid: Uid, kind: MediaKind) -> bool {
        self.shared
            .lock()
            .remote_playing
            .get(&(uid, kind))
            .map(|p| p.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

struct LoopbackLocalTrack {
    state: Arc<LoopbackTrackState>,
}

#[async_trait::async_trait]
impl LocalTrack for LoopbackLocalTrack {
    fn kind(&self) -> MediaKind {
        self.state.kind
    }

    async fn set_enabled(&self, enabled: bool) -> Result<(), RtcError> {
        self.state.enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.state.enabled.store(false, Ordering::SeqCst);
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

struct LoopbackRemoteTrack {
    kind: MediaKind,
    playing: Arc<AtomicBool>,
}

impl RemoteTrack for LoopbackRemoteTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn play(&self) {
        self.playing.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }
}

impl LoopbackRtc {
    fn create_track(&self, kind: MediaKind) -> Result<Box<dyn LocalTrack>, RtcError> {
        let mut state = self.shared.lock();
        let denied = match kind {
            MediaKind::Audio => state.deny_microphone,
            MediaKind::Video => state.deny_camera,
        };
        if denied {
            return Err(RtcError::PermissionDenied(kind));
        }

        let track = Arc::new(LoopbackTrackState {
            kind,
            enabled: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });
        state.local_tracks.push(Arc::clone(&track));
        Ok(Box::new(LoopbackLocalTrack { state: track }))
    }
}

#[async_trait::async_trait]
impl RtcClient for LoopbackRtc {
    async fn create_microphone_track(&self) -> Result<Box<dyn LocalTrack>, RtcError> {
        self.create_track(MediaKind::Audio)
    }

    async fn create_camera_track(&self) -> Result<Box<dyn LocalTrack>, RtcError> {
        self.create_track(MediaKind::Video)
    }

    async fn join(
        &self,
        _app_id: &str,
        channel: &str,
        _token: Option<&str>,
    ) -> Result<RtcSession, RtcError> {
        let mut state = self.shared.lock();
        if let Some(reason) = state.join_failure.clone() {
            return Err(RtcError::Join(reason));
        }
        if state.channel.is_some() {
            return Err(RtcError::Join("already in a channel".to_string()));
        }

        let (tx, rx) = mpsc::channel(64);
        state.events_tx = Some(tx);
        state.channel = Some(channel.to_string());
        state.join_count += 1;
        info!("Loopback room joined: {}", channel);

        Ok(RtcSession {
            uid: LOCAL_UID,
            events: rx,
        })
    }

    async fn publish(&self, tracks: &[&dyn LocalTrack]) -> Result<(), RtcError> {
        let mut state = self.shared.lock();
        if state.channel.is_none() {
            return Err(RtcError::Publish("not joined".to_string()));
        }
        state.published.extend(tracks.iter().map(|t| t.kind()));
        Ok(())
    }

    async fn subscribe(&self, uid: Uid, kind: MediaKind) -> Result<Box<dyn RemoteTrack>, RtcError> {
        let mut state = self.shared.lock();
        if !state.remote.contains(&(uid, kind)) {
            return Err(RtcError::Subscribe {
                uid,
                kind,
                reason: "track not published".to_string(),
            });
        }

        let playing = Arc::new(AtomicBool::new(false));
        state.remote_playing.insert((uid, kind), Arc::clone(&playing));
        debug!("Loopback subscribed to {} {:?}", uid, kind);
        Ok(Box::new(LoopbackRemoteTrack { kind, playing }))
    }

    async fn leave(&self) -> Result<(), RtcError> {
        let mut state = self.shared.lock();
        state.events_tx = None;
        state.channel = None;
        state.published.clear();
        state.leave_count += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "loopback"
    }
}
