use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::config::{DocumentationSettings, SessionConfig};
use super::participants::ParticipantSet;
use super::stats::{NotificationLevel, SessionEvent, SessionStats, SessionStatus};
use crate::audio::{AudioBackendConfig, AudioBackendFactory, AudioSource, FrameProcessor};
use crate::billing::{BillingOutcome, BillingReconciler, BillingRecord};
use crate::documentation::{
    ChannelStatus, DocumentationChannel, DocumentationEvent, DocumentationNote, TranscriptEntry,
};
use crate::error::{SessionError, SessionResult};
use crate::rtc::{ConnectionState, LocalTrack, RtcClient, RtcError, RtcEvent, RtcSession};

const TICK: Duration = Duration::from_secs(1);

/// Controls one live consultation call
///
/// Cheap to clone; all clones drive the same call. The controller owns:
/// - room membership and local tracks
/// - the remote participant set
/// - the countdown (runs only while two or more participants are present)
/// - the documentation channel and the audio streamed to it
/// - billing reconciliation on leave
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    rtc: Arc<dyn RtcClient>,
    billing: BillingReconciler,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    participants_tx: watch::Sender<usize>,
}

struct SessionState {
    status: SessionStatus,
    review_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    /// Monotonic twin of `started_at`, used for billing
    started: Option<Instant>,
    remaining_secs: u64,
    participants: ParticipantSet,
    microphone: Option<Box<dyn LocalTrack>>,
    camera: Option<Box<dyn LocalTrack>>,
    event_loop: Option<JoinHandle<()>>,
    countdown: Option<JoinHandle<()>>,
    documentation: Option<Arc<DocumentationChannel>>,
    documentation_watch: Option<JoinHandle<()>>,
    audio_pump: Option<AudioPump>,
    billing: Option<BillingOutcome>,
}

struct AudioPump {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Everything `leave()` tears down outside the state lock
struct Teardown {
    record: Option<BillingRecord>,
    documentation: Option<Arc<DocumentationChannel>>,
    documentation_watch: Option<JoinHandle<()>>,
    audio_pump: Option<AudioPump>,
    event_loop: Option<JoinHandle<()>>,
    tracks: Vec<Box<dyn LocalTrack>>,
}

type JoinedMedia = (Box<dyn LocalTrack>, Option<Box<dyn LocalTrack>>, RtcSession);

impl SessionController {
    pub fn new(config: SessionConfig, rtc: Arc<dyn RtcClient>, billing: BillingReconciler) -> Self {
        let (events, _) = broadcast::channel(256);
        let (participants_tx, _) = watch::channel(0);
        let remaining_secs = config.cap.as_secs();

        Self {
            inner: Arc::new(Inner {
                config,
                rtc,
                billing,
                state: Mutex::new(SessionState {
                    status: SessionStatus::Idle,
                    review_id: None,
                    started_at: None,
                    started: None,
                    remaining_secs,
                    participants: ParticipantSet::default(),
                    microphone: None,
                    camera: None,
                    event_loop: None,
                    countdown: None,
                    documentation: None,
                    documentation_watch: None,
                    audio_pump: None,
                    billing: None,
                }),
                events,
                participants_tx,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Session events for the view layer
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Participant count, local user included
    pub fn on_participant_change(&self) -> watch::Receiver<usize> {
        self.inner.participants_tx.subscribe()
    }

    pub async fn status(&self) -> SessionStatus {
        self.inner.state.lock().await.status
    }

    /// Acquire local media, join the room and publish
    pub async fn join(&self) -> SessionResult<()> {
        {
            let mut state = self.inner.state.lock().await;
            if state.status != SessionStatus::Idle {
                return Err(SessionError::InvalidState(format!(
                    "cannot join while {:?}",
                    state.status
                )));
            }
            state.status = SessionStatus::Joining;
        }
        self.emit(SessionEvent::StatusChanged {
            status: SessionStatus::Joining,
        });

        info!(
            "Joining channel {} via {}",
            self.inner.config.channel_id,
            self.inner.rtc.name()
        );

        match self.acquire_and_join().await {
            Ok((microphone, camera, session)) => {
                info!(
                    "Joined channel {} as uid {}",
                    self.inner.config.channel_id, session.uid
                );

                // Hold the lock until the event loop exists so room events
                // cannot overtake the Active transition
                let mut state = self.inner.state.lock().await;
                state.microphone = Some(microphone);
                state.camera = camera;
                state.status = SessionStatus::Active;
                self.inner.participants_tx.send_replace(1);
                self.emit(SessionEvent::StatusChanged {
                    status: SessionStatus::Active,
                });
                self.emit(SessionEvent::ParticipantsChanged { count: 1 });
                state.event_loop = Some(tokio::spawn(self.clone().run_events(session.events)));
                Ok(())
            }
            Err(e) => {
                self.inner.state.lock().await.status = SessionStatus::Idle;
                self.emit(SessionEvent::StatusChanged {
                    status: SessionStatus::Idle,
                });
                self.notify(NotificationLevel::Error, e.to_string());
                Err(e)
            }
        }
    }

    async fn acquire_and_join(&self) -> SessionResult<JoinedMedia> {
        let rtc = &self.inner.rtc;
        let config = &self.inner.config;

        let microphone = rtc.create_microphone_track().await.map_err(media_error)?;

        let camera = if config.video {
            match rtc.create_camera_track().await {
                Ok(track) => Some(track),
                Err(e) => {
                    microphone.close();
                    return Err(media_error(e));
                }
            }
        } else {
            None
        };

        let close_all = |microphone: &dyn LocalTrack, camera: &Option<Box<dyn LocalTrack>>| {
            microphone.close();
            if let Some(camera) = camera {
                camera.close();
            }
        };

        let session = match rtc.join(&config.app_id, &config.channel_id, None).await {
            Ok(session) => session,
            Err(e) => {
                close_all(&*microphone, &camera);
                return Err(SessionError::RoomJoin(e.to_string()));
            }
        };

        let mut tracks: Vec<&dyn LocalTrack> = vec![&*microphone];
        if let Some(camera) = &camera {
            tracks.push(&**camera);
        }

        if let Err(e) = rtc.publish(&tracks).await {
            if let Err(leave_err) = rtc.leave().await {
                warn!("Failed to leave after publish error: {}", leave_err);
            }
            close_all(&*microphone, &camera);
            return Err(SessionError::RoomJoin(e.to_string()));
        }

        Ok((microphone, camera, session))
    }

    /// Flip the local camera track; `None` when there is no camera track
    pub async fn toggle_video(&self) -> SessionResult<Option<bool>> {
        let state = self.inner.state.lock().await;
        let Some(camera) = state.camera.as_ref() else {
            return Ok(None);
        };

        let enabled = !camera.is_enabled();
        camera
            .set_enabled(enabled)
            .await
            .map_err(|e| SessionError::MediaAccess(e.to_string()))?;

        info!("Local video {}", if enabled { "enabled" } else { "disabled" });
        Ok(Some(enabled))
    }

    /// End the call; repeated calls are no-ops
    ///
    /// Billing is measured before anything is torn down, then capture and
    /// documentation stop, local media is released, the room is left, the
    /// billing record is submitted and the view is told to navigate away.
    pub async fn leave(&self) -> SessionResult<()> {
        let teardown = {
            let mut state = self.inner.state.lock().await;
            match state.status {
                SessionStatus::Active => {}
                SessionStatus::Joining => {
                    return Err(SessionError::InvalidState(
                        "join still in progress".to_string(),
                    ))
                }
                status => {
                    debug!("leave() ignored while {:?}", status);
                    return Ok(());
                }
            }

            state.status = SessionStatus::Ending;
            if let Some(countdown) = state.countdown.take() {
                countdown.abort();
            }

            let record = self.inner.billing.prepare(
                &self.inner.config.appointment_id,
                state.started,
                Instant::now(),
            );

            Teardown {
                record,
                documentation: state.documentation.take(),
                documentation_watch: state.documentation_watch.take(),
                audio_pump: state.audio_pump.take(),
                event_loop: state.event_loop.take(),
                tracks: state
                    .microphone
                    .take()
                    .into_iter()
                    .chain(state.camera.take())
                    .collect(),
            }
        };

        self.emit(SessionEvent::StatusChanged {
            status: SessionStatus::Ending,
        });
        info!("Leaving channel {}", self.inner.config.channel_id);

        if let Some(pump) = teardown.audio_pump {
            let _ = pump.shutdown.send(());
            if let Err(e) = pump.handle.await {
                error!("Audio pump task panicked: {}", e);
            }
        }

        if let Some(channel) = teardown.documentation {
            if let Some(review_id) = channel.review_id().await {
                self.inner.state.lock().await.review_id = Some(review_id);
            }
            channel.close().await;
        }
        if let Some(watcher) = teardown.documentation_watch {
            watcher.abort();
        }

        for track in &teardown.tracks {
            track.close();
        }
        self.inner.state.lock().await.participants.clear();

        if let Err(e) = self.inner.rtc.leave().await {
            warn!("RTC leave failed: {}", e);
        }
        if let Some(event_loop) = teardown.event_loop {
            event_loop.abort();
        }

        let outcome = self.inner.billing.reconcile(teardown.record).await;
        if let BillingOutcome::Failed { message } = &outcome {
            self.notify(
                NotificationLevel::Error,
                format!("Billing could not be submitted: {}", message),
            );
        }

        {
            let mut state = self.inner.state.lock().await;
            state.billing = Some(outcome);
            state.status = SessionStatus::Ended;
        }

        self.inner.participants_tx.send_replace(0);
        self.emit(SessionEvent::StatusChanged {
            status: SessionStatus::Ended,
        });
        self.emit(SessionEvent::NavigateAway);
        info!("Session {} ended", self.inner.config.channel_id);

        Ok(())
    }

    /// Ask the documentation backend for structured notes
    pub async fn request_documentation(
        &self,
        request_type: &str,
        details: &str,
    ) -> SessionResult<String> {
        let channel = self.documentation().await.ok_or_else(|| {
            SessionError::Socket("documentation channel is not open".to_string())
        })?;
        channel
            .request_documentation(request_type, details, &self.inner.config.appointment_id)
            .await
    }

    pub async fn documentation(&self) -> Option<Arc<DocumentationChannel>> {
        self.inner.state.lock().await.documentation.clone()
    }

    pub async fn transcript(&self) -> Vec<TranscriptEntry> {
        match self.documentation().await {
            Some(channel) => channel.transcript().await,
            None => Vec::new(),
        }
    }

    pub async fn notes(&self) -> Vec<DocumentationNote> {
        match self.documentation().await {
            Some(channel) => channel.notes().await,
            None => Vec::new(),
        }
    }

    pub async fn stats(&self) -> SessionStats {
        let (mut stats, channel) = {
            let state = self.inner.state.lock().await;
            let stats = SessionStats {
                status: state.status,
                channel_id: self.inner.config.channel_id.clone(),
                appointment_id: self.inner.config.appointment_id.clone(),
                review_id: state.review_id.clone(),
                started_at: state.started_at,
                remaining_secs: state.remaining_secs,
                timer_running: state.countdown.is_some(),
                participants: participant_count(&state),
                remote_uids: state.participants.uids(),
                video_enabled: state.camera.as_ref().map(|c| c.is_enabled()),
                documentation: state.documentation.as_ref().map(|c| c.status()),
                transcript_entries: 0,
                billing: state.billing.clone(),
            };
            (stats, state.documentation.clone())
        };

        if let Some(channel) = channel {
            let doc = channel.snapshot().await;
            stats.transcript_entries = doc.transcript.len();
            if let Some(review_id) = doc.review_id {
                stats.review_id = Some(review_id.to_string());
            }
        }
        stats
    }

    async fn run_events(self, mut events: mpsc::Receiver<RtcEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                RtcEvent::UserPublished { uid, kind } => {
                    let track = match self.inner.rtc.subscribe(uid, kind).await {
                        Ok(track) => track,
                        Err(e) => {
                            warn!("Failed to subscribe to {} {:?}: {}", uid, kind, e);
                            continue;
                        }
                    };

                    let mut state = self.inner.state.lock().await;
                    if state.status != SessionStatus::Active {
                        track.stop();
                        continue;
                    }
                    info!("Remote user {} published {:?}", uid, kind);
                    let previous = participant_count(&state);
                    state.participants.attach(uid, track);
                    self.participants_changed(&mut state, previous);
                }
                RtcEvent::UserUnpublished { uid, kind } => {
                    let mut state = self.inner.state.lock().await;
                    if state.status != SessionStatus::Active {
                        continue;
                    }
                    info!("Remote user {} unpublished {:?}", uid, kind);
                    let previous = participant_count(&state);
                    state.participants.detach(uid, kind);
                    self.participants_changed(&mut state, previous);
                }
                RtcEvent::ConnectionStateChange { current, previous } => {
                    info!("RTC connection {:?} -> {:?}", previous, current);
                    if current == ConnectionState::Disconnected
                        && self.status().await == SessionStatus::Active
                    {
                        self.notify(
                            NotificationLevel::Warning,
                            "Disconnected from the call".to_string(),
                        );
                    }
                }
            }
        }
        debug!("RTC event loop finished");
    }

    /// Participant-count transitions are the only timer trigger
    fn participants_changed(&self, state: &mut SessionState, previous: usize) {
        let count = participant_count(state);
        if count == previous {
            return;
        }

        self.inner.participants_tx.send_replace(count);
        self.emit(SessionEvent::ParticipantsChanged { count });

        if previous < 2 && count >= 2 {
            self.start_timer(state);
        } else if previous >= 2 && count < 2 {
            self.stop_timer(state);
        }
    }

    fn start_timer(&self, state: &mut SessionState) {
        if state.started.is_none() {
            state.started = Some(Instant::now());
            state.started_at = Some(Utc::now());
        }

        if state.countdown.is_none() && state.remaining_secs > 0 {
            info!("Countdown started: {}s remaining", state.remaining_secs);
            state.countdown = Some(tokio::spawn(self.clone().run_countdown()));
            self.emit(SessionEvent::TimerStarted {
                remaining_secs: state.remaining_secs,
            });
        }

        if state.documentation.is_none() {
            if let Some(settings) = &self.inner.config.documentation {
                self.open_documentation(state, settings);
            }
        }
    }

    fn stop_timer(&self, state: &mut SessionState) {
        if let Some(countdown) = state.countdown.take() {
            countdown.abort();
            info!("Countdown paused: {}s remaining", state.remaining_secs);
            self.emit(SessionEvent::TimerStopped {
                remaining_secs: state.remaining_secs,
            });
        }
    }

    async fn run_countdown(self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + TICK, TICK);

        loop {
            ticker.tick().await;

            let remaining_secs = {
                let mut state = self.inner.state.lock().await;
                if state.status != SessionStatus::Active {
                    return;
                }
                state.remaining_secs = state.remaining_secs.saturating_sub(1);
                state.remaining_secs
            };
            self.emit(SessionEvent::Tick { remaining_secs });

            if remaining_secs == 0 {
                info!("Session cap reached, ending call");
                // leave() aborts this task, so it has to run elsewhere
                let controller = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = controller.leave().await {
                        error!("Automatic leave failed: {}", e);
                    }
                });
                return;
            }
        }
    }

    fn open_documentation(&self, state: &mut SessionState, settings: &DocumentationSettings) {
        let review_id = state.review_id.clone().or_else(|| settings.review_id.clone());

        let channel = match DocumentationChannel::connect(
            settings.channel.clone(),
            &settings.access_token,
            review_id,
            Some(self.inner.config.appointment_id.clone()),
        ) {
            Ok(channel) => Arc::new(channel),
            Err(e) => {
                self.notify(
                    NotificationLevel::Warning,
                    format!("Documentation unavailable: {}", e),
                );
                return;
            }
        };

        state.documentation_watch = Some(tokio::spawn(
            self.clone().watch_documentation(Arc::clone(&channel)),
        ));

        if let Some(source) = settings.audio_source.clone() {
            let (shutdown, shutdown_rx) = oneshot::channel();
            let handle = tokio::spawn(pump_audio(
                Arc::clone(&channel),
                source,
                settings.audio.clone(),
                shutdown_rx,
            ));
            state.audio_pump = Some(AudioPump { shutdown, handle });
        }

        state.documentation = Some(channel);
    }

    /// Mirror channel status and review id into the session
    async fn watch_documentation(self, channel: Arc<DocumentationChannel>) {
        let mut status_rx = channel.status_watch();
        let mut events = channel.subscribe();
        let mut last = *status_rx.borrow_and_update();
        self.emit(SessionEvent::DocumentationStatus { status: last });

        loop {
            tokio::select! {
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *status_rx.borrow_and_update();
                    if current == last {
                        continue;
                    }
                    self.emit(SessionEvent::DocumentationStatus { status: current });

                    let active = self.status().await == SessionStatus::Active;
                    match current {
                        ChannelStatus::Reconnecting { .. } if last == ChannelStatus::Open && active => {
                            self.notify(
                                NotificationLevel::Warning,
                                "Documentation connection lost, reconnecting".to_string(),
                            );
                        }
                        ChannelStatus::Closed if active => {
                            self.notify(
                                NotificationLevel::Error,
                                "Documentation stopped: connection could not be restored".to_string(),
                            );
                        }
                        _ => {}
                    }
                    last = current;
                }
                event = events.recv() => match event {
                    Ok(DocumentationEvent::Authenticated { review_id }) => {
                        self.inner.state.lock().await.review_id = Some(review_id.to_string());
                    }
                    Ok(DocumentationEvent::Error(details)) => {
                        self.notify(
                            NotificationLevel::Warning,
                            format!("Documentation service error: {}", details),
                        );
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Documentation watcher skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    fn notify(&self, level: NotificationLevel, message: String) {
        match level {
            NotificationLevel::Info => info!("{}", message),
            NotificationLevel::Warning => warn!("{}", message),
            NotificationLevel::Error => error!("{}", message),
        }
        self.emit(SessionEvent::Notification { level, message });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }
}

fn participant_count(state: &SessionState) -> usize {
    match state.status {
        SessionStatus::Active | SessionStatus::Ending => 1 + state.participants.remote_count(),
        _ => 0,
    }
}

fn media_error(e: RtcError) -> SessionError {
    match e {
        RtcError::PermissionDenied(kind) => {
            SessionError::MediaAccess(format!("{:?} permission denied", kind))
        }
        other => SessionError::MediaAccess(other.to_string()),
    }
}

/// Feed captured audio into the documentation channel until shut down
async fn pump_audio(
    channel: Arc<DocumentationChannel>,
    source: AudioSource,
    config: AudioBackendConfig,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut backend = match AudioBackendFactory::create(source, config.clone()) {
        Ok(backend) => backend,
        Err(e) => {
            warn!("Documentation audio unavailable: {}", e);
            return;
        }
    };

    let mut frames = match backend.start().await {
        Ok(frames) => frames,
        Err(e) => {
            warn!("Failed to start {} capture: {}", backend.name(), e);
            return;
        }
    };
    info!("Streaming {} audio to documentation channel", backend.name());

    let mut processor = FrameProcessor::new(config.target_sample_rate, config.target_channels);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            frame = frames.recv() => match frame {
                Some(frame) => {
                    let frame = processor.process(frame);
                    channel.stream_audio(&frame.samples);
                }
                None => break,
            },
        }
    }

    if let Err(e) = backend.stop().await {
        warn!("Failed to stop {} capture: {}", backend.name(), e);
    }
}
