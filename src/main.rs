use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use consult_session::rtc::Uid;
use consult_session::{
    create_router, AppState, AudioSource, BillingReconciler, Config, DocumentationSettings,
    HttpBillingClient, LoopbackRtc, MediaKind, SessionConfig, SessionController, SessionEvent,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

const SIMULATED_PEER: Uid = 2;

/// Run one consultation session over the loopback room
#[derive(Parser, Debug)]
#[command(name = "consult-session", version)]
struct Args {
    /// Config file (extension optional)
    #[arg(long, default_value = "config/consult-session")]
    config: String,

    /// Appointment the call belongs to
    #[arg(long)]
    appointment_id: String,

    /// RTC channel; defaults to `consult-<appointment id>`
    #[arg(long)]
    channel: Option<String>,

    /// Access token for the documentation socket and billing API
    #[arg(long)]
    token: Option<String>,

    /// WAV file streamed to the documentation channel as microphone audio
    #[arg(long)]
    audio_file: Option<PathBuf>,

    /// Simulate a remote peer joining after this many seconds
    #[arg(long)]
    peer_after: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    let channel = args
        .channel
        .clone()
        .unwrap_or_else(|| format!("consult-{}", args.appointment_id));
    let mut session_config = SessionConfig::from_config(&cfg, channel, args.appointment_id.clone());

    match &args.token {
        Some(token) => {
            session_config = session_config.with_documentation(DocumentationSettings::from_config(
                &cfg,
                token.clone(),
                args.audio_file.clone().map(AudioSource::File),
            ));
        }
        None => warn!("No access token given; documentation disabled"),
    }

    let billing_client = HttpBillingClient::from_config(&cfg.billing, args.token.clone())?;
    let reconciler = BillingReconciler::new(
        Arc::new(billing_client),
        cfg.billing.cost_bearer.clone(),
        cfg.billing.expertise.clone(),
        session_config.cap,
    );

    let (rtc, room) = LoopbackRtc::new();
    let controller = SessionController::new(session_config, Arc::new(rtc), reconciler);
    let mut events = controller.subscribe();

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind control API on {}", addr))?;
    info!("Control API listening on {}", addr);

    let app = create_router(AppState::new(controller.clone()));
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    controller.join().await.context("Failed to join call")?;

    if let Some(secs) = args.peer_after {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            info!("Simulated peer {} joining", SIMULATED_PEER);
            room.publish_remote(SIMULATED_PEER, MediaKind::Audio).await;
            room.publish_remote(SIMULATED_PEER, MediaKind::Video).await;
        });
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, leaving call");
                controller.leave().await?;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::NavigateAway) | Err(RecvError::Closed) => break,
                Ok(SessionEvent::Tick { remaining_secs }) if remaining_secs % 60 == 0 => {
                    info!("{} minutes remaining", remaining_secs / 60);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} session events", skipped),
            },
        }
    }

    let stats = controller.stats().await;
    info!(
        "Session finished: status={:?}, billing={:?}",
        stats.status, stats.billing
    );

    server.abort();
    Ok(())
}
