//! Video Call - P2P Video-Call Client
//!
//! Ein Peer-to-Peer Video-Call Client mit:
//! - WebSocket-Relay als Signaling-Server (Raum-basiert)
//! - WebRTC für P2P Audio/Video
//! - Kamera/Mikrofon Capture mit Mute und Kamera-Aus

pub mod call_engine;
pub mod config;
pub mod media;
pub mod session;
pub mod signaling;

#[cfg(test)]
mod testing;

use call_engine::CallEvent;
use config::CallConfig;
use media::SystemMediaDevices;
use session::CallSession;
use signaling::WebSocketConnector;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// Standard-Filter, falls `RUST_LOG` nicht gesetzt ist
pub const DEFAULT_LOG_FILTER: &str = "video_call_lib=debug,video_call=debug,webrtc=warn";

// ============================================================================
// LOGGING
// ============================================================================

/// Initialisiert das Logging (mehrfacher Aufruf ist harmlos)
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ============================================================================
// APP ENTRY
// ============================================================================

/// Tritt dem konfigurierten Raum bei und läuft bis Ctrl+C oder Anrufende
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    let config = CallConfig::from_env()?;
    tracing::info!(
        "Starting video call: room {} via {}",
        config.room_id,
        config.signaling_url
    );

    let connector = Arc::new(WebSocketConnector::from_config(&config)?);
    let devices = Arc::new(SystemMediaDevices::with_camera(config.camera_index));
    let session = CallSession::new(config, devices, connector);

    let mut events = session.subscribe();
    session.join().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, leaving call");
                break;
            }
            event = events.recv() => match event {
                Ok(CallEvent::Left) => break,
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => tracing::warn!("Dropped {} call event(s)", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.leave().await;
    Ok(())
}

fn log_event(event: &CallEvent) {
    match event {
        CallEvent::Joined { local_id, room_id } => {
            tracing::info!("Joined room {} as {}", room_id, local_id);
        }
        CallEvent::LocalStream(stream) => {
            tracing::info!("Local stream ready: {} track(s)", stream.tracks().len());
        }
        CallEvent::NegotiationStateChanged { peer_id, state } => {
            tracing::info!("Negotiation with {}: {}", peer_id, state);
        }
        CallEvent::RemoteTrack(track) => {
            tracing::info!("Remote track from {}: {:?}", track.peer_id, track.kind);
        }
        CallEvent::PeerLeft => tracing::info!("Peer left the call"),
        CallEvent::SignalingLost => tracing::warn!("Signaling connection lost"),
        CallEvent::Left => {}
        CallEvent::Error(err) => tracing::error!("Call error: {}", err),
    }
}
