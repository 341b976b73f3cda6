//! Call Session Controller
//!
//! Steuert den Lebenszyklus eines Anrufs: Beitreten, Verlassen, Mute und
//! Kamera. Jeder asynchrone Schritt merkt sich die Epoche, in der er begann;
//! `leave()` erhöht die Epoche, verspätete Ergebnisse werden verworfen.

use crate::call_engine::{CallEvent, EngineSettings, NegotiationEngine, NegotiationError, NegotiationState};
use crate::config::CallConfig;
use crate::media::{LocalMediaStream, MediaAccessError, MediaDevices, TrackKind};
use crate::signaling::{
    ClientMessage, PeerId, SignalingChannel, SignalingConnector, SignalingError, SignalingEvent,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Could not access camera/microphone: {0}")]
    MediaAccess(#[from] MediaAccessError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error("Already joined or joining a call")]
    AlreadyJoined,

    #[error("Join was cancelled by leave()")]
    Cancelled,
}

// ============================================================================
// SESSION STATE
// ============================================================================

#[derive(Default)]
struct SessionResources {
    joined: bool,
    joining: bool,
    local_media: Option<Arc<LocalMediaStream>>,
    channel: Option<Arc<dyn SignalingChannel>>,
    engine: Option<Arc<NegotiationEngine>>,
}

struct SessionInner {
    config: CallConfig,
    devices: Arc<dyn MediaDevices>,
    connector: Arc<dyn SignalingConnector>,
    epoch: AtomicU64,
    resources: Mutex<SessionResources>,
    event_tx: broadcast::Sender<CallEvent>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        // Kamera/Mikrofon nie über das Session-Ende hinaus offen lassen
        if let Some(media) = self.resources.get_mut().local_media.take() {
            media.stop();
        }
    }
}

// ============================================================================
// CALL SESSION
// ============================================================================

/// Ein Anruf-Versuch in einem Raum (klonbar, alle Klone teilen den Zustand)
#[derive(Clone)]
pub struct CallSession {
    inner: Arc<SessionInner>,
}

impl CallSession {
    pub fn new(
        config: CallConfig,
        devices: Arc<dyn MediaDevices>,
        connector: Arc<dyn SignalingConnector>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            inner: Arc::new(SessionInner {
                config,
                devices,
                connector,
                epoch: AtomicU64::new(0),
                resources: Mutex::new(SessionResources::default()),
                event_tx,
            }),
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn config(&self) -> &CallConfig {
        &self.inner.config
    }

    pub fn is_joined(&self) -> bool {
        self.inner.resources.lock().joined
    }

    /// Eigene Socket-ID (nur während einer Session)
    pub fn local_id(&self) -> Option<PeerId> {
        self.inner
            .resources
            .lock()
            .channel
            .as_ref()
            .map(|c| c.local_id().to_string())
    }

    pub fn local_stream(&self) -> Option<Arc<LocalMediaStream>> {
        self.inner.resources.lock().local_media.clone()
    }

    pub fn negotiation_state(&self, peer: &str) -> Option<NegotiationState> {
        self.engine().and_then(|e| e.state(peer))
    }

    pub fn remote_peers(&self) -> Vec<PeerId> {
        self.engine().map(|e| e.peer_ids()).unwrap_or_default()
    }

    /// Tritt dem konfigurierten Raum bei
    ///
    /// Schlägt der Medienzugriff fehl, bleibt kein Teilzustand zurück.
    pub async fn join(&self) -> Result<(), SessionError> {
        let epoch = {
            let mut resources = self.inner.resources.lock();
            if resources.joined || resources.joining {
                return Err(SessionError::AlreadyJoined);
            }
            resources.joining = true;
            self.inner.epoch.load(Ordering::SeqCst)
        };

        let result = self.join_inner(epoch).await;

        if let Err(ref e) = result {
            if self.is_current(epoch) {
                self.inner.resources.lock().joining = false;
            }
            if !matches!(e, SessionError::Cancelled) {
                tracing::error!("Join failed: {}", e);
                self.emit(CallEvent::Error(e.to_string()));
            }
        }

        result
    }

    async fn join_inner(&self, epoch: u64) -> Result<(), SessionError> {
        let config = &self.inner.config;
        tracing::info!("Joining room {}", config.room_id);

        let media = Arc::new(self.inner.devices.get_user_media(&config.media).await?);
        if !self.is_current(epoch) {
            media.stop();
            return Err(SessionError::Cancelled);
        }

        let link = match self.inner.connector.connect().await {
            Ok(link) => link,
            Err(e) => {
                media.stop();
                return Err(e.into());
            }
        };
        let channel = link.channel;

        if !self.is_current(epoch) {
            channel.disconnect().await;
            media.stop();
            return Err(SessionError::Cancelled);
        }

        let join_msg = ClientMessage::JoinRoom {
            room_id: config.room_id.clone(),
        };
        if let Err(e) = channel.send(join_msg).await {
            channel.disconnect().await;
            media.stop();
            return Err(e.into());
        }

        let engine = Arc::new(NegotiationEngine::new(
            EngineSettings::from(config),
            Arc::clone(&channel),
            self.inner.event_tx.clone(),
        ));

        let stored = {
            let mut resources = self.inner.resources.lock();
            if self.is_current(epoch) {
                resources.joined = true;
                resources.joining = false;
                resources.local_media = Some(Arc::clone(&media));
                resources.channel = Some(Arc::clone(&channel));
                resources.engine = Some(engine);
                true
            } else {
                false
            }
        };

        if !stored {
            channel.disconnect().await;
            media.stop();
            return Err(SessionError::Cancelled);
        }

        let local_id = channel.local_id().to_string();
        tracing::info!("Joined room {} as {}", config.room_id, local_id);

        self.emit(CallEvent::LocalStream(media));
        self.emit(CallEvent::Joined {
            local_id,
            room_id: config.room_id.clone(),
        });

        self.spawn_event_loop(epoch, link.events);
        Ok(())
    }

    /// Beendet den Anruf und gibt alle Ressourcen frei
    ///
    /// Mehrfaches Aufrufen und Aufrufen vor `join()` sind harmlos.
    pub async fn leave(&self) {
        let (media, channel, engine, was_active) = {
            let mut resources = self.inner.resources.lock();
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);

            let was_active = resources.joined || resources.joining;
            resources.joined = false;
            resources.joining = false;

            (
                resources.local_media.take(),
                resources.channel.take(),
                resources.engine.take(),
                was_active,
            )
        };

        if let Some(engine) = engine {
            engine.close_all().await;
        }
        if let Some(media) = media {
            media.stop();
        }
        if let Some(channel) = channel {
            channel.disconnect().await;
        }

        if was_active {
            tracing::info!("Left call");
            self.emit(CallEvent::Left);
        }
    }

    /// Schaltet alle Audio-Tracks um (ohne Wirkung vor dem Medienzugriff)
    pub fn toggle_mute(&self) {
        if let Some(media) = self.local_stream() {
            media.toggle(TrackKind::Audio);
        }
    }

    /// Schaltet alle Video-Tracks um (ohne Wirkung vor dem Medienzugriff)
    pub fn toggle_camera(&self) {
        if let Some(media) = self.local_stream() {
            media.toggle(TrackKind::Video);
        }
    }

    pub fn is_muted(&self) -> bool {
        self.local_stream()
            .map(|m| m.all_disabled(TrackKind::Audio))
            .unwrap_or(false)
    }

    pub fn is_camera_off(&self) -> bool {
        self.local_stream()
            .map(|m| m.all_disabled(TrackKind::Video))
            .unwrap_or(false)
    }

    // ========================================================================
    // EVENT HANDLING
    // ========================================================================

    /// Verarbeitet Signaling-Events strikt nacheinander
    fn spawn_event_loop(&self, epoch: u64, mut events: mpsc::UnboundedReceiver<SignalingEvent>) {
        let session = self.clone();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !session.is_current(epoch) {
                    break;
                }
                session.handle_signaling_event(epoch, event).await;
            }

            tracing::debug!("Signaling event loop finished");
        });
    }

    async fn handle_signaling_event(&self, epoch: u64, event: SignalingEvent) {
        let (engine, media) = {
            let resources = self.inner.resources.lock();
            match (&resources.engine, &resources.local_media) {
                (Some(engine), Some(media)) => (Arc::clone(engine), Arc::clone(media)),
                _ => return,
            }
        };

        match event {
            SignalingEvent::OtherUser { peer_id } => {
                tracing::info!("Other user in room: {}", peer_id);
                if !engine.peer_ids().is_empty() {
                    tracing::warn!("Already negotiating, ignoring other user {}", peer_id);
                    return;
                }

                let result: Result<(), NegotiationError> = async {
                    engine.create_connection(&peer_id).await?;
                    engine.initiate_offer(&peer_id, &media).await
                }
                .await;
                self.report(result, "start call");
            }

            SignalingEvent::OfferReceived { from, sdp } => {
                tracing::info!("Incoming offer from {}", from);
                if !engine.peer_ids().is_empty() {
                    tracing::warn!("Already negotiating, ignoring offer from {}", from);
                    return;
                }

                let result: Result<(), NegotiationError> = async {
                    engine.create_connection(&from).await?;
                    engine.accept_offer(&from, &media, sdp).await
                }
                .await;
                self.report(result, "answer call");
            }

            SignalingEvent::AnswerReceived { from, sdp } => {
                let Some(peer) = from.or_else(|| engine.sole_peer()) else {
                    tracing::warn!("Answer received without a pending offer");
                    return;
                };
                tracing::info!("Answer received from {}", peer);
                let result = engine.complete_answer(&peer, sdp).await;
                self.report(result, "apply answer");
            }

            SignalingEvent::IceCandidateReceived { from, candidate } => {
                let outcome = engine.add_remote_candidate(from.as_deref(), candidate).await;
                tracing::debug!("Remote candidate: {:?}", outcome);
            }

            SignalingEvent::UserLeft => {
                tracing::info!("Peer disconnected");
                self.emit(CallEvent::PeerLeft);
                self.leave().await;
                return;
            }

            SignalingEvent::Disconnected => {
                tracing::warn!("Lost connection to signaling server");
                self.emit(CallEvent::SignalingLost);
            }
        }

        // leave() lief während des Schritts - neu angelegte Verbindungen verwerfen
        if !self.is_current(epoch) {
            engine.close_all().await;
        }
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    fn engine(&self) -> Option<Arc<NegotiationEngine>> {
        self.inner.resources.lock().engine.clone()
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.inner.epoch.load(Ordering::SeqCst) == epoch
    }

    fn report(&self, result: Result<(), NegotiationError>, action: &str) {
        if let Err(e) = result {
            tracing::error!("Failed to {}: {}", action, e);
            self.emit(CallEvent::Error(format!("Failed to {}: {}", action, e)));
        }
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.inner.event_tx.send(event);
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("room_id", &self.inner.config.room_id)
            .field("joined", &self.is_joined())
            .field("local_id", &self.local_id())
            .field("epoch", &self.inner.epoch.load(Ordering::SeqCst))
            .finish()
    }
}
