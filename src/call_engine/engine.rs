//! WebRTC Negotiation Engine
//!
//! Verwaltet die Peer Connections einer Session (eine pro Remote-ID) und
//! führt den Offer/Answer/ICE-Austausch durch.

use super::candidates::PendingCandidates;
use super::events::{CallEvent, RemoteTrack};
use super::state::NegotiationState;
use crate::media::LocalMediaStream;
use crate::signaling::{ClientMessage, PeerId, SdpKind, SdpPayload, SignalingChannel, SignalingError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::broadcast;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("WebRTC error: {0}")]
    WebRTC(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("No connection to peer {0}")]
    NoConnection(PeerId),

    #[error("Connection to {peer} is {actual}, expected {expected}")]
    InvalidState {
        peer: PeerId,
        expected: NegotiationState,
        actual: NegotiationState,
    },

    #[error("Signaling failed: {0}")]
    Signaling(#[from] SignalingError),
}

fn webrtc_err(e: webrtc::Error) -> NegotiationError {
    NegotiationError::WebRTC(e.to_string())
}

/// Ergebnis von `add_remote_candidate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// Direkt an die Verbindung übergeben
    Applied,
    /// Noch keine Remote Description - wird später nachgespielt
    Buffered,
    /// Von WebRTC abgelehnt (kaputt oder veraltet), nicht fatal
    Rejected,
}

/// Zähler der an eine Verbindung übergebenen Remote-Candidates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateStats {
    pub applied: usize,
    pub rejected: usize,
}

impl CandidateStats {
    fn record(&mut self, outcome: CandidateOutcome) {
        match outcome {
            CandidateOutcome::Applied => self.applied += 1,
            CandidateOutcome::Rejected => self.rejected += 1,
            CandidateOutcome::Buffered => {}
        }
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub ice_servers: Vec<RTCIceServer>,
    pub mdns_queries: bool,
}

impl From<&crate::config::CallConfig> for EngineSettings {
    fn from(config: &crate::config::CallConfig) -> Self {
        Self {
            ice_servers: config.rtc_ice_servers(),
            mdns_queries: config.mdns_queries,
        }
    }
}

// ============================================================================
// NEGOTIATION ENGINE
// ============================================================================

struct PeerSlot {
    pc: Arc<RTCPeerConnection>,
    state: NegotiationState,
    candidates: CandidateStats,
}

type PeerMap = Mutex<HashMap<PeerId, PeerSlot>>;

pub struct NegotiationEngine {
    local_id: PeerId,
    settings: EngineSettings,
    signaling: Arc<dyn SignalingChannel>,
    peers: Arc<PeerMap>,
    pending: Mutex<PendingCandidates>,
    event_tx: broadcast::Sender<CallEvent>,
}

impl NegotiationEngine {
    pub fn new(
        settings: EngineSettings,
        signaling: Arc<dyn SignalingChannel>,
        event_tx: broadcast::Sender<CallEvent>,
    ) -> Self {
        Self {
            local_id: signaling.local_id().to_string(),
            settings,
            signaling,
            peers: Arc::new(Mutex::new(HashMap::new())),
            pending: Mutex::new(PendingCandidates::default()),
            event_tx,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Zustand der Verbindung zu `peer` (`None` = keine oder geschlossen)
    pub fn state(&self, peer: &str) -> Option<NegotiationState> {
        self.peers.lock().get(peer).map(|s| s.state)
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.lock().keys().cloned().collect()
    }

    /// Die einzige Verbindung, falls genau eine existiert
    pub fn sole_peer(&self) -> Option<PeerId> {
        let peers = self.peers.lock();
        if peers.len() == 1 {
            peers.keys().next().cloned()
        } else {
            None
        }
    }

    pub fn pending_candidates(&self, peer: &str) -> usize {
        self.pending.lock().len(peer)
    }

    /// Angewendete und abgelehnte Candidates der Verbindung zu `peer`
    pub fn candidate_stats(&self, peer: &str) -> Option<CandidateStats> {
        self.peers.lock().get(peer).map(|slot| slot.candidates)
    }

    /// Erstellt eine neue Peer Connection für `remote`
    ///
    /// Eine bestehende Verbindung zum selben Peer wird vorher geschlossen.
    pub async fn create_connection(
        &self,
        remote: &str,
    ) -> Result<Arc<RTCPeerConnection>, NegotiationError> {
        let previous = self.peers.lock().remove(remote);
        if let Some(previous) = previous {
            tracing::warn!("Replacing existing connection to {}", remote);
            if let Err(e) = previous.pc.close().await {
                tracing::warn!("Failed to close previous connection to {}: {}", remote, e);
            }
        }

        let api = build_api(self.settings.mdns_queries)?;
        let config = RTCConfiguration {
            ice_servers: self.settings.ice_servers.clone(),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await.map_err(webrtc_err)?);
        self.setup_peer_connection_handlers(&pc, remote);

        self.peers.lock().insert(
            remote.to_string(),
            PeerSlot {
                pc: Arc::clone(&pc),
                state: NegotiationState::New,
                candidates: CandidateStats::default(),
            },
        );
        self.pending.lock().adopt_unaddressed(remote);

        tracing::info!("Created peer connection to {}", remote);
        let _ = self.event_tx.send(CallEvent::NegotiationStateChanged {
            peer_id: remote.to_string(),
            state: NegotiationState::New,
        });

        Ok(pc)
    }

    /// Anrufer-Seite: Tracks anhängen, Offer erstellen und senden
    pub async fn initiate_offer(
        &self,
        remote: &str,
        local: &LocalMediaStream,
    ) -> Result<(), NegotiationError> {
        let pc = self.expect_state(remote, NegotiationState::New)?;

        attach_tracks(&pc, local).await?;

        let offer = pc.create_offer(None).await.map_err(webrtc_err)?;
        pc.set_local_description(offer.clone())
            .await
            .map_err(webrtc_err)?;
        self.advance(remote, NegotiationState::HaveLocalOffer);

        let sdp = pc
            .local_description()
            .await
            .map(|d| d.sdp)
            .unwrap_or(offer.sdp);

        self.signaling
            .send(ClientMessage::Offer {
                to: remote.to_string(),
                from: self.local_id.clone(),
                sdp: SdpPayload::offer(sdp),
            })
            .await?;

        tracing::info!("Sent offer to {}", remote);
        Ok(())
    }

    /// Angerufenen-Seite: Offer übernehmen, Answer erstellen und senden
    pub async fn accept_offer(
        &self,
        remote: &str,
        local: &LocalMediaStream,
        remote_sdp: SdpPayload,
    ) -> Result<(), NegotiationError> {
        if remote_sdp.kind != SdpKind::Offer {
            return Err(NegotiationError::InvalidSdp(format!(
                "expected offer, got {:?}",
                remote_sdp.kind
            )));
        }

        let pc = self.expect_state(remote, NegotiationState::New)?;

        let offer = RTCSessionDescription::offer(remote_sdp.sdp)
            .map_err(|e| NegotiationError::InvalidSdp(e.to_string()))?;
        pc.set_remote_description(offer)
            .await
            .map_err(webrtc_err)?;
        self.advance(remote, NegotiationState::HaveRemoteOffer);
        self.flush_pending(remote, &pc).await;

        attach_tracks(&pc, local).await?;

        let answer = pc.create_answer(None).await.map_err(webrtc_err)?;
        pc.set_local_description(answer.clone())
            .await
            .map_err(webrtc_err)?;
        self.advance(remote, NegotiationState::HaveLocalAnswer);

        let sdp = pc
            .local_description()
            .await
            .map(|d| d.sdp)
            .unwrap_or(answer.sdp);

        self.signaling
            .send(ClientMessage::Answer {
                to: remote.to_string(),
                from: self.local_id.clone(),
                sdp: SdpPayload::answer(sdp),
            })
            .await?;

        tracing::info!("Sent answer to {}", remote);
        Ok(())
    }

    /// Anrufer-Seite: Answer der Gegenseite übernehmen
    pub async fn complete_answer(
        &self,
        remote: &str,
        remote_sdp: SdpPayload,
    ) -> Result<(), NegotiationError> {
        if remote_sdp.kind != SdpKind::Answer {
            return Err(NegotiationError::InvalidSdp(format!(
                "expected answer, got {:?}",
                remote_sdp.kind
            )));
        }

        let pc = self.expect_state(remote, NegotiationState::HaveLocalOffer)?;

        let answer = RTCSessionDescription::answer(remote_sdp.sdp)
            .map_err(|e| NegotiationError::InvalidSdp(e.to_string()))?;
        pc.set_remote_description(answer)
            .await
            .map_err(webrtc_err)?;

        // ICE läuft asynchron weiter
        self.advance(remote, NegotiationState::Connected);
        self.flush_pending(remote, &pc).await;

        tracing::info!("Applied answer from {}", remote);
        Ok(())
    }

    /// Übergibt einen Remote-Candidate oder puffert ihn
    ///
    /// Ohne Absender wird die einzige bestehende Verbindung angenommen.
    pub async fn add_remote_candidate(
        &self,
        from: Option<&str>,
        candidate: RTCIceCandidateInit,
    ) -> CandidateOutcome {
        let peer = from.map(str::to_string).or_else(|| self.sole_peer());

        let Some(peer) = peer else {
            tracing::debug!("Buffering candidate without sender or connection");
            self.pending.lock().push(None, candidate);
            return CandidateOutcome::Buffered;
        };

        let ready = self
            .peers
            .lock()
            .get(&peer)
            .filter(|slot| slot.state.has_remote_description())
            .map(|slot| Arc::clone(&slot.pc));

        match ready {
            Some(pc) => {
                let outcome = apply_candidate(&pc, &peer, candidate).await;
                self.record_candidates(&peer, |stats| stats.record(outcome));
                outcome
            }
            None => {
                tracing::debug!("Remote description for {} not set yet, queuing candidate", peer);
                self.pending.lock().push(Some(&peer), candidate);
                CandidateOutcome::Buffered
            }
        }
    }

    /// Schließt die Verbindung zu `remote`. Mehrfaches Aufrufen ist harmlos.
    pub async fn close(&self, remote: &str) {
        let slot = self.peers.lock().remove(remote);
        self.pending.lock().discard(remote);

        if let Some(slot) = slot {
            if let Err(e) = slot.pc.close().await {
                tracing::warn!("Error while closing connection to {}: {}", remote, e);
            }
            tracing::info!("Closed peer connection to {}", remote);
            let _ = self.event_tx.send(CallEvent::NegotiationStateChanged {
                peer_id: remote.to_string(),
                state: NegotiationState::Closed,
            });
        }
    }

    pub async fn close_all(&self) {
        for peer in self.peer_ids() {
            self.close(&peer).await;
        }
        self.pending.lock().clear();
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    fn expect_state(
        &self,
        remote: &str,
        expected: NegotiationState,
    ) -> Result<Arc<RTCPeerConnection>, NegotiationError> {
        let peers = self.peers.lock();
        let slot = peers
            .get(remote)
            .ok_or_else(|| NegotiationError::NoConnection(remote.to_string()))?;

        if slot.state != expected {
            return Err(NegotiationError::InvalidState {
                peer: remote.to_string(),
                expected,
                actual: slot.state,
            });
        }

        Ok(Arc::clone(&slot.pc))
    }

    fn advance(&self, remote: &str, next: NegotiationState) {
        advance_state(&self.peers, &self.event_tx, remote, next);
    }

    /// Spielt gepufferte Candidates nach und gibt das Ergebnis zurück
    async fn flush_pending(&self, remote: &str, pc: &RTCPeerConnection) -> CandidateStats {
        let mut flushed = CandidateStats::default();
        let candidates = self.pending.lock().take(remote);
        if candidates.is_empty() {
            return flushed;
        }

        tracing::debug!("Applying {} queued candidate(s) from {}", candidates.len(), remote);
        for candidate in candidates {
            flushed.record(apply_candidate(pc, remote, candidate).await);
        }

        if flushed.rejected > 0 {
            tracing::warn!(
                "{} of {} queued candidate(s) from {} were rejected",
                flushed.rejected,
                flushed.applied + flushed.rejected,
                remote
            );
        }
        self.record_candidates(remote, |stats| {
            stats.applied += flushed.applied;
            stats.rejected += flushed.rejected;
        });
        flushed
    }

    fn record_candidates(&self, remote: &str, update: impl FnOnce(&mut CandidateStats)) {
        if let Some(slot) = self.peers.lock().get_mut(remote) {
            update(&mut slot.candidates);
        }
    }

    /// Registriert Event Handler für die Peer Connection
    fn setup_peer_connection_handlers(&self, pc: &Arc<RTCPeerConnection>, remote: &str) {
        // ICE Candidate Handler
        let signaling = Arc::clone(&self.signaling);
        let local_id = self.local_id.clone();
        let to = remote.to_string();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let signaling = Arc::clone(&signaling);
            let from = local_id.clone();
            let to = to.clone();

            Box::pin(async move {
                let Some(candidate) = candidate else {
                    tracing::debug!("ICE gathering complete for {}", to);
                    return;
                };

                match candidate.to_json() {
                    Ok(init) => {
                        let msg = ClientMessage::IceCandidate {
                            to: to.clone(),
                            from,
                            candidate: init,
                        };
                        if let Err(e) = signaling.send(msg).await {
                            tracing::error!("Failed to send ICE candidate to {}: {}", to, e);
                        }
                    }
                    Err(e) => tracing::warn!("Failed to serialize local candidate: {}", e),
                }
            })
        }));

        // Track Handler (eingehende Medien)
        let event_tx = self.event_tx.clone();
        let peer_id = remote.to_string();
        pc.on_track(Box::new(move |track, _, _| {
            let remote_track = RemoteTrack::new(peer_id.clone(), track);
            tracing::info!("Received {:?} track from {}", remote_track.kind, peer_id);
            let _ = event_tx.send(CallEvent::RemoteTrack(remote_track));
            Box::pin(async {})
        }));

        // Connection State Handler
        let peers: Weak<PeerMap> = Arc::downgrade(&self.peers);
        let event_tx = self.event_tx.clone();
        let peer_id = remote.to_string();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::info!("Peer connection state ({}): {:?}", peer_id, s);

            match s {
                RTCPeerConnectionState::Connected => {
                    if let Some(peers) = peers.upgrade() {
                        let answered = peers
                            .lock()
                            .get(&peer_id)
                            .map(|slot| slot.state == NegotiationState::HaveLocalAnswer)
                            .unwrap_or(false);
                        if answered {
                            advance_state(&peers, &event_tx, &peer_id, NegotiationState::Connected);
                        }
                    }
                }
                RTCPeerConnectionState::Failed => {
                    let _ = event_tx.send(CallEvent::Error(format!(
                        "Connection to {} failed",
                        peer_id
                    )));
                }
                _ => {}
            }

            Box::pin(async {})
        }));
    }
}

impl std::fmt::Debug for NegotiationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let states: HashMap<PeerId, NegotiationState> = self
            .peers
            .lock()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.state))
            .collect();

        f.debug_struct("NegotiationEngine")
            .field("local_id", &self.local_id)
            .field("peers", &states)
            .finish()
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn build_api(mdns_queries: bool) -> Result<API, NegotiationError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().map_err(webrtc_err)?;

    // Interceptors für RTCP, NACK etc.
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine).map_err(webrtc_err)?;

    let mut setting_engine = SettingEngine::default();
    setting_engine.set_ice_multicast_dns_mode(if mdns_queries {
        MulticastDnsMode::QueryOnly
    } else {
        MulticastDnsMode::Disabled
    });

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build())
}

async fn attach_tracks(
    pc: &RTCPeerConnection,
    local: &LocalMediaStream,
) -> Result<(), NegotiationError> {
    for track in local.tracks().iter().filter(|t| t.is_live()) {
        pc.add_track(track.rtc_track()).await.map_err(webrtc_err)?;
        tracing::debug!("Attached local {} track {}", track.kind().as_str(), track.id());
    }
    Ok(())
}

async fn apply_candidate(
    pc: &RTCPeerConnection,
    peer: &str,
    candidate: RTCIceCandidateInit,
) -> CandidateOutcome {
    match pc.add_ice_candidate(candidate).await {
        Ok(()) => CandidateOutcome::Applied,
        Err(e) => {
            // Ein einzelner verlorener Candidate verhindert die Verbindung meist nicht
            tracing::warn!("Error adding ICE candidate from {}: {}", peer, e);
            CandidateOutcome::Rejected
        }
    }
}

fn advance_state(
    peers: &PeerMap,
    event_tx: &broadcast::Sender<CallEvent>,
    remote: &str,
    next: NegotiationState,
) {
    {
        let mut peers = peers.lock();
        let Some(slot) = peers.get_mut(remote) else {
            return;
        };
        if !slot.state.can_transition_to(next) {
            tracing::warn!(
                "Ignoring transition {} -> {} for {}",
                slot.state,
                next,
                remote
            );
            return;
        }
        slot.state = next;
    }

    let _ = event_tx.send(CallEvent::NegotiationStateChanged {
        peer_id: remote.to_string(),
        state: next,
    });
}
