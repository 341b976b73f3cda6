//! Test-Hilfen: In-Memory Relay, aufzeichnender Kanal, Fake-Geräte

use crate::media::{LocalMediaStream, LocalTrack, MediaAccessError, MediaConstraints, MediaDevices};
use crate::signaling::{
    ClientMessage, PeerId, SdpPayload, SignalingChannel, SignalingConnector, SignalingError,
    SignalingEvent, SignalingLink,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

// ============================================================================
// RECORDING CHANNEL
// ============================================================================

/// Kanal ohne Gegenstelle, zeichnet alle gesendeten Nachrichten auf
pub struct RecordingChannel {
    id: String,
    connected: AtomicBool,
    sent: Mutex<Vec<ClientMessage>>,
}

impl RecordingChannel {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            connected: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }

    pub fn offers(&self) -> Vec<SdpPayload> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::Offer { sdp, .. } => Some(sdp),
                _ => None,
            })
            .collect()
    }

    /// Gesendete ICE-Candidates als (to, from, candidate)
    pub fn candidates(&self) -> Vec<(PeerId, PeerId, RTCIceCandidateInit)> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::IceCandidate {
                    to,
                    from,
                    candidate,
                } => Some((to, from, candidate)),
                _ => None,
            })
            .collect()
    }

    pub fn answers(&self) -> Vec<SdpPayload> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::Answer { sdp, .. } => Some(sdp),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SignalingChannel for RecordingChannel {
    fn local_id(&self) -> &str {
        &self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, message: ClientMessage) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::NotConnected);
        }
        self.sent.lock().push(message);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// MEMORY RELAY
// ============================================================================

struct RelayClient {
    room: Option<String>,
    events: mpsc::UnboundedSender<SignalingEvent>,
}

#[derive(Default)]
struct RelayState {
    next_id: u64,
    connects: usize,
    refuse: bool,
    clients: HashMap<PeerId, RelayClient>,
    log: Vec<(PeerId, ClientMessage)>,
}

/// Relay im Speicher, verhält sich wie der WebSocket-Relay
///
/// Der zweite Teilnehmer eines Raums erhält `other-user` mit der ID des
/// ersten. Trennt sich ein Teilnehmer, erhalten die übrigen `user-left`.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn SignalingConnector> {
        Arc::new(MemoryConnector {
            relay: self.clone(),
        })
    }

    pub fn refuse_connections(&self) {
        self.state.lock().refuse = true;
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// Anzahl der Nachrichten eines Typs, die `id` gesendet hat
    pub fn sent_by(&self, id: &str, event: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|(from, msg)| from == id && msg.event_name() == event)
            .count()
    }

    /// Alle ICE-Candidates, die `id` gesendet hat, als (to, from)
    pub fn candidates_sent_by(&self, id: &str) -> Vec<(PeerId, PeerId)> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|(sender, _)| sender == id)
            .filter_map(|(_, msg)| match msg {
                ClientMessage::IceCandidate { to, from, .. } => Some((to.clone(), from.clone())),
                _ => None,
            })
            .collect()
    }

    /// Stellt `to` ein Event zu, als käme es vom Relay
    pub fn inject(&self, to: &str, event: SignalingEvent) {
        self.state.lock().deliver(to, event);
    }

    fn route(&self, from: &str, message: ClientMessage) {
        let mut state = self.state.lock();
        state.log.push((from.to_string(), message.clone()));

        match message {
            ClientMessage::JoinRoom { room_id } => {
                let other = state
                    .clients
                    .iter()
                    .find(|(id, c)| id.as_str() != from && c.room.as_deref() == Some(&room_id))
                    .map(|(id, _)| id.clone());

                if let Some(client) = state.clients.get_mut(from) {
                    client.room = Some(room_id);
                    if let Some(peer_id) = other {
                        let _ = client.events.send(SignalingEvent::OtherUser { peer_id });
                    }
                }
            }
            ClientMessage::Offer { to, from, sdp } => {
                state.deliver(&to, SignalingEvent::OfferReceived { from, sdp });
            }
            ClientMessage::Answer { to, from, sdp } => {
                state.deliver(
                    &to,
                    SignalingEvent::AnswerReceived {
                        from: Some(from),
                        sdp,
                    },
                );
            }
            ClientMessage::IceCandidate {
                to,
                from,
                candidate,
            } => {
                state.deliver(
                    &to,
                    SignalingEvent::IceCandidateReceived {
                        from: Some(from),
                        candidate,
                    },
                );
            }
        }
    }

    fn remove(&self, id: &str) {
        let mut state = self.state.lock();
        let Some(client) = state.clients.remove(id) else {
            return;
        };

        if let Some(room) = client.room {
            for other in state.clients.values() {
                if other.room.as_deref() == Some(&room) {
                    let _ = other.events.send(SignalingEvent::UserLeft);
                }
            }
        }
    }
}

impl RelayState {
    fn deliver(&self, to: &str, event: SignalingEvent) {
        if let Some(client) = self.clients.get(to) {
            let _ = client.events.send(event);
        }
    }
}

struct MemoryConnector {
    relay: MemoryRelay,
}

#[async_trait]
impl SignalingConnector for MemoryConnector {
    async fn connect(&self) -> Result<SignalingLink, SignalingError> {
        let mut state = self.relay.state.lock();
        if state.refuse {
            return Err(SignalingError::ConnectionFailed(
                "connection refused".to_string(),
            ));
        }

        state.next_id += 1;
        state.connects += 1;
        let id = format!("peer-{}", state.next_id);

        let (events_tx, events) = mpsc::unbounded_channel();
        state.clients.insert(
            id.clone(),
            RelayClient {
                room: None,
                events: events_tx,
            },
        );

        let channel = MemoryChannel {
            id,
            relay: self.relay.clone(),
            connected: AtomicBool::new(true),
        };

        Ok(SignalingLink {
            channel: Arc::new(channel),
            events,
        })
    }
}

struct MemoryChannel {
    id: PeerId,
    relay: MemoryRelay,
    connected: AtomicBool,
}

#[async_trait]
impl SignalingChannel for MemoryChannel {
    fn local_id(&self) -> &str {
        &self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, message: ClientMessage) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::NotConnected);
        }
        self.relay.route(&self.id, message);
        Ok(())
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.relay.remove(&self.id);
        }
    }
}

// ============================================================================
// FAKE MEDIA DEVICES
// ============================================================================

/// Liefert Tracks ohne Hardware; optional verweigert oder verzögert
#[derive(Default)]
pub struct FakeMediaDevices {
    gate: Option<Arc<Notify>>,
    error: Option<MediaAccessError>,
    issued: Arc<Mutex<Vec<Arc<LocalTrack>>>>,
}

impl FakeMediaDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denied() -> Self {
        Self {
            error: Some(MediaAccessError::PermissionDenied(
                "user dismissed the prompt".to_string(),
            )),
            ..Self::default()
        }
    }

    /// Antwortet erst nach `gate.notify_one()`
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Alle bisher ausgegebenen Tracks
    pub fn issued_tracks(&self) -> Arc<Mutex<Vec<Arc<LocalTrack>>>> {
        Arc::clone(&self.issued)
    }
}

#[async_trait]
impl MediaDevices for FakeMediaDevices {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<LocalMediaStream, MediaAccessError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        let kinds = constraints.requested_kinds();
        if kinds.is_empty() {
            return Err(MediaAccessError::NothingRequested);
        }

        let stream = LocalMediaStream::new(&kinds);
        self.issued.lock().extend(stream.tracks().iter().cloned());
        Ok(stream)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Wartet bis `condition` gilt (maximal 10 Sekunden)
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for: {}", what);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
