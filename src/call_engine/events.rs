//! Events für die Präsentationsschicht

use super::state::NegotiationState;
use crate::media::{LocalMediaStream, TrackKind};
use crate::signaling::PeerId;
use std::sync::Arc;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

/// Eingehender Track der Gegenseite
#[derive(Clone)]
pub struct RemoteTrack {
    pub peer_id: PeerId,
    pub kind: Option<TrackKind>,
    pub track: Arc<TrackRemote>,
}

impl RemoteTrack {
    pub fn new(peer_id: PeerId, track: Arc<TrackRemote>) -> Self {
        let kind = match track.kind() {
            RTPCodecType::Audio => Some(TrackKind::Audio),
            RTPCodecType::Video => Some(TrackKind::Video),
            _ => None,
        };

        Self {
            peer_id,
            kind,
            track,
        }
    }
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("peer_id", &self.peer_id)
            .field("kind", &self.kind)
            .field("id", &self.track.id())
            .field("stream_id", &self.track.stream_id())
            .finish()
    }
}

/// Events die von Session und Engine ausgelöst werden
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Raum betreten, eigene ID bekannt
    Joined { local_id: PeerId, room_id: String },

    /// Lokale Tracks bereit zur Anzeige
    LocalStream(Arc<LocalMediaStream>),

    NegotiationStateChanged {
        peer_id: PeerId,
        state: NegotiationState,
    },

    /// Track der Gegenseite empfangen
    RemoteTrack(RemoteTrack),

    /// Gegenseite hat den Raum verlassen
    PeerLeft,

    /// WebSocket zum Relay abgerissen (keine automatische Wiederverbindung)
    SignalingLost,

    /// Session vollständig abgebaut
    Left,

    Error(String),
}
