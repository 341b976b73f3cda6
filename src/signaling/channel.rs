//! Abstraktion des Signaling-Kanals
//!
//! Die Session spricht nur gegen diese Traits. Die WebSocket-Implementierung
//! steckt in `client.rs`; Tests verwenden einen In-Memory-Relay.

use super::messages::{ClientMessage, PeerId, SdpPayload};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Signaling server did not assign an id within {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Invalid signaling URL: {0}")]
    InvalidUrl(String),
}

// ============================================================================
// SIGNALING EVENTS
// ============================================================================

/// Eingehende Ereignisse, in Empfangsreihenfolge
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// Ein anderer Teilnehmer ist schon im Raum - wir rufen an
    OtherUser { peer_id: PeerId },

    /// Eingehendes Offer - wir antworten
    OfferReceived { from: PeerId, sdp: SdpPayload },

    /// SDP Answer erhalten
    AnswerReceived { from: Option<PeerId>, sdp: SdpPayload },

    /// ICE Candidate erhalten
    IceCandidateReceived {
        from: Option<PeerId>,
        candidate: RTCIceCandidateInit,
    },

    /// Gegenseite hat den Raum verlassen
    UserLeft,

    /// Verbindung zum Relay verloren
    Disconnected,
}

// ============================================================================
// CHANNEL TRAITS
// ============================================================================

/// Ein verbundener Kanal mit bekannter eigener ID
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Vom Relay vergebene eigene ID
    fn local_id(&self) -> &str;

    fn is_connected(&self) -> bool;

    async fn send(&self, message: ClientMessage) -> Result<(), SignalingError>;

    /// Trennt die Verbindung. Mehrfaches Aufrufen ist harmlos.
    async fn disconnect(&self);
}

/// Ergebnis eines erfolgreichen Verbindungsaufbaus
///
/// `events` hat genau einen Empfänger und liefert verlustfrei in
/// Empfangsreihenfolge.
pub struct SignalingLink {
    pub channel: Arc<dyn SignalingChannel>,
    pub events: mpsc::UnboundedReceiver<SignalingEvent>,
}

impl std::fmt::Debug for SignalingLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingLink")
            .field("local_id", &self.channel.local_id())
            .finish()
    }
}

/// Baut Kanäle auf (einer pro `join()`)
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(&self) -> Result<SignalingLink, SignalingError>;
}
