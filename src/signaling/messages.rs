//! Message Types für das Signaling-Protokoll
//!
//! Jeder WebSocket-Frame ist ein JSON-Envelope `{"event": ..., "data": {...}}`.
//! Die Event-Namen entsprechen den Socket-Events des Relays
//! (`join-room`, `other-user`, `offer`, `answer`, `ice-candidate`, `user-left`).
//! Fehlt `data` oder ist es `null`, gilt es als leeres Objekt.
//!
//! Das Envelope ist ein eigenes Protokoll. Der Relay muss es sprechen; das
//! socket.io-Framing (`42["event",data]`) wird nicht verstanden.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// Vom Relay vergebene Socket-ID eines Teilnehmers
pub type PeerId = String;

// ============================================================================
// SDP PAYLOAD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Session Description wie `RTCPeerConnection.localDescription` im Browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpPayload {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SdpPayload {
    pub fn offer(sdp: String) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp,
        }
    }

    pub fn answer(sdp: String) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp,
        }
    }
}

// ============================================================================
// CLIENT → SERVER MESSAGES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Raum betreten
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// SDP Offer an einen Peer
    Offer {
        to: PeerId,
        from: PeerId,
        sdp: SdpPayload,
    },

    /// SDP Answer an einen Peer
    Answer {
        to: PeerId,
        from: PeerId,
        sdp: SdpPayload,
    },

    /// Lokaler ICE Candidate an einen Peer
    IceCandidate {
        to: PeerId,
        from: PeerId,
        candidate: RTCIceCandidateInit,
    },
}

impl ClientMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom { .. } => "join-room",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::IceCandidate { .. } => "ice-candidate",
        }
    }

    /// Empfänger, falls die Nachricht adressiert ist
    pub fn recipient(&self) -> Option<&str> {
        match self {
            ClientMessage::JoinRoom { .. } => None,
            ClientMessage::Offer { to, .. }
            | ClientMessage::Answer { to, .. }
            | ClientMessage::IceCandidate { to, .. } => Some(to),
        }
    }
}

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Begrüßung mit der eigenen Socket-ID
    Connected {
        #[serde(rename = "socketId")]
        socket_id: PeerId,
    },

    /// Ein anderer Teilnehmer ist bereits im Raum
    OtherUser {
        #[serde(rename = "socketId")]
        socket_id: PeerId,
    },

    /// Eingehendes SDP Offer
    Offer { from: PeerId, sdp: SdpPayload },

    /// Eingehendes SDP Answer
    Answer {
        #[serde(default)]
        from: Option<PeerId>,
        sdp: SdpPayload,
    },

    /// Eingehender ICE Candidate
    IceCandidate {
        #[serde(default)]
        from: Option<PeerId>,
        candidate: RTCIceCandidateInit,
    },

    /// Der andere Teilnehmer hat den Raum verlassen
    UserLeft {},
}

/// Envelope vor der Zuordnung zu einer Variante
#[derive(Deserialize)]
struct RawEnvelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ServerMessage {
    /// Parst einen Text-Frame des Relays
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        let data = match raw.data {
            Value::Null => Value::Object(Map::new()),
            data => data,
        };
        serde_json::from_value(json!({ "event": raw.event, "data": data }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_room_wire_format() {
        let msg = ClientMessage::JoinRoom {
            room_id: "12345".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"event": "join-room", "data": {"roomId": "12345"}}));
    }

    #[test]
    fn test_offer_wire_format() {
        let msg = ClientMessage::Offer {
            to: "peer-b".to_string(),
            from: "peer-a".to_string(),
            sdp: SdpPayload::offer("v=0".to_string()),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["event"], "offer");
        assert_eq!(value["data"]["to"], "peer-b");
        assert_eq!(value["data"]["sdp"], json!({"type": "offer", "sdp": "v=0"}));
        assert_eq!(msg.recipient(), Some("peer-b"));
    }

    #[test]
    fn test_ice_candidate_wire_format() {
        let msg = ClientMessage::IceCandidate {
            to: "peer-b".to_string(),
            from: "peer-a".to_string(),
            candidate: RTCIceCandidateInit {
                candidate: "candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["event"], "ice-candidate");
        assert_eq!(value["data"]["candidate"]["sdpMid"], "0");
        assert_eq!(value["data"]["candidate"]["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_parse_server_messages() {
        let other: ServerMessage =
            serde_json::from_str(r#"{"event":"other-user","data":{"socketId":"abc"}}"#).unwrap();
        assert_eq!(
            other,
            ServerMessage::OtherUser {
                socket_id: "abc".to_string()
            }
        );

        let answer: ServerMessage = serde_json::from_str(
            r#"{"event":"answer","data":{"sdp":{"type":"answer","sdp":"v=0"}}}"#,
        )
        .unwrap();
        assert_eq!(
            answer,
            ServerMessage::Answer {
                from: None,
                sdp: SdpPayload::answer("v=0".to_string())
            }
        );

        let left: ServerMessage =
            serde_json::from_str(r#"{"event":"user-left","data":{}}"#).unwrap();
        assert_eq!(left, ServerMessage::UserLeft {});
    }

    #[test]
    fn test_user_left_without_payload() {
        for frame in [
            r#"{"event":"user-left"}"#,
            r#"{"event":"user-left","data":null}"#,
            r#"{"event":"user-left","data":{}}"#,
        ] {
            assert_eq!(ServerMessage::parse(frame).unwrap(), ServerMessage::UserLeft {});
        }

        // Pflichtfelder bleiben Pflicht
        assert!(ServerMessage::parse(r#"{"event":"other-user"}"#).is_err());
        assert!(ServerMessage::parse("not json").is_err());
    }

    #[test]
    fn test_parse_candidate_without_sender() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{"event":"ice-candidate","data":{"candidate":{"candidate":"","sdpMid":null,"sdpMLineIndex":null}}}"#,
        )
        .unwrap();
        assert!(matches!(msg, ServerMessage::IceCandidate { from: None, .. }));
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let result = serde_json::from_str::<ServerMessage>(r#"{"event":"pong","data":{}}"#);
        assert!(result.is_err());
    }
}
