//! Signaling Module - WebSocket Client für den Relay
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Signaling-Relay:
//! - WebSocket-Verbindung aufbauen und die eigene ID erhalten
//! - Raum betreten, Offer/Answer/ICE adressiert weiterleiten
//! - Eingehende Nachrichten parsen und als Events weitergeben
//!

mod channel;
mod client;
mod messages;

pub use channel::{
    SignalingChannel, SignalingConnector, SignalingError, SignalingEvent, SignalingLink,
};
pub use client::{SignalingClient, WebSocketConnector};
pub use messages::*;
