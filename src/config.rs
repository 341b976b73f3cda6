//! Konfiguration des Call-Clients
//!
//! Alle Werte haben Defaults, die dem Browser-Client entsprechen,
//! und können über Umgebungsvariablen überschrieben werden.

use crate::media::MediaConstraints;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use webrtc::ice_transport::ice_server::RTCIceServer;

// ============================================================================
// DEFAULTS
// ============================================================================

/// Standard Signaling-Server (lokaler Relay)
pub const DEFAULT_SIGNALING_URL: &str = "http://localhost:4000";

/// Fester Raum - alle Clients landen im selben Raum
pub const DEFAULT_ROOM_ID: &str = "12345";

/// Öffentlicher Google STUN Server
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Maximale Wartezeit auf die Begrüßung des Relays
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid signaling URL '{url}': {reason}")]
    InvalidSignalingUrl { url: String, reason: String },

    #[error("Room id must not be empty")]
    EmptyRoomId,

    #[error("Invalid camera index '{0}'")]
    InvalidCameraIndex(String),
}

// ============================================================================
// CALL CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct CallConfig {
    pub signaling_url: String,
    pub room_id: String,
    pub ice_servers: Vec<String>,
    pub media: MediaConstraints,
    pub handshake_timeout: Duration,
    /// mDNS-Kandidaten der Gegenseite auflösen (Browser verschleiern Host-IPs)
    pub mdns_queries: bool,
    /// OpenCV-Index der Kamera
    pub camera_index: i32,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            room_id: DEFAULT_ROOM_ID.to_string(),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            media: MediaConstraints::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            mdns_queries: true,
            camera_index: 0,
        }
    }
}

impl CallConfig {
    /// Liest die Konfiguration aus den Umgebungsvariablen
    ///
    /// - `SIGNALING_URL`: Adresse des Relays
    /// - `CALL_ROOM_ID`: Raum-ID
    /// - `ICE_SERVER_URLS`: kommagetrennte STUN/TURN URLs
    /// - `CALL_AUDIO_ONLY`: `1`/`true` deaktiviert die Kamera
    /// - `CALL_CAMERA_INDEX`: Kamera-Index (Standard 0)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Baut die Konfiguration aus einer beliebigen Key-Value-Quelle
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("SIGNALING_URL") {
            config.signaling_url = url.trim().to_string();
        }

        if let Some(room_id) = lookup("CALL_ROOM_ID") {
            config.room_id = room_id.trim().to_string();
        }

        if let Some(servers) = lookup("ICE_SERVER_URLS") {
            config.ice_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(flag) = lookup("CALL_AUDIO_ONLY") {
            let audio_only = matches!(flag.trim(), "1" | "true" | "yes");
            config.media.video = !audio_only;
        }

        if let Some(index) = lookup("CALL_CAMERA_INDEX") {
            config.camera_index = index
                .trim()
                .parse()
                .ok()
                .filter(|i: &i32| *i >= 0)
                .ok_or_else(|| ConfigError::InvalidCameraIndex(index.clone()))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Prüft die Konfiguration auf offensichtliche Fehler
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.room_id.is_empty() {
            return Err(ConfigError::EmptyRoomId);
        }
        self.websocket_url()?;
        Ok(())
    }

    /// WebSocket-URL des Relays (`http` → `ws`, `https` → `wss`)
    pub fn websocket_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidSignalingUrl {
            url: self.signaling_url.clone(),
            reason,
        };

        let mut url = Url::parse(&self.signaling_url).map_err(|e| invalid(e.to_string()))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(invalid(format!("unsupported scheme '{}'", other))),
        };

        url.set_scheme(scheme)
            .map_err(|_| invalid(format!("cannot switch to scheme '{}'", scheme)))?;

        Ok(url)
    }

    /// ICE-Server im Format der WebRTC-Bibliothek
    pub fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        if self.ice_servers.is_empty() {
            return Vec::new();
        }

        vec![RTCIceServer {
            urls: self.ice_servers.clone(),
            ..Default::default()
        }]
    }
}
