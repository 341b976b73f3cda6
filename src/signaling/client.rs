//! WebSocket Client für den Signaling-Relay
//!
//! Verwaltet die WebSocket-Verbindung zum Relay:
//! - Warten auf die Begrüßung mit der eigenen Socket-ID
//! - Getrennte Read/Write-Tasks
//! - Event-basierte Weitergabe eingehender Nachrichten
//!
//! Der Relay muss das JSON-Envelope aus `messages` sprechen und als erstes
//! `connected{socketId}` senden. Ein socket.io-Server (Engine.IO-Framing,
//! `42["event",data]`, Ping/Pong) wird nicht unterstützt.

use super::channel::{
    SignalingChannel, SignalingConnector, SignalingError, SignalingEvent, SignalingLink,
};
use super::messages::*;
use crate::config::CallConfig;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

// ============================================================================
// CLIENT STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ClientState {
    is_connected: bool,
    socket_id: Option<PeerId>,
}

// ============================================================================
// SIGNALING CLIENT
// ============================================================================

/// WebSocket Client für Signaling-Server Kommunikation
pub struct SignalingClient {
    server_url: Url,
    socket_id: PeerId,
    state: Arc<RwLock<ClientState>>,
    tx: mpsc::Sender<Message>,
}

impl SignalingClient {
    /// Verbindet mit dem Relay und wartet auf die eigene Socket-ID
    pub async fn connect(
        server_url: Url,
        handshake_timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SignalingEvent>), SignalingError> {
        tracing::info!("Connecting to signaling server: {}", server_url);

        let (ws_stream, _) = connect_async(server_url.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::channel::<Message>(100);
        // Unbounded: der Read-Task darf nie Events verlieren oder blockieren
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (id_tx, id_rx) = oneshot::channel::<PeerId>();

        let state = Arc::new(RwLock::new(ClientState {
            is_connected: true,
            socket_id: None,
        }));

        // Read-Task starten
        let state_clone = Arc::clone(&state);
        tokio::spawn(async move {
            let mut id_tx = Some(id_tx);

            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match ServerMessage::parse(&text) {
                        Ok(server_msg) => {
                            Self::handle_server_message(server_msg, &state_clone, &event_tx, &mut id_tx)
                        }
                        Err(e) => {
                            tracing::warn!("Ignoring malformed signaling frame: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            state_clone.write().is_connected = false;
            let _ = event_tx.send(SignalingEvent::Disconnected);
        });

        // Write-Task starten
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        // Ohne eigene ID kann keine Nachricht adressiert werden
        let socket_id = match tokio::time::timeout(handshake_timeout, id_rx).await {
            Ok(Ok(id)) => id,
            Ok(Err(_)) => {
                return Err(SignalingError::ConnectionFailed(
                    "connection closed before the server assigned an id".to_string(),
                ))
            }
            Err(_) => {
                let _ = tx.send(Message::Close(None)).await;
                return Err(SignalingError::HandshakeTimeout(handshake_timeout));
            }
        };

        tracing::info!("Connected to signaling server as {}", socket_id);

        let client = Self {
            server_url,
            socket_id,
            state,
            tx,
        };

        Ok((client, event_rx))
    }

    /// Verarbeitet eingehende Server-Nachrichten
    fn handle_server_message(
        msg: ServerMessage,
        state: &Arc<RwLock<ClientState>>,
        event_tx: &mpsc::UnboundedSender<SignalingEvent>,
        id_tx: &mut Option<oneshot::Sender<PeerId>>,
    ) {
        let event = match msg {
            ServerMessage::Connected { socket_id } => {
                match id_tx.take() {
                    Some(tx) => {
                        state.write().socket_id = Some(socket_id.clone());
                        let _ = tx.send(socket_id);
                    }
                    None => tracing::warn!("Ignoring repeated id assignment: {}", socket_id),
                }
                return;
            }
            ServerMessage::OtherUser { socket_id } => SignalingEvent::OtherUser { peer_id: socket_id },
            ServerMessage::Offer { from, sdp } => SignalingEvent::OfferReceived { from, sdp },
            ServerMessage::Answer { from, sdp } => SignalingEvent::AnswerReceived { from, sdp },
            ServerMessage::IceCandidate { from, candidate } => {
                SignalingEvent::IceCandidateReceived { from, candidate }
            }
            ServerMessage::UserLeft {} => SignalingEvent::UserLeft,
        };

        let _ = event_tx.send(event);
    }
}

#[async_trait]
impl SignalingChannel for SignalingClient {
    fn local_id(&self) -> &str {
        &self.socket_id
    }

    fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    async fn send(&self, message: ClientMessage) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::NotConnected);
        }

        let text = serde_json::to_string(&message)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        tracing::debug!(
            "Sending '{}' to {}",
            message.event_name(),
            message.recipient().unwrap_or("relay")
        );

        self.tx
            .send(Message::Text(text))
            .await
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    async fn disconnect(&self) {
        let was_connected = {
            let mut state = self.state.write();
            std::mem::replace(&mut state.is_connected, false)
        };

        if was_connected {
            tracing::info!("Disconnecting from signaling server");
            let _ = self.tx.send(Message::Close(None)).await;
        }
    }
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("server_url", &self.server_url.as_str())
            .field("socket_id", &self.socket_id)
            .field("state", &*self.state.read())
            .finish()
    }
}

// ============================================================================
// CONNECTOR
// ============================================================================

/// Baut pro `join()` eine neue WebSocket-Verbindung auf
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
    handshake_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: Url, handshake_timeout: Duration) -> Self {
        Self {
            url,
            handshake_timeout,
        }
    }

    pub fn from_config(config: &CallConfig) -> Result<Self, SignalingError> {
        let url = config
            .websocket_url()
            .map_err(|e| SignalingError::InvalidUrl(e.to_string()))?;
        Ok(Self::new(url, config.handshake_timeout))
    }
}

#[async_trait]
impl SignalingConnector for WebSocketConnector {
    async fn connect(&self) -> Result<SignalingLink, SignalingError> {
        let (client, events) =
            SignalingClient::connect(self.url.clone(), self.handshake_timeout).await?;

        Ok(SignalingLink {
            channel: Arc::new(client),
            events,
        })
    }
}
