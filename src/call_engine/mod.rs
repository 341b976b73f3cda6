//! Call Engine Module - WebRTC Verhandlung
//!
//! Dieses Modul verwaltet:
//! - WebRTC Peer Connections (eine pro Remote-Peer)
//! - Offer/Answer-Austausch und Zustandsmaschine
//! - Puffern von ICE Candidates vor der Remote Description
//! - Events für die Präsentationsschicht

mod candidates;
mod engine;
mod events;
mod state;

pub use candidates::PendingCandidates;
pub use engine::{CandidateOutcome, CandidateStats, EngineSettings, NegotiationEngine, NegotiationError};
pub use events::{CallEvent, RemoteTrack};
pub use state::NegotiationState;
