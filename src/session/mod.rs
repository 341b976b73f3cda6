//! Session Module - Lebenszyklus eines Anrufs
//!
//! Verbindet Media, Signaling und Call Engine:
//! - join / leave
//! - Mute und Kamera umschalten
//! - Reaktion auf other-user / offer / answer / ice-candidate / user-left

mod controller;

pub use controller::{CallSession, SessionError};
