//! Warteschlange für Remote-Candidates
//!
//! Candidates, die vor der Remote Description ankommen, dürfen nicht verloren
//! gehen. Sie werden pro Peer gepuffert und nach `set_remote_description`
//! nachgespielt.

use crate::signaling::PeerId;
use std::collections::HashMap;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

#[derive(Debug, Default)]
pub struct PendingCandidates {
    by_peer: HashMap<PeerId, Vec<RTCIceCandidateInit>>,
    /// Candidates ohne Absender, bevor überhaupt eine Verbindung existiert
    unaddressed: Vec<RTCIceCandidateInit>,
}

impl PendingCandidates {
    pub fn push(&mut self, peer: Option<&str>, candidate: RTCIceCandidateInit) {
        match peer {
            Some(peer) => self
                .by_peer
                .entry(peer.to_string())
                .or_default()
                .push(candidate),
            None => self.unaddressed.push(candidate),
        }
    }

    /// Ordnet absenderlose Candidates der neu erstellten Verbindung zu
    pub fn adopt_unaddressed(&mut self, peer: &str) {
        if self.unaddressed.is_empty() {
            return;
        }
        let adopted = std::mem::take(&mut self.unaddressed);
        self.by_peer
            .entry(peer.to_string())
            .or_default()
            .extend(adopted);
    }

    /// Entnimmt alle Candidates eines Peers in Empfangsreihenfolge
    pub fn take(&mut self, peer: &str) -> Vec<RTCIceCandidateInit> {
        self.by_peer.remove(peer).unwrap_or_default()
    }

    pub fn len(&self, peer: &str) -> usize {
        self.by_peer.get(peer).map(Vec::len).unwrap_or(0)
    }

    pub fn unaddressed_len(&self) -> usize {
        self.unaddressed.len()
    }

    pub fn discard(&mut self, peer: &str) {
        self.by_peer.remove(peer);
    }

    pub fn clear(&mut self) {
        self.by_peer.clear();
        self.unaddressed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u16) -> RTCIceCandidateInit {
        RTCIceCandidateInit {
            candidate: format!("candidate:{} 1 udp 2130706431 10.0.0.{} 5000 typ host", n, n),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[test]
    fn test_take_preserves_order() {
        let mut pending = PendingCandidates::default();
        pending.push(Some("b"), candidate(1));
        pending.push(Some("b"), candidate(2));
        pending.push(Some("c"), candidate(3));

        assert_eq!(pending.len("b"), 2);
        let taken = pending.take("b");
        assert_eq!(taken, vec![candidate(1), candidate(2)]);
        assert_eq!(pending.len("b"), 0);
        assert_eq!(pending.len("c"), 1);
    }

    #[test]
    fn test_adopt_unaddressed() {
        let mut pending = PendingCandidates::default();
        pending.push(None, candidate(1));
        pending.push(Some("b"), candidate(2));
        assert_eq!(pending.unaddressed_len(), 1);

        pending.adopt_unaddressed("b");
        assert_eq!(pending.unaddressed_len(), 0);
        assert_eq!(pending.take("b"), vec![candidate(2), candidate(1)]);
    }

    #[test]
    fn test_discard_and_clear() {
        let mut pending = PendingCandidates::default();
        pending.push(Some("b"), candidate(1));
        pending.push(None, candidate(2));

        pending.discard("b");
        assert_eq!(pending.len("b"), 0);

        pending.clear();
        assert_eq!(pending.unaddressed_len(), 0);
    }
}
