//! Verhandlungszustand einer Peer Connection

use std::fmt;

/// Zustand des Offer/Answer-Austauschs
///
/// Anrufer: `New → HaveLocalOffer → Connected`
/// Angerufener: `New → HaveRemoteOffer → HaveLocalAnswer → Connected`
/// Jeder Zustand kann nach `Closed` wechseln; `Closed` ist endgültig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    New,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalAnswer,
    Connected,
    Closed,
}

impl NegotiationState {
    pub fn is_terminal(&self) -> bool {
        *self == NegotiationState::Closed
    }

    /// Ab hier dürfen Remote-Candidates direkt angewendet werden
    pub fn has_remote_description(&self) -> bool {
        matches!(
            self,
            NegotiationState::HaveRemoteOffer
                | NegotiationState::HaveLocalAnswer
                | NegotiationState::Connected
        )
    }

    pub fn can_transition_to(&self, next: NegotiationState) -> bool {
        use NegotiationState::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (New, HaveLocalOffer) | (New, HaveRemoteOffer) => true,
            (HaveRemoteOffer, HaveLocalAnswer) => true,
            (HaveLocalOffer, Connected) | (HaveLocalAnswer, Connected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationState::New => "new",
            NegotiationState::HaveLocalOffer => "have-local-offer",
            NegotiationState::HaveRemoteOffer => "have-remote-offer",
            NegotiationState::HaveLocalAnswer => "have-local-answer",
            NegotiationState::Connected => "connected",
            NegotiationState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::NegotiationState::*;
    use super::*;

    const ALL: [NegotiationState; 6] = [
        New,
        HaveLocalOffer,
        HaveRemoteOffer,
        HaveLocalAnswer,
        Connected,
        Closed,
    ];

    #[test]
    fn test_caller_and_callee_paths() {
        assert!(New.can_transition_to(HaveLocalOffer));
        assert!(HaveLocalOffer.can_transition_to(Connected));

        assert!(New.can_transition_to(HaveRemoteOffer));
        assert!(HaveRemoteOffer.can_transition_to(HaveLocalAnswer));
        assert!(HaveLocalAnswer.can_transition_to(Connected));
    }

    #[test]
    fn test_no_shortcuts() {
        assert!(!New.can_transition_to(Connected));
        assert!(!HaveLocalOffer.can_transition_to(HaveLocalAnswer));
        assert!(!HaveRemoteOffer.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(HaveLocalOffer));
    }

    #[test]
    fn test_closed_is_terminal() {
        for state in ALL {
            assert!(!Closed.can_transition_to(state));
            if state != Closed {
                assert!(state.can_transition_to(Closed));
            }
        }
        assert!(Closed.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(HaveLocalOffer.to_string(), "have-local-offer");
        assert_eq!(Connected.to_string(), "connected");
    }
}
