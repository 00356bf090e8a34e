//! Peer session: peer connection lifecycle, state transitions and the
//! pull interface for received media

mod peer;

pub use peer::PeerSession;

/// Connection state of a session, single authoritative instance per session.
///
/// Only the session itself writes transitions; other components observe
/// through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state, offer not yet sent
    New,
    /// Offer sent, ICE negotiation and media subscription in progress
    Connecting,
    /// ICE established and the first media sample has arrived
    Connected,
    /// Transport reported an interruption; terminal for this run
    Disconnected,
    /// ICE/DTLS failure or signaling rejection; fatal
    Failed,
    /// Session stopped; terminal, later events are ignored
    Closed,
}

impl ConnectionState {
    /// States from which the session cannot recover within this run
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ConnectionState::New.is_terminal());
        assert!(!ConnectionState::Connecting.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
    }
}
