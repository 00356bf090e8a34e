//! Error types for the player

/// Result type alias using the player Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, negotiating and playing a stream
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Play page unreachable or no API endpoint pattern found
    #[error("Endpoint resolution failed: {0}")]
    Resolution(String),

    /// HTTP offer/answer exchange failed after the retry budget
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Peer connection setup, ICE or DTLS failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The stream ended or the transport reported an interruption
    #[error("Stream disconnected: {0}")]
    Disconnected(String),

    /// Display or recording sink failure (recovered at the dispatch site)
    #[error("Sink error: {0}")]
    Sink(String),

    /// Media decode error
    #[error("Decode error: {0}")]
    Decode(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is fatal for the run (tears the session down)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Resolution(_)
                | Error::Signaling(_)
                | Error::Transport(_)
                | Error::InvalidConfig(_)
        )
    }

    /// Process exit code for this error kind. Disconnection is a normal
    /// end of playback and exits clean.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Disconnected(_) => 0,
            Error::InvalidConfig(_) => 1,
            Error::Resolution(_) => 2,
            Error::Signaling(_) => 3,
            Error::Transport(_) => 4,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Resolution("no endpoint pattern".to_string());
        assert_eq!(
            err.to_string(),
            "Endpoint resolution failed: no endpoint pattern"
        );
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(Error::Signaling("refused".to_string()).is_fatal());
        assert!(Error::Transport("ice failed".to_string()).is_fatal());
        assert!(!Error::Sink("window gone".to_string()).is_fatal());
        assert!(!Error::Disconnected("eof".to_string()).is_fatal());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::Disconnected("eof".to_string()).exit_code(), 0);
        assert_eq!(Error::Resolution("404".to_string()).exit_code(), 2);
        assert_eq!(Error::Signaling("code 400".to_string()).exit_code(), 3);
        assert_eq!(Error::Transport("dtls".to_string()).exit_code(), 4);
    }
}
