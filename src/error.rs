//! Error taxonomy for the platform layer
//!
//! Four classes of failure exist: fatal transport errors end the session,
//! resource-acquisition failures degrade the requesting operation, contract
//! violations are reported to the caller, and protocol-legal empty responses
//! are not errors at all (they surface as `None` or empty values).

use thiserror::Error;

/// Errors surfaced by the platform layer
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Could not open the compositor connection
    #[error("failed to connect to the compositor: {0}")]
    Connect(String),

    /// A global required to drive windows was never advertised
    #[error("compositor does not advertise required global `{0}`")]
    MissingGlobal(&'static str),

    /// Socket read/write or protocol dispatch failure; ends the loop
    #[error("compositor transport failed: {0}")]
    Transport(String),

    /// Shared memory, pipe, mmap or similar acquisition failed
    #[error("{what} unavailable: {reason}")]
    Unavailable { what: &'static str, reason: String },

    /// The caller broke an API contract
    #[error("contract violation: {0}")]
    Contract(String),
}

impl PlatformError {
    pub fn unavailable(what: &'static str, reason: impl ToString) -> Self {
        Self::Unavailable {
            what,
            reason: reason.to_string(),
        }
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract(message.into())
    }

    /// Whether this error terminates the event loop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Connect(_) | Self::MissingGlobal(_)
        )
    }
}

impl From<std::io::Error> for PlatformError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T, E = PlatformError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(PlatformError::Transport("broken pipe".into()).is_fatal());
        assert!(PlatformError::MissingGlobal("wl_compositor").is_fatal());
        assert!(!PlatformError::unavailable("pipe", "EMFILE").is_fatal());
        assert!(!PlatformError::contract("zero interval").is_fatal());
    }

    #[test]
    fn test_io_errors_are_transport() {
        let err: PlatformError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert!(matches!(err, PlatformError::Transport(_)));
    }
}
