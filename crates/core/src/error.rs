use thiserror::Error;

/// Error taxonomy shared across TunnelPass crates.
///
/// Crate-specific errors convert into one of these kinds so callers can
/// decide between reporting, falling back, or giving up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TunnelPassError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("No candidates: {0}")]
    NoCandidates(String),

    #[error("No valid credential")]
    NoValidCredential,

    #[error("Timeout")]
    Timeout,

    #[error("Unreachable: {0}")]
    Unreachable(String),
}

impl TunnelPassError {
    /// Transport/probe failures are recovered locally and never surface to
    /// the caller of selection.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unreachable(_))
    }
}

pub type Result<T> = std::result::Result<T, TunnelPassError>;
