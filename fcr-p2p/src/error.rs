//! Error types for FCR protocol operations.

use thiserror::Error;

/// Errors that can occur during protocol operations.
#[derive(Debug, Error)]
pub enum FcrP2pError {
    /// Malformed arguments, rejected before any I/O.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Peer unknown even after a registry resync.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Peer is cooling down after a risky interaction.
    #[error("Peer {0} is pending")]
    PeerPending(String),

    /// Peer is banned by the operator.
    #[error("Peer {0} is blocked")]
    PeerBlocked(String),

    /// Funding was required again right after funding.
    #[error("Funding required twice in a row for peer {0}")]
    FundingLoop(String),

    /// Transport failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Transport read or write timed out.
    #[error("Request timed out")]
    Timeout,

    /// Peer answered with something it should not have.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Peer answered with a negative acknowledgement.
    #[error("Remote error: {0}")]
    RemoteError(String),

    /// Should never happen in a correct deployment.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Error from the payment layer.
    #[error("Payment error: {0}")]
    Payment(#[from] fcr_payment::PaymentError),

    /// Error from fcr-core.
    #[error("Core error: {0}")]
    Core(#[from] fcr_core::CoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, FcrP2pError>;

impl From<bincode::Error> for FcrP2pError {
    fn from(e: bincode::Error) -> Self {
        FcrP2pError::ProtocolViolation(format!("undecodable payload: {}", e))
    }
}
