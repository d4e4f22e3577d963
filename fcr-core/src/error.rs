//! Error types for the FCR core library.
//!
//! This module defines the errors that can occur while parsing identifiers,
//! loading keys, building offers and decoding proofs.

use thiserror::Error;

/// Errors that can occur in FCR core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Input was not valid hexadecimal.
    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// A fixed-size value had the wrong number of bytes.
    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Number of bytes required
        expected: usize,
        /// Number of bytes provided
        actual: usize,
    },

    /// A signing or verifying key could not be parsed.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// An offer must cover at least one CID.
    #[error("Offer must cover at least one CID")]
    EmptyOffer,

    /// The requested CID is not part of the offer bundle.
    #[error("CID {0} is not covered by this offer")]
    CidNotInOffer(String),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for FCR core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
