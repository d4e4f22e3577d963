//! Error types for the FCR payment layer.
//!
//! Funding shortfalls are not errors: `pay` reports them through
//! [`PayOutcome`](crate::PayOutcome). Everything here is a genuine failure.

use thiserror::Error;

/// Errors that can occur during payment channel operations.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Amounts must be strictly positive.
    #[error("Invalid amount: {0}")]
    InvalidAmount(u64),

    /// No channel exists with this peer.
    #[error("No channel with peer {0}")]
    NoChannel(String),

    /// A channel with this peer already exists.
    #[error("Channel with peer {0} already exists")]
    ChannelExists(String),

    /// Channel is already tracked as inbound from another peer.
    #[error("Channel {channel} already belongs to peer {owner}")]
    ChannelClaimed {
        /// On-chain channel address
        channel: String,
        /// Peer the channel is tracked under
        owner: String,
    },

    /// Lane has never been used on this channel.
    #[error("Unknown lane {0}")]
    LaneUnknown(u64),

    /// Voucher refers to a different channel than the one on record.
    #[error("Channel mismatch: expected {expected}, voucher names {actual}")]
    ChannelMismatch {
        /// Channel address on record
        expected: String,
        /// Channel address in the voucher
        actual: String,
    },

    /// Voucher was not signed by the party entitled to sign it.
    #[error("Voucher signed by {actual}, expected {expected}")]
    WrongSigner {
        /// Address that should have signed
        expected: String,
        /// Address that did sign
        actual: String,
    },

    /// Voucher nonce is not newer than the lane's.
    #[error("Stale voucher nonce {got} (lane is at {current})")]
    StaleNonce {
        /// Nonce in the voucher
        got: u64,
        /// Nonce on record
        current: u64,
    },

    /// Refund voucher does not reduce the lane total.
    #[error("Invalid refund: voucher total {voucher_total} is not below lane total {lane_total}")]
    InvalidRefund {
        /// Cumulative total in the voucher
        voucher_total: u64,
        /// Cumulative total on record
        lane_total: u64,
    },

    /// Payment voucher does not increase the lane total.
    #[error("Voucher carries no new funds (total {voucher_total}, lane total {lane_total})")]
    NoNewFunds {
        /// Cumulative total in the voucher
        voucher_total: u64,
        /// Cumulative total on record
        lane_total: u64,
    },

    /// Refund larger than what was redeemed on the lane.
    #[error("Refund of {amount} exceeds lane total {lane_total}")]
    RefundExceedsLane {
        /// Requested refund
        amount: u64,
        /// Cumulative total on record
        lane_total: u64,
    },

    /// Voucher would redeem more than the channel holds.
    #[error("Channel overdrawn: redeemed {redeemed} of balance {balance}")]
    Overdrawn {
        /// Cumulative redeemed after this voucher
        redeemed: u64,
        /// On-chain balance
        balance: u64,
    },

    /// This node is not the recipient of the channel.
    #[error("Channel {0} is not payable to this node")]
    NotRecipient(String),

    /// Channel has already been settled.
    #[error("Channel {0} is settled")]
    ChannelSettled(String),

    /// Voucher signature or encoding is invalid.
    #[error("Invalid voucher: {0}")]
    InvalidVoucher(String),

    /// Chain or payment authority failure.
    #[error("Chain error: {0}")]
    Chain(String),

    /// Chain RPC gave up after retries.
    #[error("Chain RPC timeout after {attempts} attempts")]
    ChainTimeout {
        /// Number of retry attempts made
        attempts: u32,
    },
}

/// Result type alias for payment operations.
pub type Result<T> = std::result::Result<T, PaymentError>;
