//! Payment channel vouchers.
//!
//! A voucher is an off-chain claim: "on lane `lane` of `channel`, at nonce
//! `nonce`, the cumulative amount owed is `amount`". Payers sign vouchers
//! that raise the total; payees sign refund vouchers that lower it.
//! The signature is a recoverable secp256k1 signature over
//! `keccak256(channel || lane || nonce || amount)`, so the signer's wallet
//! address can be recovered without any registry.

use ethers_core::types::Address;
use ethers_core::utils::{keccak256, public_key_to_address};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, Result};

/// A signed cumulative-payment claim on one lane of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    /// On-chain channel address
    pub channel: Address,
    /// Lane within the channel
    pub lane: u64,
    /// Strictly increasing per lane
    pub nonce: u64,
    /// Cumulative amount redeemed on the lane
    pub amount: u64,
    /// 65-byte recoverable signature (r || s || v)
    pub signature: Vec<u8>,
}

/// Decoded and authenticated contents of a voucher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoucherClaim {
    /// Wallet address that signed the voucher
    pub signer: Address,
    /// Channel address
    pub channel: Address,
    /// Lane
    pub lane: u64,
    /// Nonce
    pub nonce: u64,
    /// Cumulative amount
    pub amount: u64,
}

fn voucher_hash(channel: &Address, lane: u64, nonce: u64, amount: u64) -> [u8; 32] {
    let mut buf = Vec::with_capacity(20 + 24);
    buf.extend_from_slice(channel.as_bytes());
    buf.extend_from_slice(&lane.to_be_bytes());
    buf.extend_from_slice(&nonce.to_be_bytes());
    buf.extend_from_slice(&amount.to_be_bytes());
    keccak256(buf)
}

/// Wallet address of a signing key.
pub fn wallet_address(key: &SigningKey) -> Address {
    public_key_to_address(key.verifying_key())
}

impl Voucher {
    /// Sign a new voucher.
    pub fn sign(key: &SigningKey, channel: Address, lane: u64, nonce: u64, amount: u64) -> Result<Self> {
        let hash = voucher_hash(&channel, lane, nonce, amount);
        let (sig, recid) = key
            .sign_prehash_recoverable(&hash)
            .map_err(|e| PaymentError::InvalidVoucher(e.to_string()))?;

        let mut signature = sig.to_bytes().to_vec();
        signature.push(recid.to_byte());

        Ok(Self {
            channel,
            lane,
            nonce,
            amount,
            signature,
        })
    }

    /// Recover the signer and return the authenticated claim.
    pub fn recover(&self) -> Result<VoucherClaim> {
        if self.signature.len() != 65 {
            return Err(PaymentError::InvalidVoucher(format!(
                "signature length {}",
                self.signature.len()
            )));
        }

        let sig = Signature::from_slice(&self.signature[..64])
            .map_err(|e| PaymentError::InvalidVoucher(e.to_string()))?;
        let recid = RecoveryId::from_byte(self.signature[64])
            .ok_or_else(|| PaymentError::InvalidVoucher("bad recovery id".into()))?;

        let hash = voucher_hash(&self.channel, self.lane, self.nonce, self.amount);
        let key = VerifyingKey::recover_from_prehash(&hash, &sig, recid)
            .map_err(|e| PaymentError::InvalidVoucher(e.to_string()))?;

        Ok(VoucherClaim {
            signer: public_key_to_address(&key),
            channel: self.channel,
            lane: self.lane,
            nonce: self.nonce,
            amount: self.amount,
        })
    }

    /// Compact hex encoding for embedding in messages.
    pub fn to_hex(&self) -> String {
        hex::encode(bincode::serialize(self).unwrap_or_default())
    }

    /// Decode a voucher produced by [`Voucher::to_hex`].
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim()).map_err(|e| PaymentError::InvalidVoucher(e.to_string()))?;
        bincode::deserialize(&bytes).map_err(|e| PaymentError::InvalidVoucher(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_sign_and_recover() {
        let key = SigningKey::random(&mut OsRng);
        let channel = Address::random();

        let voucher = Voucher::sign(&key, channel, 1, 7, 40).unwrap();
        let claim = voucher.recover().unwrap();

        assert_eq!(claim.signer, wallet_address(&key));
        assert_eq!(claim.channel, channel);
        assert_eq!((claim.lane, claim.nonce, claim.amount), (1, 7, 40));
    }

    #[test]
    fn test_tampered_amount_changes_signer() {
        let key = SigningKey::random(&mut OsRng);
        let mut voucher = Voucher::sign(&key, Address::random(), 0, 1, 10).unwrap();
        voucher.amount = 1000;

        // Recovery either fails or yields some other address
        match voucher.recover() {
            Ok(claim) => assert_ne!(claim.signer, wallet_address(&key)),
            Err(e) => assert!(matches!(e, PaymentError::InvalidVoucher(_))),
        }
    }

    #[test]
    fn test_hex_encoding() {
        let key = SigningKey::random(&mut OsRng);
        let voucher = Voucher::sign(&key, Address::random(), 2, 3, 4).unwrap();

        let decoded = Voucher::from_hex(&voucher.to_hex()).unwrap();
        assert_eq!(decoded, voucher);
        assert!(Voucher::from_hex("zz").is_err());
    }
}
