//! Chain client seam.
//!
//! The payment manager never talks to a blockchain directly; it goes through
//! [`ChainClient`]. Voucher minting and verification are pure cryptography
//! and have default implementations; channel creation, funding, lookup and
//! settlement are on-chain operations each implementation provides.
//!
//! [`LocalChain`] is an in-process ledger that enforces the same rules a
//! payment channel actor would. It backs tests and single-process devnets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ethers_core::types::Address;
use ethers_core::utils::keccak256;
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PaymentError, Result};
use crate::voucher::{wallet_address, Voucher, VoucherClaim};

/// On-chain state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Funder of the channel
    pub from: Address,
    /// Recipient of the channel
    pub to: Address,
    /// Total amount locked in the channel
    pub balance: u64,
    /// Whether the channel has been settled
    pub settled: bool,
}

/// Operations the payment manager needs from the chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Open a channel from `payer` to `recipient` funded with `amount`.
    async fn create_channel(&self, payer: &SigningKey, recipient: Address, amount: u64) -> Result<Address>;

    /// Add `amount` to an existing channel.
    async fn topup(&self, payer: &SigningKey, channel: Address, amount: u64) -> Result<()>;

    /// Look up a channel.
    async fn channel_info(&self, channel: Address) -> Result<ChannelInfo>;

    /// Redeem the given vouchers (one per lane) and close the channel.
    /// Returns the amount paid out to the recipient.
    async fn settle(&self, recipient: &SigningKey, channel: Address, vouchers: &[Voucher]) -> Result<u64>;

    /// Sign a voucher for `(channel, lane, nonce, amount)`.
    async fn mint_voucher(
        &self,
        signer: &SigningKey,
        channel: Address,
        lane: u64,
        nonce: u64,
        amount: u64,
    ) -> Result<Voucher> {
        Voucher::sign(signer, channel, lane, nonce, amount)
    }

    /// Authenticate a voucher and return its claim.
    async fn verify_voucher(&self, voucher: &Voucher) -> Result<VoucherClaim> {
        voucher.recover()
    }
}

/// In-process chain ledger.
#[derive(Debug, Default)]
pub struct LocalChain {
    channels: Mutex<HashMap<Address, ChannelInfo>>,
    counter: AtomicU64,
}

impl LocalChain {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channels ever opened.
    pub fn channel_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Address, ChannelInfo>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ChainClient for LocalChain {
    async fn create_channel(&self, payer: &SigningKey, recipient: Address, amount: u64) -> Result<Address> {
        let from = wallet_address(payer);
        let seq = self.counter.fetch_add(1, Ordering::SeqCst);

        let mut seed = Vec::with_capacity(48);
        seed.extend_from_slice(from.as_bytes());
        seed.extend_from_slice(recipient.as_bytes());
        seed.extend_from_slice(&seq.to_be_bytes());
        let address = Address::from_slice(&keccak256(seed)[12..]);

        self.lock().insert(
            address,
            ChannelInfo {
                from,
                to: recipient,
                balance: amount,
                settled: false,
            },
        );

        info!("Opened channel {:?} from {:?} to {:?} with {}", address, from, recipient, amount);
        Ok(address)
    }

    async fn topup(&self, payer: &SigningKey, channel: Address, amount: u64) -> Result<()> {
        let mut channels = self.lock();
        let info = channels
            .get_mut(&channel)
            .ok_or_else(|| PaymentError::Chain(format!("unknown channel {:?}", channel)))?;

        if info.from != wallet_address(payer) {
            return Err(PaymentError::Chain("only the funder can top up".into()));
        }
        if info.settled {
            return Err(PaymentError::ChannelSettled(format!("{:?}", channel)));
        }

        info.balance = info
            .balance
            .checked_add(amount)
            .ok_or(PaymentError::InvalidAmount(amount))?;
        debug!("Topped up channel {:?} to {}", channel, info.balance);
        Ok(())
    }

    async fn channel_info(&self, channel: Address) -> Result<ChannelInfo> {
        self.lock()
            .get(&channel)
            .copied()
            .ok_or_else(|| PaymentError::Chain(format!("unknown channel {:?}", channel)))
    }

    async fn settle(&self, recipient: &SigningKey, channel: Address, vouchers: &[Voucher]) -> Result<u64> {
        let mut channels = self.lock();
        let info = channels
            .get_mut(&channel)
            .ok_or_else(|| PaymentError::Chain(format!("unknown channel {:?}", channel)))?;

        if info.to != wallet_address(recipient) {
            return Err(PaymentError::NotRecipient(format!("{:?}", channel)));
        }
        if info.settled {
            return Err(PaymentError::ChannelSettled(format!("{:?}", channel)));
        }

        // Highest nonce per lane wins, signed by either party
        let mut lanes: HashMap<u64, (u64, u64)> = HashMap::new();
        for voucher in vouchers {
            let claim = voucher.recover()?;
            if claim.channel != channel || (claim.signer != info.from && claim.signer != info.to) {
                return Err(PaymentError::InvalidVoucher("foreign voucher in settlement".into()));
            }
            let slot = lanes.entry(claim.lane).or_insert((0, 0));
            if claim.nonce > slot.0 {
                *slot = (claim.nonce, claim.amount);
            }
        }

        let total: u64 = lanes.values().map(|(_, amount)| *amount).sum();
        let paid = total.min(info.balance);
        info.settled = true;

        info!("Settled channel {:?}: {} paid to {:?}", channel, paid, info.to);
        Ok(paid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[tokio::test]
    async fn test_create_and_topup() {
        let chain = LocalChain::new();
        let payer = SigningKey::random(&mut OsRng);
        let payee = SigningKey::random(&mut OsRng);

        let channel = chain.create_channel(&payer, wallet_address(&payee), 100).await.unwrap();
        chain.topup(&payer, channel, 50).await.unwrap();

        let info = chain.channel_info(channel).await.unwrap();
        assert_eq!(info.balance, 150);
        assert_eq!(info.from, wallet_address(&payer));
        assert_eq!(info.to, wallet_address(&payee));
    }

    #[tokio::test]
    async fn test_topup_by_stranger_fails() {
        let chain = LocalChain::new();
        let payer = SigningKey::random(&mut OsRng);
        let stranger = SigningKey::random(&mut OsRng);

        let channel = chain.create_channel(&payer, Address::random(), 10).await.unwrap();
        assert!(chain.topup(&stranger, channel, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_settle_uses_latest_voucher_per_lane() {
        let chain = LocalChain::new();
        let payer = SigningKey::random(&mut OsRng);
        let payee = SigningKey::random(&mut OsRng);
        let channel = chain.create_channel(&payer, wallet_address(&payee), 100).await.unwrap();

        let vouchers = vec![
            chain.mint_voucher(&payer, channel, 1, 1, 30).await.unwrap(),
            // Refund signed by the payee lowers lane 1
            chain.mint_voucher(&payee, channel, 1, 2, 20).await.unwrap(),
            chain.mint_voucher(&payer, channel, 2, 1, 5).await.unwrap(),
        ];

        let paid = chain.settle(&payee, channel, &vouchers).await.unwrap();
        assert_eq!(paid, 25);
        assert!(chain.channel_info(channel).await.unwrap().settled);
        assert!(chain.settle(&payee, channel, &vouchers).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_channel() {
        let chain = LocalChain::new();
        assert!(chain.channel_info(Address::random()).await.is_err());
    }
}
