//! Payment channel manager.
//!
//! Tracks one outbound channel per payee and one inbound channel per payer.
//! An on-chain channel is bound to the first peer that pays through it.
//! Each channel is split into lanes, and each lane carries a nonce-ordered
//! stream of cumulative vouchers.
//!
//! Locking is two-level: a `RwLock` over each map guards membership, and a
//! per-channel async mutex guards balance, redeemed and lanes. The channel
//! lock is held across the chain call that mints a voucher, so `pay` and
//! `receive_refund` on the same peer never interleave.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use ethers_core::types::Address;
use fcr_core::NodeId;
use k256::ecdsa::SigningKey;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::error::{PaymentError, Result};
use crate::voucher::{wallet_address, Voucher};

/// Result of [`PaymentManager::pay`].
///
/// Funding shortfalls are normal control flow, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayOutcome {
    /// Payment made; hand this voucher to the payee.
    Paid(Voucher),
    /// No channel to the peer yet.
    NeedCreate,
    /// The channel balance cannot cover the payment.
    NeedTopup,
}

#[derive(Debug, Default)]
struct Lane {
    nonce: u64,
    redeemed: u64,
    vouchers: Vec<Voucher>,
}

#[derive(Debug)]
struct Channel {
    address: Address,
    /// Wallet address of the other party
    counterparty: Address,
    balance: u64,
    redeemed: u64,
    lanes: BTreeMap<u64, Lane>,
}

impl Channel {
    fn new(address: Address, counterparty: Address, balance: u64) -> Self {
        Self {
            address,
            counterparty,
            balance,
            redeemed: 0,
            lanes: BTreeMap::new(),
        }
    }

    fn lane_state(&self, lane: u64) -> (u64, u64) {
        self.lanes
            .get(&lane)
            .map(|l| (l.nonce, l.redeemed))
            .unwrap_or((0, 0))
    }

    fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            address: self.address,
            counterparty: self.counterparty,
            balance: self.balance,
            redeemed: self.redeemed,
            lanes: self
                .lanes
                .iter()
                .map(|(id, lane)| {
                    (
                        *id,
                        LaneSnapshot {
                            nonce: lane.nonce,
                            redeemed: lane.redeemed,
                            vouchers: lane.vouchers.len(),
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Point-in-time view of a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneSnapshot {
    /// Nonce of the latest voucher on the lane
    pub nonce: u64,
    /// Cumulative amount redeemed on the lane
    pub redeemed: u64,
    /// Number of vouchers recorded on the lane
    pub vouchers: usize,
}

/// Point-in-time view of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    /// On-chain channel address
    pub address: Address,
    /// Wallet address of the other party
    pub counterparty: Address,
    /// Total funded
    pub balance: u64,
    /// Cumulative amount promised across all lanes
    pub redeemed: u64,
    /// Per-lane state
    pub lanes: BTreeMap<u64, LaneSnapshot>,
}

impl ChannelSnapshot {
    /// Redeemed total of `lane`, zero if the lane was never used.
    pub fn lane_redeemed(&self, lane: u64) -> u64 {
        self.lanes.get(&lane).map(|l| l.redeemed).unwrap_or(0)
    }
}

type ChannelMap = RwLock<HashMap<NodeId, Arc<Mutex<Channel>>>>;

fn lookup(map: &ChannelMap, peer: &NodeId) -> Option<Arc<Mutex<Channel>>> {
    map.read().unwrap_or_else(|e| e.into_inner()).get(peer).cloned()
}

fn remove(map: &ChannelMap, peer: &NodeId) -> bool {
    map.write().unwrap_or_else(|e| e.into_inner()).remove(peer).is_some()
}

/// Manages this node's outbound and inbound payment channels.
pub struct PaymentManager {
    wallet: SigningKey,
    address: Address,
    chain: Arc<dyn ChainClient>,
    outbound: ChannelMap,
    inbound: ChannelMap,
    /// Inbound channel address to the peer it is tracked under
    inbound_owners: RwLock<HashMap<Address, NodeId>>,
}

impl std::fmt::Debug for PaymentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentManager")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl PaymentManager {
    /// Create a manager that signs with `wallet` and uses `chain` for on-chain operations.
    pub fn new(wallet: SigningKey, chain: Arc<dyn ChainClient>) -> Self {
        let address = wallet_address(&wallet);
        Self {
            wallet,
            address,
            chain,
            outbound: RwLock::new(HashMap::new()),
            inbound: RwLock::new(HashMap::new()),
            inbound_owners: RwLock::new(HashMap::new()),
        }
    }

    /// This node's wallet address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Open an outbound channel to `peer`, whose wallet is `recipient`.
    ///
    /// # Errors
    ///
    /// `ChannelExists` if a channel to `peer` is already open, `InvalidAmount`
    /// for a zero amount, or the chain error.
    pub async fn create(&self, peer: &NodeId, recipient: Address, amount: u64) -> Result<()> {
        if amount == 0 {
            return Err(PaymentError::InvalidAmount(amount));
        }
        if lookup(&self.outbound, peer).is_some() {
            return Err(PaymentError::ChannelExists(peer.to_string()));
        }

        let address = self.chain.create_channel(&self.wallet, recipient, amount).await?;

        let mut map = self.outbound.write().unwrap_or_else(|e| e.into_inner());
        if map.contains_key(peer) {
            // Lost a race with a concurrent create; the on-chain channel is orphaned
            warn!("Concurrent channel creation to {}, dropping {:?}", peer, address);
            return Err(PaymentError::ChannelExists(peer.to_string()));
        }
        map.insert(*peer, Arc::new(Mutex::new(Channel::new(address, recipient, amount))));

        info!("Created channel {:?} to {} with balance {}", address, peer, amount);
        Ok(())
    }

    /// Add funds to the outbound channel to `peer`.
    ///
    /// The balance on record afterwards is the one the chain reports.
    pub async fn topup(&self, peer: &NodeId, amount: u64) -> Result<()> {
        if amount == 0 {
            return Err(PaymentError::InvalidAmount(amount));
        }
        let channel = lookup(&self.outbound, peer).ok_or_else(|| PaymentError::NoChannel(peer.to_string()))?;
        let mut ch = channel.lock().await;

        self.chain.topup(&self.wallet, ch.address, amount).await?;
        let info = self.chain.channel_info(ch.address).await?;
        if info.balance < ch.balance.saturating_add(amount) {
            warn!(
                "Topup of {} to {} credited only {}",
                amount,
                peer,
                info.balance.saturating_sub(ch.balance)
            );
        }
        ch.balance = info.balance;

        info!("Topped up channel to {} by {}, balance {}", peer, amount, ch.balance);
        Ok(())
    }

    /// Pay `amount` to `peer` on `lane`.
    ///
    /// On success the lane nonce advances by one and the returned voucher
    /// carries the new cumulative lane total.
    pub async fn pay(&self, peer: &NodeId, lane: u64, amount: u64) -> Result<PayOutcome> {
        if amount == 0 {
            return Err(PaymentError::InvalidAmount(amount));
        }
        let Some(channel) = lookup(&self.outbound, peer) else {
            return Ok(PayOutcome::NeedCreate);
        };
        let mut guard = channel.lock().await;
        let ch = &mut *guard;

        match ch.redeemed.checked_add(amount) {
            Some(total) if total <= ch.balance => {}
            _ => {
                debug!(
                    "Channel to {} needs topup: redeemed {} + {} > balance {}",
                    peer, ch.redeemed, amount, ch.balance
                );
                return Ok(PayOutcome::NeedTopup);
            }
        }

        let (nonce, redeemed) = ch.lane_state(lane);
        let voucher = self
            .chain
            .mint_voucher(&self.wallet, ch.address, lane, nonce + 1, redeemed + amount)
            .await?;

        let entry = ch.lanes.entry(lane).or_default();
        entry.nonce = voucher.nonce;
        entry.redeemed = voucher.amount;
        entry.vouchers.push(voucher.clone());
        ch.redeemed += amount;

        debug!("Paid {} to {} on lane {} (nonce {})", amount, peer, lane, voucher.nonce);
        Ok(PayOutcome::Paid(voucher))
    }

    /// Apply a refund voucher issued by `peer` on our outbound channel.
    ///
    /// Returns the refunded amount.
    pub async fn receive_refund(&self, peer: &NodeId, voucher: &Voucher) -> Result<u64> {
        let channel = lookup(&self.outbound, peer).ok_or_else(|| PaymentError::NoChannel(peer.to_string()))?;
        let claim = self.chain.verify_voucher(voucher).await?;

        let mut guard = channel.lock().await;
        let ch = &mut *guard;

        if claim.channel != ch.address {
            return Err(PaymentError::ChannelMismatch {
                expected: format!("{:?}", ch.address),
                actual: format!("{:?}", claim.channel),
            });
        }
        if claim.signer != ch.counterparty {
            return Err(PaymentError::WrongSigner {
                expected: format!("{:?}", ch.counterparty),
                actual: format!("{:?}", claim.signer),
            });
        }

        let lane = ch
            .lanes
            .get_mut(&claim.lane)
            .ok_or(PaymentError::LaneUnknown(claim.lane))?;
        if claim.nonce <= lane.nonce {
            return Err(PaymentError::StaleNonce {
                got: claim.nonce,
                current: lane.nonce,
            });
        }
        if claim.amount >= lane.redeemed {
            return Err(PaymentError::InvalidRefund {
                voucher_total: claim.amount,
                lane_total: lane.redeemed,
            });
        }

        let refunded = lane.redeemed - claim.amount;
        lane.nonce = claim.nonce;
        lane.redeemed = claim.amount;
        lane.vouchers.push(voucher.clone());
        ch.redeemed -= refunded;

        debug!("Refund of {} from {} on lane {}", refunded, peer, claim.lane);
        Ok(refunded)
    }

    fn check_owner(&self, channel: Address, peer: &NodeId) -> Result<()> {
        let owners = self.inbound_owners.read().unwrap_or_else(|e| e.into_inner());
        match owners.get(&channel) {
            Some(owner) if owner != peer => Err(PaymentError::ChannelClaimed {
                channel: format!("{:?}", channel),
                owner: owner.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn forget_owner(&self, peer: &NodeId) {
        self.inbound_owners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, owner| owner != peer);
    }

    /// Accept a payment voucher from `peer`.
    ///
    /// Returns the amount newly transferred and the lane it was paid on. The
    /// inbound channel record is created on the first voucher from a peer.
    /// A channel already tracked under another peer is refused, so a voucher
    /// cannot be replayed under a fresh identity.
    pub async fn receive(&self, peer: &NodeId, voucher: &Voucher) -> Result<(u64, u64)> {
        let claim = self.chain.verify_voucher(voucher).await?;
        self.check_owner(claim.channel, peer)?;

        let channel = match lookup(&self.inbound, peer) {
            Some(channel) => channel,
            None => {
                let info = self.chain.channel_info(claim.channel).await?;
                if info.to != self.address {
                    return Err(PaymentError::NotRecipient(format!("{:?}", claim.channel)));
                }
                if info.settled {
                    return Err(PaymentError::ChannelSettled(format!("{:?}", claim.channel)));
                }
                let fresh = Arc::new(Mutex::new(Channel::new(claim.channel, info.from, info.balance)));
                let mut owners = self.inbound_owners.write().unwrap_or_else(|e| e.into_inner());
                // Another identity may have bound it meanwhile
                if let Some(owner) = owners.get(&claim.channel) {
                    if owner != peer {
                        return Err(PaymentError::ChannelClaimed {
                            channel: format!("{:?}", claim.channel),
                            owner: owner.to_string(),
                        });
                    }
                }
                let mut inbound = self.inbound.write().unwrap_or_else(|e| e.into_inner());
                match inbound.get(peer) {
                    Some(existing) => existing.clone(),
                    None => {
                        owners.insert(claim.channel, *peer);
                        inbound.insert(*peer, fresh.clone());
                        fresh
                    }
                }
            }
        };

        let mut guard = channel.lock().await;
        let ch = &mut *guard;

        if claim.channel != ch.address {
            return Err(PaymentError::ChannelMismatch {
                expected: format!("{:?}", ch.address),
                actual: format!("{:?}", claim.channel),
            });
        }
        if claim.signer != ch.counterparty {
            return Err(PaymentError::WrongSigner {
                expected: format!("{:?}", ch.counterparty),
                actual: format!("{:?}", claim.signer),
            });
        }

        let (nonce, redeemed) = ch.lane_state(claim.lane);
        if claim.nonce <= nonce {
            return Err(PaymentError::StaleNonce {
                got: claim.nonce,
                current: nonce,
            });
        }
        if claim.amount <= redeemed {
            return Err(PaymentError::NoNewFunds {
                voucher_total: claim.amount,
                lane_total: redeemed,
            });
        }

        let received = claim.amount - redeemed;
        let total = ch.redeemed.saturating_add(received);
        if total > ch.balance {
            // The payer may have topped up since we last looked
            let info = self.chain.channel_info(ch.address).await?;
            if info.settled {
                return Err(PaymentError::ChannelSettled(format!("{:?}", ch.address)));
            }
            ch.balance = info.balance;
            if total > ch.balance {
                return Err(PaymentError::Overdrawn {
                    redeemed: total,
                    balance: ch.balance,
                });
            }
        }

        let lane = ch.lanes.entry(claim.lane).or_default();
        lane.nonce = claim.nonce;
        lane.redeemed = claim.amount;
        lane.vouchers.push(voucher.clone());
        ch.redeemed = total;

        debug!("Received {} from {} on lane {}", received, peer, claim.lane);
        Ok((received, claim.lane))
    }

    /// Issue a refund of `amount` to `peer` on `lane` of the inbound channel.
    pub async fn refund(&self, peer: &NodeId, lane: u64, amount: u64) -> Result<Voucher> {
        if amount == 0 {
            return Err(PaymentError::InvalidAmount(amount));
        }
        let channel = lookup(&self.inbound, peer).ok_or_else(|| PaymentError::NoChannel(peer.to_string()))?;
        let mut guard = channel.lock().await;
        let ch = &mut *guard;

        let (nonce, redeemed) = match ch.lanes.get(&lane) {
            Some(l) => (l.nonce, l.redeemed),
            None => return Err(PaymentError::LaneUnknown(lane)),
        };
        if amount > redeemed {
            return Err(PaymentError::RefundExceedsLane {
                amount,
                lane_total: redeemed,
            });
        }

        let voucher = self
            .chain
            .mint_voucher(&self.wallet, ch.address, lane, nonce + 1, redeemed - amount)
            .await?;

        if let Some(entry) = ch.lanes.get_mut(&lane) {
            entry.nonce = voucher.nonce;
            entry.redeemed = voucher.amount;
            entry.vouchers.push(voucher.clone());
        }
        ch.redeemed -= amount;

        debug!("Refunded {} to {} on lane {}", amount, peer, lane);
        Ok(voucher)
    }

    /// Redeem the inbound channel from `peer` and forget it.
    ///
    /// Returns the amount paid out by the chain.
    pub async fn settle(&self, peer: &NodeId) -> Result<u64> {
        let channel = lookup(&self.inbound, peer).ok_or_else(|| PaymentError::NoChannel(peer.to_string()))?;
        let ch = channel.lock().await;

        let latest: Vec<Voucher> = ch
            .lanes
            .values()
            .filter_map(|lane| lane.vouchers.last().cloned())
            .collect();
        let paid = self.chain.settle(&self.wallet, ch.address, &latest).await?;
        drop(ch);

        remove(&self.inbound, peer);
        self.forget_owner(peer);
        info!("Settled channel from {}: collected {}", peer, paid);
        Ok(paid)
    }

    /// Forget the outbound channel to `peer`. Returns whether one existed.
    pub fn remove_outbound_channel(&self, peer: &NodeId) -> bool {
        remove(&self.outbound, peer)
    }

    /// Forget the inbound channel from `peer`. Returns whether one existed.
    pub fn remove_inbound_channel(&self, peer: &NodeId) -> bool {
        self.forget_owner(peer);
        remove(&self.inbound, peer)
    }

    /// Snapshot of the outbound channel to `peer`.
    pub async fn outbound_channel(&self, peer: &NodeId) -> Option<ChannelSnapshot> {
        let channel = lookup(&self.outbound, peer)?;
        let snapshot = channel.lock().await.snapshot();
        Some(snapshot)
    }

    /// Snapshot of the inbound channel from `peer`.
    pub async fn inbound_channel(&self, peer: &NodeId) -> Option<ChannelSnapshot> {
        let channel = lookup(&self.inbound, peer)?;
        let snapshot = channel.lock().await.snapshot();
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::LocalChain;
    use fcr_core::MessageSigner;
    use proptest::prelude::*;
    use rand::rngs::OsRng;

    struct Pair {
        payer: PaymentManager,
        payee: PaymentManager,
        payer_id: NodeId,
        payee_id: NodeId,
    }

    fn pair() -> Pair {
        let chain: Arc<dyn ChainClient> = Arc::new(LocalChain::new());
        Pair {
            payer: PaymentManager::new(SigningKey::random(&mut OsRng), chain.clone()),
            payee: PaymentManager::new(SigningKey::random(&mut OsRng), chain),
            payer_id: MessageSigner::generate(1).node_id(),
            payee_id: MessageSigner::generate(1).node_id(),
        }
    }

    fn paid(outcome: PayOutcome) -> Voucher {
        match outcome {
            PayOutcome::Paid(v) => v,
            other => panic!("expected payment, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pay_create_topup_round_trip() {
        let p = pair();

        assert_eq!(p.payer.pay(&p.payee_id, 0, 40).await.unwrap(), PayOutcome::NeedCreate);

        p.payer.create(&p.payee_id, p.payee.address(), 100).await.unwrap();
        let v = paid(p.payer.pay(&p.payee_id, 0, 40).await.unwrap());
        assert_eq!((v.nonce, v.amount), (1, 40));

        assert_eq!(p.payer.pay(&p.payee_id, 0, 70).await.unwrap(), PayOutcome::NeedTopup);

        p.payer.topup(&p.payee_id, 100).await.unwrap();
        let v = paid(p.payer.pay(&p.payee_id, 0, 70).await.unwrap());
        assert_eq!((v.nonce, v.amount), (2, 110));

        let snap = p.payer.outbound_channel(&p.payee_id).await.unwrap();
        assert_eq!(snap.balance, 200);
        assert_eq!(snap.redeemed, 110);
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let p = pair();
        p.payer.create(&p.payee_id, p.payee.address(), 10).await.unwrap();
        let err = p.payer.create(&p.payee_id, p.payee.address(), 10).await.unwrap_err();
        assert!(matches!(err, PaymentError::ChannelExists(_)));
    }

    #[tokio::test]
    async fn test_topup_without_channel_fails() {
        let p = pair();
        let err = p.payer.topup(&p.payee_id, 10).await.unwrap_err();
        assert!(matches!(err, PaymentError::NoChannel(_)));
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let p = pair();
        assert!(matches!(
            p.payer.pay(&p.payee_id, 1, 0).await,
            Err(PaymentError::InvalidAmount(0))
        ));
    }

    #[tokio::test]
    async fn test_receive_and_refund() {
        let p = pair();
        p.payer.create(&p.payee_id, p.payee.address(), 100).await.unwrap();

        let v = paid(p.payer.pay(&p.payee_id, 1, 4).await.unwrap());
        let (amount, lane) = p.payee.receive(&p.payer_id, &v).await.unwrap();
        assert_eq!((amount, lane), (4, 1));

        let refund = p.payee.refund(&p.payer_id, 1, 3).await.unwrap();
        assert_eq!(refund.amount, 1);
        assert_eq!(p.payer.receive_refund(&p.payee_id, &refund).await.unwrap(), 3);

        let out = p.payer.outbound_channel(&p.payee_id).await.unwrap();
        let inb = p.payee.inbound_channel(&p.payer_id).await.unwrap();
        assert_eq!(out.redeemed, 1);
        assert_eq!(inb.redeemed, 1);
        assert_eq!(out.lanes[&1].nonce, 2);
        assert_eq!(inb.lanes[&1].nonce, 2);

        // Next payment continues the lane from the refunded total
        let v = paid(p.payer.pay(&p.payee_id, 1, 2).await.unwrap());
        assert_eq!((v.nonce, v.amount), (3, 3));
        assert_eq!(p.payee.receive(&p.payer_id, &v).await.unwrap(), (2, 1));
    }

    #[tokio::test]
    async fn test_no_double_refund() {
        let p = pair();
        p.payer.create(&p.payee_id, p.payee.address(), 100).await.unwrap();
        let v = paid(p.payer.pay(&p.payee_id, 1, 10).await.unwrap());
        p.payee.receive(&p.payer_id, &v).await.unwrap();

        let refund = p.payee.refund(&p.payer_id, 1, 5).await.unwrap();
        assert_eq!(p.payer.receive_refund(&p.payee_id, &refund).await.unwrap(), 5);

        let err = p.payer.receive_refund(&p.payee_id, &refund).await.unwrap_err();
        assert!(matches!(err, PaymentError::StaleNonce { .. }));
        assert_eq!(p.payer.outbound_channel(&p.payee_id).await.unwrap().redeemed, 5);
    }

    #[tokio::test]
    async fn test_replayed_payment_rejected() {
        let p = pair();
        p.payer.create(&p.payee_id, p.payee.address(), 100).await.unwrap();
        let v = paid(p.payer.pay(&p.payee_id, 1, 10).await.unwrap());

        p.payee.receive(&p.payer_id, &v).await.unwrap();
        let err = p.payee.receive(&p.payer_id, &v).await.unwrap_err();
        assert!(matches!(err, PaymentError::StaleNonce { .. }));
    }

    #[tokio::test]
    async fn test_replay_under_another_identity_rejected() {
        let p = pair();
        p.payer.create(&p.payee_id, p.payee.address(), 100).await.unwrap();
        let v = paid(p.payer.pay(&p.payee_id, 1, 10).await.unwrap());
        assert_eq!(p.payee.receive(&p.payer_id, &v).await.unwrap(), (10, 1));

        for _ in 0..3 {
            let impostor = MessageSigner::generate(1).node_id();
            let err = p.payee.receive(&impostor, &v).await.unwrap_err();
            assert!(matches!(err, PaymentError::ChannelClaimed { .. }));
            assert!(p.payee.inbound_channel(&impostor).await.is_none());
        }

        // The rightful payer keeps paying on the same channel
        let v = paid(p.payer.pay(&p.payee_id, 1, 2).await.unwrap());
        assert_eq!(p.payee.receive(&p.payer_id, &v).await.unwrap(), (2, 1));
        assert_eq!(p.payee.inbound_channel(&p.payer_id).await.unwrap().redeemed, 12);
    }

    #[tokio::test]
    async fn test_self_signed_refund_rejected() {
        let p = pair();
        p.payer.create(&p.payee_id, p.payee.address(), 100).await.unwrap();
        let v = paid(p.payer.pay(&p.payee_id, 1, 10).await.unwrap());

        // Payer forges a "refund" with its own key
        let forged = Voucher::sign(&p.payer.wallet, v.channel, 1, 2, 0).unwrap();
        let err = p.payer.receive_refund(&p.payee_id, &forged).await.unwrap_err();
        assert!(matches!(err, PaymentError::WrongSigner { .. }));
    }

    #[tokio::test]
    async fn test_refund_that_raises_total_rejected() {
        let p = pair();
        p.payer.create(&p.payee_id, p.payee.address(), 100).await.unwrap();
        let v = paid(p.payer.pay(&p.payee_id, 1, 10).await.unwrap());

        let bogus = Voucher::sign(&p.payee.wallet, v.channel, 1, 2, 10).unwrap();
        let err = p.payer.receive_refund(&p.payee_id, &bogus).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidRefund { .. }));
    }

    #[tokio::test]
    async fn test_receive_for_someone_else_rejected() {
        let p = pair();
        let other = SigningKey::random(&mut OsRng);
        p.payer.create(&p.payee_id, wallet_address(&other), 100).await.unwrap();
        let v = paid(p.payer.pay(&p.payee_id, 1, 10).await.unwrap());

        let err = p.payee.receive(&p.payer_id, &v).await.unwrap_err();
        assert!(matches!(err, PaymentError::NotRecipient(_)));
    }

    #[tokio::test]
    async fn test_receive_sees_topup() {
        let p = pair();
        p.payer.create(&p.payee_id, p.payee.address(), 10).await.unwrap();
        let v = paid(p.payer.pay(&p.payee_id, 1, 10).await.unwrap());
        p.payee.receive(&p.payer_id, &v).await.unwrap();

        p.payer.topup(&p.payee_id, 10).await.unwrap();
        let v = paid(p.payer.pay(&p.payee_id, 1, 5).await.unwrap());
        assert_eq!(p.payee.receive(&p.payer_id, &v).await.unwrap(), (5, 1));
        assert_eq!(p.payee.inbound_channel(&p.payer_id).await.unwrap().balance, 20);
    }

    #[tokio::test]
    async fn test_settle_collects_latest_totals() {
        let p = pair();
        p.payer.create(&p.payee_id, p.payee.address(), 100).await.unwrap();

        for (lane, amount) in [(1, 6), (3, 4), (1, 2)] {
            let v = paid(p.payer.pay(&p.payee_id, lane, amount).await.unwrap());
            p.payee.receive(&p.payer_id, &v).await.unwrap();
        }
        let refund = p.payee.refund(&p.payer_id, 3, 4).await.unwrap();
        p.payer.receive_refund(&p.payee_id, &refund).await.unwrap();

        assert_eq!(p.payee.settle(&p.payer_id).await.unwrap(), 8);
        assert!(p.payee.inbound_channel(&p.payer_id).await.is_none());
    }

    #[tokio::test]
    async fn test_remove_channels() {
        let p = pair();
        p.payer.create(&p.payee_id, p.payee.address(), 100).await.unwrap();
        assert!(p.payer.remove_outbound_channel(&p.payee_id));
        assert!(!p.payer.remove_outbound_channel(&p.payee_id));
        assert_eq!(p.payer.pay(&p.payee_id, 1, 1).await.unwrap(), PayOutcome::NeedCreate);
        assert!(!p.payee.remove_inbound_channel(&p.payer_id));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Pay { lane: u64, amount: u64 },
        Topup(u64),
        Refund { lane: u64, amount: u64 },
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..3, 1u64..40).prop_map(|(lane, amount)| Op::Pay { lane, amount }),
            (1u64..60).prop_map(Op::Topup),
            (0u64..3, 1u64..40).prop_map(|(lane, amount)| Op::Refund { lane, amount }),
        ]
    }

    fn check_invariants(snap: &ChannelSnapshot) {
        assert!(snap.redeemed <= snap.balance);
        let lane_sum: u64 = snap.lanes.values().map(|l| l.redeemed).sum();
        assert_eq!(lane_sum, snap.redeemed);
        for lane in snap.lanes.values() {
            assert!(lane.redeemed <= snap.redeemed);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_balance_invariant_and_lane_monotonicity(ops in proptest::collection::vec(op(), 1..30)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let p = pair();
                p.payer.create(&p.payee_id, p.payee.address(), 50).await.unwrap();
                let mut last_nonce: HashMap<u64, u64> = HashMap::new();

                for op in ops {
                    match op {
                        Op::Pay { lane, amount } => {
                            if let PayOutcome::Paid(v) = p.payer.pay(&p.payee_id, lane, amount).await.unwrap() {
                                let prev = last_nonce.insert(lane, v.nonce).unwrap_or(0);
                                assert_eq!(v.nonce, prev + 1);
                                assert_eq!(p.payee.receive(&p.payer_id, &v).await.unwrap(), (amount, lane));
                            }
                        }
                        Op::Topup(amount) => p.payer.topup(&p.payee_id, amount).await.unwrap(),
                        Op::Refund { lane, amount } => {
                            if let Ok(v) = p.payee.refund(&p.payer_id, lane, amount).await {
                                let prev = last_nonce.insert(lane, v.nonce).unwrap_or(0);
                                assert_eq!(v.nonce, prev + 1);
                                assert_eq!(p.payer.receive_refund(&p.payee_id, &v).await.unwrap(), amount);
                            }
                        }
                    }

                    let out = p.payer.outbound_channel(&p.payee_id).await.unwrap();
                    check_invariants(&out);
                    if let Some(inb) = p.payee.inbound_channel(&p.payer_id).await {
                        check_invariants(&inb);
                        assert_eq!(inb.redeemed, out.redeemed);
                    }
                }
            });
        }
    }
}
