//! JSON-RPC client for a remote payment authority.
//!
//! Wraps `reqwest` with exponential backoff retry. Every state-changing call
//! carries an `auth` field: a recoverable signature by the caller's wallet
//! key over `keccak256(method || params)`, which the authority checks
//! before touching the channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ethers_core::types::Address;
use ethers_core::utils::keccak256;
use k256::ecdsa::SigningKey;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::chain::{ChainClient, ChannelInfo};
use crate::error::{PaymentError, Result};
use crate::voucher::{wallet_address, Voucher};

/// Exponential backoff delays in milliseconds.
const BACKOFF_DELAYS_MS: [u64; 3] = [500, 1500, 4000];

/// Jitter percentage for backoff (±10%).
const JITTER_PERCENT: f64 = 0.1;

/// Per-request HTTP timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    message: String,
}

/// Payment authority reached over HTTP JSON-RPC.
///
/// # Example
///
/// ```rust,no_run
/// use fcr_payment::{ChainClient, RpcChain};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let chain = RpcChain::new("http://127.0.0.1:8545")?;
///     let info = chain.channel_info("0x0000000000000000000000000000000000000001".parse()?).await?;
///     println!("balance: {}", info.balance);
///     Ok(())
/// }
/// ```
pub struct RpcChain {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcChain {
    /// Create a client for the authority at `url`.
    ///
    /// # Errors
    ///
    /// Returns `Chain` if the URL is not http(s) or the HTTP client cannot be built.
    pub fn new(url: &str) -> Result<Self> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(PaymentError::Chain(format!("Invalid RPC URL: {}", url)));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PaymentError::Chain(e.to_string()))?;

        Ok(Self {
            url: url.to_string(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    fn authorize(key: &SigningKey, method: &str, params: &Value) -> Result<String> {
        let mut payload = method.as_bytes().to_vec();
        payload.extend_from_slice(params.to_string().as_bytes());
        let hash = keccak256(payload);

        let (sig, recid) = key
            .sign_prehash_recoverable(&hash)
            .map_err(|e| PaymentError::Chain(e.to_string()))?;
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(recid.to_byte());
        Ok(hex::encode(bytes))
    }

    /// Issue a signed call.
    async fn call_signed<T: DeserializeOwned>(&self, key: &SigningKey, method: &str, params: Value) -> Result<T> {
        let auth = Self::authorize(key, method, &params)?;
        self.call(method, json!({ "params": params, "auth": auth })).await
    }

    /// Issue a call with exponential backoff retry on transient failures.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let mut last_error = None;

        for (attempt, base_delay) in BACKOFF_DELAYS_MS.iter().enumerate() {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let body = json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": [params],
            });

            match self.client.post(&self.url).json(&body).send().await {
                Ok(response) => {
                    let parsed: RpcResponse<T> = response
                        .json()
                        .await
                        .map_err(|e| PaymentError::Chain(format!("{}: bad response: {}", method, e)))?;

                    if let Some(err) = parsed.error {
                        return Err(PaymentError::Chain(format!("{}: {}", method, err.message)));
                    }
                    return parsed
                        .result
                        .ok_or_else(|| PaymentError::Chain(format!("{}: empty result", method)));
                }
                Err(e) => {
                    // Don't retry on non-transient errors
                    if !(e.is_timeout() || e.is_connect()) {
                        return Err(PaymentError::Chain(e.to_string()));
                    }

                    warn!("{} attempt {} failed: {}", method, attempt + 1, e);
                    last_error = Some(PaymentError::Chain(e.to_string()));

                    if attempt < BACKOFF_DELAYS_MS.len() - 1 {
                        let jitter = rand::random::<f64>() * JITTER_PERCENT * 2.0 - JITTER_PERCENT;
                        let actual_delay = (*base_delay as f64 * (1.0 + jitter)) as u64;
                        sleep(Duration::from_millis(actual_delay)).await;
                    }
                }
            }
        }

        debug!("{} exhausted retries", method);
        Err(last_error.unwrap_or(PaymentError::ChainTimeout {
            attempts: BACKOFF_DELAYS_MS.len() as u32,
        }))
    }
}

#[async_trait]
impl ChainClient for RpcChain {
    async fn create_channel(&self, payer: &SigningKey, recipient: Address, amount: u64) -> Result<Address> {
        let params = json!({
            "from": wallet_address(payer),
            "to": recipient,
            "amount": amount,
        });
        self.call_signed(payer, "paych_create", params).await
    }

    async fn topup(&self, payer: &SigningKey, channel: Address, amount: u64) -> Result<()> {
        let params = json!({ "channel": channel, "amount": amount });
        let _: bool = self.call_signed(payer, "paych_topup", params).await?;
        Ok(())
    }

    async fn channel_info(&self, channel: Address) -> Result<ChannelInfo> {
        self.call("paych_info", json!({ "channel": channel })).await
    }

    async fn settle(&self, recipient: &SigningKey, channel: Address, vouchers: &[Voucher]) -> Result<u64> {
        let encoded: Vec<String> = vouchers.iter().map(Voucher::to_hex).collect();
        let params = json!({ "channel": channel, "vouchers": encoded });
        self.call_signed(recipient, "paych_settle", params).await
    }
}
