//! Keygen command implementation.

use fcr_core::MessageSigner;
use fcr_payment::wallet_address;

use crate::output;

/// Print a fresh key usable as message key or wallet key.
pub fn run() -> i32 {
    let signer = MessageSigner::generate(1);

    output::header("New key");
    output::kv("Secret", &signer.secret_hex());
    output::kv("Public key", &hex::encode(signer.public_key_bytes()));
    output::kv("Node ID", &signer.node_id().to_string());
    output::kv("Wallet", &format!("{:?}", wallet_address(signer.signing_key())));
    println!();
    output::hint("Keep the secret out of version control.");
    0
}
