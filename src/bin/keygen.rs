//! Custody key generator for lensmark-node.
//!
//! Prints a fresh secp256k1 key and the attester address it signs as.
//!
//! Usage:
//!   cargo run --bin lensmark-keygen

use lensmark::signer::{CustodySigner, LocalCustodyKey};

fn main() {
    println!("Custody key generator for lensmark-node\n");

    let key = LocalCustodyKey::random();

    println!("Attester address: {}", key.address());
    println!("Custody key:      {}", key.to_hex());
    println!("\nExport it for the node:");
    println!("  export LENSMARK_CUSTODY_KEY={}", key.to_hex());
    println!("\nWARNING: Keep this key secure! It signs every delegated attestation.");
}
