//! Cryptographic primitives for IL Shield
//!
//! This module provides:
//! - Ed25519 signing identities with did:key ids
//! - Merkle tree operations for the settlement journal
//! - Domain-separated BLAKE3 digests for signed payloads

pub mod keys;
pub mod merkle;

// Re-export commonly used items
pub use keys::{decode_did_key, encode_did_key, verify_signature, SigningIdentity};
pub use merkle::{MerkleProof, MerkleTree};

/// BLAKE3 digest of `parts` under a domain-separation context
pub fn domain_digest(context: &str, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}
