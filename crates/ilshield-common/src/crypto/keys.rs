//! Ed25519 signing identities
//!
//! Attestors and compute workers are identified by the `did:key` encoding of their
//! Ed25519 verifying key, so an id alone is enough to check a signature.

use crate::error::CryptoError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Ed25519 multicodec prefix for did:key
const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// Signing key together with its did:key identifier
#[derive(Clone)]
pub struct SigningIdentity {
    key: SigningKey,
    did: String,
}

impl SigningIdentity {
    /// Generate a fresh random identity
    pub fn generate() -> Self {
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        Self::from_signing_key(key)
    }

    /// Deterministic identity from a 32-byte seed
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    /// Identity from a hex-encoded 32-byte seed
    pub fn from_hex_seed(seed_hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(seed_hex.trim())
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidEncoding("seed must be 32 bytes".into()))?;
        Ok(Self::from_seed(seed))
    }

    fn from_signing_key(key: SigningKey) -> Self {
        let did = encode_did_key(key.verifying_key().as_bytes());
        Self { key, did }
    }

    pub fn did(&self) -> &str {
        &self.did
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("did", &self.did)
            .finish_non_exhaustive()
    }
}

/// Verify an Ed25519 signature over `message`
pub fn verify_signature(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature = Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
    key.verify(message, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Encode an Ed25519 public key as a did:key identifier
pub fn encode_did_key(public_key: &[u8; 32]) -> String {
    let mut prefixed = Vec::with_capacity(34);
    prefixed.extend_from_slice(&ED25519_MULTICODEC);
    prefixed.extend_from_slice(public_key);

    format!("did:key:z{}", bs58::encode(&prefixed).into_string())
}

/// Decode a did:key identifier back to the Ed25519 public key
pub fn decode_did_key(did: &str) -> Result<[u8; 32], CryptoError> {
    let encoded = did
        .strip_prefix("did:key:z")
        .ok_or_else(|| CryptoError::InvalidEncoding(format!("not a did:key: {}", did)))?;

    let decoded = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;

    if decoded.len() != 34 || decoded[..2] != ED25519_MULTICODEC {
        return Err(CryptoError::InvalidEncoding("invalid multicodec prefix".into()));
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&decoded[2..]);
    Ok(key)
}
