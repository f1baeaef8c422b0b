//! Attestor - staked voter on computed payouts
//!
//! Stake only grows through deposits and only shrinks through slashing. Once cumulative
//! slashing crosses the disqualification threshold the attestor is permanently inactive.

use super::attestation::TaskId;
use super::Amount;
use crate::crypto::{decode_did_key, encode_did_key};
use crate::error::CryptoError;
use crate::BPS_DENOMINATOR;
use serde::{Deserialize, Serialize};

/// Attestor identifier (`did:key` of its Ed25519 key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttestorId(pub String);

impl AttestorId {
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        Self(encode_did_key(public_key))
    }

    pub fn public_key(&self) -> Result<[u8; 32], CryptoError> {
        decode_did_key(&self.0)
    }
}

impl std::fmt::Display for AttestorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Slashable misbehavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MisbehaviorKind {
    /// Two differing signed statements on the same task
    ConflictingAttestation,
    /// Repeatedly missed attestation deadlines
    Unavailability,
    /// Signed approval of a payout above the derivable bound
    MaliciousSignature,
}

impl std::fmt::Display for MisbehaviorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MisbehaviorKind::ConflictingAttestation => "conflicting_attestation",
            MisbehaviorKind::Unavailability => "unavailability",
            MisbehaviorKind::MaliciousSignature => "malicious_signature",
        };
        f.write_str(s)
    }
}

/// One applied penalty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashRecord {
    pub kind: MisbehaviorKind,
    pub amount: Amount,
    pub task_id: Option<TaskId>,
    /// Unix milliseconds
    pub at: i64,
}

/// Registered attestor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestor {
    pub id: AttestorId,
    pub verifying_key: [u8; 32],
    pub stake: Amount,
    /// Lifetime deposits, including the initial stake
    pub total_deposited: Amount,
    /// Lifetime slashed amount
    pub total_slashed: Amount,
    pub slashing_history: Vec<SlashRecord>,
    /// Consecutive deadline-expired tasks without a vote
    pub missed_tasks: u32,
    pub active: bool,
    pub registered_at: i64,
}

impl Attestor {
    pub fn new(verifying_key: [u8; 32], stake: Amount, now_ms: i64) -> Self {
        Self {
            id: AttestorId::from_public_key(&verifying_key),
            verifying_key,
            stake,
            total_deposited: stake,
            total_slashed: 0,
            slashing_history: Vec::new(),
            missed_tasks: 0,
            active: true,
            registered_at: now_ms,
        }
    }

    /// Remove `fraction_bps` of the current stake, returning the slashed amount
    pub fn slash(
        &mut self,
        kind: MisbehaviorKind,
        fraction_bps: u16,
        task_id: Option<TaskId>,
        now_ms: i64,
    ) -> Amount {
        let amount = self
            .stake
            .checked_mul(u128::from(fraction_bps))
            .map(|v| v / BPS_DENOMINATOR)
            .unwrap_or_else(|| self.stake / BPS_DENOMINATOR * u128::from(fraction_bps))
            .min(self.stake);

        self.stake -= amount;
        self.total_slashed = self.total_slashed.saturating_add(amount);
        self.slashing_history.push(SlashRecord {
            kind,
            amount,
            task_id,
            at: now_ms,
        });
        amount
    }

    /// Cumulative slashing as a share of all deposits, in basis points
    pub fn slashed_bps(&self) -> u128 {
        if self.total_deposited == 0 {
            return 0;
        }
        self.total_slashed
            .checked_mul(BPS_DENOMINATOR)
            .map(|v| v / self.total_deposited)
            .unwrap_or_else(|| self.total_slashed / (self.total_deposited / BPS_DENOMINATOR).max(1))
    }
}
