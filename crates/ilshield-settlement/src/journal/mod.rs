//! Settlement journal
//!
//! Append-only record of every lifecycle event. Each entry is serialized to JSON and its
//! BLAKE3 hash becomes a leaf of a Merkle tree, so any entry can be proven against a
//! published root.

use ilshield_common::{
    crypto::merkle::{hash_leaf, MerkleProof, MerkleTree},
    Amount, AttestorId, ClaimId, Clock, MisbehaviorKind, PolicyId, PoolId, RejectionReason,
    Result, TaskId,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

/// Journaled lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    ClaimRequested {
        claim_id: ClaimId,
        policy_id: PolicyId,
        exit_commitment: String,
    },
    ComputeAccepted {
        claim_id: ClaimId,
        advisory_payout: Amount,
        audit_hash: String,
        worker_id: String,
    },
    TaskCreated {
        task_id: TaskId,
        claim_id: ClaimId,
        required_quorum: usize,
        deadline: i64,
    },
    AttestationRecorded {
        task_id: TaskId,
        attestor: AttestorId,
        approved: bool,
        payout: Amount,
    },
    TaskFinalized {
        task_id: TaskId,
        claim_id: ClaimId,
        completed: bool,
    },
    ClaimSettled {
        claim_id: ClaimId,
        payout: Amount,
    },
    ClaimRejected {
        claim_id: ClaimId,
        reason: RejectionReason,
    },
    AttestorSlashed {
        attestor: AttestorId,
        kind: MisbehaviorKind,
        amount: Amount,
        deactivated: bool,
    },
    ReserveCredited {
        pool: PoolId,
        amount: Amount,
        balance: Amount,
    },
}

/// One sequenced journal entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub sequence: u64,
    /// Unix milliseconds
    pub recorded_at: i64,
    pub event: LedgerEvent,
}

impl JournalEntry {
    /// Merkle leaf hash of this entry
    pub fn leaf_hash(&self) -> Result<[u8; 32]> {
        Ok(hash_leaf(&serde_json::to_vec(self)?))
    }
}

#[derive(Default)]
struct JournalState {
    entries: Vec<JournalEntry>,
    tree: MerkleTree,
}

/// Append-only, Merkle-committed event log
pub struct SettlementJournal {
    state: Mutex<JournalState>,
    clock: Arc<dyn Clock>,
}

impl SettlementJournal {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(JournalState::default()),
            clock,
        }
    }

    /// Append an event, returning its sequence number
    pub fn append(&self, event: LedgerEvent) -> Result<u64> {
        let mut state = self.state.lock();
        let entry = JournalEntry {
            sequence: state.entries.len() as u64,
            recorded_at: self.clock.now_ms(),
            event,
        };
        let leaf = entry.leaf_hash()?;

        state.tree.append(leaf);
        state.tree.commit();
        state.entries.push(entry);
        Ok(state.entries.len() as u64 - 1)
    }

    /// Append, logging instead of failing
    pub fn record(&self, event: LedgerEvent) {
        if let Err(e) = self.append(event) {
            error!(error = %e, "Failed to journal event");
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current Merkle root
    pub fn root(&self) -> Option<[u8; 32]> {
        self.state.lock().tree.root()
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.state.lock().entries.clone()
    }

    pub fn entry(&self, sequence: u64) -> Option<JournalEntry> {
        self.state.lock().entries.get(sequence as usize).cloned()
    }

    /// Entry together with its inclusion proof against the current root
    pub fn prove(&self, sequence: u64) -> Option<(JournalEntry, MerkleProof)> {
        let state = self.state.lock();
        let entry = state.entries.get(sequence as usize)?.clone();
        let proof = state.tree.generate_proof(sequence)?;
        Some((entry, proof))
    }

    /// Check an entry against a proof
    pub fn verify(entry: &JournalEntry, proof: &MerkleProof) -> bool {
        entry
            .leaf_hash()
            .map(|leaf| proof.leaf_index == entry.sequence && proof.verify(&leaf))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ilshield_common::ManualClock;

    fn journal() -> SettlementJournal {
        SettlementJournal::new(Arc::new(ManualClock::new(1_000)))
    }

    #[test]
    fn test_append_sequences_and_roots() {
        let journal = journal();
        assert!(journal.root().is_none());

        let claim_id = ClaimId::new();
        let seq0 = journal
            .append(LedgerEvent::ClaimSettled { claim_id, payout: 270 })
            .unwrap();
        let root0 = journal.root();
        let seq1 = journal
            .append(LedgerEvent::ClaimRejected {
                claim_id,
                reason: RejectionReason::ComputeTimeout,
            })
            .unwrap();

        assert_eq!((seq0, seq1), (0, 1));
        assert_ne!(journal.root(), root0);
        assert_eq!(journal.len(), 2);
    }

    #[test]
    fn test_inclusion_proofs() {
        let journal = journal();
        for amount in 1..=5u128 {
            journal.record(LedgerEvent::ReserveCredited {
                pool: PoolId::new("p"),
                amount,
                balance: amount,
            });
        }

        let (entry, proof) = journal.prove(3).unwrap();
        assert_eq!(proof.root, journal.root().unwrap());
        assert!(SettlementJournal::verify(&entry, &proof));

        let mut forged = entry.clone();
        forged.event = LedgerEvent::ClaimSettled {
            claim_id: ClaimId::new(),
            payout: 1,
        };
        assert!(!SettlementJournal::verify(&forged, &proof));
        assert!(journal.prove(5).is_none());
    }
}
