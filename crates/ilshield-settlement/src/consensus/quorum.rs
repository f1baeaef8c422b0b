//! Quorum rule for attestation tasks
//!
//! With `n` votes received and `k` approvals out of an attestor set of size `N`:
//! - approved when `k >= required` and `k >= ceil(2n/3)`
//! - failed when `n >= 80%` of `N` without approval
//! - pending otherwise

use ilshield_common::error::ConsensusError;

/// Quorum decision for the current votes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumOutcome {
    Pending,
    Approved,
    Failed,
}

/// Quorum thresholds for one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumRule {
    required: usize,
    attestor_set: usize,
}

impl QuorumRule {
    /// Rule requiring `required` approvals out of `attestor_set` eligible attestors
    pub fn new(required: usize, attestor_set: usize) -> Result<Self, ConsensusError> {
        if required == 0 || required > attestor_set {
            return Err(ConsensusError::QuorumUnreachable {
                required,
                active: attestor_set,
            });
        }
        Ok(Self {
            required,
            attestor_set,
        })
    }

    pub fn required(&self) -> usize {
        self.required
    }

    pub fn attestor_set(&self) -> usize {
        self.attestor_set
    }

    /// Evaluate `approvals` out of `received` votes
    pub fn evaluate(&self, received: usize, approvals: usize) -> QuorumOutcome {
        // k >= ceil(2n/3)  <=>  3k >= 2n
        if approvals >= self.required && 3 * approvals >= 2 * received {
            QuorumOutcome::Approved
        } else if 10 * received >= 8 * self.attestor_set {
            QuorumOutcome::Failed
        } else {
            QuorumOutcome::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_unreachable_rules() {
        assert!(matches!(
            QuorumRule::new(4, 3),
            Err(ConsensusError::QuorumUnreachable {
                required: 4,
                active: 3
            })
        ));
        assert!(QuorumRule::new(0, 3).is_err());
        assert!(QuorumRule::new(3, 3).is_ok());
    }

    #[test]
    fn test_three_of_five() {
        let rule = QuorumRule::new(3, 5).unwrap();
        assert_eq!(rule.evaluate(2, 2), QuorumOutcome::Pending);
        assert_eq!(rule.evaluate(3, 3), QuorumOutcome::Approved);
        // 2 approve, 1 reject, 2 silent
        assert_eq!(rule.evaluate(3, 2), QuorumOutcome::Pending);
        // 3 approve, 1 reject: 9 >= 8
        assert_eq!(rule.evaluate(4, 3), QuorumOutcome::Approved);
        // 2 approve, 2 reject reaches 80% participation
        assert_eq!(rule.evaluate(4, 2), QuorumOutcome::Failed);
        // 3 approve, 2 reject: 9 < 10
        assert_eq!(rule.evaluate(5, 3), QuorumOutcome::Failed);
    }

    #[test]
    fn test_supermajority_needed_beyond_required() {
        let rule = QuorumRule::new(2, 10).unwrap();
        // 2 approvals out of 4 votes: 6 < 8
        assert_eq!(rule.evaluate(4, 2), QuorumOutcome::Pending);
        assert_eq!(rule.evaluate(4, 3), QuorumOutcome::Approved);
    }

    proptest! {
        #[test]
        fn prop_approval_needs_quorum_and_supermajority(
            set in 1usize..50,
            required_seed in 0usize..50,
            received_seed in 0usize..50,
            approvals_seed in 0usize..50,
        ) {
            let required = required_seed % set + 1;
            let received = received_seed % (set + 1);
            let approvals = approvals_seed % (received + 1);
            let rule = QuorumRule::new(required, set).unwrap();

            if rule.evaluate(received, approvals) == QuorumOutcome::Approved {
                prop_assert!(approvals >= required);
                prop_assert!(3 * approvals >= 2 * received);
            }
        }
    }
}
