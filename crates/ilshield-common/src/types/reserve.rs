//! Reserve Account - per-pool premium reserve
//!
//! Premiums skimmed from trading fees are credited here and claim payouts are debited.
//! Key characteristics:
//! - `balance == total_collected - total_paid` after every mutation
//! - Balance never goes negative; an overdraw is `VaultInsolvent`
//! - Version field for optimistic concurrency

use super::policy::PoolId;
use super::Amount;
use crate::error::ReserveError;
use serde::{Deserialize, Serialize};

/// Reserve backing every policy written against one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveAccount {
    pub pool: PoolId,

    /// Funds available for payouts
    pub balance: Amount,

    /// Lifetime premiums and deposits
    pub total_collected: Amount,

    /// Lifetime payouts
    pub total_paid: Amount,

    /// Version for optimistic concurrency control
    pub version: u64,

    /// Timestamp of last modification (Unix milliseconds)
    pub updated_at: i64,
}

impl ReserveAccount {
    /// Create an empty reserve for a pool
    pub fn new(pool: PoolId, now_ms: i64) -> Self {
        Self {
            pool,
            balance: 0,
            total_collected: 0,
            total_paid: 0,
            version: 0,
            updated_at: now_ms,
        }
    }

    /// Deposit funds into the reserve
    pub fn credit(&mut self, amount: Amount, now_ms: i64) -> Result<(), ReserveError> {
        if amount == 0 {
            return Err(ReserveError::InvalidAmount);
        }

        let collected = self
            .total_collected
            .checked_add(amount)
            .ok_or(ReserveError::Overflow)?;
        let balance = self.balance.checked_add(amount).ok_or(ReserveError::Overflow)?;

        self.total_collected = collected;
        self.balance = balance;
        self.touch(now_ms);
        self.check_invariant()
    }

    /// Debit exactly `amount`, failing if the reserve cannot cover it
    pub fn debit(&mut self, amount: Amount, now_ms: i64) -> Result<(), ReserveError> {
        if amount == 0 {
            return Err(ReserveError::InvalidAmount);
        }

        if self.balance < amount {
            return Err(ReserveError::VaultInsolvent {
                pool: self.pool.clone(),
                required: amount,
                available: self.balance,
            });
        }

        self.apply_debit(amount, now_ms)
    }

    /// Debit as much of `amount` as the balance allows
    ///
    /// Returns `(paid, shortfall)`. A zero request is a no-op that still reports
    /// `(0, 0)`, so a zero payout settles without touching the reserve.
    pub fn debit_up_to(
        &mut self,
        amount: Amount,
        now_ms: i64,
    ) -> Result<(Amount, Amount), ReserveError> {
        let paid = amount.min(self.balance);
        if paid > 0 {
            self.apply_debit(paid, now_ms)?;
        }
        Ok((paid, amount - paid))
    }

    /// Undo a previous debit of `amount`
    pub fn refund(&mut self, amount: Amount, now_ms: i64) -> Result<(), ReserveError> {
        if amount == 0 {
            return Err(ReserveError::InvalidAmount);
        }
        if self.total_paid < amount {
            return Err(ReserveError::InvariantViolated {
                pool: self.pool.clone(),
                balance: self.balance,
                collected: self.total_collected,
                paid: self.total_paid,
            });
        }

        self.total_paid -= amount;
        self.balance = self.balance.checked_add(amount).ok_or(ReserveError::Overflow)?;
        self.touch(now_ms);
        self.check_invariant()
    }

    /// Whether the reserve can cover `amount` in full
    #[inline]
    pub fn is_solvent_for(&self, amount: Amount) -> bool {
        self.balance >= amount
    }

    /// Verify `balance == total_collected - total_paid`
    pub fn check_invariant(&self) -> Result<(), ReserveError> {
        match self.total_collected.checked_sub(self.total_paid) {
            Some(expected) if expected == self.balance => Ok(()),
            _ => Err(ReserveError::InvariantViolated {
                pool: self.pool.clone(),
                balance: self.balance,
                collected: self.total_collected,
                paid: self.total_paid,
            }),
        }
    }

    fn apply_debit(&mut self, amount: Amount, now_ms: i64) -> Result<(), ReserveError> {
        let paid = self.total_paid.checked_add(amount).ok_or(ReserveError::Overflow)?;
        self.balance -= amount;
        self.total_paid = paid;
        self.touch(now_ms);
        self.check_invariant()
    }

    /// Update modification timestamp and version
    fn touch(&mut self, now_ms: i64) {
        self.updated_at = now_ms;
        self.version += 1;
    }
}
