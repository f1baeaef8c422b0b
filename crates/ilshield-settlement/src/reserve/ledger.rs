//! Reserve Ledger
//!
//! Single writer for every pool's [`ReserveAccount`]. Mutations on one pool run under
//! that pool's map shard lock, which linearizes credits and debits per pool. Debits are
//! crate-internal: only the settlement executor pays out.

use crate::journal::{LedgerEvent, SettlementJournal};
use dashmap::DashMap;
use ilshield_common::{
    error::ReserveError, Amount, Clock, PoolId, ReserveAccount, Result, BPS_DENOMINATOR,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Concurrent map of pool reserves
pub struct ReserveLedger {
    accounts: DashMap<PoolId, ReserveAccount>,
    clock: Arc<dyn Clock>,
    journal: Arc<SettlementJournal>,
}

impl ReserveLedger {
    pub fn new(clock: Arc<dyn Clock>, journal: Arc<SettlementJournal>) -> Self {
        Self {
            accounts: DashMap::new(),
            clock,
            journal,
        }
    }

    /// Deposit `amount` into a pool's reserve, returning the new balance
    pub fn credit(&self, pool: &PoolId, amount: Amount) -> Result<Amount> {
        let now = self.clock.now_ms();
        let balance = {
            let mut account = self
                .accounts
                .entry(pool.clone())
                .or_insert_with(|| ReserveAccount::new(pool.clone(), now));
            account.credit(amount, now)?;
            account.balance
        };

        self.journal.record(LedgerEvent::ReserveCredited {
            pool: pool.clone(),
            amount,
            balance,
        });
        info!(pool = %pool, amount = %amount, balance = %balance, "Reserve credited");
        Ok(balance)
    }

    /// Credit the premium share of a trading fee
    ///
    /// A premium that rounds down to zero is skipped and reported as `0`.
    pub fn credit_premium(&self, pool: &PoolId, fee_amount: Amount, premium_bps: u16) -> Result<Amount> {
        if u128::from(premium_bps) > BPS_DENOMINATOR {
            return Err(ReserveError::InvalidAmount.into());
        }
        let premium = fee_amount
            .checked_mul(u128::from(premium_bps))
            .map(|v| v / BPS_DENOMINATOR)
            .ok_or(ReserveError::Overflow)?;

        if premium == 0 {
            debug!(pool = %pool, fee = %fee_amount, "Premium rounds to zero, skipped");
            return Ok(0);
        }

        self.credit(pool, premium)?;
        Ok(premium)
    }

    /// Current balance; unknown pools hold nothing
    pub fn balance(&self, pool: &PoolId) -> Amount {
        self.accounts.get(pool).map(|a| a.balance).unwrap_or(0)
    }

    pub fn account(&self, pool: &PoolId) -> Option<ReserveAccount> {
        self.accounts.get(pool).map(|a| a.clone())
    }

    pub fn pools(&self) -> Vec<PoolId> {
        self.accounts.iter().map(|e| e.key().clone()).collect()
    }

    /// Whether `pool` can cover `amount` in full
    pub fn is_solvent_for(&self, pool: &PoolId, amount: Amount) -> bool {
        self.balance(pool) >= amount
    }

    /// Pay as much of `amount` as the pool holds, returning `(paid, shortfall)`
    pub(crate) fn debit_up_to(&self, pool: &PoolId, amount: Amount) -> Result<(Amount, Amount)> {
        let now = self.clock.now_ms();
        match self.accounts.get_mut(pool) {
            Some(mut account) => Ok(account.debit_up_to(amount, now)?),
            None => Ok((0, amount)),
        }
    }

    /// Return a debit that could not be finalized
    pub(crate) fn refund(&self, pool: &PoolId, amount: Amount) -> Result<()> {
        let now = self.clock.now_ms();
        let mut account = self
            .accounts
            .get_mut(pool)
            .ok_or_else(|| ReserveError::PoolNotFound(pool.clone()))?;
        account.refund(amount, now)?;
        Ok(())
    }
}
