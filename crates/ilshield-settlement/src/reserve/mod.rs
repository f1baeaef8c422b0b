//! Per-pool premium reserves

pub mod ledger;

pub use ledger::ReserveLedger;
