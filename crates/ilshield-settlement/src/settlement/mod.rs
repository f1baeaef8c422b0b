//! Settlement of attested claims

pub mod executor;

pub use executor::{payout_bound, SettlementExecutor};
