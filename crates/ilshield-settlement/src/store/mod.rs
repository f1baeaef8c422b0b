//! Policy and claim state

pub mod policy_store;

pub use policy_store::PolicyStore;
