//! Attestor stake and slashing

pub mod registry;

pub use registry::{AttestorRegistry, Evidence, SlashOutcome};
