//! Engine configuration
//!
//! Defaults are compiled in; an optional file and `ILSHIELD__*` environment variables
//! override them, e.g. `ILSHIELD__CONSENSUS__REQUIRED_QUORUM=3`.

use ilshield_common::{IlShieldError, Result};
use serde::{Deserialize, Serialize};

/// Settlement engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub compute: ComputeSettings,
    pub consensus: ConsensusSettings,
    pub slashing: SlashingSettings,
    pub price_feed: PriceFeedSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compute: ComputeSettings::default(),
            consensus: ConsensusSettings::default(),
            slashing: SlashingSettings::default(),
            price_feed: PriceFeedSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let defaults = config::Config::try_from(&Self::default()).map_err(config_err)?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder
            .add_source(
                config::Environment::with_prefix("ILSHIELD")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("price_feed.trusted_sources")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_err)
    }
}

fn config_err(err: config::ConfigError) -> IlShieldError {
    IlShieldError::Config(err.to_string())
}

/// Confidential compute client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeSettings {
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base backoff between attempts, doubled each retry
    pub backoff_ms: u64,
    /// `did:key` ids of workers whose signatures are accepted
    pub trusted_workers: Vec<String>,
}

impl Default for ComputeSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_retries: 2,
            backoff_ms: 200,
            trusted_workers: Vec::new(),
        }
    }
}

/// Attestation consensus settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSettings {
    /// Approvals required per task
    pub required_quorum: usize,
    /// Time attestors have to vote, in milliseconds
    pub deadline_ms: i64,
    /// How long finalized tasks are kept before garbage collection
    pub retention_ms: i64,
    /// Background sweep interval in milliseconds
    pub sweep_interval_ms: u64,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            required_quorum: 3,
            deadline_ms: 60_000,
            retention_ms: 300_000,
            sweep_interval_ms: 1_000,
        }
    }
}

/// Stake and slashing parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlashingSettings {
    /// Share of current stake slashed for conflicting statements
    pub conflicting_attestation_bps: u16,
    /// Share of current stake slashed for unavailability
    pub unavailability_bps: u16,
    /// Share of current stake slashed for a malicious signature
    pub malicious_signature_bps: u16,
    /// Cumulative slashed share of all deposits that disqualifies an attestor
    pub disqualification_bps: u16,
    /// Consecutive missed deadlines tolerated before an unavailability slash
    pub unavailability_grace: u32,
    /// Smallest stake accepted at registration
    pub min_stake: u64,
}

impl Default for SlashingSettings {
    fn default() -> Self {
        Self {
            conflicting_attestation_bps: 5_000,
            unavailability_bps: 1_000,
            malicious_signature_bps: 10_000,
            disqualification_bps: 5_000,
            unavailability_grace: 3,
            min_stake: 1,
        }
    }
}

/// Price reference sanity limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceFeedSettings {
    /// Oldest acceptable observation, in milliseconds
    pub max_staleness_ms: i64,
    /// Largest step between consecutive observations, in basis points
    pub max_deviation_bps: u16,
    /// Feed names a price reference may cite; empty accepts any source
    pub trusted_sources: Vec<String>,
    /// Observations retained per pair for deviation checks
    pub series_window: usize,
}

impl Default for PriceFeedSettings {
    fn default() -> Self {
        Self {
            max_staleness_ms: 300_000,
            max_deviation_bps: 1_000,
            trusted_sources: Vec::new(),
            series_window: 64,
        }
    }
}
