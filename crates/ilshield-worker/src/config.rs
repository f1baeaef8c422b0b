//! Worker configuration

use anyhow::{Context, Result};
use ilshield_common::crypto::SigningIdentity;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Compute worker service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Service host
    pub host: String,
    /// Service port
    pub port: u16,
    /// Hex-encoded Ed25519 seed; a fresh key is generated when unset
    #[serde(skip_serializing)]
    pub seed: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            seed: None,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let mut cfg = Self::default();

        // Platform-provided port variables first
        for var in ["PORT", "SERVICE_PORT"] {
            if let Ok(port) = std::env::var(var) {
                if let Ok(p) = port.parse::<u16>() {
                    cfg.port = p;
                }
            }
        }

        if let Ok(host) = std::env::var("ILSHIELD_WORKER_HOST") {
            cfg.host = host;
        }
        if let Ok(port) = std::env::var("ILSHIELD_WORKER_PORT") {
            cfg.port = port
                .parse()
                .with_context(|| format!("invalid ILSHIELD_WORKER_PORT: {}", port))?;
        }
        if let Ok(seed) = std::env::var("ILSHIELD_WORKER_SEED") {
            cfg.seed = Some(seed);
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    /// Signing identity from the configured seed, or a generated one
    pub fn identity(&self) -> Result<SigningIdentity> {
        match &self.seed {
            Some(seed) => SigningIdentity::from_hex_seed(seed)
                .map_err(|e| anyhow::anyhow!("invalid ILSHIELD_WORKER_SEED: {}", e)),
            None => Ok(SigningIdentity::generate()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_identity_is_stable() {
        let cfg = WorkerConfig {
            seed: Some("07".repeat(32)),
            ..WorkerConfig::default()
        };
        let a = cfg.identity().unwrap();
        let b = cfg.identity().unwrap();
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(cfg.addr().unwrap().port(), 8090);
    }

    #[test]
    fn test_bad_seed_rejected() {
        let cfg = WorkerConfig {
            seed: Some("abcd".into()),
            ..WorkerConfig::default()
        };
        assert!(cfg.identity().is_err());
    }
}
