use std::path::Path;

use serde::Deserialize;

use crate::error::LoyaltyResult;
use crate::loyalty::{TierPolicy, TierPolicySet};

/// Root application configuration. Loaded from an optional TOML/JSON file
/// and environment variables with the prefix `XCLUB__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_program_name")]
    pub program_name: String,
    #[serde(default)]
    pub loyalty: LoyaltyConfig,
}

fn default_program_name() -> String {
    "X Club".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            program_name: default_program_name(),
            loyalty: LoyaltyConfig::default(),
        }
    }
}

// ─── Loyalty Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LoyaltyConfig {
    #[serde(default = "default_loyalty_enabled")]
    pub enabled: bool,
    /// One entry per tier, any order.
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierPolicy>,
}

fn default_loyalty_enabled() -> bool { true }
fn default_tiers() -> Vec<TierPolicy> { TierPolicySet::default().to_vec() }

impl Default for LoyaltyConfig {
    fn default() -> Self {
        Self {
            enabled: default_loyalty_enabled(),
            tiers: default_tiers(),
        }
    }
}

impl LoyaltyConfig {
    /// Shape-checked policy set. Ordering invariants are checked on activation.
    pub fn policy_set(&self) -> LoyaltyResult<TierPolicySet> {
        TierPolicySet::from_policies(&self.tiers)
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let builder = builder.add_source(
            config::Environment::with_prefix("XCLUB")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
