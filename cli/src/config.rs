//! YAML configuration for the `feeindex` binary.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use feeindex_core::scraper::ScraperConfig;
use feeindex_core::types::ChainId;
use feeindex_evm::EvmSourceConfig;

use crate::logging::LogConfig;

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_error_backoff_ms() -> u64 {
    10_000
}

fn default_chunk_size() -> u64 {
    1_000
}

fn default_confirmation_lag() -> u64 {
    5
}

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// `sqlite:…` or `postgres://…`. Overridden by `--database-url` / `FEEINDEX_DATABASE_URL`.
    #[serde(default)]
    pub database_url: Option<String>,
    /// Sleep between cycles once a chain is up to date.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Sleep after a failed cycle.
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub defaults: ChainDefaults,
    pub chains: Vec<ChainConfig>,
}

/// Values applied to chains that don't override them.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainDefaults {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_confirmation_lag")]
    pub confirmation_lag: u64,
}

impl Default for ChainDefaults {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            confirmation_lag: default_confirmation_lag(),
        }
    }
}

/// One scraped chain.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub provider_uri: String,
    pub contract_address: String,
    /// Checkpoint assumed before the first run.
    #[serde(default)]
    pub oldest_block: u64,
    #[serde(default)]
    pub chunk_size: Option<u64>,
    #[serde(default)]
    pub confirmation_lag: Option<u64>,
    /// In-flight block timestamp lookups per chunk.
    #[serde(default)]
    pub timestamp_concurrency: Option<usize>,
}

impl ChainConfig {
    pub fn scraper_config(&self, defaults: &ChainDefaults) -> ScraperConfig {
        ScraperConfig {
            chain_id: self.chain_id,
            chunk_size: self.chunk_size.unwrap_or(defaults.chunk_size),
            confirmation_lag: self.confirmation_lag.unwrap_or(defaults.confirmation_lag),
            oldest_block: self.oldest_block,
        }
    }

    pub fn source_config(&self) -> EvmSourceConfig {
        let mut source = EvmSourceConfig::new(self.chain_id, &self.provider_uri, &self.contract_address);
        if let Some(n) = self.timestamp_concurrency {
            source.timestamp_concurrency = n;
        }
        source
    }
}

impl Config {
    /// Read and validate a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(raw).context("parsing YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            bail!("no chains configured");
        }
        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.chain_id) {
                bail!("chain {} configured more than once", chain.chain_id);
            }
            if chain.provider_uri.trim().is_empty() {
                bail!("chain {}: provider_uri is empty", chain.chain_id);
            }
            if chain.contract_address.trim().is_empty() {
                bail!("chain {}: contract_address is empty", chain.chain_id);
            }
            chain
                .scraper_config(&self.defaults)
                .validate()
                .map_err(anyhow::Error::new)?;
        }
        Ok(())
    }

    pub fn chain(&self, chain_id: ChainId) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    /// Configured chains restricted to `only` (all chains when empty).
    pub fn select_chains(&self, only: &[ChainId]) -> Result<Vec<&ChainConfig>> {
        if only.is_empty() {
            return Ok(self.chains.iter().collect());
        }
        only.iter()
            .map(|id| self.chain(*id).with_context(|| format!("chain {id} is not configured")))
            .collect()
    }
}
