//! Loan ledger configuration.
//!
//! Loaded from TOML. Every section is optional and falls back to defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::contracts::LoanPolicy;
use crate::ledger::{parse_units, AccountId, Amount, LedgerError, LedgerState};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Genesis error: {0}")]
    Genesis(#[from] LedgerError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoanConfig {
    #[serde(default)]
    pub policy: PolicySettings,

    #[serde(default)]
    pub genesis: GenesisSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// Loan-to-value ratio in basis points
    pub ltv_bps: u32,
    pub default_interest_rate_pct: u32,
    pub default_duration_secs: u64,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            ltv_bps: LoanPolicy::default().ltv_bps,
            default_interest_rate_pct: 10,
            default_duration_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisSettings {
    pub deployer: AccountId,
    /// Initial balances as decimal strings, e.g. `borrower = "10.0"`
    pub balances: BTreeMap<AccountId, String>,
}

impl Default for GenesisSettings {
    fn default() -> Self {
        let balances = [("borrower", "10.0"), ("lender", "10.0")]
            .into_iter()
            .map(|(account, amount)| (account.to_string(), amount.to_string()))
            .collect();
        Self {
            deployer: "deployer".to_string(),
            balances,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoanConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policy.ltv_bps == 0 || self.policy.ltv_bps > 10_000 {
            return Err(ConfigError::Invalid(format!(
                "ltv_bps must be in 1..=10000, got {}",
                self.policy.ltv_bps
            )));
        }
        if self.genesis.deployer.trim().is_empty() {
            return Err(ConfigError::Invalid("genesis.deployer is empty".into()));
        }
        self.genesis_balances()?;
        Ok(())
    }

    pub fn loan_policy(&self) -> LoanPolicy {
        LoanPolicy {
            ltv_bps: self.policy.ltv_bps,
        }
    }

    pub fn genesis_balances(&self) -> Result<Vec<(AccountId, Amount)>, ConfigError> {
        self.genesis
            .balances
            .iter()
            .map(|(account, amount)| {
                parse_units(amount)
                    .map(|units| (account.clone(), units))
                    .map_err(ConfigError::from)
            })
            .collect()
    }

    /// Fresh ledger with the genesis balances minted.
    pub fn build_ledger(&self) -> Result<LedgerState, ConfigError> {
        let mut ledger = LedgerState::new();
        for (account, amount) in self.genesis_balances()? {
            ledger.mint(&account, amount, "genesis")?;
        }
        Ok(ledger)
    }
}
