//! Gateway configuration.
//!
//! Loaded from TOML (`--config <path>` or the platform config directory),
//! then overridden by `INSTACLAW_*` environment variables and validated.

pub mod schema;

pub use schema::{
    BillingConfig, Config, EstimateConfig, GatewayConfig, HealthConfig, ProviderConfig,
    ProviderKind, QuotaConfig, RoutingConfig, TierPolicies, TierPolicy,
};

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "config.toml";

impl Config {
    /// Default config file location, e.g. `~/.config/instaclaw/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "instaclaw")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the default location is
    /// tried and built-in defaults are used when it is absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => {
                    tracing::debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| anyhow::anyhow!("Failed to parse config: {e}"))
    }

    /// Apply `INSTACLAW_HOST`, `INSTACLAW_PORT`, `INSTACLAW_DATA_DIR` and
    /// `INSTACLAW_ADMIN_TOKEN` from the given lookup.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("INSTACLAW_HOST").filter(|v| !v.trim().is_empty()) {
            self.gateway.host = host.trim().to_string();
        }
        if let Some(port) = lookup("INSTACLAW_PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.gateway.port = port,
                Err(e) => tracing::warn!("Ignoring INSTACLAW_PORT={port}: {e}"),
            }
        }
        if let Some(dir) = lookup("INSTACLAW_DATA_DIR").filter(|v| !v.trim().is_empty()) {
            self.data_dir = dir;
        }
        if let Some(token) = lookup("INSTACLAW_ADMIN_TOKEN").filter(|v| !v.is_empty()) {
            self.gateway.admin_token = Some(token);
        }
    }

    /// Data directory with `~` expanded.
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).as_ref())
    }

    pub fn validate(&self) -> Result<()> {
        let routing = &self.routing;
        for (name, value) in [
            ("routing.cost_weight", routing.cost_weight),
            ("routing.quality_weight", routing.quality_weight),
            ("routing.degraded_penalty", routing.degraded_penalty),
            ("estimate.units_per_word", self.estimate.units_per_word),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{name} must be a finite, non-negative number (got {value})");
            }
        }
        if routing.invoke_timeout_ms == 0 {
            bail!("routing.invoke_timeout_ms must be greater than zero");
        }
        if self.gateway.request_timeout_secs == 0 {
            bail!("gateway.request_timeout_secs must be greater than zero");
        }
        if self.quota.period_days == 0 {
            bail!("quota.period_days must be greater than zero");
        }

        for (tier, policy) in [
            ("free", &self.quota.tiers.free),
            ("pro", &self.quota.tiers.pro),
            ("enterprise", &self.quota.tiers.enterprise),
        ] {
            if !policy.overage_rate.is_finite() || policy.overage_rate < 0.0 {
                bail!("quota.tiers.{tier}.overage_rate must be a finite, non-negative number");
            }
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            let id = provider.id.trim();
            if id.is_empty() {
                bail!("Provider id cannot be empty");
            }
            if !seen.insert(id) {
                bail!("Duplicate provider id '{id}'");
            }
            if !provider.cost_per_unit.is_finite() || provider.cost_per_unit < 0.0 {
                bail!("Provider '{id}': cost_per_unit must be a finite, non-negative number");
            }
            if !provider.quality_score.is_finite() {
                bail!("Provider '{id}': quality_score must be finite");
            }
            if provider.kind != ProviderKind::Mock && provider.model.is_none() {
                bail!("Provider '{id}': model is required for {:?} providers", provider.kind);
            }
        }

        Ok(())
    }
}
