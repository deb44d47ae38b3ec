//! Provider registry.
//!
//! Read-mostly catalog of downstream providers. Readers load the current
//! snapshot without locking; health updates build a new snapshot and swap
//! it in atomically, so a reader always sees a consistent provider list.

use crate::config::ProviderConfig;
use anyhow::bail;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Health of a provider as last reported by the probe collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Eligible for routing but penalized.
    Degraded,
    /// Excluded from routing candidates.
    Unavailable,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        }
    }

    /// Gauge encoding: 2 healthy, 1 degraded, 0 unavailable.
    pub fn as_gauge(self) -> i64 {
        match self {
            Self::Healthy => 2,
            Self::Degraded => 1,
            Self::Unavailable => 0,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "healthy" => Ok(Self::Healthy),
            "degraded" => Ok(Self::Degraded),
            "unavailable" => Ok(Self::Unavailable),
            other => bail!("Unknown health status '{other}'"),
        }
    }
}

/// A downstream provider as seen by routing and billing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provider {
    pub id: String,
    pub cost_per_unit: f64,
    /// Declared capability score; higher is better.
    pub quality_score: f64,
    pub capabilities: BTreeSet<String>,
    pub health: HealthStatus,
    /// Registry insertion order, the final routing tie-break.
    pub order: usize,
}

impl Provider {
    pub fn new(id: impl Into<String>, cost_per_unit: f64, quality_score: f64) -> Self {
        Self {
            id: id.into(),
            cost_per_unit,
            quality_score,
            capabilities: BTreeSet::new(),
            health: HealthStatus::Healthy,
            order: 0,
        }
    }

    #[must_use]
    pub fn with_capabilities<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.extend(tags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_health(mut self, health: HealthStatus) -> Self {
        self.health = health;
        self
    }

    /// Whether the provider carries every tag in `required`.
    pub fn supports(&self, required: &[String]) -> bool {
        required.iter().all(|tag| self.capabilities.contains(tag))
    }
}

impl From<&ProviderConfig> for Provider {
    fn from(config: &ProviderConfig) -> Self {
        Provider::new(config.id.trim(), config.cost_per_unit, config.quality_score)
            .with_capabilities(config.capabilities.iter().map(|c| c.trim().to_string()))
    }
}

pub struct ProviderRegistry {
    snapshot: ArcSwap<Vec<Provider>>,
}

impl ProviderRegistry {
    /// Build a registry; `order` is assigned from the input position.
    pub fn new(providers: Vec<Provider>) -> Self {
        let providers = providers
            .into_iter()
            .enumerate()
            .map(|(order, provider)| Provider { order, ..provider })
            .collect::<Vec<_>>();
        Self {
            snapshot: ArcSwap::from_pointee(providers),
        }
    }

    pub fn from_config(providers: &[ProviderConfig]) -> Self {
        Self::new(providers.iter().map(Provider::from).collect())
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<Vec<Provider>> {
        self.snapshot.load_full()
    }

    /// All providers carrying the required capability tags, in registry order.
    pub fn list(&self, required: &[String]) -> Vec<Provider> {
        self.snapshot
            .load()
            .iter()
            .filter(|p| p.supports(required))
            .cloned()
            .collect()
    }

    /// Routing candidates: like [`list`](Self::list) without unavailable providers.
    pub fn candidates(&self, required: &[String]) -> Vec<Provider> {
        self.snapshot
            .load()
            .iter()
            .filter(|p| p.health != HealthStatus::Unavailable && p.supports(required))
            .cloned()
            .collect()
    }

    pub fn get(&self, provider_id: &str) -> Option<Provider> {
        self.snapshot
            .load()
            .iter()
            .find(|p| p.id == provider_id)
            .cloned()
    }

    pub fn health(&self, provider_id: &str) -> Option<HealthStatus> {
        self.snapshot
            .load()
            .iter()
            .find(|p| p.id == provider_id)
            .map(|p| p.health)
    }

    /// Record a health status pushed by the probe collaborator.
    ///
    /// Returns `false` when the provider is unknown.
    pub fn set_health(&self, provider_id: &str, status: HealthStatus) -> bool {
        let Some(previous) = self.health(provider_id) else {
            return false;
        };

        self.snapshot.rcu(|current| {
            let mut next = Vec::clone(current);
            if let Some(provider) = next.iter_mut().find(|p| p.id == provider_id) {
                provider.health = status;
            }
            next
        });

        if previous != status {
            tracing::info!(
                provider_id,
                from = %previous,
                to = %status,
                "Provider health changed"
            );
        }
        true
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }
}
