//! Provider selection.
//!
//! Scoring, lower wins:
//!
//! - `cost`:    `cost_weight * cost_per_unit + health_penalty`
//! - `quality`: `-(quality_weight * quality_score) + health_penalty`
//!
//! `health_penalty` is 0 for healthy providers and `degraded_penalty` for
//! degraded ones. Ties fall back to the lower health penalty, then registry
//! insertion order, so identical inputs always select the same provider.

use crate::config::RoutingConfig;
use crate::error::{GatewayError, Result};
use crate::providers::{HealthStatus, Provider, ProviderRegistry};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// What the caller optimizes for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preference {
    #[default]
    Cost,
    Quality,
}

impl Preference {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cost => "cost",
            Self::Quality => "quality",
        }
    }
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cost" => Ok(Self::Cost),
            "quality" => Ok(Self::Quality),
            other => anyhow::bail!("Unknown preference '{other}' (expected cost or quality)"),
        }
    }
}

/// Ephemeral routing input. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct RoutingRequest {
    pub account_id: String,
    pub prompt: String,
    pub preference: Preference,
    /// Explicit provider choice; must name a non-unavailable candidate.
    pub provider_override: Option<String>,
    /// Capability tags every candidate must carry.
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Router {
    weights: RoutingConfig,
}

impl Router {
    pub fn new(weights: RoutingConfig) -> Self {
        Self { weights }
    }

    fn health_penalty(&self, health: HealthStatus) -> f64 {
        match health {
            HealthStatus::Degraded => self.weights.degraded_penalty,
            HealthStatus::Healthy | HealthStatus::Unavailable => 0.0,
        }
    }

    /// Score of a provider under a preference. Lower is better.
    pub fn score(&self, provider: &Provider, preference: Preference) -> f64 {
        let base = match preference {
            Preference::Cost => self.weights.cost_weight * provider.cost_per_unit,
            Preference::Quality => -(self.weights.quality_weight * provider.quality_score),
        };
        base + self.health_penalty(provider.health)
    }

    fn compare(&self, a: &Provider, b: &Provider, preference: Preference) -> Ordering {
        self.score(a, preference)
            .total_cmp(&self.score(b, preference))
            .then_with(|| {
                self.health_penalty(a.health)
                    .total_cmp(&self.health_penalty(b.health))
            })
            .then_with(|| a.order.cmp(&b.order))
    }

    /// Pick the best candidate. Unavailable providers are never selected.
    pub fn select<'a>(
        &self,
        candidates: &'a [Provider],
        preference: Preference,
    ) -> Result<&'a Provider> {
        candidates
            .iter()
            .filter(|p| p.health != HealthStatus::Unavailable)
            .min_by(|a, b| self.compare(a, b, preference))
            .ok_or(GatewayError::NoProviderAvailable)
    }

    /// Resolve a request against the registry: capability filter, optional
    /// override, then [`select`](Self::select).
    pub fn route(&self, registry: &ProviderRegistry, request: &RoutingRequest) -> Result<Provider> {
        let candidates = registry.candidates(&request.capabilities);

        let chosen = match request.provider_override.as_deref() {
            Some(id) => candidates
                .iter()
                .find(|p| p.id == id)
                .ok_or(GatewayError::NoProviderAvailable)?,
            None => self.select(&candidates, request.preference)?,
        };

        tracing::debug!(
            account_id = %request.account_id,
            provider_id = %chosen.id,
            preference = %request.preference,
            candidates = candidates.len(),
            "Provider selected"
        );
        Ok(chosen.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        Router::new(RoutingConfig::default())
    }

    fn ordered(providers: Vec<Provider>) -> Vec<Provider> {
        providers
            .into_iter()
            .enumerate()
            .map(|(order, p)| Provider { order, ..p })
            .collect()
    }

    #[test]
    fn cost_preference_picks_cheapest() {
        let candidates = ordered(vec![
            Provider::new("B", 2.0, 0.9),
            Provider::new("A", 1.0, 0.5),
        ]);
        let chosen = router().select(&candidates, Preference::Cost).unwrap();
        assert_eq!(chosen.id, "A");
    }

    #[test]
    fn quality_preference_picks_highest_score() {
        let candidates = ordered(vec![
            Provider::new("A", 1.0, 0.5),
            Provider::new("B", 2.0, 0.9),
        ]);
        let chosen = router().select(&candidates, Preference::Quality).unwrap();
        assert_eq!(chosen.id, "B");
    }

    #[test]
    fn degraded_cheaper_provider_loses_to_healthy() {
        let candidates = ordered(vec![
            Provider::new("A", 1.0, 0.5).with_health(HealthStatus::Degraded),
            Provider::new("B", 2.0, 0.5),
        ]);
        let r = router();
        assert_eq!(r.select(&candidates, Preference::Cost).unwrap().id, "B");
        assert!(
            r.score(&candidates[0], Preference::Cost) > r.score(&candidates[1], Preference::Cost)
        );
    }

    #[test]
    fn degraded_provider_is_last_resort() {
        let candidates = ordered(vec![
            Provider::new("A", 1.0, 0.5).with_health(HealthStatus::Degraded),
            Provider::new("B", 2.0, 0.5).with_health(HealthStatus::Unavailable),
        ]);
        assert_eq!(router().select(&candidates, Preference::Cost).unwrap().id, "A");
    }

    #[test]
    fn empty_candidates_fail() {
        assert!(matches!(
            router().select(&[], Preference::Cost),
            Err(GatewayError::NoProviderAvailable)
        ));

        let all_down = ordered(vec![
            Provider::new("A", 1.0, 0.5).with_health(HealthStatus::Unavailable)
        ]);
        assert!(matches!(
            router().select(&all_down, Preference::Quality),
            Err(GatewayError::NoProviderAvailable)
        ));
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let candidates = ordered(vec![
            Provider::new("first", 1.0, 0.5),
            Provider::new("second", 1.0, 0.5),
            Provider::new("third", 1.0, 0.5),
        ]);
        let r = router();
        for _ in 0..100 {
            assert_eq!(r.select(&candidates, Preference::Cost).unwrap().id, "first");
        }

        let mut reversed = candidates.clone();
        reversed.reverse();
        assert_eq!(r.select(&reversed, Preference::Cost).unwrap().id, "first");
    }

    #[test]
    fn equal_score_prefers_lower_health_penalty() {
        // With a zero penalty the scores tie; order alone would pick A.
        let r = Router::new(RoutingConfig {
            degraded_penalty: 0.0,
            ..RoutingConfig::default()
        });
        let candidates = ordered(vec![
            Provider::new("A", 1.0, 0.5).with_health(HealthStatus::Degraded),
            Provider::new("B", 1.0, 0.5),
        ]);
        assert_eq!(r.select(&candidates, Preference::Cost).unwrap().id, "A");

        // A small penalty keeps the healthy provider ahead.
        let r = Router::new(RoutingConfig {
            degraded_penalty: 1e-9,
            ..RoutingConfig::default()
        });
        assert_eq!(r.select(&candidates, Preference::Cost).unwrap().id, "B");
    }

    #[test]
    fn weights_scale_scores() {
        let r = Router::new(RoutingConfig {
            cost_weight: 10.0,
            quality_weight: 2.0,
            ..RoutingConfig::default()
        });
        let p = Provider::new("A", 0.5, 0.75);
        assert!((r.score(&p, Preference::Cost) - 5.0).abs() < 1e-12);
        assert!((r.score(&p, Preference::Quality) + 1.5).abs() < 1e-12);
    }

    #[test]
    fn route_applies_capabilities_and_override() {
        let registry = ProviderRegistry::new(vec![
            Provider::new("cheap", 1.0, 0.1).with_capabilities(["chat"]),
            Provider::new("vision", 5.0, 0.9).with_capabilities(["chat", "vision"]),
            Provider::new("down", 0.1, 1.0)
                .with_capabilities(["chat"])
                .with_health(HealthStatus::Unavailable),
        ]);
        let r = router();

        let mut request = RoutingRequest {
            account_id: "acct".into(),
            prompt: "hi".into(),
            ..RoutingRequest::default()
        };
        assert_eq!(r.route(&registry, &request).unwrap().id, "cheap");

        request.capabilities = vec!["vision".into()];
        assert_eq!(r.route(&registry, &request).unwrap().id, "vision");

        request.capabilities.clear();
        request.provider_override = Some("vision".into());
        assert_eq!(r.route(&registry, &request).unwrap().id, "vision");

        request.provider_override = Some("down".into());
        assert!(matches!(
            r.route(&registry, &request),
            Err(GatewayError::NoProviderAvailable)
        ));

        request.provider_override = Some("missing".into());
        assert!(r.route(&registry, &request).is_err());
    }

    #[test]
    fn preference_parses() {
        assert_eq!("Quality".parse::<Preference>().unwrap(), Preference::Quality);
        assert_eq!(Preference::default(), Preference::Cost);
        assert!("speed".parse::<Preference>().is_err());
    }
}
