//! End-to-end handling of one submitted request.
//!
//! ```text
//! Received -> QuotaReserved -> Routed -> Dispatched -> Committed
//!                  |              |           |
//!                  +--------------+-----------+------> Released
//! ```
//!
//! Once quota is reserved the request ends in exactly one of `Committed`
//! or `Released`. The reservation lives in a guard that releases it on drop,
//! so a request future cancelled mid-flight still returns its capacity.

use super::estimate::UsageEstimator;
use super::rate_limit::TierRateLimiter;
use crate::accounts::AccountStore;
use crate::billing::{QuotaLedger, ReservationToken, UsageRecord};
use crate::config::Config;
use crate::error::{GatewayError, ProviderError, Result};
use crate::observability::GatewayMetrics;
use crate::providers::{AdapterSet, Provider, ProviderRegistry};
use crate::routing::{Preference, Router, RoutingRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

// ── Request lifecycle ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    QuotaReserved,
    Routed,
    Dispatched,
    Committed,
    Released,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Released)
    }

    /// Legal transitions. No state is revisited.
    pub fn can_advance_to(self, next: Self) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Received, QuotaReserved)
                | (QuotaReserved, Routed)
                | (Routed, Dispatched)
                | (Dispatched, Committed)
                | (QuotaReserved | Routed | Dispatched, Released)
        )
    }
}

/// Holds a reservation until it is committed or released.
struct ReservationGuard<'a> {
    ledger: &'a QuotaLedger,
    token: Option<ReservationToken>,
    state: RequestState,
}

impl<'a> ReservationGuard<'a> {
    fn new(ledger: &'a QuotaLedger, token: ReservationToken) -> Self {
        let mut guard = Self {
            ledger,
            token: Some(token),
            state: RequestState::Received,
        };
        guard.advance(RequestState::QuotaReserved);
        guard
    }

    fn advance(&mut self, next: RequestState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal request transition {:?} -> {next:?}",
            self.state
        );
        tracing::trace!(from = ?self.state, to = ?next, "Request state");
        self.state = next;
    }

    fn commit(mut self, actual_units: u64, provider: &Provider) -> Result<UsageRecord> {
        let token = self
            .token
            .take()
            .ok_or_else(|| GatewayError::InvalidRequest("reservation already settled".into()))?;
        // A failed commit is turned into a release by the ledger.
        let result = self.ledger.commit(token, actual_units, provider);
        self.advance(if result.is_ok() {
            RequestState::Committed
        } else {
            RequestState::Released
        });
        result
    }

    fn release(mut self) {
        if let Some(token) = self.token.take() {
            self.settle_release(token);
        }
    }

    fn settle_release(&mut self, token: ReservationToken) {
        let reservation_id = token.id();
        if let Err(e) = self.ledger.release(token) {
            tracing::error!(%reservation_id, "Failed to release reservation: {e}");
        }
        self.advance(RequestState::Released);
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            tracing::warn!(
                reservation_id = %token.id(),
                state = ?self.state,
                "Request dropped before settlement, releasing reservation"
            );
            self.settle_release(token);
        }
    }
}

// ── Dispatcher ──────────────────────────────────────────────────

/// Inbound request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub prompt: String,
    #[serde(default)]
    pub preference: Preference,
    /// Explicit provider id.
    #[serde(default, alias = "provider_override")]
    pub provider: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl SubmitRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchResponse {
    pub provider_id: String,
    pub response: String,
    /// Units charged for this request.
    pub cost_units: u64,
    pub cost: f64,
    pub overage: bool,
    pub remaining_units: u64,
    pub quota_percentage: f64,
    pub record_id: Uuid,
}

pub struct Dispatcher {
    accounts: Arc<AccountStore>,
    ledger: Arc<QuotaLedger>,
    registry: Arc<ProviderRegistry>,
    adapters: Arc<AdapterSet>,
    router: Router,
    estimator: UsageEstimator,
    limiter: TierRateLimiter,
    invoke_timeout: Duration,
    metrics: Arc<GatewayMetrics>,
}

impl Dispatcher {
    pub fn new(
        config: &Config,
        accounts: Arc<AccountStore>,
        ledger: Arc<QuotaLedger>,
        registry: Arc<ProviderRegistry>,
        adapters: Arc<AdapterSet>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            accounts,
            ledger,
            registry,
            adapters,
            router: Router::new(config.routing.clone()),
            estimator: UsageEstimator::new(&config.estimate),
            limiter: TierRateLimiter::new(&config.quota.tiers),
            invoke_timeout: Duration::from_millis(config.routing.invoke_timeout_ms),
            metrics,
        }
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    /// Handle one request: authenticate, reserve, route, invoke, settle.
    pub async fn submit(&self, api_key: &str, request: SubmitRequest) -> Result<DispatchResponse> {
        let result = self.dispatch(api_key, request).await;
        match &result {
            Ok(_) => self.metrics.record_outcome("committed"),
            Err(e) => self.metrics.record_outcome(e.kind()),
        }
        result
    }

    async fn dispatch(&self, api_key: &str, request: SubmitRequest) -> Result<DispatchResponse> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(GatewayError::InvalidRequest("prompt is required".into()));
        }

        let account = self
            .accounts
            .authenticate(api_key)?
            .ok_or(GatewayError::AuthenticationFailure)?;

        if let Err(retry_after) = self.limiter.check(&account.id, account.tier) {
            tracing::info!(account_id = %account.id, tier = %account.tier, "Rate limit exceeded");
            return Err(GatewayError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        let estimate = self.estimator.estimate(prompt);
        let token = self.ledger.reserve(&account, estimate)?;
        let mut guard = ReservationGuard::new(&self.ledger, token);

        let routing = RoutingRequest {
            account_id: account.id.clone(),
            prompt: prompt.to_string(),
            preference: request.preference,
            provider_override: request.provider,
            capabilities: request.capabilities,
        };
        let provider = match self.router.route(&self.registry, &routing) {
            Ok(provider) => provider,
            Err(e) => {
                guard.release();
                return Err(e);
            }
        };
        guard.advance(RequestState::Routed);

        let Some(adapter) = self.adapters.get(&provider.id) else {
            guard.release();
            return Err(GatewayError::Provider {
                source: ProviderError::NotConfigured(provider.id.clone()),
                provider_id: provider.id,
            });
        };
        guard.advance(RequestState::Dispatched);

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.invoke_timeout, adapter.invoke(prompt)).await;
        let completion = match outcome {
            Ok(Ok(completion)) => completion,
            Ok(Err(source)) => {
                self.metrics
                    .record_provider_call(&provider.id, false, started.elapsed());
                guard.release();
                tracing::warn!(provider_id = %provider.id, "Provider call failed: {source}");
                return Err(GatewayError::Provider {
                    provider_id: provider.id,
                    source,
                });
            }
            Err(_) => {
                self.metrics
                    .record_provider_call(&provider.id, false, started.elapsed());
                guard.release();
                let after_ms = u64::try_from(self.invoke_timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(provider_id = %provider.id, after_ms, "Provider call timed out");
                return Err(GatewayError::Provider {
                    provider_id: provider.id,
                    source: ProviderError::Timeout { after_ms },
                });
            }
        };
        self.metrics
            .record_provider_call(&provider.id, true, started.elapsed());

        let record = guard.commit(completion.output_units, &provider)?;
        self.metrics.record_units(record.units);

        let quota = self.ledger.snapshot_for(&account);
        tracing::info!(
            account_id = %account.id,
            provider_id = %provider.id,
            units = record.units,
            remaining = quota.remaining,
            "Request completed"
        );

        Ok(DispatchResponse {
            provider_id: provider.id,
            response: completion.payload,
            cost_units: record.units,
            cost: record.cost,
            overage: record.overage,
            remaining_units: quota.remaining,
            quota_percentage: quota.percent_used(),
            record_id: record.id,
        })
    }
}
