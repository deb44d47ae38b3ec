//! Prometheus metrics for the gateway.

use crate::billing::LedgerStats;
use crate::providers::Provider;
use anyhow::{Context, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

pub struct GatewayMetrics {
    registry: Registry,

    /// Submitted requests by outcome (`committed` or an error kind).
    pub requests_total: IntCounterVec,
    /// Provider invocations by provider and result.
    pub provider_requests_total: IntCounterVec,
    pub provider_latency_seconds: HistogramVec,
    /// Units charged to accounts.
    pub units_committed_total: IntCounter,
    /// 2 healthy, 1 degraded, 0 unavailable.
    pub provider_health: IntGaugeVec,
    pub reservations_outstanding: IntGauge,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("instaclaw_requests_total", "Submitted requests by outcome"),
            &["outcome"],
        )
        .context("Failed to create metric")?;

        let provider_requests_total = IntCounterVec::new(
            Opts::new(
                "instaclaw_provider_requests_total",
                "Provider invocations by provider and result",
            ),
            &["provider", "result"],
        )
        .context("Failed to create metric")?;

        let provider_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "instaclaw_provider_latency_seconds",
                "Provider invocation latency in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["provider"],
        )
        .context("Failed to create metric")?;

        let units_committed_total = IntCounter::new(
            "instaclaw_units_committed_total",
            "Units charged to accounts",
        )
        .context("Failed to create metric")?;

        let provider_health = IntGaugeVec::new(
            Opts::new(
                "instaclaw_provider_health",
                "Provider health (2=healthy, 1=degraded, 0=unavailable)",
            ),
            &["provider"],
        )
        .context("Failed to create metric")?;

        let reservations_outstanding = IntGauge::new(
            "instaclaw_reservations_outstanding",
            "Quota reservations neither committed nor released",
        )
        .context("Failed to create metric")?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(provider_requests_total.clone()))?;
        registry.register(Box::new(provider_latency_seconds.clone()))?;
        registry.register(Box::new(units_committed_total.clone()))?;
        registry.register(Box::new(provider_health.clone()))?;
        registry.register(Box::new(reservations_outstanding.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            provider_requests_total,
            provider_latency_seconds,
            units_committed_total,
            provider_health,
            reservations_outstanding,
        })
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.requests_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_provider_call(&self, provider_id: &str, success: bool, elapsed: Duration) {
        let result = if success { "success" } else { "failure" };
        self.provider_requests_total
            .with_label_values(&[provider_id, result])
            .inc();
        self.provider_latency_seconds
            .with_label_values(&[provider_id])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_units(&self, units: u64) {
        self.units_committed_total.inc_by(units);
    }

    /// Refresh gauges from current state before a scrape.
    pub fn refresh(&self, providers: &[Provider], ledger: LedgerStats) {
        for provider in providers {
            self.provider_health
                .with_label_values(&[provider.id.as_str()])
                .set(provider.health.as_gauge());
        }
        self.reservations_outstanding
            .set(i64::try_from(ledger.outstanding()).unwrap_or(i64::MAX));
    }

    /// Text exposition format.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics output is not UTF-8")
    }
}
