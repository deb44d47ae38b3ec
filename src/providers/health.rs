//! In-process health probe.
//!
//! Periodically asks each adapter for its health and pushes the result into
//! the registry. Routing never probes; it only reads what was pushed here or
//! through the admin endpoint.

use super::registry::ProviderRegistry;
use super::AdapterSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Probe every adapter once and record the results. Adapters without a
/// probe are skipped, so statuses pushed through the admin API stay in
/// place. Returns how many providers changed status.
pub async fn probe_once(registry: &ProviderRegistry, adapters: &AdapterSet) -> usize {
    let mut changed = 0;
    for (id, adapter) in adapters {
        let Some(status) = adapter.health_check().await else {
            continue;
        };
        let previous = registry.health(id);
        if registry.set_health(id, status) && previous != Some(status) {
            changed += 1;
        }
    }
    changed
}

pub fn spawn_probe(
    registry: Arc<ProviderRegistry>,
    adapters: Arc<AdapterSet>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let changed = probe_once(&registry, &adapters).await;
            tracing::debug!(changed, "Health probe finished");
        }
    })
}
