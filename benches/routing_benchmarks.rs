//! Benchmarks for provider selection and quota reservation.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use instaclaw::accounts::{AccountStore, Tier};
use instaclaw::billing::{BillingSink, QuotaLedger, TracingSink, UsageLog};
use instaclaw::config::{QuotaConfig, RoutingConfig};
use instaclaw::providers::{HealthStatus, Provider, ProviderRegistry};
use instaclaw::routing::{Preference, Router, RoutingRequest};
use std::hint::black_box;
use std::sync::Arc;

fn providers(count: usize) -> Vec<Provider> {
    (0..count)
        .map(|i| {
            let health = match i % 7 {
                0 => HealthStatus::Degraded,
                3 => HealthStatus::Unavailable,
                _ => HealthStatus::Healthy,
            };
            Provider::new(
                format!("provider-{i}"),
                1.0 + (i % 13) as f64 * 0.25,
                0.5 + (i % 5) as f64 * 0.1,
            )
            .with_capabilities(["chat"])
            .with_health(health)
        })
        .collect()
}

fn bench_select(c: &mut Criterion) {
    let router = Router::new(RoutingConfig::default());
    let mut group = c.benchmark_group("router_select");

    for count in [4, 16, 64, 256] {
        let candidates = providers(count);
        group.throughput(Throughput::Elements(count as u64));
        for preference in [Preference::Cost, Preference::Quality] {
            group.bench_with_input(
                BenchmarkId::new(format!("{preference:?}"), count),
                &candidates,
                |b, candidates| {
                    b.iter(|| router.select(black_box(candidates), black_box(preference)));
                },
            );
        }
    }
    group.finish();
}

fn bench_route(c: &mut Criterion) {
    let router = Router::new(RoutingConfig::default());
    let registry = ProviderRegistry::new(providers(32));
    let request = RoutingRequest {
        account_id: "bench".into(),
        prompt: "hello".into(),
        capabilities: vec!["chat".into()],
        ..RoutingRequest::default()
    };

    c.bench_function("router_route_32", |b| {
        b.iter(|| router.route(black_box(&registry), black_box(&request)));
    });
}

fn bench_reserve_release(c: &mut Criterion) {
    let tmp = tempfile::TempDir::new().unwrap();
    let accounts = Arc::new(AccountStore::open(&tmp.path().join("accounts.db")).unwrap());
    let usage = Arc::new(UsageLog::open(&tmp.path().join("usage.db")).unwrap());
    let quota = QuotaConfig::default();
    let ledger = QuotaLedger::new(
        accounts.clone(),
        usage,
        Arc::new(TracingSink) as Arc<dyn BillingSink>,
        quota.tiers.clone(),
        quota.period_days,
    );
    let account = accounts.create(Tier::Pro, 1_000_000, 30).unwrap().account;

    c.bench_function("ledger_reserve_release", |b| {
        b.iter(|| {
            let token = ledger.reserve(black_box(&account), 100).unwrap();
            ledger.release(token).unwrap();
        });
    });
}

criterion_group!(benches, bench_select, bench_route, bench_reserve_release);
criterion_main!(benches);
