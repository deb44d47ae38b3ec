//! Quota ledger.
//!
//! Tracks per-account consumption against the billing-period allowance
//! with two-phase reservations:
//!
//! 1. [`QuotaLedger::reserve`] provisionally deducts the estimated units so
//!    concurrent requests cannot jointly overshoot the allowance.
//! 2. [`QuotaLedger::commit`] settles the reservation with the units the
//!    provider actually reported and writes the usage record, or
//!    [`QuotaLedger::release`] hands the capacity back.
//!
//! Each account has its own lock; accounts never contend with each other.
//! Reservation tokens are move-only, so a token settles exactly once.

use super::sink::BillingSink;
use super::tracker::{UsageLog, UsageRecord};
use crate::accounts::{Account, AccountStore, Tier};
use crate::config::TierPolicies;
use crate::error::{GatewayError, Result};
use crate::providers::Provider;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

const SECS_PER_DAY: i64 = 86_400;

/// Proof of a provisional deduction. Consumed by `commit` or `release`.
#[derive(Debug)]
pub struct ReservationToken {
    id: Uuid,
    account_id: String,
    units: u64,
    overage: bool,
}

impl ReservationToken {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Estimated units held by this reservation.
    pub fn units(&self) -> u64 {
        self.units
    }

    /// Whether the reservation went beyond the allowance on an overage tier.
    pub fn is_overage(&self) -> bool {
        self.overage
    }
}

/// Point-in-time view of an account's quota.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaSnapshot {
    pub account_id: String,
    pub tier: Tier,
    pub allowance: u64,
    pub consumed: u64,
    pub reserved: u64,
    /// `allowance - consumed - reserved`, floored at zero.
    pub remaining: u64,
    pub period_end: i64,
}

impl QuotaSnapshot {
    /// Share of the allowance consumed, in percent.
    pub fn percent_used(&self) -> f64 {
        if self.allowance == 0 {
            return 100.0;
        }
        (self.consumed as f64 / self.allowance as f64) * 100.0
    }
}

/// Lifetime reservation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub reserved: u64,
    pub committed: u64,
    pub released: u64,
}

impl LedgerStats {
    /// Reservations neither committed nor released yet.
    pub fn outstanding(&self) -> u64 {
        self.reserved
            .saturating_sub(self.committed)
            .saturating_sub(self.released)
    }
}

#[derive(Debug, Clone, Copy)]
struct Reservation {
    units: u64,
    overage: bool,
}

#[derive(Debug)]
struct AccountQuota {
    tier: Tier,
    allowance: u64,
    consumed: u64,
    reserved: u64,
    active: bool,
    period_start: i64,
    period_end: i64,
    reservations: HashMap<Uuid, Reservation>,
}

impl AccountQuota {
    fn from_account(account: &Account) -> Self {
        Self {
            tier: account.tier,
            allowance: account.allowance,
            consumed: account.consumed,
            reserved: 0,
            active: account.active,
            period_start: account.period_start,
            period_end: account.period_end,
            reservations: HashMap::new(),
        }
    }

    /// Tier, allowance and status come from the account store; consumption
    /// is owned here.
    fn refresh(&mut self, account: &Account) {
        self.tier = account.tier;
        self.allowance = account.allowance;
        self.active = account.active;
    }

    fn committed_and_held(&self) -> u64 {
        self.consumed.saturating_add(self.reserved)
    }

    fn remaining(&self) -> u64 {
        self.allowance.saturating_sub(self.committed_and_held())
    }
}

#[derive(Debug, Default)]
struct Counters {
    reserved: AtomicU64,
    committed: AtomicU64,
    released: AtomicU64,
}

pub struct QuotaLedger {
    accounts: RwLock<HashMap<String, Arc<Mutex<AccountQuota>>>>,
    policies: TierPolicies,
    period_secs: i64,
    store: Arc<AccountStore>,
    usage: Arc<UsageLog>,
    sink: Arc<dyn BillingSink>,
    counters: Counters,
}

impl QuotaLedger {
    pub fn new(
        store: Arc<AccountStore>,
        usage: Arc<UsageLog>,
        sink: Arc<dyn BillingSink>,
        policies: TierPolicies,
        period_days: u32,
    ) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            policies,
            period_secs: i64::from(period_days.max(1)) * SECS_PER_DAY,
            store,
            usage,
            sink,
            counters: Counters::default(),
        }
    }

    fn cell(&self, account: &Account) -> Arc<Mutex<AccountQuota>> {
        if let Some(cell) = self.accounts.read().get(&account.id) {
            return Arc::clone(cell);
        }
        let mut accounts = self.accounts.write();
        Arc::clone(
            accounts
                .entry(account.id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(AccountQuota::from_account(account)))),
        )
    }

    fn existing_cell(&self, account_id: &str) -> Option<Arc<Mutex<AccountQuota>>> {
        self.accounts.read().get(account_id).cloned()
    }

    /// Start a new billing period when the current one has ended.
    fn roll_period_if_due(&self, account_id: &str, quota: &mut AccountQuota) {
        let now = Utc::now().timestamp();
        if now < quota.period_end {
            return;
        }

        let previous = quota.consumed;
        quota.consumed = 0;
        quota.period_start = now;
        quota.period_end = now + self.period_secs;

        tracing::info!(
            account_id,
            previous_consumed = previous,
            period_end = quota.period_end,
            "Billing period rolled over"
        );
        if let Err(e) =
            self.store
                .save_counters(account_id, 0, quota.period_start, quota.period_end)
        {
            tracing::warn!(account_id, "Failed to persist period rollover: {e:#}");
        }
    }

    /// Provisionally deduct `estimated_units` from the account.
    ///
    /// `account` is the record just loaded from the account store; its tier,
    /// allowance and status take effect immediately.
    pub fn reserve(&self, account: &Account, estimated_units: u64) -> Result<ReservationToken> {
        let cell = self.cell(account);
        let mut quota = cell.lock();
        quota.refresh(account);

        if !quota.active {
            return Err(GatewayError::AuthenticationFailure);
        }
        self.roll_period_if_due(&account.id, &mut quota);

        let policy = self.policies.get(quota.tier);
        let projected = quota.committed_and_held().saturating_add(estimated_units);
        let overage = projected > quota.allowance;

        if overage && !policy.overage_allowed {
            tracing::debug!(
                account_id = %account.id,
                requested = estimated_units,
                consumed = quota.consumed,
                reserved = quota.reserved,
                allowance = quota.allowance,
                "Reservation rejected"
            );
            return Err(GatewayError::QuotaExceeded {
                account_id: account.id.clone(),
                requested: estimated_units,
                remaining: quota.remaining(),
            });
        }

        let id = Uuid::new_v4();
        quota.reserved = quota.reserved.saturating_add(estimated_units);
        quota.reservations.insert(
            id,
            Reservation {
                units: estimated_units,
                overage,
            },
        );
        self.counters.reserved.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            account_id = %account.id,
            reservation_id = %id,
            units = estimated_units,
            overage,
            "Quota reserved"
        );

        Ok(ReservationToken {
            id,
            account_id: account.id.clone(),
            units: estimated_units,
            overage,
        })
    }

    /// Settle a reservation with the units `provider` actually consumed.
    ///
    /// On tiers without overage the charge is capped at
    /// `allowance + grace_units`. If the usage record cannot be written the
    /// reservation is released instead and nothing is charged.
    pub fn commit(
        &self,
        token: ReservationToken,
        actual_units: u64,
        provider: &Provider,
    ) -> Result<UsageRecord> {
        let cell = self
            .existing_cell(&token.account_id)
            .ok_or(GatewayError::UnknownReservation(token.id))?;
        let mut quota = cell.lock();
        let reservation = quota
            .reservations
            .remove(&token.id)
            .ok_or(GatewayError::UnknownReservation(token.id))?;
        quota.reserved = quota.reserved.saturating_sub(reservation.units);

        self.roll_period_if_due(&token.account_id, &mut quota);
        let policy = self.policies.get(quota.tier);

        let units = if policy.overage_allowed {
            actual_units
        } else {
            let ceiling = quota.allowance.saturating_add(policy.grace_units);
            let headroom = ceiling.saturating_sub(quota.committed_and_held());
            actual_units.min(headroom)
        };
        if units < actual_units {
            tracing::warn!(
                account_id = %token.account_id,
                reported = actual_units,
                charged = units,
                "Reported usage capped at allowance plus grace"
            );
        }

        let overage_units = if policy.overage_allowed {
            quota
                .consumed
                .saturating_add(units)
                .saturating_sub(quota.allowance)
                .min(units)
        } else {
            0
        };
        let cost =
            units as f64 * provider.cost_per_unit + overage_units as f64 * policy.overage_rate;

        let record = UsageRecord {
            id: Uuid::new_v4(),
            reservation_id: token.id,
            account_id: token.account_id.clone(),
            provider_id: provider.id.clone(),
            timestamp: Utc::now(),
            units,
            reported_units: actual_units,
            overage_units,
            overage: overage_units > 0,
            cost,
        };

        if let Err(e) = self.usage.append(&record) {
            self.counters.released.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                account_id = %token.account_id,
                reservation_id = %token.id,
                "Usage record not written, reservation released: {e:#}"
            );
            return Err(GatewayError::Storage(
                e.context("usage record not written; reservation released"),
            ));
        }

        quota.consumed = quota.consumed.saturating_add(units);
        if let Err(e) = self.store.save_counters(
            &token.account_id,
            quota.consumed,
            quota.period_start,
            quota.period_end,
        ) {
            tracing::warn!(account_id = %token.account_id, "Failed to persist consumption: {e:#}");
        }
        self.counters.committed.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            account_id = %token.account_id,
            reservation_id = %token.id,
            provider_id = %provider.id,
            estimated = reservation.units,
            reserved_as_overage = reservation.overage,
            units,
            overage_units,
            consumed = quota.consumed,
            "Quota committed"
        );
        drop(quota);

        self.sink.emit(&record);
        Ok(record)
    }

    /// Return a reservation's capacity to the account without charging.
    pub fn release(&self, token: ReservationToken) -> Result<()> {
        let cell = self
            .existing_cell(&token.account_id)
            .ok_or(GatewayError::UnknownReservation(token.id))?;
        let mut quota = cell.lock();
        let reservation = quota
            .reservations
            .remove(&token.id)
            .ok_or(GatewayError::UnknownReservation(token.id))?;
        quota.reserved = quota.reserved.saturating_sub(reservation.units);
        self.counters.released.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            account_id = %token.account_id,
            reservation_id = %token.id,
            units = reservation.units,
            "Quota released"
        );
        Ok(())
    }

    /// Current quota of an account the ledger has seen.
    pub fn snapshot(&self, account_id: &str) -> Option<QuotaSnapshot> {
        let cell = self.existing_cell(account_id)?;
        let quota = cell.lock();
        Some(QuotaSnapshot {
            account_id: account_id.to_string(),
            tier: quota.tier,
            allowance: quota.allowance,
            consumed: quota.consumed,
            reserved: quota.reserved,
            remaining: quota.remaining(),
            period_end: quota.period_end,
        })
    }

    /// Quota of an account, falling back to the stored counters when the
    /// ledger has not served it yet.
    pub fn snapshot_for(&self, account: &Account) -> QuotaSnapshot {
        self.snapshot(&account.id).unwrap_or_else(|| QuotaSnapshot {
            account_id: account.id.clone(),
            tier: account.tier,
            allowance: account.allowance,
            consumed: account.consumed,
            reserved: 0,
            remaining: account.allowance.saturating_sub(account.consumed),
            period_end: account.period_end,
        })
    }

    /// Outstanding reservations for an account.
    pub fn outstanding(&self, account_id: &str) -> usize {
        self.existing_cell(account_id)
            .map_or(0, |cell| cell.lock().reservations.len())
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            reserved: self.counters.reserved.load(Ordering::Relaxed),
            committed: self.counters.committed.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
        }
    }

    pub fn usage_log(&self) -> &UsageLog {
        &self.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierPolicy;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<UsageRecord>>,
    }

    impl BillingSink for RecordingSink {
        fn emit(&self, record: &UsageRecord) {
            self.records.lock().push(record.clone());
        }
    }

    struct Fixture {
        _tmp: TempDir,
        store: Arc<AccountStore>,
        sink: Arc<RecordingSink>,
        ledger: QuotaLedger,
    }

    fn policies() -> TierPolicies {
        TierPolicies {
            free: TierPolicy {
                allowance_units: 1_000,
                overage_allowed: false,
                overage_rate: 0.0,
                grace_units: 0,
                requests_per_hour: 0,
            },
            pro: TierPolicy {
                allowance_units: 1_000,
                overage_allowed: true,
                overage_rate: 0.5,
                grace_units: 0,
                requests_per_hour: 0,
            },
            enterprise: TierPolicy {
                allowance_units: 1_000,
                overage_allowed: false,
                overage_rate: 0.0,
                grace_units: 50,
                requests_per_hour: 0,
            },
        }
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(AccountStore::open(&tmp.path().join("accounts.db")).unwrap());
        let usage = Arc::new(UsageLog::open(&tmp.path().join("usage.db")).unwrap());
        let sink = Arc::new(RecordingSink::default());
        let ledger = QuotaLedger::new(
            store.clone(),
            usage,
            sink.clone() as Arc<dyn BillingSink>,
            policies(),
            30,
        );
        Fixture {
            _tmp: tmp,
            store,
            sink,
            ledger,
        }
    }

    fn account(fx: &Fixture, tier: Tier, consumed: u64) -> Account {
        let created = fx.store.create(tier, 1_000, 30).unwrap().account;
        if consumed > 0 {
            fx.store
                .save_counters(&created.id, consumed, created.period_start, created.period_end)
                .unwrap();
        }
        fx.store.get(&created.id).unwrap().unwrap()
    }

    fn provider(cost: f64) -> Provider {
        Provider::new("p", cost, 1.0)
    }

    #[test]
    fn reserve_over_allowance_fails_without_side_effects() {
        let fx = fixture();
        let acct = account(&fx, Tier::Free, 950);

        let err = fx.ledger.reserve(&acct, 100).unwrap_err();
        match err {
            GatewayError::QuotaExceeded {
                requested,
                remaining,
                ..
            } => {
                assert_eq!(requested, 100);
                assert_eq!(remaining, 50);
            }
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }

        let snap = fx.ledger.snapshot(&acct.id).unwrap();
        assert_eq!(snap.consumed, 950);
        assert_eq!(snap.reserved, 0);
        assert_eq!(fx.ledger.stats(), LedgerStats::default());
    }

    #[test]
    fn reserve_exactly_to_allowance_succeeds() {
        let fx = fixture();
        let acct = account(&fx, Tier::Free, 950);
        let token = fx.ledger.reserve(&acct, 50).unwrap();
        assert!(!token.is_overage());
        assert_eq!(fx.ledger.snapshot(&acct.id).unwrap().remaining, 0);
    }

    #[test]
    fn reservations_count_against_capacity() {
        let fx = fixture();
        let acct = account(&fx, Tier::Free, 0);

        let _first = fx.ledger.reserve(&acct, 600).unwrap();
        assert!(matches!(
            fx.ledger.reserve(&acct, 600),
            Err(GatewayError::QuotaExceeded { remaining: 400, .. })
        ));
    }

    #[test]
    fn commit_reconciles_estimate_with_actual() {
        let fx = fixture();
        let acct = account(&fx, Tier::Free, 100);

        let token = fx.ledger.reserve(&acct, 300).unwrap();
        let reservation_id = token.id();
        let record = fx.ledger.commit(token, 120, &provider(0.01)).unwrap();

        assert_eq!(record.reservation_id, reservation_id);
        assert_eq!(record.units, 120);
        assert!((record.cost - 1.2).abs() < 1e-9);
        assert!(!record.overage);

        let snap = fx.ledger.snapshot(&acct.id).unwrap();
        assert_eq!(snap.consumed, 220);
        assert_eq!(snap.reserved, 0);

        // Written through to the account store and emitted once.
        assert_eq!(fx.store.get(&acct.id).unwrap().unwrap().consumed, 220);
        assert_eq!(fx.sink.records.lock().len(), 1);
        assert_eq!(fx.ledger.usage_log().recent(&acct.id, 10).unwrap().len(), 1);
    }

    #[test]
    fn release_restores_capacity() {
        let fx = fixture();
        let acct = account(&fx, Tier::Free, 0);

        let token = fx.ledger.reserve(&acct, 800).unwrap();
        fx.ledger.release(token).unwrap();

        let snap = fx.ledger.snapshot(&acct.id).unwrap();
        assert_eq!(snap.reserved, 0);
        assert_eq!(snap.consumed, 0);
        assert!(fx.sink.records.lock().is_empty());
        assert_eq!(fx.ledger.stats().released, 1);
        assert_eq!(fx.ledger.stats().outstanding(), 0);
    }

    #[test]
    fn forged_token_is_rejected() {
        let fx = fixture();
        let acct = account(&fx, Tier::Free, 0);
        let _real = fx.ledger.reserve(&acct, 10).unwrap();

        let forged = ReservationToken {
            id: Uuid::new_v4(),
            account_id: acct.id.clone(),
            units: 10,
            overage: false,
        };
        assert!(matches!(
            fx.ledger.release(forged),
            Err(GatewayError::UnknownReservation(_))
        ));
        assert_eq!(fx.ledger.outstanding(&acct.id), 1);
    }

    #[test]
    fn overage_tier_reserves_beyond_allowance() {
        let fx = fixture();
        let acct = account(&fx, Tier::Pro, 950);

        let token = fx.ledger.reserve(&acct, 100).unwrap();
        assert!(token.is_overage());

        let record = fx.ledger.commit(token, 100, &provider(0.01)).unwrap();
        assert!(record.overage);
        assert_eq!(record.units, 100);
        assert_eq!(record.overage_units, 50);
        // 100 * 0.01 provider cost + 50 * 0.5 overage.
        assert!((record.cost - 26.0).abs() < 1e-9);
        assert_eq!(fx.ledger.snapshot(&acct.id).unwrap().consumed, 1_050);
    }

    #[test]
    fn overage_reservation_settled_within_allowance_is_not_overage() {
        let fx = fixture();
        let acct = account(&fx, Tier::Pro, 900);

        let token = fx.ledger.reserve(&acct, 200).unwrap();
        assert!(token.is_overage());

        let record = fx.ledger.commit(token, 10, &provider(1.0)).unwrap();
        assert!(!record.overage);
        assert_eq!(record.overage_units, 0);
        assert!((record.cost - 10.0).abs() < 1e-9);
        assert_eq!(fx.ledger.snapshot(&acct.id).unwrap().consumed, 910);

        let emitted = fx.sink.records.lock();
        assert_eq!(emitted.len(), 1);
        assert!(!emitted[0].overage);
    }

    #[test]
    fn failed_usage_append_releases_without_charge() {
        let fx = fixture();
        let acct = account(&fx, Tier::Free, 100);
        let token = fx.ledger.reserve(&acct, 50).unwrap();

        // A record already holding this reservation id makes the append fail.
        fx.ledger
            .usage_log()
            .append(&UsageRecord {
                id: Uuid::new_v4(),
                reservation_id: token.id(),
                account_id: acct.id.clone(),
                provider_id: "p".into(),
                timestamp: Utc::now(),
                units: 1,
                reported_units: 1,
                overage_units: 0,
                overage: false,
                cost: 0.0,
            })
            .unwrap();

        let err = fx.ledger.commit(token, 20, &provider(1.0)).unwrap_err();
        assert!(matches!(err, GatewayError::Storage(_)), "got {err:?}");

        let snap = fx.ledger.snapshot(&acct.id).unwrap();
        assert_eq!(snap.consumed, 100);
        assert_eq!(snap.reserved, 0);
        assert_eq!(fx.ledger.outstanding(&acct.id), 0);

        let stats = fx.ledger.stats();
        assert_eq!((stats.reserved, stats.committed, stats.released), (1, 0, 1));
        assert!(fx.sink.records.lock().is_empty());
        assert_eq!(fx.store.get(&acct.id).unwrap().unwrap().consumed, 100);
    }

    #[test]
    fn non_overage_commit_is_capped_at_grace() {
        let fx = fixture();
        // Enterprise in this fixture: no overage, 50 grace units.
        let acct = account(&fx, Tier::Enterprise, 900);

        let token = fx.ledger.reserve(&acct, 100).unwrap();
        let record = fx.ledger.commit(token, 400, &provider(1.0)).unwrap();

        assert_eq!(record.reported_units, 400);
        assert_eq!(record.units, 150);
        assert_eq!(record.overage_units, 0);
        assert_eq!(fx.ledger.snapshot(&acct.id).unwrap().consumed, 1_050);
    }

    #[test]
    fn inactive_account_cannot_reserve() {
        let fx = fixture();
        let mut acct = account(&fx, Tier::Free, 0);
        acct.active = false;
        assert!(matches!(
            fx.ledger.reserve(&acct, 1),
            Err(GatewayError::AuthenticationFailure)
        ));
    }

    #[test]
    fn tier_change_applies_on_next_reserve() {
        let fx = fixture();
        let mut acct = account(&fx, Tier::Free, 990);
        assert!(fx.ledger.reserve(&acct, 20).is_err());

        acct.tier = Tier::Pro;
        let token = fx.ledger.reserve(&acct, 20).unwrap();
        assert!(token.is_overage());
    }

    #[test]
    fn expired_period_rolls_over() {
        let fx = fixture();
        let acct = account(&fx, Tier::Free, 1_000);
        assert!(fx.ledger.reserve(&acct, 1).is_err());

        {
            let cell = fx.ledger.existing_cell(&acct.id).unwrap();
            cell.lock().period_end = Utc::now().timestamp() - 1;
        }

        let token = fx.ledger.reserve(&acct, 10).unwrap();
        let snap = fx.ledger.snapshot(&acct.id).unwrap();
        assert_eq!(snap.consumed, 0);
        assert!(snap.period_end > Utc::now().timestamp() + 29 * SECS_PER_DAY);
        assert_eq!(fx.store.get(&acct.id).unwrap().unwrap().consumed, 0);
        fx.ledger.release(token).unwrap();
    }

    #[test]
    fn snapshot_for_unseen_account_uses_store_counters() {
        let fx = fixture();
        let acct = account(&fx, Tier::Free, 250);
        assert!(fx.ledger.snapshot(&acct.id).is_none());
        let snap = fx.ledger.snapshot_for(&acct);
        assert_eq!(snap.consumed, 250);
        assert_eq!(snap.remaining, 750);
        assert!((snap.percent_used() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn concurrent_bursts_never_overshoot_allowance() {
        let fx = fixture();
        let acct = account(&fx, Tier::Free, 0);
        let granted = AtomicU64::new(0);
        let rejected = AtomicU64::new(0);

        std::thread::scope(|scope| {
            for worker in 0..16u64 {
                let (ledger, acct, granted, rejected) = (&fx.ledger, &acct, &granted, &rejected);
                scope.spawn(move || {
                    for i in 0..40u64 {
                        let estimate = 5 + (worker + i) % 11;
                        match ledger.reserve(acct, estimate) {
                            Ok(token) => {
                                granted.fetch_add(1, Ordering::Relaxed);
                                // Providers sometimes report more than estimated.
                                let actual = estimate + (i % 3);
                                if i % 4 == 0 {
                                    ledger.release(token).unwrap();
                                } else {
                                    ledger.commit(token, actual, &provider(0.0)).unwrap();
                                }
                            }
                            Err(GatewayError::QuotaExceeded { .. }) => {
                                rejected.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(other) => panic!("unexpected error: {other}"),
                        }
                    }
                });
            }
        });

        let snap = fx.ledger.snapshot(&acct.id).unwrap();
        assert!(snap.consumed <= snap.allowance, "consumed {}", snap.consumed);
        assert_eq!(snap.reserved, 0);
        assert!(rejected.load(Ordering::Relaxed) > 0);

        let stats = fx.ledger.stats();
        assert_eq!(stats.reserved, granted.load(Ordering::Relaxed));
        assert_eq!(stats.committed + stats.released, stats.reserved);
        assert_eq!(stats.outstanding(), 0);
        assert_eq!(fx.sink.records.lock().len() as u64, stats.committed);
    }

    #[test]
    fn accounts_are_independent() {
        let fx = fixture();
        let a = account(&fx, Tier::Free, 1_000);
        let b = account(&fx, Tier::Free, 0);
        assert!(fx.ledger.reserve(&a, 1).is_err());
        let token = fx.ledger.reserve(&b, 1_000).unwrap();
        fx.ledger.commit(token, 1_000, &provider(0.0)).unwrap();
        assert_eq!(fx.ledger.snapshot(&a.id).unwrap().consumed, 1_000);
        assert_eq!(fx.ledger.snapshot(&b.id).unwrap().consumed, 1_000);
    }
}
