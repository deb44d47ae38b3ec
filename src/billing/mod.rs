//! Quota accounting and usage billing.
//!
//! ## Design
//! - Per-account two-phase reservations in memory (`ledger`)
//! - SQLite append-only usage log, one record per committed request (`tracker`)
//! - Finalized records handed to the billing collaborator exactly once (`sink`)
//! - Consumption written through to the account store after every commit

pub mod ledger;
pub mod sink;
pub mod tracker;

pub use ledger::{LedgerStats, QuotaLedger, QuotaSnapshot, ReservationToken};
pub use sink::{spawn_forwarder, BillingSink, ChannelSink, TracingSink};
pub use tracker::{DailyUsage, ProviderUsage, UsageLog, UsageRecord, UsageSummary};
