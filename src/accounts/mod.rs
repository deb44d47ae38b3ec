//! Gateway accounts and API key authentication.
//!
//! Provides:
//! - Account creation with a tier-derived allowance and a one-time API key
//! - API key lookup by SHA-256 hash (the plaintext key is never stored)
//! - Deactivation (accounts are never deleted) and tier changes
//! - Persistence of the quota counters owned by the ledger

pub mod store;

pub use store::{Account, AccountStore, NewAccount, Tier, API_KEY_PREFIX};
