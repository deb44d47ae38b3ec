//! SQLite-backed account store.
//!
//! Table `accounts`: id, api_key_hash, api_key_prefix, tier, allowance,
//! consumed, period bounds, active flag. API keys are returned once at
//! creation and only their SHA-256 hash is persisted.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Prefix of every issued API key.
pub const API_KEY_PREFIX: &str = "sk_";

/// Number of key characters kept for display (`sk_1a2b3c4d`).
const DISPLAY_PREFIX_LEN: usize = 11;

/// Billing tier of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            other => bail!("Unknown tier '{other}' (expected free, pro or enterprise)"),
        }
    }
}

/// A gateway account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    /// First characters of the API key, for display only.
    pub api_key_prefix: String,
    pub tier: Tier,
    /// Units granted for the current billing period.
    pub allowance: u64,
    /// Units committed in the current billing period.
    pub consumed: u64,
    /// Current period bounds (epoch seconds).
    pub period_start: i64,
    pub period_end: i64,
    pub active: bool,
    pub created_at: i64,
}

/// A freshly created account together with its plaintext API key.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub account: Account,
    /// Shown once; only the hash is stored.
    pub api_key: String,
}

/// SQLite-backed account store.
pub struct AccountStore {
    conn: Mutex<Connection>,
}

impl AccountStore {
    /// Open (or create) the account database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open account database {}", db_path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                api_key_hash TEXT NOT NULL UNIQUE,
                api_key_prefix TEXT NOT NULL,
                tier TEXT NOT NULL,
                allowance_units INTEGER NOT NULL,
                consumed_units INTEGER NOT NULL DEFAULT 0,
                period_start INTEGER NOT NULL,
                period_end INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_accounts_tier ON accounts(tier);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an account and issue its API key.
    pub fn create(&self, tier: Tier, allowance: u64, period_days: u32) -> Result<NewAccount> {
        let id = uuid::Uuid::new_v4().to_string();
        let api_key = generate_api_key();
        let now = Utc::now().timestamp();
        let period_end = now + i64::from(period_days) * 86_400;

        let account = Account {
            id: id.clone(),
            api_key_prefix: api_key.chars().take(DISPLAY_PREFIX_LEN).collect(),
            tier,
            allowance,
            consumed: 0,
            period_start: now,
            period_end,
            active: true,
            created_at: now,
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO accounts (id, api_key_hash, api_key_prefix, tier, allowance_units,
                                   consumed_units, period_start, period_end, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, 1, ?8, ?8)",
            params![
                account.id,
                hash_api_key(&api_key),
                account.api_key_prefix,
                tier.as_str(),
                to_sql_units(allowance),
                account.period_start,
                account.period_end,
                now,
            ],
        )?;

        tracing::info!(account_id = %account.id, tier = %tier, allowance, "Account created");
        Ok(NewAccount { account, api_key })
    }

    /// Resolve an API key to its account. Unknown and deactivated keys yield `None`.
    pub fn authenticate(&self, api_key: &str) -> Result<Option<Account>> {
        let api_key = api_key.trim();
        if !api_key.starts_with(API_KEY_PREFIX) {
            return Ok(None);
        }

        let conn = self.conn.lock();
        let account = conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE api_key_hash = ?1"),
                params![hash_api_key(api_key)],
                row_to_account,
            )
            .optional()?;

        Ok(account.filter(|a| a.active))
    }

    /// Look up an account by ID.
    pub fn get(&self, account_id: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock();
        let account = conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
                params![account_id],
                row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    /// All accounts, newest first.
    pub fn list(&self) -> Result<Vec<Account>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at DESC, id"
        ))?;
        let accounts = stmt
            .query_map([], row_to_account)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    /// Deactivate an account. Accounts are never deleted.
    pub fn deactivate(&self, account_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE accounts SET active = 0, updated_at = ?2 WHERE id = ?1",
            params![account_id, Utc::now().timestamp()],
        )?;
        if changed > 0 {
            tracing::info!(account_id, "Account deactivated");
        }
        Ok(changed > 0)
    }

    /// Move an account to another tier with the tier's allowance.
    pub fn set_tier(&self, account_id: &str, tier: Tier, allowance: u64) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE accounts SET tier = ?2, allowance_units = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                account_id,
                tier.as_str(),
                to_sql_units(allowance),
                Utc::now().timestamp()
            ],
        )?;
        if changed > 0 {
            tracing::info!(account_id, tier = %tier, allowance, "Account tier changed");
        }
        Ok(changed > 0)
    }

    /// Persist the quota counters owned by the ledger.
    pub fn save_counters(
        &self,
        account_id: &str,
        consumed: u64,
        period_start: i64,
        period_end: i64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE accounts SET consumed_units = ?2, period_start = ?3, period_end = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                account_id,
                to_sql_units(consumed),
                period_start,
                period_end,
                Utc::now().timestamp()
            ],
        )?;
        if changed == 0 {
            bail!("Account '{account_id}' not found");
        }
        Ok(())
    }
}

const ACCOUNT_COLUMNS: &str = "id, api_key_prefix, tier, allowance_units, consumed_units, \
                               period_start, period_end, active, created_at";

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    let tier: String = row.get(2)?;
    let tier = tier.parse::<Tier>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;
    let allowance: i64 = row.get(3)?;
    let consumed: i64 = row.get(4)?;
    Ok(Account {
        id: row.get(0)?,
        api_key_prefix: row.get(1)?,
        tier,
        allowance: from_sql_units(allowance),
        consumed: from_sql_units(consumed),
        period_start: row.get(5)?,
        period_end: row.get(6)?,
        active: row.get::<_, i64>(7)? != 0,
        created_at: row.get(8)?,
    })
}

/// SQLite integers are signed; unit counts saturate at `i64::MAX`.
pub(crate) fn to_sql_units(units: u64) -> i64 {
    i64::try_from(units).unwrap_or(i64::MAX)
}

pub(crate) fn from_sql_units(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Generate a new API key: `sk_` followed by 64 hex characters.
fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    bytes[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    bytes[16..].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    format!("{API_KEY_PREFIX}{}", hex::encode(bytes))
}

/// SHA-256 of the API key, hex-encoded.
fn hash_api_key(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

// ── Tests ───────────────────────────────────────────────────────────
