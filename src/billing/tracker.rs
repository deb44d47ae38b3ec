//! Append-only usage log.
//!
//! Every committed request produces one `UsageRecord` in a local SQLite
//! ledger. Records are keyed by their reservation, so a reservation can be
//! recorded at most once.

use crate::accounts::store::{from_sql_units, to_sql_units};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// A finalized usage entry. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    /// Reservation this record settles.
    pub reservation_id: Uuid,
    pub account_id: String,
    pub provider_id: String,
    pub timestamp: DateTime<Utc>,
    /// Units charged against the account.
    pub units: u64,
    /// Units the provider reported (may exceed `units` when capped).
    pub reported_units: u64,
    /// Part of `units` beyond the allowance, billed at the tier overage rate.
    pub overage_units: u64,
    /// Whether this request was billed under overage.
    pub overage: bool,
    /// Provider cost plus overage charge.
    pub cost: f64,
}

/// Aggregated usage for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_cost: f64,
    pub total_units: u64,
    pub overage_units: u64,
    pub request_count: u64,
    /// Breakdown by provider, most expensive first.
    pub by_provider: Vec<ProviderUsage>,
}

/// Per-provider usage breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub provider_id: String,
    pub cost: f64,
    pub units: u64,
    pub request_count: u64,
}

/// One day of usage (UTC).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyUsage {
    /// `YYYY-MM-DD`.
    pub date: String,
    pub request_count: u64,
    pub units: u64,
    pub cost: f64,
}

/// SQLite-backed usage log.
pub struct UsageLog {
    conn: Mutex<Connection>,
}

impl UsageLog {
    /// Open (or create) the usage database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open usage database {}", db_path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS usage_records (
                id TEXT PRIMARY KEY,
                reservation_id TEXT NOT NULL UNIQUE,
                account_id TEXT NOT NULL,
                provider_id TEXT NOT NULL,
                units INTEGER NOT NULL,
                reported_units INTEGER NOT NULL,
                overage_units INTEGER NOT NULL DEFAULT 0,
                overage INTEGER NOT NULL DEFAULT 0,
                cost REAL NOT NULL DEFAULT 0.0,
                timestamp_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_usage_account_ts ON usage_records(account_id, timestamp_ms);
            CREATE INDEX IF NOT EXISTS idx_usage_provider ON usage_records(provider_id);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append a record. Fails if its reservation was already recorded.
    pub fn append(&self, record: &UsageRecord) -> Result<()> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO usage_records (id, reservation_id, account_id, provider_id, units,
                                        reported_units, overage_units, overage, cost, timestamp_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id.to_string(),
                record.reservation_id.to_string(),
                record.account_id,
                record.provider_id,
                to_sql_units(record.units),
                to_sql_units(record.reported_units),
                to_sql_units(record.overage_units),
                record.overage,
                record.cost,
                record.timestamp.timestamp_millis(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                bail!(
                    "Usage for reservation {} is already recorded",
                    record.reservation_id
                )
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Usage summary for an account between two instants (inclusive).
    pub fn summary(
        &self,
        account_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<UsageSummary> {
        let conn = self.conn.lock();
        let (from_ms, to_ms) = (from.timestamp_millis(), to.timestamp_millis());

        let (total_cost, total_units, overage_units, count): (f64, i64, i64, i64) = conn
            .query_row(
                "SELECT COALESCE(SUM(cost), 0.0), COALESCE(SUM(units), 0),
                        COALESCE(SUM(overage_units), 0), COUNT(*)
                 FROM usage_records
                 WHERE account_id = ?1 AND timestamp_ms >= ?2 AND timestamp_ms <= ?3",
                params![account_id, from_ms, to_ms],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        let mut stmt = conn.prepare(
            "SELECT provider_id, COALESCE(SUM(cost), 0.0), COALESCE(SUM(units), 0), COUNT(*)
             FROM usage_records
             WHERE account_id = ?1 AND timestamp_ms >= ?2 AND timestamp_ms <= ?3
             GROUP BY provider_id ORDER BY SUM(cost) DESC, provider_id",
        )?;

        let by_provider = stmt
            .query_map(params![account_id, from_ms, to_ms], |row| {
                Ok(ProviderUsage {
                    provider_id: row.get(0)?,
                    cost: row.get(1)?,
                    units: from_sql_units(row.get(2)?),
                    request_count: from_sql_units(row.get(3)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(UsageSummary {
            total_cost,
            total_units: from_sql_units(total_units),
            overage_units: from_sql_units(overage_units),
            request_count: from_sql_units(count),
            by_provider,
        })
    }

    /// Per-day totals for the last `days` days, newest first.
    pub fn daily(&self, account_id: &str, days: u32) -> Result<Vec<DailyUsage>> {
        let since = Utc::now() - chrono::Duration::days(i64::from(days));
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT date(timestamp_ms / 1000, 'unixepoch') AS day, COUNT(*),
                    COALESCE(SUM(units), 0), COALESCE(SUM(cost), 0.0)
             FROM usage_records
             WHERE account_id = ?1 AND timestamp_ms >= ?2
             GROUP BY day ORDER BY day DESC",
        )?;

        let rows = stmt
            .query_map(params![account_id, since.timestamp_millis()], |row| {
                Ok(DailyUsage {
                    date: row.get(0)?,
                    request_count: from_sql_units(row.get(1)?),
                    units: from_sql_units(row.get(2)?),
                    cost: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Most recent records for an account.
    pub fn recent(&self, account_id: &str, limit: usize) -> Result<Vec<UsageRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, reservation_id, account_id, provider_id, units, reported_units,
                    overage_units, overage, cost, timestamp_ms
             FROM usage_records WHERE account_id = ?1
             ORDER BY timestamp_ms DESC, id LIMIT ?2",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![account_id, limit], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<UsageRecord> {
    let parse_uuid = |idx: usize, value: String| {
        Uuid::parse_str(&value).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
        })
    };
    let timestamp_ms: i64 = row.get(9)?;

    Ok(UsageRecord {
        id: parse_uuid(0, row.get(0)?)?,
        reservation_id: parse_uuid(1, row.get(1)?)?,
        account_id: row.get(2)?,
        provider_id: row.get(3)?,
        units: from_sql_units(row.get(4)?),
        reported_units: from_sql_units(row.get(5)?),
        overage_units: from_sql_units(row.get(6)?),
        overage: row.get(7)?,
        cost: row.get(8)?,
        timestamp: DateTime::<Utc>::from_timestamp_millis(timestamp_ms).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_log() -> (TempDir, UsageLog) {
        let tmp = TempDir::new().unwrap();
        let log = UsageLog::open(&tmp.path().join("usage.db")).unwrap();
        (tmp, log)
    }

    fn record(account: &str, provider: &str, units: u64, cost: f64) -> UsageRecord {
        UsageRecord {
            id: Uuid::new_v4(),
            reservation_id: Uuid::new_v4(),
            account_id: account.into(),
            provider_id: provider.into(),
            timestamp: Utc::now(),
            units,
            reported_units: units,
            overage_units: 0,
            overage: false,
            cost,
        }
    }

    #[test]
    fn append_and_summarize() {
        let (_tmp, log) = make_log();
        log.append(&record("acct", "openai", 100, 0.01)).unwrap();
        log.append(&record("acct", "anthropic", 200, 0.02)).unwrap();
        log.append(&record("other", "openai", 999, 9.0)).unwrap();

        let now = Utc::now();
        let summary = log
            .summary("acct", now - chrono::Duration::hours(1), now + chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(summary.request_count, 2);
        assert_eq!(summary.total_units, 300);
        assert!((summary.total_cost - 0.03).abs() < 1e-9);
        assert_eq!(summary.by_provider.len(), 2);
        assert_eq!(summary.by_provider[0].provider_id, "anthropic");
    }

    #[test]
    fn duplicate_reservation_is_rejected() {
        let (_tmp, log) = make_log();
        let first = record("acct", "openai", 10, 0.0);
        log.append(&first).unwrap();

        let mut replay = record("acct", "openai", 10, 0.0);
        replay.reservation_id = first.reservation_id;
        let err = log.append(&replay).unwrap_err();
        assert!(err.to_string().contains("already recorded"));

        let summary = log
            .summary("acct", Utc::now() - chrono::Duration::hours(1), Utc::now())
            .unwrap();
        assert_eq!(summary.request_count, 1);
    }

    #[test]
    fn recent_round_trips_records() {
        let (_tmp, log) = make_log();
        let mut rec = record("acct", "openai", 42, 0.5);
        rec.overage_units = 2;
        rec.overage = true;
        rec.reported_units = 50;
        log.append(&rec).unwrap();

        let recent = log.recent("acct", 10).unwrap();
        assert_eq!(recent.len(), 1);
        let loaded = &recent[0];
        assert_eq!(loaded.id, rec.id);
        assert_eq!(loaded.reservation_id, rec.reservation_id);
        assert_eq!(loaded.units, 42);
        assert_eq!(loaded.reported_units, 50);
        assert_eq!(loaded.overage_units, 2);
        assert!(loaded.overage);
        assert_eq!(
            loaded.timestamp.timestamp_millis(),
            rec.timestamp.timestamp_millis()
        );
    }

    #[test]
    fn daily_groups_by_day() {
        let (_tmp, log) = make_log();
        log.append(&record("acct", "openai", 10, 0.1)).unwrap();
        log.append(&record("acct", "openai", 15, 0.2)).unwrap();

        let mut old = record("acct", "openai", 7, 0.3);
        old.timestamp = Utc::now() - chrono::Duration::days(3);
        log.append(&old).unwrap();

        let days = log.daily("acct", 30).unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].request_count, 2);
        assert_eq!(days[0].units, 25);
        assert_eq!(days[1].units, 7);

        let last_day = log.daily("acct", 1).unwrap();
        assert_eq!(last_day.len(), 1);
    }

    #[test]
    fn empty_summary_is_zero() {
        let (_tmp, log) = make_log();
        let summary = log
            .summary("nobody", DateTime::<Utc>::from_timestamp(0, 0).unwrap(), Utc::now())
            .unwrap();
        assert_eq!(summary.request_count, 0);
        assert_eq!(summary.total_units, 0);
        assert!(summary.by_provider.is_empty());
    }
}
