#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Rate set persistence in `DuckDB`.
//!
//! Each saved result set is one row in `rate_sets` plus one row per stratum
//! in `rate_records`, so persisted results can also be queried directly
//! with SQL. Writes happen inside a single transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use accident_risk_engine::EngineError;
use accident_risk_engine::cache::{CacheKey, RateStore};
use accident_risk_engine_models::{DimensionValue, RateRecord};
use duckdb::{Connection, params};

/// Errors that can occur in the rate store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `DuckDB` query or connection error.
    #[error("DuckDB error: {0}")]
    Db(#[from] duckdb::Error),

    /// A stored key could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (creating the database directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::Store {
            message: e.to_string(),
        }
    }
}

/// A [`RateStore`] backed by a `DuckDB` database file.
pub struct DuckDbStore {
    conn: Mutex<Connection>,
}

impl DuckDbStore {
    /// Opens (or creates) the store at `path`, creating parent directories
    /// as needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory, connection, or schema
    /// cannot be created.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        log::debug!("Opening rate store at {}", path.display());
        Self::with_connection(Connection::open(path)?)
    }

    /// Opens a store that lives only in memory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the connection or schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored result sets.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn set_count(&self) -> Result<u64, StoreError> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM rate_sets", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn load_records(
        conn: &Connection,
        key: &StoredKey,
    ) -> Result<Option<Vec<RateRecord>>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT strata FROM rate_sets
             WHERE version = ? AND dimensions = ? AND row_filter = ? AND basis = ?",
        )?;
        let mut rows = stmt.query(params![key.version, key.dimensions, key.filter, key.basis])?;
        if rows.next()?.is_none() {
            return Ok(None);
        }

        let mut stmt = conn.prepare(
            "SELECT stratum, incidents, exposure, rate, relative_risk, share,
                    avg_severity, severe_share, low_confidence
             FROM rate_records
             WHERE version = ? AND dimensions = ? AND row_filter = ? AND basis = ?
             ORDER BY ordinal",
        )?;
        let mut rows = stmt.query(params![key.version, key.dimensions, key.filter, key.basis])?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let stratum: String = row.get(0)?;
            records.push(RateRecord {
                key: serde_json::from_str::<Vec<DimensionValue>>(&stratum)?,
                count: row.get(1)?,
                exposure: row.get(2)?,
                rate: row.get(3)?,
                relative_risk: row.get(4)?,
                share: row.get(5)?,
                avg_severity: row.get(6)?,
                severe_share: row.get(7)?,
                low_confidence: row.get(8)?,
                rank: None,
                partition_share: None,
            });
        }
        Ok(Some(records))
    }

    fn write(&self, key: &StoredKey, records: &[RateRecord]) -> Result<(), StoreError> {
        let conn = self.conn();
        in_transaction(&conn, |conn| {
            delete_set(conn, key)?;

            let seq: i64 =
                conn.query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM rate_sets", [], |row| {
                    row.get(0)
                })?;
            conn.execute(
                "INSERT INTO rate_sets (version, dimensions, row_filter, basis, seq, strata)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    key.version,
                    key.dimensions,
                    key.filter,
                    key.basis,
                    seq,
                    records.len() as u64,
                ],
            )?;

            let mut stmt = conn.prepare(
                "INSERT INTO rate_records (version, dimensions, row_filter, basis, ordinal,
                    stratum, incidents, exposure, rate, relative_risk, share, avg_severity,
                    severe_share, low_confidence)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for (position, record) in records.iter().enumerate() {
                stmt.execute(params![
                    key.version,
                    key.dimensions,
                    key.filter,
                    key.basis,
                    position as u64,
                    serde_json::to_string(&record.key)?,
                    record.count,
                    record.exposure,
                    record.rate,
                    record.relative_risk,
                    record.share,
                    record.avg_severity,
                    record.severe_share,
                    record.low_confidence,
                ])?;
            }
            Ok(())
        })?;

        log::debug!(
            "Stored {} strata for {} [{}]",
            records.len(),
            key.dimensions,
            key.filter
        );
        Ok(())
    }
}

/// A [`CacheKey`] flattened into column values.
struct StoredKey {
    version: String,
    dimensions: String,
    filter: String,
    basis: String,
}

impl StoredKey {
    fn new(key: &CacheKey) -> Result<Self, StoreError> {
        Ok(Self {
            version: key.version.clone(),
            dimensions: serde_json::to_string(&key.dimensions)?,
            filter: key.filter.clone(),
            basis: key.basis.clone(),
        })
    }
}

fn create_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS rate_sets (
            version TEXT NOT NULL,
            dimensions TEXT NOT NULL,
            row_filter TEXT NOT NULL,
            basis TEXT NOT NULL,
            seq BIGINT NOT NULL,
            strata UBIGINT NOT NULL,
            saved_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (version, dimensions, row_filter, basis)
        );
        CREATE TABLE IF NOT EXISTS rate_records (
            version TEXT NOT NULL,
            dimensions TEXT NOT NULL,
            row_filter TEXT NOT NULL,
            basis TEXT NOT NULL,
            ordinal UBIGINT NOT NULL,
            stratum TEXT NOT NULL,
            incidents UBIGINT NOT NULL,
            exposure DOUBLE,
            rate DOUBLE,
            relative_risk DOUBLE,
            share DOUBLE NOT NULL,
            avg_severity DOUBLE NOT NULL,
            severe_share DOUBLE NOT NULL,
            low_confidence BOOLEAN NOT NULL
        );",
    )?;
    Ok(())
}

fn delete_set(conn: &Connection, key: &StoredKey) -> Result<(), StoreError> {
    for table in ["rate_records", "rate_sets"] {
        conn.execute(
            &format!(
                "DELETE FROM {table}
                 WHERE version = ? AND dimensions = ? AND row_filter = ? AND basis = ?"
            ),
            params![key.version, key.dimensions, key.filter, key.basis],
        )?;
    }
    Ok(())
}

/// Runs `f` between `BEGIN TRANSACTION` and `COMMIT`, rolling back if it
/// fails.
fn in_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    conn.execute_batch("BEGIN TRANSACTION")?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                log::warn!("Rollback failed: {rollback}");
            }
            Err(e)
        }
    }
}

impl RateStore for DuckDbStore {
    fn load(&self, key: &CacheKey) -> Result<Option<Vec<RateRecord>>, EngineError> {
        let key = StoredKey::new(key)?;
        Ok(Self::load_records(&self.conn(), &key)?)
    }

    fn save(&self, key: &CacheKey, records: &[RateRecord]) -> Result<(), EngineError> {
        let key = StoredKey::new(key)?;
        Ok(self.write(&key, records)?)
    }

    fn retain_version(&self, version: &str) -> Result<u64, EngineError> {
        let conn = self.conn();
        let removed = in_transaction(&conn, |conn| {
            let stale: i64 = conn.query_row(
                "SELECT COUNT(*) FROM rate_sets WHERE version <> ?",
                params![version],
                |row| row.get(0),
            )?;
            conn.execute("DELETE FROM rate_records WHERE version <> ?", params![version])?;
            conn.execute("DELETE FROM rate_sets WHERE version <> ?", params![version])?;
            Ok(u64::try_from(stale).unwrap_or_default())
        })?;
        if removed > 0 {
            log::info!("Dropped {removed} stale rate sets from the store");
        }
        Ok(removed)
    }

    fn latest_version(&self) -> Result<Option<String>, EngineError> {
        Ok(latest_version(&self.conn())?)
    }

    fn load_latest(
        &self,
        version: &str,
        dimensions: &[String],
        filter: &str,
    ) -> Result<Option<Vec<RateRecord>>, EngineError> {
        let conn = self.conn();
        let Some(basis) = latest_basis(&conn, version, dimensions, filter)? else {
            return Ok(None);
        };
        let key = StoredKey {
            version: version.to_string(),
            dimensions: serde_json::to_string(dimensions).map_err(StoreError::from)?,
            filter: filter.to_string(),
            basis,
        };
        Ok(Self::load_records(&conn, &key)?)
    }
}

fn latest_version(conn: &Connection) -> Result<Option<String>, StoreError> {
    let mut stmt = conn.prepare("SELECT version FROM rate_sets ORDER BY seq DESC LIMIT 1")?;
    let mut rows = stmt.query([])?;
    Ok(match rows.next()? {
        Some(row) => Some(row.get(0)?),
        None => None,
    })
}

fn latest_basis(
    conn: &Connection,
    version: &str,
    dimensions: &[String],
    filter: &str,
) -> Result<Option<String>, StoreError> {
    let dimensions = serde_json::to_string(dimensions)?;
    let mut stmt = conn.prepare(
        "SELECT basis FROM rate_sets
         WHERE version = ? AND dimensions = ? AND row_filter = ?
         ORDER BY seq DESC LIMIT 1",
    )?;
    let mut rows = stmt.query(params![version, dimensions, filter])?;
    Ok(match rows.next()? {
        Some(row) => Some(row.get(0)?),
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(version: &str, dims: &[&str], basis: &str) -> CacheKey {
        CacheKey {
            version: version.to_string(),
            dimensions: dims.iter().map(ToString::to_string).collect(),
            filter: "*".to_string(),
            basis: basis.to_string(),
        }
    }

    fn record(state: &str, count: u64, rate: Option<f64>) -> RateRecord {
        RateRecord {
            key: vec![DimensionValue::from(state), DimensionValue::Missing],
            count,
            exposure: rate.map(|r| count as f64 / r),
            rate,
            relative_risk: None,
            share: 0.5,
            avg_severity: 2.0,
            severe_share: 0.25,
            low_confidence: count < 10,
            rank: None,
            partition_share: None,
        }
    }

    #[test]
    fn round_trips_result_sets() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let k = key("v1", &["state", "weather_condition"], "b");
        assert_eq!(store.load(&k).unwrap(), None);

        let records = vec![record("CA", 4, Some(2.0)), record("TX", 12, None)];
        store.save(&k, &records).unwrap();
        assert_eq!(store.load(&k).unwrap(), Some(records.clone()));

        // Saving again replaces the set rather than appending to it.
        store.save(&k, &records[..1]).unwrap();
        assert_eq!(store.load(&k).unwrap(), Some(records[..1].to_vec()));
        assert_eq!(store.set_count().unwrap(), 1);
    }

    #[test]
    fn empty_sets_are_distinct_from_missing_ones() {
        let store = DuckDbStore::open_in_memory().unwrap();
        let k = key("v1", &["state"], "b");
        store.save(&k, &[]).unwrap();
        assert_eq!(store.load(&k).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn retains_only_the_given_version() {
        let store = DuckDbStore::open_in_memory().unwrap();
        store.save(&key("v1", &["state"], "b"), &[record("CA", 1, None)]).unwrap();
        store.save(&key("v1", &["hour"], "b"), &[record("CA", 1, None)]).unwrap();
        store.save(&key("v2", &["state"], "b"), &[record("TX", 2, None)]).unwrap();
        assert_eq!(store.latest_version().unwrap().as_deref(), Some("v2"));

        assert_eq!(store.retain_version("v2").unwrap(), 2);
        assert_eq!(store.set_count().unwrap(), 1);
        assert_eq!(store.load(&key("v1", &["state"], "b")).unwrap(), None);
        assert!(store.load(&key("v2", &["state"], "b")).unwrap().is_some());
        assert_eq!(store.retain_version("v2").unwrap(), 0);
    }

    #[test]
    fn load_latest_ignores_basis() {
        let store = DuckDbStore::open_in_memory().unwrap();
        store.save(&key("v1", &["state"], "old"), &[record("CA", 1, None)]).unwrap();
        store.save(&key("v1", &["state"], "new"), &[record("TX", 2, None)]).unwrap();

        let latest = store
            .load_latest("v1", &["state".to_string()], "*")
            .unwrap()
            .unwrap();
        assert_eq!(latest, vec![record("TX", 2, None)]);
        assert_eq!(store.load_latest("v1", &["hour".to_string()], "*").unwrap(), None);
    }

    #[test]
    fn persists_across_connections() {
        let dir = std::env::temp_dir().join(format!("accident-risk-store-{}", std::process::id()));
        let path = dir.join("rates.duckdb");
        let k = key("v1", &["state"], "b");
        {
            let store = DuckDbStore::open(&path).unwrap();
            store.save(&k, &[record("CA", 3, Some(1.5))]).unwrap();
        }
        let store = DuckDbStore::open(&path).unwrap();
        assert_eq!(store.load(&k).unwrap(), Some(vec![record("CA", 3, Some(1.5))]));
        assert_eq!(store.latest_version().unwrap().as_deref(), Some("v1"));
        drop(store);
        std::fs::remove_dir_all(dir).ok();
    }
}
