//! StateStore — redb-backed persistence for check results.
//!
//! Metric results are inserted under a fresh key every run. Status results
//! are upserted under `(service, check, day-of-month)`. Reads always sort by
//! `created_at` explicitly instead of trusting key order across tables.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type ResultTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Store contract the check engine depends on.
pub trait ResultStore: Send + Sync {
    /// Insert (metric) or upsert (status) a classified result.
    fn persist(&self, result: &CheckResult) -> StateResult<()>;

    /// Most recently created result for a check, across all history.
    fn read_latest(&self, service: &str, check: &str) -> StateResult<Option<CheckResult>>;

    /// Every stored result for a check, newest first.
    fn list_results(&self, service: &str, check: &str) -> StateResult<Vec<CheckResult>>;
}

/// Thread-safe result store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    /// Tie-breaker for metric keys created within the same microsecond.
    seq: Arc<AtomicU64>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        debug!(?path, "result store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        debug!("in-memory result store opened");
        Ok(store)
    }

    fn from_db(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(STATUS_RESULTS).map_err(map_err!(Transaction))?;
        txn.open_table(METRIC_RESULTS).map_err(map_err!(Transaction))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Append a metric result. Never overwrites an earlier record.
    pub fn insert_metric(&self, result: &CheckResult) -> StateResult<()> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let key = result.metric_key(seq);
        self.write(METRIC_RESULTS, &key, result)?;
        debug!(
            service = %result.service,
            check = %result.check,
            value = ?result.value,
            "metric result inserted"
        );
        Ok(())
    }

    /// Insert or replace the status result for the result's day-of-month.
    pub fn upsert_status(&self, result: &CheckResult) -> StateResult<()> {
        let key = result.status_key();
        self.write(STATUS_RESULTS, &key, result)?;
        debug!(
            service = %result.service,
            check = %result.check,
            day = result.day,
            "status result upserted"
        );
        Ok(())
    }

    /// Status result stored for a given day-of-month, if any.
    pub fn get_status(
        &self,
        service: &str,
        check: &str,
        day: u32,
    ) -> StateResult<Option<CheckResult>> {
        let key = format!("{}{:02}", check_prefix(service, check), day);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn
            .open_table(STATUS_RESULTS)
            .map_err(map_err!(Transaction))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => decode(guard.value()).map(Some),
            None => Ok(None),
        }
    }

    /// All metric results for a check in insertion order.
    pub fn list_metrics(&self, service: &str, check: &str) -> StateResult<Vec<CheckResult>> {
        self.scan(METRIC_RESULTS, service, check)
    }

    /// Newest metric result for a check. Reads a single record: metric keys
    /// sort by creation time within a check's key range.
    pub fn last_metric(&self, service: &str, check: &str) -> StateResult<Option<CheckResult>> {
        let start = check_prefix(service, check);
        let end = check_prefix_end(service, check);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn
            .open_table(METRIC_RESULTS)
            .map_err(map_err!(Transaction))?;
        let mut range = table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?;
        match range.next_back() {
            Some(entry) => {
                let (_, value) = entry.map_err(map_err!(Read))?;
                decode(value.value()).map(Some)
            }
            None => Ok(None),
        }
    }

    fn write(&self, table_def: ResultTable, key: &str, result: &CheckResult) -> StateResult<()> {
        let value = serde_json::to_vec(result).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Transaction))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Key-range scan over one table for a single check.
    fn scan(
        &self,
        table_def: ResultTable,
        service: &str,
        check: &str,
    ) -> StateResult<Vec<CheckResult>> {
        let start = check_prefix(service, check);
        let end = check_prefix_end(service, check);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Transaction))?;
        let mut results = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }
}

fn decode(bytes: &[u8]) -> StateResult<CheckResult> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

impl ResultStore for StateStore {
    fn persist(&self, result: &CheckResult) -> StateResult<()> {
        match result.kind {
            CheckKind::Metric => self.insert_metric(result),
            CheckKind::Status => self.upsert_status(result),
        }
    }

    fn read_latest(&self, service: &str, check: &str) -> StateResult<Option<CheckResult>> {
        // At most one status row per day-of-month, and one metric row.
        let status = self.scan(STATUS_RESULTS, service, check)?;
        let metric = self.last_metric(service, check)?;
        Ok(status.into_iter().chain(metric).max_by_key(|r| r.created_at))
    }

    fn list_results(&self, service: &str, check: &str) -> StateResult<Vec<CheckResult>> {
        let mut results = self.scan(STATUS_RESULTS, service, check)?;
        results.extend(self.scan(METRIC_RESULTS, service, check)?);
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(results)
    }
}
