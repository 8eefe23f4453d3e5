//! MemoryStore - ephemeral in-process implementation of `StoreSession`
//!
//! Behaves like a wide-column store for the purposes of the engine:
//!
//! - Record tables (executions, params, stats) are keyed by execution id;
//!   a second put with the same key overwrites.
//! - Data rows are keyed by their generated row id with upsert semantics,
//!   so rewriting a row during a retry pass replaces it in place.
//! - Reads return data rows in first-insertion order.
//!
//! Fault injection hooks let tests simulate rejected writes and slow
//! writes. The whole store can be saved to and loaded from a JSON snapshot.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use matchup_store::memory::MemoryStore;
//! use matchup_store::session::SessionHandle;
//!
//! let store = Arc::new(MemoryStore::new());
//! store.fail_first_writes(3);
//!
//! let handle = SessionHandle::acquire(store.clone()).unwrap();
//! assert_eq!(store.active_sessions(), 1);
//! drop(handle);
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MatchupError, Result};
use crate::schema::{columns, ColumnValue, Row, Table};
use crate::session::StoreSession;

type WriteFault = dyn Fn(&Row) -> bool + Send + Sync;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Data rows keyed by row id, remembering first-insertion order.
#[derive(Default)]
struct DataTable {
    rows: HashMap<Uuid, Row>,
    order: Vec<Uuid>,
}

impl DataTable {
    /// Upsert. Returns true if the key was new.
    fn upsert(&mut self, id: Uuid, row: Row) -> bool {
        let inserted = self.rows.insert(id, row).is_none();
        if inserted {
            self.order.push(id);
        }
        inserted
    }

    fn iter(&self) -> impl Iterator<Item = &Row> {
        self.order.iter().filter_map(|id| self.rows.get(id))
    }
}

pub struct MemoryStore {
    records: RwLock<HashMap<Table, HashMap<Uuid, Row>>>,
    data: RwLock<DataTable>,
    /// Number of live `SessionHandle`s
    active_sessions: AtomicUsize,
    closed: AtomicBool,
    /// Data row write attempts, including rejected ones
    data_writes: AtomicU64,
    rejected_writes: AtomicU64,
    fault: RwLock<Option<Arc<WriteFault>>>,
    write_delay_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            data: RwLock::new(DataTable::default()),
            active_sessions: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            data_writes: AtomicU64::new(0),
            rejected_writes: AtomicU64::new(0),
            fault: RwLock::new(None),
            write_delay_ms: AtomicU64::new(0),
        }
    }

    // -- Fault injection ------------------------------------------------------

    /// Reject the next `count` data row writes, then accept everything.
    pub fn fail_first_writes(&self, count: u64) {
        let remaining = AtomicU64::new(count);
        self.fail_writes_where(move |_| {
            remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |r| r.checked_sub(1))
                .is_ok()
        });
    }

    /// Reject every data row write for which `predicate` returns true.
    pub fn fail_writes_where<F>(&self, predicate: F)
    where
        F: Fn(&Row) -> bool + Send + Sync + 'static,
    {
        *write(&self.fault) = Some(Arc::new(predicate));
    }

    pub fn clear_faults(&self) {
        *write(&self.fault) = None;
    }

    /// Delay every data row write by `delay` before it is applied.
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    // -- Lifecycle ------------------------------------------------------------

    /// Refuse new sessions and all further operations.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(MatchupError::Store("store is closed".to_string()));
        }
        Ok(())
    }

    // -- Stats ----------------------------------------------------------------

    /// Total data row write attempts seen, rejected ones included.
    pub fn data_write_count(&self) -> u64 {
        self.data_writes.load(Ordering::SeqCst)
    }

    pub fn rejected_write_count(&self) -> u64 {
        self.rejected_writes.load(Ordering::SeqCst)
    }

    /// Number of distinct data rows stored, across all executions.
    pub fn data_row_count(&self) -> usize {
        read(&self.data).rows.len()
    }

    /// Number of rows in `table`.
    pub fn table_len(&self, table: Table) -> usize {
        match table {
            Table::Data => self.data_row_count(),
            other => read(&self.records).get(&other).map_or(0, HashMap::len),
        }
    }

    /// Every stored data row of an execution, in insertion order.
    pub fn data_rows_for(&self, execution_id: Uuid) -> Vec<Row> {
        read(&self.data)
            .iter()
            .filter(|row| belongs_to(row, execution_id))
            .cloned()
            .collect()
    }

    // -- Snapshots ------------------------------------------------------------

    pub fn snapshot(&self) -> Snapshot {
        let mut records: Vec<SnapshotRecord> = read(&self.records)
            .iter()
            .flat_map(|(table, rows)| {
                rows.values().map(move |row| SnapshotRecord {
                    table: *table,
                    row: row.clone(),
                })
            })
            .collect();
        records.sort_by_key(|r| (r.table, r.row.key(r.table).ok()));

        Snapshot {
            records,
            data: read(&self.data).iter().cloned().collect(),
        }
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        let store = Self::new();
        {
            let mut records = write(&store.records);
            for record in snapshot.records {
                let key = record.row.key(record.table)?;
                records.entry(record.table).or_default().insert(key, record.row);
            }
        }
        {
            let mut data = write(&store.data);
            for row in snapshot.data {
                let key = row.key(Table::Data)?;
                data.upsert(key, row);
            }
        }
        Ok(store)
    }

    /// Load a snapshot file, or start empty if it doesn't exist.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let contents = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&contents)?;
        Self::from_snapshot(snapshot)
    }

    /// Write a snapshot file via temp file + rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(&self.snapshot())?;
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, json)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn belongs_to(row: &Row, execution_id: Uuid) -> bool {
    matches!(row.get(columns::EXECUTION_ID), Some(ColumnValue::Uuid(id)) if *id == execution_id)
}

#[async_trait]
impl StoreSession for MemoryStore {
    async fn put_record(&self, table: Table, row: Row) -> Result<()> {
        self.ensure_open()?;
        if table == Table::Data {
            return self.insert_data_row(&row).await;
        }
        let key = row.key(table)?;
        write(&self.records).entry(table).or_default().insert(key, row);
        Ok(())
    }

    async fn get_record(&self, table: Table, execution_id: Uuid) -> Result<Option<Row>> {
        self.ensure_open()?;
        if table == Table::Data {
            return Ok(None);
        }
        Ok(read(&self.records)
            .get(&table)
            .and_then(|rows| rows.get(&execution_id))
            .cloned())
    }

    async fn insert_data_row(&self, row: &Row) -> Result<()> {
        let delay_ms = self.write_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        self.ensure_open()?;
        self.data_writes.fetch_add(1, Ordering::SeqCst);

        let fault = read(&self.fault).clone();
        if let Some(fault) = fault {
            if fault(row) {
                self.rejected_writes.fetch_add(1, Ordering::SeqCst);
                return Err(MatchupError::Store(format!(
                    "write rejected for row {}",
                    row.describe()
                )));
            }
        }

        let key = row.key(Table::Data)?;
        write(&self.data).upsert(key, row.clone());
        Ok(())
    }

    async fn select_data_rows(&self, execution_id: Uuid, top_level: bool) -> Result<Vec<Row>> {
        self.ensure_open()?;
        Ok(read(&self.data)
            .iter()
            .filter(|row| belongs_to(row, execution_id))
            .filter(|row| row.boolean(columns::IS_PRIMARY).ok() == Some(top_level))
            .cloned()
            .collect())
    }

    fn acquire(&self) -> Result<()> {
        self.ensure_open()?;
        self.active_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        let _ = self
            .active_sessions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

// ── Snapshot format ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub records: Vec<SnapshotRecord>,
    pub data: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub table: Table,
    pub row: Row,
}
