//! StoreSession - contract a wide-column store adapter implements
//!
//! The engine never holds a session as ambient state. Callers acquire a
//! `SessionHandle` for the duration of a store/retrieve call and pass it
//! explicitly; dropping the handle releases the session on every exit path,
//! including early returns through `?`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::schema::{Row, Table};

/// Unique identifier for an acquired session handle
pub type SessionId = usize;

static NEXT_SESSION_ID: AtomicUsize = AtomicUsize::new(1);

/// Operations the persistence engine needs from a store.
///
/// Send + Sync required: row writes for one chunk run concurrently against
/// the same session.
#[async_trait]
pub trait StoreSession: Send + Sync {
    /// Insert or overwrite a single keyed record (execution, params, stats).
    async fn put_record(&self, table: Table, row: Row) -> Result<()>;

    /// Fetch the single record keyed by `execution_id`. Data rows are not
    /// keyed records, so `Table::Data` always yields `None`.
    async fn get_record(&self, table: Table, execution_id: Uuid) -> Result<Option<Row>>;

    /// Insert or overwrite one data row, keyed by its `id` column.
    async fn insert_data_row(&self, row: &Row) -> Result<()>;

    /// All data rows of an execution with the given top-level flag.
    async fn select_data_rows(&self, execution_id: Uuid, top_level: bool) -> Result<Vec<Row>>;

    /// Called once when a handle is acquired.
    fn acquire(&self) -> Result<()> {
        Ok(())
    }

    /// Called once when a handle is dropped.
    fn release(&self) {}
}

/// Scoped access to a store session.
///
/// Created by `acquire` and released on drop.
pub struct SessionHandle {
    id: SessionId,
    session: Arc<dyn StoreSession>,
}

impl SessionHandle {
    pub fn acquire(session: Arc<dyn StoreSession>) -> Result<Self> {
        session.acquire()?;
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session_id = id, "store session acquired");
        Ok(Self { id, session })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn session(&self) -> &dyn StoreSession {
        self.session.as_ref()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.session.release();
        tracing::debug!(session_id = self.id, "store session released");
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}
