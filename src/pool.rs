use crate::error::ArcadeError;
use crate::model::Outcome;
use crate::sql::{self, PendingRows};
use crate::store::SandboxStore;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

pub const DEFAULT_POOL_SIZE: usize = 8;

/// Bounded pool of sandbox connections. The pool is an explicitly
/// constructed handle owned by the process (passed into the validation flow,
/// never a global). Each checked-out connection holds a permit that is
/// returned when the connection drops, on every exit path.
#[derive(Clone)]
pub struct SandboxPool {
    store: SandboxStore,
    permits: Arc<Semaphore>,
    next_conn_id: Arc<AtomicU32>,
}

impl SandboxPool {
    pub fn new(store: SandboxStore, size: usize) -> Self {
        Self {
            store,
            permits: Arc::new(Semaphore::new(size.max(1))),
            next_conn_id: Arc::new(AtomicU32::new(1)),
        }
    }

    pub fn store(&self) -> &SandboxStore {
        &self.store
    }

    pub async fn get(&self) -> Result<SandboxConn, ArcadeError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ArcadeError::Invalid("connection pool is closed".into()))?;
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        debug!(conn_id, "connection checked out");
        Ok(SandboxConn {
            store: self.store.clone(),
            conn_id,
            _permit: permit,
        })
    }
}

/// One checked-out connection. Dropping it releases the pool permit.
pub struct SandboxConn {
    store: SandboxStore,
    conn_id: u32,
    _permit: OwnedSemaphorePermit,
}

impl SandboxConn {
    pub fn conn_id(&self) -> u32 {
        self.conn_id
    }

    pub fn store(&self) -> &SandboxStore {
        &self.store
    }

    /// Open a transaction scoped to one namespace. All row changes stay in
    /// the transaction's buffer until `commit`; dropping the transaction
    /// discards them, so rollback is the default on every exit path.
    pub fn begin<'a>(&'a mut self, namespace: &'a str) -> Transaction<'a> {
        Transaction {
            conn: self,
            namespace,
            pending: PendingRows::default(),
        }
    }
}

pub struct Transaction<'a> {
    conn: &'a SandboxConn,
    namespace: &'a str,
    pending: PendingRows,
}

impl Transaction<'_> {
    pub fn execute(&mut self, sql: &str) -> Result<Outcome, ArcadeError> {
        sql::execute(&self.conn.store, self.namespace, &mut self.pending, sql)
    }

    /// Explicitly persist buffered row changes. Only the provisioner's seed
    /// path calls this; validation lets the transaction drop instead.
    pub fn commit(self) -> Result<(), ArcadeError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let changes: Vec<_> = self
            .pending
            .iter()
            .map(|(key, row)| (key.table.as_str(), key.rowid, row.as_ref()))
            .collect();
        self.conn.store.apply_row_changes(
            changes
                .iter()
                .map(|(table, rowid, row)| (self.namespace, *table, *rowid, *row)),
        )?;
        debug!(
            conn_id = self.conn.conn_id,
            namespace = self.namespace,
            "transaction committed"
        );
        Ok(())
    }

    /// Discard buffered changes without waiting for drop. Provided for
    /// symmetry; dropping the transaction has the same effect.
    pub fn rollback(mut self) {
        self.pending.clear();
    }
}
