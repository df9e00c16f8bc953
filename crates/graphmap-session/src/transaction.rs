//! Logical transactions layered over native driver transactions.
//!
//! A transaction belongs to the call chain holding its handle, never to the
//! session as a whole: independent callers sharing a manager each get their
//! own. The store has no nested transactions, so opening a transaction with
//! a parent handle *extends* the parent instead. Each scope still commits or
//! rolls back and then closes; only the outermost close settles the native
//! transaction. An inner rollback poisons the whole transaction: the outer
//! commit will fail and the close will roll back.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use graphmap_context::{EntityHandle, TrackedEntity, TrackedRelationship, TrackedWrites};
use graphmap_core::{MappedRelationship, TransactionType};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::driver::{Driver, DriverTransaction, Query, Row};
use crate::error::{DriverError, TransactionError};

/// Lifecycle of a logical transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Open,
    /// An inner scope committed; the outermost scope decides.
    CommitPending,
    /// An inner scope rolled back; the transaction can no longer commit.
    RollbackPending,
    Committed,
    RolledBack,
    Closed,
}

impl TransactionStatus {
    fn is_settled(self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed | TransactionStatus::RolledBack | TransactionStatus::Closed
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Open => "OPEN",
            TransactionStatus::CommitPending => "COMMIT_PENDING",
            TransactionStatus::RollbackPending => "ROLLBACK_PENDING",
            TransactionStatus::Committed => "COMMITTED",
            TransactionStatus::RolledBack => "ROLLEDBACK",
            TransactionStatus::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct TransactionState {
    status: TransactionStatus,
    extensions: u32,
}

// ── Transaction ──────────────────────────────────────────────────

/// A logical transaction. Shared between the manager and every scope that
/// opened or extended it.
pub struct Transaction<T: DriverTransaction> {
    id: Uuid,
    transaction_type: TransactionType,
    state: Mutex<TransactionState>,
    native: tokio::sync::Mutex<Option<T>>,
    tracked: Mutex<TrackedWrites>,
}

impl<T: DriverTransaction> fmt::Debug for Transaction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("type", &self.transaction_type)
            .field("status", &state.status)
            .field("extensions", &state.extensions)
            .finish()
    }
}

impl<T: DriverTransaction> Transaction<T> {
    fn new(transaction_type: TransactionType, native: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_type,
            state: Mutex::new(TransactionState {
                status: TransactionStatus::Open,
                extensions: 0,
            }),
            native: tokio::sync::Mutex::new(Some(native)),
            tracked: Mutex::new(TrackedWrites::default()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    pub fn status(&self) -> TransactionStatus {
        self.state.lock().status
    }

    /// Number of scopes sharing this transaction besides the one that
    /// opened it.
    pub fn extensions(&self) -> u32 {
        self.state.lock().extensions
    }

    /// Run a query inside this transaction.
    pub async fn execute(&self, query: &Query) -> Result<Vec<Row>, TransactionError> {
        let status = self.status();
        if status.is_settled() {
            return Err(TransactionError::NotOpen(status));
        }
        let mut native = self.native.lock().await;
        let txn = native.as_mut().ok_or(TransactionError::NotOpen(status))?;
        tracing::trace!(transaction = %self.id, cypher = %query.cypher, "Executing");
        Ok(txn.execute(query).await?)
    }

    /// Remember that `entity` was written in this transaction. `created` means
    /// it received its id here.
    pub fn track(&self, entity: EntityHandle, created: bool) {
        self.tracked.lock().entities.push(TrackedEntity {
            handle: entity,
            created,
        });
    }

    /// Remember that `fact` was recorded (`added`) or removed in this
    /// transaction.
    pub fn track_relationship(&self, fact: MappedRelationship, added: bool) {
        self.tracked
            .lock()
            .relationships
            .push(TrackedRelationship { fact, added });
    }

    pub fn tracked(&self) -> TrackedWrites {
        self.tracked.lock().clone()
    }

    fn set_status(&self, status: TransactionStatus) {
        self.state.lock().status = status;
    }

    async fn commit_native(&self) -> Result<Option<String>, DriverError> {
        match self.native.lock().await.take() {
            Some(txn) => txn.commit().await,
            None => Ok(None),
        }
    }

    async fn rollback_native(&self) -> Result<(), DriverError> {
        match self.native.lock().await.take() {
            Some(txn) => txn.rollback().await,
            None => Ok(()),
        }
    }
}

// ── Transaction Manager ──────────────────────────────────────────

/// Drives logical transactions through open, extend, commit, rollback and
/// close. Any number may be active at once, one per independent caller.
pub struct TransactionManager<D: Driver> {
    driver: Arc<D>,
    default_type: TransactionType,
    active: Mutex<HashSet<Uuid>>,
    bookmarks: Mutex<Vec<String>>,
}

impl<D: Driver> TransactionManager<D> {
    pub fn new(driver: Arc<D>, default_type: TransactionType) -> Self {
        Self {
            driver,
            default_type,
            active: Mutex::new(HashSet::new()),
            bookmarks: Mutex::new(Vec::new()),
        }
    }

    /// True if `tx` was opened by this manager and is not yet closed.
    pub fn is_active(&self, tx: &Arc<Transaction<D::Transaction>>) -> bool {
        self.active.lock().contains(&tx.id)
    }

    /// Number of transactions opened by this manager and not yet closed.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Bookmarks collected from commits so far.
    pub fn bookmarks(&self) -> Vec<String> {
        self.bookmarks.lock().clone()
    }

    /// Record a causal-consistency token from the transport.
    pub fn bookmark(&self, token: String) {
        self.bookmarks.lock().push(token);
    }

    /// Open a new transaction, or extend `parent` when one is given.
    ///
    /// `None` for the type means "whatever the parent is", or the configured
    /// default when a new transaction is started. Asking for a different
    /// type than the parent's is an error.
    pub async fn open(
        &self,
        parent: Option<&Arc<Transaction<D::Transaction>>>,
        transaction_type: Option<TransactionType>,
        bookmarks: &[String],
    ) -> Result<Arc<Transaction<D::Transaction>>, TransactionError> {
        if let Some(parent) = parent {
            self.ensure_active(parent)?;
            return self.extend(parent.clone(), transaction_type);
        }

        let transaction_type = transaction_type.unwrap_or(self.default_type);
        let mut all_bookmarks = self.bookmarks();
        all_bookmarks.extend(bookmarks.iter().cloned());
        let native = self.driver.begin(transaction_type, &all_bookmarks).await?;
        let tx = Arc::new(Transaction::new(transaction_type, native));
        self.active.lock().insert(tx.id);

        tracing::debug!(transaction = %tx.id, %transaction_type, "Transaction opened");
        Ok(tx)
    }

    fn extend(
        &self,
        tx: Arc<Transaction<D::Transaction>>,
        requested: Option<TransactionType>,
    ) -> Result<Arc<Transaction<D::Transaction>>, TransactionError> {
        if let Some(requested) = requested {
            if requested != tx.transaction_type {
                return Err(TransactionError::IncompatibleType {
                    current: tx.transaction_type,
                    requested,
                });
            }
        }
        let mut state = tx.state.lock();
        if state.status.is_settled() {
            return Err(TransactionError::NotOpen(state.status));
        }
        state.extensions += 1;
        tracing::debug!(
            transaction = %tx.id,
            extensions = state.extensions,
            "Transaction extended"
        );
        drop(state);
        Ok(tx)
    }

    /// Commit the scope. The outermost scope commits natively; inner scopes
    /// only mark the transaction commit-pending.
    pub async fn commit(
        &self,
        tx: &Arc<Transaction<D::Transaction>>,
    ) -> Result<(), TransactionError> {
        self.ensure_active(tx)?;
        let (status, extensions) = {
            let state = tx.state.lock();
            (state.status, state.extensions)
        };

        if extensions > 0 {
            if status == TransactionStatus::RollbackPending {
                return Err(TransactionError::RollbackPending);
            }
            tx.set_status(TransactionStatus::CommitPending);
            tracing::debug!(transaction = %tx.id, "Commit pending");
            return Ok(());
        }

        match status {
            TransactionStatus::Open | TransactionStatus::CommitPending => {
                if let Some(token) = tx.commit_native().await? {
                    self.bookmark(token);
                }
                tx.set_status(TransactionStatus::Committed);
                tracing::debug!(transaction = %tx.id, "Transaction committed");
                Ok(())
            }
            TransactionStatus::RollbackPending => Err(TransactionError::RollbackPending),
            other => Err(TransactionError::CannotCommit(other)),
        }
    }

    /// Roll back the scope. The outermost scope rolls back natively; inner
    /// scopes mark the transaction rollback-pending.
    pub async fn rollback(
        &self,
        tx: &Arc<Transaction<D::Transaction>>,
    ) -> Result<(), TransactionError> {
        self.ensure_active(tx)?;
        if tx.extensions() > 0 {
            tx.set_status(TransactionStatus::RollbackPending);
            tracing::debug!(transaction = %tx.id, "Rollback pending");
            return Ok(());
        }
        if tx.status().is_settled() {
            return Err(TransactionError::NotOpen(tx.status()));
        }
        let result = tx.rollback_native().await;
        tx.set_status(TransactionStatus::RolledBack);
        tracing::debug!(transaction = %tx.id, "Transaction rolled back");
        Ok(result?)
    }

    /// Close the scope.
    ///
    /// Inner scopes only drop their extension. The outermost scope settles
    /// anything still pending (an open or rollback-pending transaction rolls
    /// back, a commit-pending one commits), deactivates the transaction, and,
    /// if it ended rolled back, hands everything it wrote to `on_rollback`.
    pub async fn close<F>(
        &self,
        tx: &Arc<Transaction<D::Transaction>>,
        on_rollback: F,
    ) -> Result<(), TransactionError>
    where
        F: FnOnce(TrackedWrites),
    {
        self.ensure_active(tx)?;
        {
            let mut state = tx.state.lock();
            if state.extensions > 0 {
                state.extensions -= 1;
                return Ok(());
            }
        }

        let settled = match tx.status() {
            TransactionStatus::CommitPending => self.commit(tx).await,
            TransactionStatus::Open | TransactionStatus::RollbackPending => {
                self.rollback(tx).await
            }
            _ => Ok(()),
        };
        if settled.is_err() && !tx.status().is_settled() {
            // A failed commit leaves nothing usable behind.
            let _ = tx.rollback_native().await;
            tx.set_status(TransactionStatus::RolledBack);
        }

        let final_status = tx.status();
        tx.set_status(TransactionStatus::Closed);
        self.active.lock().remove(&tx.id);
        tracing::debug!(transaction = %tx.id, status = %final_status, "Transaction closed");

        if final_status == TransactionStatus::RolledBack {
            on_rollback(tx.tracked());
        }
        settled
    }

    fn ensure_active(
        &self,
        tx: &Arc<Transaction<D::Transaction>>,
    ) -> Result<(), TransactionError> {
        if self.is_active(tx) {
            Ok(())
        } else {
            Err(TransactionError::NotActive(tx.id))
        }
    }
}
