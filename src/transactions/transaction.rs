use crate::error::TxLockError;
use crate::transactions::lock::{LockHolder, LockManager, LockMode, Resource};
use crate::transactions::transaction_manager::{TransactionManager, TransactionMetadata};
use crate::transactions::TransactionID;
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    Ready,
    /// A lock request failed; the transaction can only be rolled back.
    Error,
    Finalizing,
    Committed,
    RolledBack,
}

impl TransactionStatus {
    #[inline]
    pub fn can_commit(self) -> bool {
        self == TransactionStatus::Ready
    }

    #[inline]
    pub fn can_rollback(self) -> bool {
        matches!(self, TransactionStatus::Ready | TransactionStatus::Error)
    }

    #[inline]
    pub fn can_request_locks(self) -> bool {
        self == TransactionStatus::Ready
    }
}

/// A unit of work holding locks on behalf of one client.
///
/// All locks are released exactly once, by [`Transaction::commit`],
/// [`Transaction::rollback`] or, for an unfinished transaction, on drop.
pub struct Transaction<R: Resource, M: LockManager<R>> {
    manager: Arc<TransactionManager<R, M>>,
    holder: Arc<LockHolder<R>>,
    status: TransactionStatus,
    created: DateTime<Utc>,
}

impl<R: Resource, M: LockManager<R>> Transaction<R, M> {
    pub(crate) fn new(
        manager: Arc<TransactionManager<R, M>>,
        holder: Arc<LockHolder<R>>,
    ) -> Transaction<R, M> {
        Transaction {
            manager,
            holder,
            status: TransactionStatus::Ready,
            created: Utc::now(),
        }
    }

    #[inline]
    pub fn id(&self) -> TransactionID {
        self.holder.id()
    }

    #[inline]
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    #[inline]
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn holder(&self) -> &Arc<LockHolder<R>> {
        &self.holder
    }

    /// Blocks until the lock is granted. A deadlock moves the transaction
    /// into [`TransactionStatus::Error`]; the caller must roll it back.
    pub fn request_lock(&mut self, resource: &R, mode: LockMode) -> Result<()> {
        if !self.status.can_request_locks() {
            return Err(self.invalid_state("lock resources of"));
        }
        match self.manager.lock_manager().acquire(&self.holder, resource, mode) {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.is_deadlock() {
                    self.status = TransactionStatus::Error;
                }
                Err(e)
            }
        }
    }

    pub fn lock_on(&self, resource: &R) -> LockMode {
        self.manager.lock_manager().lock_on(&self.holder, resource)
    }

    pub fn commit(&mut self) -> Result<()> {
        if !self.status.can_commit() {
            return Err(self.invalid_state("commit"));
        }
        self.finalize(TransactionStatus::Committed)
    }

    pub fn rollback(&mut self) -> Result<()> {
        if !self.status.can_rollback() {
            return Err(self.invalid_state("roll back"));
        }
        self.finalize(TransactionStatus::RolledBack)
    }

    fn finalize(&mut self, status: TransactionStatus) -> Result<()> {
        self.status = TransactionStatus::Finalizing;
        let num_locks = self.holder.number_of_locks();
        let lock_manager = self.manager.lock_manager();
        let result = lock_manager.release_all(&self.holder);
        lock_manager.wait_for_graph().remove(self.holder.id());
        self.status = status;

        info!(
            "transaction {} finished with {:?}, released {} locks",
            self.id(),
            status,
            num_locks
        );
        self.manager.retire(TransactionMetadata {
            id: self.id(),
            status,
            created: self.created,
            ended: Utc::now(),
            num_locks,
        });
        result
    }

    fn invalid_state(&self, action: &'static str) -> TxLockError {
        TxLockError::InvalidTransactionState {
            txn: self.id(),
            state: self.status,
            action,
        }
    }
}

impl<R: Resource, M: LockManager<R>> Drop for Transaction<R, M> {
    fn drop(&mut self) {
        if self.status.can_rollback() {
            if let Err(e) = self.finalize(TransactionStatus::RolledBack) {
                error!("failed to roll back transaction {} on drop: {}", self.id(), e);
            }
        }
    }
}
