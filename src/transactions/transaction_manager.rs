use crate::options::TransactionOptions;
use crate::transactions::lock::{LockHolder, LockManager, Resource};
use crate::transactions::transaction::{Transaction, TransactionStatus};
use crate::transactions::{TransactionID, TRANSACTION_NULL};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct TransactionMetadata {
    pub id: TransactionID,
    pub status: TransactionStatus,
    pub created: DateTime<Utc>,
    pub ended: DateTime<Utc>,
    /// Number of locks held when the transaction was finalized.
    pub num_locks: usize,
}

/// Hands out transactions and keeps track of the running and the recently
/// finished ones. Lock requests go to the shared lock manager `M`.
pub struct TransactionManager<R: Resource, M: LockManager<R>> {
    next_txn_id: AtomicU64,
    lock_manager: M,
    active: DashMap<TransactionID, Arc<LockHolder<R>>>,
    history: Mutex<VecDeque<TransactionMetadata>>,
    options: TransactionOptions,
}

impl<R: Resource, M: LockManager<R>> TransactionManager<R, M> {
    pub fn new(options: TransactionOptions) -> TransactionManager<R, M> {
        TransactionManager {
            next_txn_id: AtomicU64::new(TRANSACTION_NULL + 1),
            lock_manager: M::with_capacity(options.lock_table_capacity),
            active: DashMap::new(),
            history: Mutex::new(VecDeque::with_capacity(options.transaction_history_size)),
            options,
        }
    }

    pub fn begin(manager: &Arc<Self>) -> Transaction<R, M> {
        let id = manager.next_txn_id.fetch_add(1, Ordering::AcqRel);
        let holder = Arc::new(LockHolder::new(id));
        manager.active.insert(id, holder.clone());
        debug!("begin transaction {}", id);
        Transaction::new(manager.clone(), holder)
    }

    #[inline]
    pub fn lock_manager(&self) -> &M {
        &self.lock_manager
    }

    /// The lock holder of a running transaction.
    pub fn get(&self, id: TransactionID) -> Option<Arc<LockHolder<R>>> {
        self.active.get(&id).map(|holder| holder.value().clone())
    }

    /// Ids of all running transactions, ascending.
    pub fn active(&self) -> Vec<TransactionID> {
        let mut ids: Vec<TransactionID> = self.active.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Finished transactions, oldest first.
    pub fn history(&self) -> Vec<TransactionMetadata> {
        let guard = self.history.lock().unwrap();
        guard.iter().cloned().collect()
    }

    pub(crate) fn retire(&self, metadata: TransactionMetadata) {
        self.active.remove(&metadata.id);
        let mut guard = self.history.lock().unwrap();
        while guard.len() >= self.options.transaction_history_size && !guard.is_empty() {
            guard.pop_front();
        }
        if self.options.transaction_history_size > 0 {
            guard.push_back(metadata);
        }
    }
}
