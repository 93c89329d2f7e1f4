use crate::transactions::lock::{Lock, Resource};
use crate::transactions::TransactionID;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

/// An entity, usually a transaction, that owns zero or more [`Lock`]s.
///
/// The set of held locks is only touched by `Lock::acquire` and
/// `Lock::release` while they hold the state of that very lock, so the
/// owner set of a lock and the lock set of its owners always agree.
pub struct LockHolder<R: Resource> {
    id: TransactionID,
    locks: Mutex<HashMap<R, Arc<Lock<R>>>>,
}

impl<R: Resource> LockHolder<R> {
    pub fn new(id: TransactionID) -> LockHolder<R> {
        LockHolder {
            id,
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn id(&self) -> TransactionID {
        self.id
    }

    pub(crate) fn add_lock(&self, lock: Arc<Lock<R>>) {
        let mut guard = self.locks.lock().unwrap();
        guard.insert(lock.resource().clone(), lock);
    }

    pub(crate) fn remove_lock(&self, resource: &R) {
        let mut guard = self.locks.lock().unwrap();
        guard.remove(resource);
    }

    /// Snapshot of the held locks, used for bulk release.
    pub fn all_locks(&self) -> Vec<Arc<Lock<R>>> {
        let guard = self.locks.lock().unwrap();
        guard.values().cloned().collect()
    }

    pub fn resources(&self) -> Vec<R> {
        let guard = self.locks.lock().unwrap();
        guard.keys().cloned().collect()
    }

    pub fn number_of_locks(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

impl<R: Resource> PartialEq for LockHolder<R> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<R: Resource> Eq for LockHolder<R> {}

impl<R: Resource> PartialOrd for LockHolder<R> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<R: Resource> Ord for LockHolder<R> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl<R: Resource> Hash for LockHolder<R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<R: Resource> fmt::Debug for LockHolder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHolder")
            .field("id", &self.id)
            .field("locks", &self.number_of_locks())
            .finish()
    }
}
