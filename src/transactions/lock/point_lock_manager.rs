use crate::error::TxLockError;
use crate::options::LOCK_TABLE_CAPACITY;
use crate::transactions::lock::{Lock, LockHolder, LockManager, LockMode, Resource, WaitForGraph};
use crate::Result;
use dashmap::DashMap;
use std::sync::Arc;

/// Lock manager with one [`Lock`] per resource, created on first use.
///
/// The registry is a [`DashMap`], so looking up or creating the lock of one
/// resource never waits for traffic on unrelated resources. Blocking happens
/// only inside the per-resource lock, after the map guard is dropped.
pub struct PointLockManager<R: Resource> {
    lock_map: DashMap<R, Arc<Lock<R>>>,
    wait_for_graph: Arc<WaitForGraph>,
}

impl<R: Resource> PointLockManager<R> {
    fn get_or_create(&self, resource: &R) -> Arc<Lock<R>> {
        if let Some(lock) = self.lock_map.get(resource) {
            return lock.value().clone();
        }
        self.lock_map
            .entry(resource.clone())
            .or_insert_with(|| Arc::new(Lock::new(resource.clone(), self.wait_for_graph.clone())))
            .value()
            .clone()
    }

    fn get(&self, resource: &R) -> Option<Arc<Lock<R>>> {
        self.lock_map.get(resource).map(|lock| lock.value().clone())
    }
}

impl<R: Resource> Default for PointLockManager<R> {
    fn default() -> Self {
        PointLockManager::new()
    }
}

impl<R: Resource> LockManager<R> for PointLockManager<R> {
    fn new() -> Self {
        PointLockManager::with_capacity(LOCK_TABLE_CAPACITY)
    }

    fn with_capacity(capacity: usize) -> Self {
        PointLockManager {
            lock_map: DashMap::with_capacity(capacity),
            wait_for_graph: Arc::new(WaitForGraph::new()),
        }
    }

    fn acquire(&self, holder: &Arc<LockHolder<R>>, resource: &R, mode: LockMode) -> Result<()> {
        let lock = self.get_or_create(resource);
        lock.acquire(holder, mode)
    }

    fn release(&self, holder: &LockHolder<R>, resource: &R) -> Result<()> {
        match self.get(resource) {
            Some(lock) => lock.release(holder),
            None => Err(TxLockError::UnknownResource(format!("{:?}", resource))),
        }
    }

    fn release_all(&self, holder: &LockHolder<R>) -> Result<()> {
        for lock in holder.all_locks() {
            lock.release(holder)?;
        }
        Ok(())
    }

    fn owners_of(&self, resource: &R) -> Vec<Arc<LockHolder<R>>> {
        self.get(resource)
            .map(|lock| lock.owners())
            .unwrap_or_default()
    }

    fn mode_of(&self, resource: &R) -> LockMode {
        self.get(resource)
            .map(|lock| lock.mode())
            .unwrap_or_default()
    }

    fn lock_on(&self, holder: &LockHolder<R>, resource: &R) -> LockMode {
        self.get(resource)
            .map(|lock| lock.lock_on(holder.id()))
            .unwrap_or_default()
    }

    fn locks_held_by(&self, holder: &LockHolder<R>) -> Vec<R> {
        holder.resources()
    }

    fn num_locks(&self) -> usize {
        self.lock_map.len()
    }

    fn wait_for_graph(&self) -> &WaitForGraph {
        &self.wait_for_graph
    }
}
