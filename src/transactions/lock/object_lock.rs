use crate::error::TxLockError;
use crate::transactions::lock::{LockHolder, LockMode, Resource, WaitForGraph};
use crate::transactions::TransactionID;
use crate::Result;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

struct LockState<R: Resource> {
    owners: BTreeMap<TransactionID, Arc<LockHolder<R>>>,
    shared_count: usize,
    exclusive: bool,

    /// Requesters inside a wait loop on this lock, whose wait-for edges point
    /// at the current owners.
    waiting: HashSet<TransactionID>,
    /// Threads parked on `waiters` that have not been woken by a release yet.
    parked: usize,
    /// Bumped by every release, so a woken thread can tell a broadcast from a
    /// spurious wakeup.
    wake_epoch: u64,
}

impl<R: Resource> LockState<R> {
    fn mode(&self) -> LockMode {
        if self.exclusive {
            LockMode::Exclusive
        } else if self.shared_count > 0 {
            LockMode::Shared
        } else {
            LockMode::NoLock
        }
    }

    fn blockers(&self, txn_id: TransactionID) -> Vec<TransactionID> {
        self.owners
            .keys()
            .copied()
            .filter(|id| *id != txn_id)
            .collect()
    }

    fn check_invariants(&self) {
        debug_assert!(!self.exclusive || (self.shared_count == 0 && self.owners.len() == 1));
        debug_assert_eq!(
            self.owners.is_empty(),
            !self.exclusive && self.shared_count == 0
        );
    }
}

/// The lock on a single database object.
///
/// Every `Lock` is its own monitor: `state` guards owners, counters and
/// flags, and blocked requesters sleep on `waiters`. A release wakes all of
/// them and each re-checks its own condition.
pub struct Lock<R: Resource> {
    resource: R,
    wait_for_graph: Arc<WaitForGraph>,
    state: Mutex<LockState<R>>,
    waiters: Condvar,
}

impl<R: Resource> Lock<R> {
    pub fn new(resource: R, wait_for_graph: Arc<WaitForGraph>) -> Lock<R> {
        Lock {
            resource,
            wait_for_graph,
            state: Mutex::new(LockState {
                owners: BTreeMap::new(),
                shared_count: 0,
                exclusive: false,
                waiting: HashSet::new(),
                parked: 0,
                wake_epoch: 0,
            }),
            waiters: Condvar::new(),
        }
    }

    #[inline]
    pub fn resource(&self) -> &R {
        &self.resource
    }

    /// Acquires this lock for `holder` in `mode`, blocking while the mode is
    /// incompatible with the current owners.
    ///
    /// Re-requesting a held mode is a no-op; requesting `Exclusive` while
    /// holding `Shared` upgrades in place.
    pub fn acquire(self: &Arc<Self>, holder: &Arc<LockHolder<R>>, mode: LockMode) -> Result<()> {
        if mode == LockMode::NoLock {
            return Err(TxLockError::InvalidLockMode(mode));
        }
        let state = self.state.lock().unwrap();
        if state.owners.contains_key(&holder.id()) {
            match mode {
                LockMode::Exclusive => self.upgrade(state, holder),
                _ => Ok(()),
            }
        } else {
            match mode {
                LockMode::Shared => self.acquire_shared(state, holder),
                _ => self.acquire_exclusive(state, holder),
            }
        }
    }

    /// Releases the hold of `holder` and wakes every blocked requester.
    pub fn release(&self, holder: &LockHolder<R>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.owners.remove(&holder.id()).is_none() {
            return Err(TxLockError::LockNotHeld {
                holder: holder.id(),
                resource: format!("{:?}", self.resource),
            });
        }
        if state.exclusive {
            state.exclusive = false;
        } else {
            assert!(
                state.shared_count > 0,
                "transaction {} released lock on {:?} without a shared hold",
                holder.id(),
                self.resource
            );
            state.shared_count -= 1;
        }
        self.wait_for_graph.remove_waiter(holder.id());
        // Blocked requesters no longer wait for the releaser.
        for waiter in state.waiting.iter() {
            self.wait_for_graph.remove_edge(*waiter, holder.id());
        }
        holder.remove_lock(&self.resource);
        state.check_invariants();

        state.parked = 0;
        state.wake_epoch = state.wake_epoch.wrapping_add(1);
        self.waiters.notify_all();
        debug!(
            "transaction {} released {:?}, mode now {:?}",
            holder.id(),
            self.resource,
            state.mode()
        );
        Ok(())
    }

    pub fn mode(&self) -> LockMode {
        self.state.lock().unwrap().mode()
    }

    pub fn owners(&self) -> Vec<Arc<LockHolder<R>>> {
        let state = self.state.lock().unwrap();
        state.owners.values().cloned().collect()
    }

    /// The mode held by the transaction `txn_id`, `NoLock` if it is no owner.
    pub fn lock_on(&self, txn_id: TransactionID) -> LockMode {
        let state = self.state.lock().unwrap();
        if !state.owners.contains_key(&txn_id) {
            LockMode::NoLock
        } else if state.exclusive {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        }
    }

    /// Registers `holder` as waiting for `blockers`, fails if that closes a
    /// cycle, and otherwise parks until the next wakeup.
    fn wait<'a>(
        &self,
        mut state: MutexGuard<'a, LockState<R>>,
        holder: &LockHolder<R>,
        blockers: Vec<TransactionID>,
    ) -> Result<MutexGuard<'a, LockState<R>>> {
        if let Err(e) = self.wait_for_graph.wait_for(holder.id(), blockers) {
            state.waiting.remove(&holder.id());
            return Err(e);
        }
        state.waiting.insert(holder.id());
        let epoch = state.wake_epoch;
        state.parked += 1;
        let mut state = self.waiters.wait(state).unwrap();
        if state.wake_epoch == epoch {
            // spurious
            state.parked -= 1;
        }
        Ok(state)
    }

    fn acquire_shared(
        self: &Arc<Self>,
        mut state: MutexGuard<LockState<R>>,
        holder: &Arc<LockHolder<R>>,
    ) -> Result<()> {
        // Queued requesters go first, otherwise a steady stream of readers
        // starves a pending exclusive request or upgrade.
        while state.exclusive || state.parked > 0 {
            let blockers = state.blockers(holder.id());
            state = self.wait(state, holder, blockers)?;
        }
        state.shared_count += 1;
        state.owners.insert(holder.id(), holder.clone());
        self.grant(state, holder);
        Ok(())
    }

    fn acquire_exclusive(
        self: &Arc<Self>,
        mut state: MutexGuard<LockState<R>>,
        holder: &Arc<LockHolder<R>>,
    ) -> Result<()> {
        while state.exclusive || state.shared_count > 0 {
            let blockers = state.blockers(holder.id());
            state = self.wait(state, holder, blockers)?;
        }
        state.exclusive = true;
        state.owners.insert(holder.id(), holder.clone());
        self.grant(state, holder);
        Ok(())
    }

    fn upgrade(
        self: &Arc<Self>,
        mut state: MutexGuard<LockState<R>>,
        holder: &Arc<LockHolder<R>>,
    ) -> Result<()> {
        if state.exclusive {
            return Ok(());
        }
        while state.shared_count > 1 {
            let blockers = state.blockers(holder.id());
            state = self.wait(state, holder, blockers)?;
        }
        assert_eq!(
            state.shared_count,
            1,
            "transaction {} failed to upgrade lock on {:?}: expected its own shared hold only",
            holder.id(),
            self.resource
        );
        assert!(
            !state.exclusive,
            "transaction {} failed to upgrade lock on {:?}: already exclusive",
            holder.id(),
            self.resource
        );
        state.shared_count = 0;
        state.exclusive = true;
        state.waiting.remove(&holder.id());
        self.wait_for_graph.remove_waiter(holder.id());
        state.check_invariants();
        debug!(
            "transaction {} upgraded {:?} to exclusive",
            holder.id(),
            self.resource
        );
        Ok(())
    }

    fn grant(
        self: &Arc<Self>,
        mut state: MutexGuard<LockState<R>>,
        holder: &Arc<LockHolder<R>>,
    ) {
        state.waiting.remove(&holder.id());
        self.wait_for_graph.remove_waiter(holder.id());
        holder.add_lock(self.clone());
        state.check_invariants();
        debug!(
            "transaction {} acquired {:?} in mode {:?}",
            holder.id(),
            self.resource,
            state.mode()
        );
    }
}
