use crate::error::TxLockError;
use crate::transactions::TransactionID;
use crate::Result;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Directed graph of lock holders; an edge `waiter -> blocker` exists while
/// `waiter` is parked inside `Lock::acquire` behind `blocker`.
///
/// Adjacency lists live in a [`DashMap`], so `add`/`remove` from unrelated
/// locks only contend on the shard of the waiter. Refreshing a waiter's
/// edges together with the cycle check is serialized by `detection`, which
/// makes the request that closes a cycle the only one to observe it.
#[derive(Default)]
pub struct WaitForGraph {
    edges: DashMap<TransactionID, HashSet<TransactionID>>,
    detection: Mutex<()>,
}

impl WaitForGraph {
    pub fn new() -> WaitForGraph {
        WaitForGraph::default()
    }

    /// Adds one edge per blocker. Repeated calls do not accumulate duplicates.
    pub fn add(&self, waiter: TransactionID, blockers: impl IntoIterator<Item = TransactionID>) {
        let mut entry = self.edges.entry(waiter).or_insert_with(HashSet::new);
        entry.extend(blockers.into_iter().filter(|b| *b != waiter));
    }

    /// Removes the edges where `holder` is the waiter.
    pub fn remove_waiter(&self, holder: TransactionID) {
        self.edges.remove(&holder);
    }

    /// Removes the single edge `waiter -> blocker`.
    pub fn remove_edge(&self, waiter: TransactionID, blocker: TransactionID) {
        if let Some(mut blockers) = self.edges.get_mut(&waiter) {
            blockers.remove(&blocker);
        }
    }

    /// Removes every edge `holder` takes part in, as source or target.
    pub fn remove(&self, holder: TransactionID) {
        self.edges.remove(&holder);
        for mut entry in self.edges.iter_mut() {
            entry.value_mut().remove(&holder);
        }
        self.edges.retain(|_, blockers| !blockers.is_empty());
    }

    /// Replaces the edges of `waiter` with `blockers` and checks whether that
    /// closes a cycle. On a deadlock the edges of `waiter` are dropped again,
    /// since the caller is about to fail instead of waiting.
    pub(crate) fn wait_for(
        &self,
        waiter: TransactionID,
        blockers: impl IntoIterator<Item = TransactionID>,
    ) -> Result<()> {
        let _guard = self.detection.lock().unwrap();
        self.remove_waiter(waiter);
        self.add(waiter, blockers);
        if let Err(e) = self.detect_deadlock(waiter) {
            self.remove_waiter(waiter);
            return Err(e);
        }
        Ok(())
    }

    /// Depth-first search from `start`. Fails if `start` can reach itself.
    pub fn detect_deadlock(&self, start: TransactionID) -> Result<()> {
        let mut parents: HashMap<TransactionID, TransactionID> = HashMap::new();
        let mut visited: HashSet<TransactionID> = HashSet::new();
        let mut stack = vec![start];
        visited.insert(start);

        while let Some(node) = stack.pop() {
            // Clone the adjacency list so no shard guard is held during the walk.
            let blockers: Vec<TransactionID> = match self.edges.get(&node) {
                Some(entry) => entry.value().iter().copied().collect(),
                None => continue,
            };
            for blocker in blockers {
                if blocker == start {
                    let cycle = Self::trace_cycle(&parents, start, node);
                    warn!("deadlock detected for transaction {}: {:?}", start, cycle);
                    return Err(TxLockError::Deadlock {
                        requester: start,
                        cycle,
                    });
                }
                if visited.insert(blocker) {
                    parents.insert(blocker, node);
                    stack.push(blocker);
                }
            }
        }
        Ok(())
    }

    fn trace_cycle(
        parents: &HashMap<TransactionID, TransactionID>,
        start: TransactionID,
        last: TransactionID,
    ) -> Vec<TransactionID> {
        let mut cycle = vec![last];
        let mut node = last;
        while node != start {
            node = parents[&node];
            cycle.push(node);
        }
        cycle.reverse();
        cycle
    }

    /// Holders `waiter` is currently blocked behind, in id order.
    pub fn waiting_for(&self, waiter: TransactionID) -> Vec<TransactionID> {
        let mut blockers: Vec<TransactionID> = match self.edges.get(&waiter) {
            Some(entry) => entry.value().iter().copied().collect(),
            None => vec![],
        };
        blockers.sort_unstable();
        blockers
    }

    pub fn num_edges(&self) -> usize {
        self.edges.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.num_edges() == 0
    }
}
