pub(crate) mod lock_holder;
pub(crate) mod object_lock;
pub mod point_lock_manager;
pub(crate) mod wait_for_graph;

pub use lock_holder::LockHolder;
pub use object_lock::Lock;
pub use wait_for_graph::WaitForGraph;

use crate::Result;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Anything that identifies a lockable database object.
pub trait Resource: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Hash + Debug + Send + Sync + 'static> Resource for T {}

/// Ordered by exclusivity: `NoLock < Shared < Exclusive`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockMode {
    NoLock = 0,
    Shared = 1,
    Exclusive = 2,
}

impl Default for LockMode {
    fn default() -> Self {
        LockMode::NoLock
    }
}

pub trait LockManager<R: Resource>: Send + Sync {
    fn new() -> Self
    where
        Self: Sized;

    fn with_capacity(capacity: usize) -> Self
    where
        Self: Sized;

    /// Blocks until `holder` holds `resource` in `mode`, or fails with
    /// [`TxLockError::Deadlock`](crate::error::TxLockError::Deadlock) if waiting would close a cycle.
    fn acquire(&self, holder: &Arc<LockHolder<R>>, resource: &R, mode: LockMode) -> Result<()>;

    fn release(&self, holder: &LockHolder<R>, resource: &R) -> Result<()>;

    /// Releases every lock `holder` owns. Called once at commit or rollback.
    fn release_all(&self, holder: &LockHolder<R>) -> Result<()>;

    fn owners_of(&self, resource: &R) -> Vec<Arc<LockHolder<R>>>;

    fn mode_of(&self, resource: &R) -> LockMode;

    /// The mode `holder` itself holds on `resource`.
    fn lock_on(&self, holder: &LockHolder<R>, resource: &R) -> LockMode;

    fn locks_held_by(&self, holder: &LockHolder<R>) -> Vec<R>;

    fn num_locks(&self) -> usize;

    fn wait_for_graph(&self) -> &WaitForGraph;
}
