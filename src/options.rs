#[cfg(debug_assertions)]
pub const LOCK_TABLE_CAPACITY: usize = 16;
#[cfg(not(debug_assertions))]
pub const LOCK_TABLE_CAPACITY: usize = 1024;

#[cfg(debug_assertions)]
pub const TRANSACTION_HISTORY_SIZE: usize = 100;
#[cfg(not(debug_assertions))]
pub const TRANSACTION_HISTORY_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct TransactionOptions {
    /// Initial capacity of the resource -> lock registry.
    pub lock_table_capacity: usize,
    /// Number of finalized transactions kept in the history.
    pub transaction_history_size: usize,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        TransactionOptions {
            lock_table_capacity: LOCK_TABLE_CAPACITY,
            transaction_history_size: TRANSACTION_HISTORY_SIZE,
        }
    }
}
