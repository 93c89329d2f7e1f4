use crate::transactions::lock::LockMode;
use crate::transactions::transaction::TransactionStatus;
use crate::transactions::TransactionID;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TxLockError {
    /// Raised by the request that closes a cycle in the wait-for graph.
    #[error("transaction {requester} deadlocked (cycle: {cycle:?})")]
    Deadlock {
        requester: TransactionID,
        cycle: Vec<TransactionID>,
    },

    #[error("lock mode {0:?} cannot be explicitly acquired")]
    InvalidLockMode(LockMode),

    #[error("transaction {holder} does not hold a lock on {resource}")]
    LockNotHeld {
        holder: TransactionID,
        resource: String,
    },

    #[error("no lock exists for resource {0}")]
    UnknownResource(String),

    #[error("cannot {action} transaction {txn} in state {state:?}")]
    InvalidTransactionState {
        txn: TransactionID,
        state: TransactionStatus,
        action: &'static str,
    },
}

impl TxLockError {
    #[inline]
    pub fn is_deadlock(&self) -> bool {
        matches!(self, TxLockError::Deadlock { .. })
    }
}
