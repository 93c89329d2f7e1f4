pub mod lock;
pub mod transaction;
pub mod transaction_manager;

pub type TransactionID = u64;
pub const TRANSACTION_NULL: TransactionID = 0;
