#[macro_use]
extern crate log;

pub use transactions::lock::point_lock_manager::PointLockManager;
pub use transactions::lock::{Lock, LockHolder, LockManager, LockMode, Resource, WaitForGraph};
pub use transactions::transaction::{Transaction, TransactionStatus};
pub use transactions::transaction_manager::{TransactionManager, TransactionMetadata};
pub use transactions::TransactionID;

pub mod error;
pub mod options;
pub mod transactions;

pub type Result<T> = std::result::Result<T, error::TxLockError>;
