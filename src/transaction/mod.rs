mod lock_manager;
mod manager;
mod transaction;

pub use lock_manager::{LockManager, LockMode};
pub use manager::TransactionManager;
pub use transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError, TransactionState,
};
