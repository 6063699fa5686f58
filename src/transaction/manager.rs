use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::{IsolationLevel, Transaction, TransactionState};

/// Hands out transactions with monotone ids and keeps the registry the
/// deadlock detector aborts victims through.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    txn_map: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU32::new(0),
            txn_map: Mutex::new(HashMap::new()),
        }
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(id, isolation_level));
        self.txn_map.lock().insert(id, txn.clone());
        txn
    }

    pub fn get(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.txn_map.lock().get(&txn_id).cloned()
    }

    /// Commit: release every held lock, then mark the transaction committed.
    pub fn commit(&self, txn: &Transaction, lock_manager: &LockManager) {
        lock_manager.release_all(txn);
        txn.set_state(TransactionState::Committed);
    }

    /// Abort: mark aborted first so waiters bail out, then free the locks.
    pub fn abort(&self, txn: &Transaction, lock_manager: &LockManager) {
        txn.set_state(TransactionState::Aborted);
        lock_manager.release_all(txn);
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotone_txn_ids() {
        let tm = TransactionManager::new();
        let a = tm.begin(IsolationLevel::RepeatableRead);
        let b = tm.begin(IsolationLevel::ReadCommitted);
        assert!(a.id() < b.id());
        assert!(tm.get(a.id()).is_some());
        assert!(tm.get(999).is_none());
    }

    #[test]
    fn test_commit_and_abort_states() {
        let tm = TransactionManager::new();
        let lm = LockManager::new(Default::default());

        let txn = tm.begin(IsolationLevel::RepeatableRead);
        tm.commit(&txn, &lm);
        assert_eq!(txn.state(), TransactionState::Committed);

        let txn = tm.begin(IsolationLevel::RepeatableRead);
        tm.abort(&txn, &lm);
        assert_eq!(txn.state(), TransactionState::Aborted);
    }
}
