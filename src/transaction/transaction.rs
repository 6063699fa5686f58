use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::lock_manager::LockMode;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Reasons a lock manager call kills a transaction
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    #[error("another transaction is already upgrading on this queue")]
    UpgradeConflict,
    #[error("the upgrade matrix forbids this transition")]
    IncompatibleUpgrade,
    #[error("intention locks are not allowed on rows")]
    AttemptedIntentionLockOnRow,
    #[error("row lock requested without an appropriate table lock")]
    TableLockNotPresent,
    #[error("table unlocked while row locks on it are still held")]
    TableUnlockedBeforeUnlockingRows,
    #[error("no lock held on the resource being unlocked")]
    AttemptedUnlockButNoLockHeld,
    #[error("lock request violates the shrinking phase")]
    LockOnShrinking,
}

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("transaction {txn_id} aborted: {reason}")]
    Abort { txn_id: TxnId, reason: AbortReason },
}

/// Held-lock bookkeeping, mutated only while the owning request queue's
/// latch is held.
#[derive(Default)]
pub struct LockSets {
    pub shared_table: HashSet<TableOid>,
    pub exclusive_table: HashSet<TableOid>,
    pub intention_shared_table: HashSet<TableOid>,
    pub intention_exclusive_table: HashSet<TableOid>,
    pub shared_intention_exclusive_table: HashSet<TableOid>,
    pub shared_rows: HashMap<TableOid, HashSet<Rid>>,
    pub exclusive_rows: HashMap<TableOid, HashSet<Rid>>,
}

impl LockSets {
    fn table_set_mut(&mut self, mode: LockMode) -> &mut HashSet<TableOid> {
        match mode {
            LockMode::Shared => &mut self.shared_table,
            LockMode::Exclusive => &mut self.exclusive_table,
            LockMode::IntentionShared => &mut self.intention_shared_table,
            LockMode::IntentionExclusive => &mut self.intention_exclusive_table,
            LockMode::SharedIntentionExclusive => &mut self.shared_intention_exclusive_table,
        }
    }
}

/// An active transaction. The structure itself is shared between the worker
/// thread and the deadlock detector, hence the interior locks.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: RwLock<TransactionState>,
    locks: Mutex<LockSets>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: RwLock::new(TransactionState::Growing),
            locks: Mutex::new(LockSets::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.write() = state;
    }

    pub(crate) fn record_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.locks.lock().table_set_mut(mode).insert(oid);
    }

    pub(crate) fn erase_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.locks.lock().table_set_mut(mode).remove(&oid);
    }

    pub(crate) fn record_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) {
        let mut locks = self.locks.lock();
        let rows = match mode {
            LockMode::Shared => &mut locks.shared_rows,
            LockMode::Exclusive => &mut locks.exclusive_rows,
            _ => unreachable!("intention locks never reach row bookkeeping"),
        };
        rows.entry(oid).or_default().insert(rid);
    }

    pub(crate) fn erase_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) {
        let mut locks = self.locks.lock();
        let rows = match mode {
            LockMode::Shared => &mut locks.shared_rows,
            LockMode::Exclusive => &mut locks.exclusive_rows,
            _ => unreachable!("intention locks never reach row bookkeeping"),
        };
        if let Some(set) = rows.get_mut(&oid) {
            set.remove(&rid);
            if set.is_empty() {
                rows.remove(&oid);
            }
        }
    }

    /// Mode of the table lock this transaction holds on `oid`, if any.
    pub fn held_table_lock(&self, oid: TableOid) -> Option<LockMode> {
        let locks = self.locks.lock();
        if locks.exclusive_table.contains(&oid) {
            Some(LockMode::Exclusive)
        } else if locks.shared_intention_exclusive_table.contains(&oid) {
            Some(LockMode::SharedIntentionExclusive)
        } else if locks.intention_exclusive_table.contains(&oid) {
            Some(LockMode::IntentionExclusive)
        } else if locks.shared_table.contains(&oid) {
            Some(LockMode::Shared)
        } else if locks.intention_shared_table.contains(&oid) {
            Some(LockMode::IntentionShared)
        } else {
            None
        }
    }

    /// Does this transaction still hold any row lock under the table?
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        let locks = self.locks.lock();
        locks.shared_rows.get(&oid).is_some_and(|s| !s.is_empty())
            || locks.exclusive_rows.get(&oid).is_some_and(|s| !s.is_empty())
    }

    pub fn holds_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) -> bool {
        let locks = self.locks.lock();
        let rows = match mode {
            LockMode::Shared => &locks.shared_rows,
            LockMode::Exclusive => &locks.exclusive_rows,
            _ => return false,
        };
        rows.get(&oid).is_some_and(|s| s.contains(&rid))
    }

    /// Snapshot of every held table lock as `(mode, oid)`.
    pub fn table_locks(&self) -> Vec<(LockMode, TableOid)> {
        let locks = self.locks.lock();
        let mut out = Vec::new();
        for &oid in &locks.intention_shared_table {
            out.push((LockMode::IntentionShared, oid));
        }
        for &oid in &locks.intention_exclusive_table {
            out.push((LockMode::IntentionExclusive, oid));
        }
        for &oid in &locks.shared_table {
            out.push((LockMode::Shared, oid));
        }
        for &oid in &locks.shared_intention_exclusive_table {
            out.push((LockMode::SharedIntentionExclusive, oid));
        }
        for &oid in &locks.exclusive_table {
            out.push((LockMode::Exclusive, oid));
        }
        out
    }

    /// Snapshot of every held row lock as `(mode, oid, rid)`.
    pub fn row_locks(&self) -> Vec<(LockMode, TableOid, Rid)> {
        let locks = self.locks.lock();
        let mut out = Vec::new();
        for (&oid, rids) in &locks.shared_rows {
            for &rid in rids {
                out.push((LockMode::Shared, oid, rid));
            }
        }
        for (&oid, rids) in &locks.exclusive_rows {
            for &rid in rids {
                out.push((LockMode::Exclusive, oid, rid));
            }
        }
        out
    }

    pub(crate) fn clear_lock_sets(&self) {
        *self.locks.lock() = LockSets::default();
    }
}
