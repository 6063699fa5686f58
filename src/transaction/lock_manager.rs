use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::common::config::LockManagerConfig;
use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::manager::TransactionManager;
use crate::transaction::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError, TransactionState,
};

/// Multiple-granularity lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    fn index(self) -> usize {
        match self {
            LockMode::IntentionShared => 0,
            LockMode::IntentionExclusive => 1,
            LockMode::Shared => 2,
            LockMode::SharedIntentionExclusive => 3,
            LockMode::Exclusive => 4,
        }
    }
}

// rows = held, columns = requested
#[rustfmt::skip]
const COMPATIBILITY: [[bool; 5]; 5] = [
    /* IS  */ [true,  true,  true,  true,  false],
    /* IX  */ [true,  true,  false, false, false],
    /* S   */ [true,  false, true,  false, false],
    /* SIX */ [true,  false, false, false, false],
    /* X   */ [false, false, false, false, false],
];

// rows = held, columns = requested
#[rustfmt::skip]
const UPGRADES: [[bool; 5]; 5] = [
    /* IS  */ [false, true,  true,  true,  true],
    /* IX  */ [false, false, false, true,  true],
    /* S   */ [false, false, false, true,  true],
    /* SIX */ [false, false, false, false, true],
    /* X   */ [false, false, false, false, false],
];

pub(crate) fn compatible(held: LockMode, requested: LockMode) -> bool {
    COMPATIBILITY[held.index()][requested.index()]
}

pub(crate) fn can_upgrade(held: LockMode, requested: LockMode) -> bool {
    UPGRADES[held.index()][requested.index()]
}

struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    oid: TableOid,
    rid: Option<Rid>,
    granted: bool,
}

#[derive(Default)]
struct QueueInner {
    requests: Vec<LockRequest>,
    /// The single transaction currently performing an upgrade on this queue
    upgrading: Option<TxnId>,
}

#[derive(Default)]
struct RequestQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

/// Two-phase lock manager over tables and rows with hierarchical intention
/// modes and a background waits-for deadlock detector.
pub struct LockManager {
    config: LockManagerConfig,
    table_map: Mutex<HashMap<TableOid, Arc<RequestQueue>>>,
    row_map: Mutex<HashMap<Rid, Arc<RequestQueue>>>,
    running: Arc<AtomicBool>,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    pub fn new(config: LockManagerConfig) -> Self {
        Self {
            config,
            table_map: Mutex::new(HashMap::new()),
            row_map: Mutex::new(HashMap::new()),
            running: Arc::new(AtomicBool::new(false)),
            detector: Mutex::new(None),
        }
    }

    // ---- table locks ----

    /// Acquire a table lock, blocking until it can be granted.
    ///
    /// Policy rejections return `Ok(false)` without touching the queue;
    /// protocol violations abort the transaction and return `Err`.
    pub fn lock_table(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, TransactionError> {
        let state = txn.state();
        if state == TransactionState::Committed || state == TransactionState::Aborted {
            return Ok(false);
        }
        if !table_mode_legal(txn.isolation_level(), state, mode) {
            return Ok(false);
        }

        let queue = self.table_queue(oid);
        let mut inner = queue.inner.lock();

        if let Some(pos) = inner
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        {
            let held = inner.requests[pos].mode;
            if held == mode {
                return Ok(true);
            }
            if inner.upgrading.is_some() {
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            if !can_upgrade(held, mode) {
                return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
            }
            // Drop the old grant and re-queue with upgrade priority.
            inner.requests.remove(pos);
            txn.erase_table_lock(held, oid);
            inner.upgrading = Some(txn.id());
            inner.requests.push(LockRequest {
                txn_id: txn.id(),
                mode,
                oid,
                rid: None,
                granted: false,
            });
        } else {
            inner.requests.push(LockRequest {
                txn_id: txn.id(),
                mode,
                oid,
                rid: None,
                granted: false,
            });
        }

        if !self.wait_for_grant(&queue, &mut inner, txn, mode) {
            return Ok(false);
        }
        txn.record_table_lock(mode, oid);
        debug!("txn {} locked table {} in {:?}", txn.id(), oid, mode);
        Ok(true)
    }

    /// Release a table lock, applying the two-phase state transition.
    pub fn unlock_table(&self, txn: &Transaction, oid: TableOid) -> Result<bool, TransactionError> {
        let Some(queue) = self.table_map.lock().get(&oid).cloned() else {
            return Ok(false);
        };
        let mut inner = queue.inner.lock();

        if txn.holds_row_locks_on(oid) {
            return Err(self.abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let Some(pos) = inner
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        let mode = inner.requests[pos].mode;

        if txn.isolation_level() == IsolationLevel::ReadUncommitted && mode == LockMode::Shared {
            // S is never legal under RU in the first place.
            return Ok(false);
        }
        self.apply_unlock_transition(txn, mode);

        inner.requests.remove(pos);
        txn.erase_table_lock(mode, oid);
        queue.cv.notify_all();
        Ok(true)
    }

    // ---- row locks ----

    pub fn lock_row(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        let state = txn.state();
        if state == TransactionState::Committed || state == TransactionState::Aborted {
            return Ok(false);
        }
        if !matches!(mode, LockMode::Shared | LockMode::Exclusive) {
            return Err(self.abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }

        match txn.isolation_level() {
            IsolationLevel::ReadUncommitted => {
                // Strict reading: shared row locks are rejected outright.
                if mode == LockMode::Shared {
                    return Ok(false);
                }
                if state == TransactionState::Shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if state == TransactionState::Shrinking && mode == LockMode::Exclusive {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::RepeatableRead => {
                if state == TransactionState::Shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
        }

        // Row locks require the right table-level intent first.
        let table_mode = txn.held_table_lock(oid);
        let table_ok = match mode {
            LockMode::Shared => table_mode.is_some(),
            LockMode::Exclusive => matches!(
                table_mode,
                Some(LockMode::IntentionExclusive)
                    | Some(LockMode::SharedIntentionExclusive)
                    | Some(LockMode::Exclusive)
            ),
            _ => unreachable!(),
        };
        if !table_ok {
            return Err(self.abort(txn, AbortReason::TableLockNotPresent));
        }

        let queue = self.row_queue(rid);
        let mut inner = queue.inner.lock();

        if let Some(pos) = inner
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        {
            let held = inner.requests[pos].mode;
            if held == mode {
                return Ok(true);
            }
            if inner.upgrading.is_some() {
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            if !can_upgrade(held, mode) {
                return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
            }
            inner.requests.remove(pos);
            txn.erase_row_lock(held, oid, rid);
            inner.upgrading = Some(txn.id());
            inner.requests.push(LockRequest {
                txn_id: txn.id(),
                mode,
                oid,
                rid: Some(rid),
                granted: false,
            });
        } else {
            inner.requests.push(LockRequest {
                txn_id: txn.id(),
                mode,
                oid,
                rid: Some(rid),
                granted: false,
            });
        }

        if !self.wait_for_grant(&queue, &mut inner, txn, mode) {
            return Ok(false);
        }
        txn.record_row_lock(mode, oid, rid);
        debug!("txn {} locked row {} in {:?}", txn.id(), rid, mode);
        Ok(true)
    }

    pub fn unlock_row(
        &self,
        txn: &Transaction,
        oid: TableOid,
        rid: Rid,
        force: bool,
    ) -> Result<bool, TransactionError> {
        let Some(queue) = self.row_map.lock().get(&rid).cloned() else {
            return Ok(false);
        };
        let mut inner = queue.inner.lock();

        let Some(pos) = inner
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        let mode = inner.requests[pos].mode;

        if !force {
            self.apply_unlock_transition(txn, mode);
        }

        inner.requests.remove(pos);
        txn.erase_row_lock(mode, oid, rid);
        queue.cv.notify_all();
        Ok(true)
    }

    /// Drop every lock the transaction still holds, without phase
    /// transitions. Used by commit/abort and by the deadlock victim path.
    pub fn release_all(&self, txn: &Transaction) {
        for (_, _, rid) in txn.row_locks() {
            if let Some(queue) = self.row_map.lock().get(&rid).cloned() {
                let mut inner = queue.inner.lock();
                inner.requests.retain(|r| r.txn_id != txn.id());
                if inner.upgrading == Some(txn.id()) {
                    inner.upgrading = None;
                }
                queue.cv.notify_all();
            }
        }
        for (_, oid) in txn.table_locks() {
            if let Some(queue) = self.table_map.lock().get(&oid).cloned() {
                let mut inner = queue.inner.lock();
                inner.requests.retain(|r| r.txn_id != txn.id());
                if inner.upgrading == Some(txn.id()) {
                    inner.upgrading = None;
                }
                queue.cv.notify_all();
            }
        }
        txn.clear_lock_sets();
    }

    // ---- deadlock detection ----

    /// Spawn the background detector. It wakes on the configured cadence,
    /// rebuilds the waits-for graph, and aborts the youngest transaction on
    /// each cycle until none remain.
    pub fn start_detection(self: &Arc<Self>, txn_manager: Arc<TransactionManager>) {
        self.running.store(true, Ordering::SeqCst);
        let lm = Arc::clone(self);
        let handle = std::thread::spawn(move || {
            while lm.running.load(Ordering::SeqCst) {
                std::thread::sleep(lm.config.detection_interval);
                lm.detect_once(&txn_manager);
            }
        });
        *self.detector.lock() = Some(handle);
    }

    /// Stop and join the detector thread.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector.lock().take() {
            let _ = handle.join();
        }
    }

    /// One full detection round; public so tests can drive it without the
    /// background thread.
    pub fn detect_once(&self, txn_manager: &TransactionManager) {
        loop {
            let graph = self.build_waits_for(txn_manager);
            let Some(victim) = find_cycle_victim(&graph) else {
                break;
            };
            warn!("deadlock detected, aborting youngest txn {}", victim);
            if let Some(txn) = txn_manager.get(victim) {
                txn.set_state(TransactionState::Aborted);
            }
            self.purge_everywhere(victim);
        }
    }

    /// Edges `waiter -> holder` for every incompatible (ungranted, granted)
    /// pair whose transactions are both still live.
    fn build_waits_for(&self, txn_manager: &TransactionManager) -> BTreeMap<TxnId, BTreeSet<TxnId>> {
        let mut graph: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        let queues: Vec<Arc<RequestQueue>> = {
            let tables = self.table_map.lock();
            let rows = self.row_map.lock();
            tables.values().chain(rows.values()).cloned().collect()
        };

        let aborted = |txn_id: TxnId| {
            txn_manager
                .get(txn_id)
                .map(|t| t.state() == TransactionState::Aborted)
                .unwrap_or(true)
        };

        for queue in queues {
            let inner = queue.inner.lock();
            for waiter in inner.requests.iter().filter(|r| !r.granted) {
                if aborted(waiter.txn_id) {
                    continue;
                }
                for holder in inner.requests.iter().filter(|r| r.granted) {
                    if holder.txn_id == waiter.txn_id || aborted(holder.txn_id) {
                        continue;
                    }
                    if !compatible(holder.mode, waiter.mode) {
                        graph.entry(waiter.txn_id).or_default().insert(holder.txn_id);
                    }
                }
            }
        }
        graph
    }

    /// Remove every request (granted or not) of an aborted victim and wake
    /// all affected waiters.
    fn purge_everywhere(&self, txn_id: TxnId) {
        let queues: Vec<Arc<RequestQueue>> = {
            let tables = self.table_map.lock();
            let rows = self.row_map.lock();
            tables.values().chain(rows.values()).cloned().collect()
        };
        for queue in queues {
            let mut inner = queue.inner.lock();
            let before = inner.requests.len();
            inner.requests.retain(|r| r.txn_id != txn_id);
            if inner.upgrading == Some(txn_id) {
                inner.upgrading = None;
            }
            if inner.requests.len() != before {
                queue.cv.notify_all();
            }
        }
    }

    // ---- internals ----

    fn table_queue(&self, oid: TableOid) -> Arc<RequestQueue> {
        self.table_map.lock().entry(oid).or_default().clone()
    }

    fn row_queue(&self, rid: Rid) -> Arc<RequestQueue> {
        self.row_map.lock().entry(rid).or_default().clone()
    }

    fn abort(&self, txn: &Transaction, reason: AbortReason) -> TransactionError {
        txn.set_state(TransactionState::Aborted);
        TransactionError::Abort {
            txn_id: txn.id(),
            reason,
        }
    }

    /// Park on the queue's condition variable until the request is granted
    /// or the transaction is aborted from outside. Spurious wakeups are
    /// harmless: the predicate re-runs on every iteration.
    fn wait_for_grant(
        &self,
        queue: &RequestQueue,
        inner: &mut MutexGuard<'_, QueueInner>,
        txn: &Transaction,
        mode: LockMode,
    ) -> bool {
        loop {
            if txn.state() == TransactionState::Aborted {
                inner.requests.retain(|r| r.txn_id != txn.id());
                if inner.upgrading == Some(txn.id()) {
                    inner.upgrading = None;
                }
                queue.cv.notify_all();
                return false;
            }
            if try_grant(inner, txn.id(), mode) {
                // A grant can unblock compatible requests queued behind it.
                queue.cv.notify_all();
                return true;
            }
            queue.cv.wait(inner);
        }
    }

    fn apply_unlock_transition(&self, txn: &Transaction, mode: LockMode) {
        if txn.state() != TransactionState::Growing {
            return;
        }
        let shrink = match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                matches!(mode, LockMode::Shared | LockMode::Exclusive)
            }
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                mode == LockMode::Exclusive
            }
        };
        if shrink {
            txn.set_state(TransactionState::Shrinking);
        }
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Isolation-level legality of a table lock request (§ acquisition rules).
fn table_mode_legal(level: IsolationLevel, state: TransactionState, mode: LockMode) -> bool {
    match level {
        IsolationLevel::RepeatableRead => state == TransactionState::Growing,
        IsolationLevel::ReadCommitted => match state {
            TransactionState::Growing => true,
            TransactionState::Shrinking => {
                matches!(mode, LockMode::IntentionShared | LockMode::Shared)
            }
            _ => false,
        },
        IsolationLevel::ReadUncommitted => {
            state == TransactionState::Growing
                && matches!(mode, LockMode::IntentionExclusive | LockMode::Exclusive)
        }
    }
}

/// The grant predicate: all granted requests must be compatible, an
/// in-flight upgrader jumps the queue, and otherwise FIFO order with
/// compatible requests allowed to pack in.
fn try_grant(inner: &mut QueueInner, txn_id: TxnId, mode: LockMode) -> bool {
    for r in inner.requests.iter().filter(|r| r.granted) {
        if !compatible(r.mode, mode) {
            return false;
        }
    }

    if let Some(upgrader) = inner.upgrading {
        if upgrader != txn_id {
            return false;
        }
        inner.upgrading = None;
        if let Some(r) = inner
            .requests
            .iter_mut()
            .find(|r| !r.granted && r.txn_id == txn_id)
        {
            r.granted = true;
        }
        return true;
    }

    for r in inner.requests.iter_mut().filter(|r| !r.granted) {
        if r.txn_id == txn_id {
            r.granted = true;
            return true;
        }
        if !compatible(r.mode, mode) {
            return false;
        }
    }
    false
}

/// Depth-first cycle search over the sorted waits-for graph. Successors are
/// visited in ascending txn id; the victim is the youngest (largest id)
/// transaction on the detected cycle.
fn find_cycle_victim(graph: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<TxnId> {
    let mut visited: BTreeSet<TxnId> = BTreeSet::new();

    for &start in graph.keys() {
        if visited.contains(&start) {
            continue;
        }
        let mut path: Vec<TxnId> = Vec::new();
        if let Some(victim) = dfs(start, graph, &mut visited, &mut path) {
            return Some(victim);
        }
    }
    None
}

fn dfs(
    node: TxnId,
    graph: &BTreeMap<TxnId, BTreeSet<TxnId>>,
    visited: &mut BTreeSet<TxnId>,
    path: &mut Vec<TxnId>,
) -> Option<TxnId> {
    if let Some(cycle_start) = path.iter().position(|&n| n == node) {
        return path[cycle_start..].iter().copied().max();
    }
    if visited.contains(&node) {
        return None;
    }
    visited.insert(node);
    path.push(node);
    if let Some(successors) = graph.get(&node) {
        for &next in successors {
            if let Some(victim) = dfs(next, graph, visited, path) {
                return Some(victim);
            }
        }
    }
    path.pop();
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatibility_matrix() {
        use LockMode::*;
        assert!(compatible(IntentionShared, IntentionExclusive));
        assert!(compatible(IntentionShared, SharedIntentionExclusive));
        assert!(!compatible(IntentionShared, Exclusive));
        assert!(compatible(IntentionExclusive, IntentionExclusive));
        assert!(!compatible(IntentionExclusive, Shared));
        assert!(compatible(Shared, Shared));
        assert!(!compatible(Shared, IntentionExclusive));
        assert!(compatible(SharedIntentionExclusive, IntentionShared));
        assert!(!compatible(SharedIntentionExclusive, Shared));
        assert!(!compatible(Exclusive, IntentionShared));
    }

    #[test]
    fn test_upgrade_matrix() {
        use LockMode::*;
        assert!(can_upgrade(IntentionShared, Exclusive));
        assert!(can_upgrade(Shared, SharedIntentionExclusive));
        assert!(can_upgrade(Shared, Exclusive));
        assert!(!can_upgrade(Shared, IntentionShared));
        assert!(!can_upgrade(Exclusive, Shared));
        assert!(!can_upgrade(SharedIntentionExclusive, Shared));
        assert!(can_upgrade(SharedIntentionExclusive, Exclusive));
    }

    #[test]
    fn test_cycle_victim_is_youngest() {
        let mut graph: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        graph.entry(1).or_default().insert(2);
        graph.entry(2).or_default().insert(1);
        assert_eq!(find_cycle_victim(&graph), Some(2));

        let mut graph: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        graph.entry(3).or_default().insert(5);
        graph.entry(5).or_default().insert(9);
        graph.entry(9).or_default().insert(3);
        assert_eq!(find_cycle_victim(&graph), Some(9));
    }

    #[test]
    fn test_no_cycle_no_victim() {
        let mut graph: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        graph.entry(1).or_default().insert(2);
        graph.entry(2).or_default().insert(3);
        assert_eq!(find_cycle_victim(&graph), None);
    }
}
