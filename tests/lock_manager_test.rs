use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use corrodb::common::config::LockManagerConfig;
use corrodb::common::types::Rid;
use corrodb::transaction::{
    AbortReason, IsolationLevel, LockManager, LockMode, TransactionError, TransactionManager,
    TransactionState,
};

fn setup() -> (Arc<LockManager>, Arc<TransactionManager>) {
    (
        Arc::new(LockManager::new(LockManagerConfig::default())),
        Arc::new(TransactionManager::new()),
    )
}

fn abort_reason(err: TransactionError) -> AbortReason {
    let TransactionError::Abort { reason, .. } = err;
    reason
}

#[test]
fn test_basic_lock_unlock_inversion() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::Shared, 1)?);
    assert_eq!(txn.held_table_lock(1), Some(LockMode::Shared));

    assert!(lm.unlock_table(&txn, 1)?);
    assert_eq!(txn.held_table_lock(1), None);
    assert!(txn.table_locks().is_empty());
    assert!(txn.row_locks().is_empty());

    // Releasing S under REPEATABLE_READ starts the shrinking phase.
    assert_eq!(txn.state(), TransactionState::Shrinking);
    Ok(())
}

#[test]
fn test_lock_is_idempotent_per_mode() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::Shared, 1)?);
    assert!(lm.lock_table(&txn, LockMode::Shared, 1)?);
    assert_eq!(txn.table_locks().len(), 1);

    assert!(lm.unlock_table(&txn, 1)?);
    // Nothing left to unlock now.
    assert!(matches!(
        lm.unlock_table(&txn, 1).map_err(abort_reason),
        Err(AbortReason::AttemptedUnlockButNoLockHeld)
    ));
    Ok(())
}

#[test]
fn test_unlock_unknown_resource_returns_false() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    // No queue exists for this table at all.
    assert!(!lm.unlock_table(&txn, 42)?);
    Ok(())
}

#[test]
fn test_shared_locks_coexist() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, 1)?);
    assert!(lm.lock_table(&t2, LockMode::Shared, 1)?);
    assert!(lm.lock_table(&t1, LockMode::IntentionShared, 2)?);
    assert!(lm.lock_table(&t2, LockMode::IntentionExclusive, 2)?);
    Ok(())
}

#[test]
fn test_read_uncommitted_table_legality() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::ReadUncommitted);

    // Only IX and X are legal while growing.
    assert!(!lm.lock_table(&txn, LockMode::Shared, 1)?);
    assert!(!lm.lock_table(&txn, LockMode::IntentionShared, 1)?);
    assert!(!lm.lock_table(&txn, LockMode::SharedIntentionExclusive, 1)?);
    assert!(lm.lock_table(&txn, LockMode::IntentionExclusive, 1)?);
    assert!(lm.lock_table(&txn, LockMode::Exclusive, 2)?);
    Ok(())
}

#[test]
fn test_read_committed_shrinking_allows_only_is_and_s() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::ReadCommitted);

    assert!(lm.lock_table(&txn, LockMode::Exclusive, 1)?);
    assert!(lm.unlock_table(&txn, 1)?);
    assert_eq!(txn.state(), TransactionState::Shrinking);

    assert!(lm.lock_table(&txn, LockMode::IntentionShared, 2)?);
    assert!(lm.lock_table(&txn, LockMode::Shared, 3)?);
    assert!(!lm.lock_table(&txn, LockMode::IntentionExclusive, 4)?);
    assert!(!lm.lock_table(&txn, LockMode::Exclusive, 5)?);
    Ok(())
}

#[test]
fn test_repeatable_read_shrinking_rejects_all() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::Shared, 1)?);
    assert!(lm.unlock_table(&txn, 1)?);
    assert_eq!(txn.state(), TransactionState::Shrinking);

    assert!(!lm.lock_table(&txn, LockMode::Shared, 2)?);
    assert!(!lm.lock_table(&txn, LockMode::IntentionShared, 2)?);
    Ok(())
}

#[test]
fn test_row_lock_requires_table_lock() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 1);

    let err = lm.lock_row(&txn, LockMode::Shared, 1, rid).unwrap_err();
    assert_eq!(abort_reason(err), AbortReason::TableLockNotPresent);
    assert_eq!(txn.state(), TransactionState::Aborted);

    // X rows need an exclusive-compatible table intent, IS is not enough.
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&txn, LockMode::IntentionShared, 1)?);
    let err = lm.lock_row(&txn, LockMode::Exclusive, 1, rid).unwrap_err();
    assert_eq!(abort_reason(err), AbortReason::TableLockNotPresent);
    Ok(())
}

#[test]
fn test_intention_mode_on_row_aborts() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&txn, LockMode::IntentionExclusive, 1)?);

    let err = lm
        .lock_row(&txn, LockMode::IntentionShared, 1, Rid::new(1, 1))
        .unwrap_err();
    assert_eq!(abort_reason(err), AbortReason::AttemptedIntentionLockOnRow);
    assert_eq!(txn.state(), TransactionState::Aborted);
    Ok(())
}

#[test]
fn test_shared_row_under_read_uncommitted_is_rejected() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::ReadUncommitted);
    assert!(lm.lock_table(&txn, LockMode::IntentionExclusive, 1)?);

    // Rejected without aborting: the strict interpretation.
    assert!(!lm.lock_row(&txn, LockMode::Shared, 1, Rid::new(1, 1))?);
    assert_eq!(txn.state(), TransactionState::Growing);

    assert!(lm.lock_row(&txn, LockMode::Exclusive, 1, Rid::new(1, 1))?);
    Ok(())
}

#[test]
fn test_unlock_table_with_rows_still_held() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 1);

    assert!(lm.lock_table(&txn, LockMode::IntentionExclusive, 1)?);
    assert!(lm.lock_row(&txn, LockMode::Exclusive, 1, rid)?);

    let err = lm.unlock_table(&txn, 1).unwrap_err();
    assert_eq!(
        abort_reason(err),
        AbortReason::TableUnlockedBeforeUnlockingRows
    );

    // Rows first, then the table goes cleanly.
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&txn, LockMode::IntentionExclusive, 2)?);
    assert!(lm.lock_row(&txn, LockMode::Exclusive, 2, rid)?);
    assert!(lm.unlock_row(&txn, 2, rid, false)?);
    assert!(lm.unlock_table(&txn, 2)?);
    assert!(txn.table_locks().is_empty() && txn.row_locks().is_empty());
    Ok(())
}

#[test]
fn test_row_lock_upgrade_s_to_x() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(3, 0);

    assert!(lm.lock_table(&txn, LockMode::IntentionExclusive, 1)?);
    assert!(lm.lock_row(&txn, LockMode::Shared, 1, rid)?);
    assert!(lm.lock_row(&txn, LockMode::Exclusive, 1, rid)?);
    assert!(txn.holds_row_lock(LockMode::Exclusive, 1, rid));
    assert!(!txn.holds_row_lock(LockMode::Shared, 1, rid));
    Ok(())
}

#[test]
fn test_incompatible_upgrade_aborts() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::Exclusive, 1)?);
    let err = lm.lock_table(&txn, LockMode::Shared, 1).unwrap_err();
    assert_eq!(abort_reason(err), AbortReason::IncompatibleUpgrade);
    assert_eq!(txn.state(), TransactionState::Aborted);
    Ok(())
}

#[test]
fn test_exclusive_blocks_until_release() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Exclusive, 1)?);

    let waiter = {
        let lm = lm.clone();
        let t2 = t2.clone();
        thread::spawn(move || lm.lock_table(&t2, LockMode::Exclusive, 1))
    };
    // Give the waiter time to park.
    thread::sleep(Duration::from_millis(50));
    assert!(!waiter.is_finished());

    tm.commit(&t1, &lm);
    let granted = waiter.join().unwrap()?;
    assert!(granted);
    assert_eq!(t2.held_table_lock(1), Some(LockMode::Exclusive));
    Ok(())
}

#[test]
fn test_upgrade_conflict_scenario() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, 1)?);
    assert!(lm.lock_table(&t2, LockMode::Shared, 1)?);

    // T1 starts an upgrade and parks behind T2's shared lock.
    let upgrader = {
        let lm = lm.clone();
        let t1 = t1.clone();
        thread::spawn(move || lm.lock_table(&t1, LockMode::Exclusive, 1))
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!upgrader.is_finished());

    // T2 now also tries to upgrade: the slot is taken.
    let err = lm.lock_table(&t2, LockMode::Exclusive, 1).unwrap_err();
    assert_eq!(abort_reason(err), AbortReason::UpgradeConflict);
    assert_eq!(t2.state(), TransactionState::Aborted);

    // Releasing the aborted transaction's locks lets T1 through.
    lm.release_all(&t2);
    let granted = upgrader.join().unwrap()?;
    assert!(granted);
    assert_eq!(t1.held_table_lock(1), Some(LockMode::Exclusive));
    Ok(())
}

#[test]
fn test_deadlock_detection_aborts_youngest() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    // T1 holds X(A), T2 holds X(B).
    assert!(lm.lock_table(&t1, LockMode::Exclusive, 100)?);
    assert!(lm.lock_table(&t2, LockMode::Exclusive, 200)?);

    // Cross requests: T1 -> X(B), T2 -> X(A).
    let h1 = {
        let lm = lm.clone();
        let t1 = t1.clone();
        thread::spawn(move || lm.lock_table(&t1, LockMode::Exclusive, 200))
    };
    let h2 = {
        let lm = lm.clone();
        let t2 = t2.clone();
        thread::spawn(move || lm.lock_table(&t2, LockMode::Exclusive, 100))
    };
    thread::sleep(Duration::from_millis(100));

    lm.detect_once(&tm);

    // The youngest transaction on the cycle dies; its lock call fails.
    assert_eq!(t2.state(), TransactionState::Aborted);
    assert!(!h2.join().unwrap()?);

    // The victim's locks are freed so the survivor proceeds.
    lm.release_all(&t2);
    assert!(h1.join().unwrap()?);
    assert_eq!(t1.state(), TransactionState::Growing);
    Ok(())
}

#[test]
fn test_background_detector_breaks_deadlock() -> Result<()> {
    let lm = Arc::new(LockManager::new(LockManagerConfig {
        detection_interval: Duration::from_millis(20),
    }));
    let tm = Arc::new(TransactionManager::new());
    lm.start_detection(tm.clone());

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&t1, LockMode::Exclusive, 1)?);
    assert!(lm.lock_table(&t2, LockMode::Exclusive, 2)?);

    let h1 = {
        let lm = lm.clone();
        let t1 = t1.clone();
        thread::spawn(move || lm.lock_table(&t1, LockMode::Exclusive, 2))
    };
    let h2 = {
        let lm = lm.clone();
        let t2 = t2.clone();
        thread::spawn(move || lm.lock_table(&t2, LockMode::Exclusive, 1))
    };

    // The detector must abort T2 and unblock both threads.
    let r2 = h2.join().unwrap()?;
    assert!(!r2);
    assert_eq!(t2.state(), TransactionState::Aborted);

    tm.abort(&t2, &lm);
    assert!(h1.join().unwrap()?);

    lm.shutdown();
    Ok(())
}

#[test]
fn test_release_all_clears_everything() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::IntentionExclusive, 1)?);
    assert!(lm.lock_row(&txn, LockMode::Exclusive, 1, Rid::new(1, 0))?);
    assert!(lm.lock_row(&txn, LockMode::Exclusive, 1, Rid::new(1, 1))?);

    tm.commit(&txn, &lm);
    assert!(txn.table_locks().is_empty());
    assert!(txn.row_locks().is_empty());
    assert_eq!(txn.state(), TransactionState::Committed);
    Ok(())
}
