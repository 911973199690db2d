use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError, TransactionState,
};
use crate::transaction::concurrency::transaction_manager::TransactionManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

struct LockQueue {
    requests: VecDeque<LockRequest>,
    cv: Arc<Condvar>,
    /// Transaction currently upgrading its shared lock, if any. A second
    /// upgrade on the same rid aborts instead of deadlocking.
    upgrading: Option<TxnId>,
}

impl LockQueue {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            cv: Arc::new(Condvar::new()),
            upgrading: None,
        }
    }
}

/// Record-granularity shared/exclusive lock table enforcing strict
/// two-phase locking, with wound-wait deadlock avoidance: an older
/// transaction aborts every younger conflicting holder or waiter instead
/// of queueing behind it, so waits-for cycles cannot form.
///
/// One global mutex guards the whole table; each per-rid queue carries
/// its own condition variable used with that mutex.
pub struct LockManager {
    txn_manager: Arc<TransactionManager>,
    lock_table: Mutex<HashMap<Rid, LockQueue>>,
}

impl LockManager {
    pub fn new(txn_manager: Arc<TransactionManager>) -> Self {
        Self {
            txn_manager,
            lock_table: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a shared lock on `rid`. Returns `Ok(false)` when the
    /// transaction was aborted before or while waiting.
    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> Result<bool, TransactionError> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            return Err(self.abort_txn(txn, AbortReason::LockSharedOnReadUncommitted));
        }
        if txn.state() == TransactionState::Shrinking
            && txn.isolation_level() == IsolationLevel::RepeatableRead
        {
            return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
        }
        if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
            return Ok(true);
        }

        let mut table = self.lock_table.lock();
        table
            .entry(rid)
            .or_insert_with(LockQueue::new)
            .requests
            .push_back(LockRequest {
                txn_id: txn.id(),
                mode: LockMode::Shared,
                granted: false,
            });

        if !self.wait_until_grantable(&mut table, txn, rid, LockMode::Shared, false) {
            return Ok(false);
        }

        Self::mark_granted(table.get_mut(&rid).expect("queue exists"), txn.id());
        txn.add_shared_lock(rid);
        txn.set_state(TransactionState::Growing);
        Ok(true)
    }

    /// Acquire an exclusive lock on `rid`. Legal at every isolation
    /// level; writes happen even under READ_UNCOMMITTED.
    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> Result<bool, TransactionError> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.state() == TransactionState::Shrinking
            && txn.isolation_level() == IsolationLevel::RepeatableRead
        {
            return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }

        let mut table = self.lock_table.lock();
        table
            .entry(rid)
            .or_insert_with(LockQueue::new)
            .requests
            .push_back(LockRequest {
                txn_id: txn.id(),
                mode: LockMode::Exclusive,
                granted: false,
            });

        if !self.wait_until_grantable(&mut table, txn, rid, LockMode::Exclusive, false) {
            return Ok(false);
        }

        Self::mark_granted(table.get_mut(&rid).expect("queue exists"), txn.id());
        txn.add_exclusive_lock(rid);
        txn.set_state(TransactionState::Growing);
        Ok(true)
    }

    /// Upgrade a held shared lock to exclusive. Only one upgrade may be
    /// pending per rid; a second upgrader is aborted.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: Rid) -> Result<bool, TransactionError> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }
        if !txn.is_shared_locked(rid) {
            return Ok(false);
        }
        if txn.state() == TransactionState::Shrinking
            && txn.isolation_level() == IsolationLevel::RepeatableRead
        {
            return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
        }

        let mut table = self.lock_table.lock();
        let conflicting = {
            let queue = table.entry(rid).or_insert_with(LockQueue::new);
            match queue.upgrading {
                Some(other) if other != txn.id() => true,
                _ => {
                    queue.upgrading = Some(txn.id());
                    // Rewrite the existing shared request in place; the
                    // queue position is kept so older waiters stay ahead.
                    for request in queue.requests.iter_mut() {
                        if request.txn_id == txn.id() {
                            request.mode = LockMode::Exclusive;
                            request.granted = false;
                        }
                    }
                    false
                }
            }
        };
        if conflicting {
            drop(table);
            return Err(self.abort_txn(txn, AbortReason::UpgradeConflict));
        }
        txn.remove_shared_lock(rid);

        if !self.wait_until_grantable(&mut table, txn, rid, LockMode::Exclusive, true) {
            if let Some(queue) = table.get_mut(&rid) {
                if queue.upgrading == Some(txn.id()) {
                    queue.upgrading = None;
                }
            }
            return Ok(false);
        }

        let queue = table.get_mut(&rid).expect("queue exists");
        Self::mark_granted(queue, txn.id());
        queue.upgrading = None;
        txn.add_exclusive_lock(rid);
        txn.set_state(TransactionState::Growing);
        Ok(true)
    }

    /// Release whatever lock `txn` holds on `rid`. First unlock under
    /// REPEATABLE_READ moves the transaction into its shrinking phase.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut table = self.lock_table.lock();
        if !txn.is_shared_locked(rid) && !txn.is_exclusive_locked(rid) {
            return false;
        }

        if let Some(queue) = table.get_mut(&rid) {
            queue.requests.retain(|r| r.txn_id != txn.id());
            queue.cv.notify_all();
        }

        if txn.isolation_level() == IsolationLevel::RepeatableRead
            && txn.state() == TransactionState::Growing
        {
            txn.set_state(TransactionState::Shrinking);
        }
        txn.remove_shared_lock(rid);
        txn.remove_exclusive_lock(rid);
        true
    }

    /// Block on the queue's condition variable until the wait predicate
    /// clears. Returns false when the caller was aborted while waiting;
    /// its request is removed before returning.
    fn wait_until_grantable(
        &self,
        table: &mut parking_lot::MutexGuard<'_, HashMap<Rid, LockQueue>>,
        txn: &Transaction,
        rid: Rid,
        mode: LockMode,
        upgrade: bool,
    ) -> bool {
        loop {
            let queue = table.get_mut(&rid).expect("queue exists");
            let blocked = if upgrade {
                Self::upgrade_blocked(queue, txn.id())
            } else {
                Self::need_wait(&self.txn_manager, queue, txn.id(), mode)
            };
            if !blocked {
                return true;
            }
            let cv = Arc::clone(&queue.cv);
            cv.wait(table);
            if txn.state() == TransactionState::Aborted {
                if let Some(queue) = table.get_mut(&rid) {
                    queue.requests.retain(|r| r.txn_id != txn.id());
                    queue.cv.notify_all();
                }
                return false;
            }
        }
    }

    /// The wait-or-wound predicate. Considering only requests ahead of
    /// this transaction's own: if a granted incompatible request exists,
    /// wound (abort and dequeue) every incompatible younger request, then
    /// wait only if an incompatible older request is still ahead.
    fn need_wait(
        txn_manager: &TransactionManager,
        queue: &mut LockQueue,
        txn_id: TxnId,
        mode: LockMode,
    ) -> bool {
        let mut blocked = false;
        for request in queue.requests.iter() {
            if request.txn_id == txn_id {
                break;
            }
            let incompatible = mode == LockMode::Exclusive || request.mode == LockMode::Exclusive;
            if request.granted && incompatible {
                blocked = true;
                break;
            }
        }
        if !blocked {
            return false;
        }

        let mut wounded = false;
        let mut wait = false;
        let mut reached_self = false;
        queue.requests.retain(|request| {
            if reached_self || request.txn_id == txn_id {
                reached_self = true;
                return true;
            }
            let incompatible = mode == LockMode::Exclusive || request.mode == LockMode::Exclusive;
            if !incompatible {
                return true;
            }
            if request.txn_id > txn_id {
                // Younger and in the way: wound it.
                if let Some(victim) = txn_manager.get_transaction(request.txn_id) {
                    debug!("txn {} wounds younger txn {}", txn_id, request.txn_id);
                    victim.set_state(TransactionState::Aborted);
                    victim.set_abort_reason(AbortReason::Deadlock);
                }
                wounded = true;
                false
            } else {
                wait = true;
                true
            }
        });

        if wounded {
            // Wake every waiter so wounded ones observe their abort.
            queue.cv.notify_all();
        }
        wait
    }

    /// An upgrader's request keeps its queue position (usually the
    /// front), so "ahead" is meaningless for it: the upgrade may proceed
    /// only once no other transaction holds a granted lock on the rid.
    fn upgrade_blocked(queue: &LockQueue, txn_id: TxnId) -> bool {
        queue
            .requests
            .iter()
            .any(|request| request.txn_id != txn_id && request.granted)
    }

    fn mark_granted(queue: &mut LockQueue, txn_id: TxnId) {
        for request in queue.requests.iter_mut() {
            if request.txn_id == txn_id {
                request.granted = true;
            }
        }
    }

    fn abort_txn(&self, txn: &Transaction, reason: AbortReason) -> TransactionError {
        txn.set_state(TransactionState::Aborted);
        txn.set_abort_reason(reason);
        TransactionError::Aborted(txn.id(), reason)
    }
}
