//! Pessimistic lock manager
//!
//! Per-key reader/writer lock queues ordered by transaction timestamp.
//! Conflicts are resolved by wound-wait: a request finding a *younger*
//! transaction already holding a conflicting lock fails fast with
//! `LockConflict` instead of waiting, so the wait-for graph never contains
//! a younger→older edge and deadlock is impossible.
//!
//! ## Queue invariants
//!
//! For every key's `LockState`:
//! - at most one exclusive holder among `locked` waiters, and if present it
//!   is the oldest waiter in the queue;
//! - the `locked` shared waiters form a contiguous prefix starting at the
//!   oldest waiter;
//! - a waiter with `upgraded == true` is never `locked` (it is waiting to
//!   be promoted to exclusive);
//! - `marked_for_remove` implies the waiter map is empty.
//!
//! ## Locking discipline
//!
//! Each per-key `LockState` sits behind its own `parking_lot::Mutex`; the
//! global key→state mapping is a `DashMap`. Completion signals are always
//! sent after the per-key guard is dropped, so no user continuation runs
//! under a lock-state mutex. Acquisition retries its outer loop when it
//! observes a state already `marked_for_remove` (obsolete, just removed
//! from the map by another thread).

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;
use tessera_core::{Error, Key, Result, TxId};
use tokio::sync::oneshot;

/// One entry in a key's lock queue
#[derive(Debug)]
struct Waiter {
    /// Shared (read) request, as opposed to exclusive
    for_read: bool,
    /// A read holder attempting to become exclusive
    upgraded: bool,
    /// Currently granted
    locked: bool,
    /// One-shot completion for a pending request
    signal: Option<oneshot::Sender<Result<()>>>,
}

impl Waiter {
    fn shared() -> Self {
        Waiter {
            for_read: true,
            upgraded: false,
            locked: false,
            signal: None,
        }
    }

    fn exclusive() -> Self {
        Waiter {
            for_read: false,
            upgraded: false,
            locked: false,
            signal: None,
        }
    }
}

/// Deferred completion: sent strictly after the per-key mutex is released
type Signal = (oneshot::Sender<Result<()>>, Result<()>);

/// Outcome of a single acquisition attempt under the per-key mutex
enum Attempt {
    /// Granted (or reentered) immediately
    Granted,
    /// Wound-wait rejection; the conflicting holder is reported
    Rejected(TxId),
    /// Enqueued; the receiver completes when the grant rules reach it
    Wait(oneshot::Receiver<Result<()>>),
    /// Caller misuse or invariant violation
    Fault(Error),
}

/// Lock queue for one key
#[derive(Debug, Default)]
struct LockState {
    /// Waiters ordered by transaction id; queue order IS timestamp order
    waiters: BTreeMap<TxId, Waiter>,
    /// Set when the last waiter leaves; the state is obsolete and about to
    /// be removed from the global map
    marked_for_remove: bool,
}

impl LockState {
    /// Youngest granted waiter strictly after `tx`, filtered by `exclusive_only`
    fn younger_locked(&self, tx: &TxId, exclusive_only: bool) -> Option<TxId> {
        self.waiters
            .range((Excluded(tx), Unbounded))
            .filter(|(_, w)| w.locked && (!exclusive_only || !w.for_read))
            .map(|(id, _)| *id)
            .next_back()
    }

    fn oldest(&self) -> Option<TxId> {
        self.waiters.keys().next().copied()
    }

    fn any_locked(&self) -> bool {
        self.waiters.values().any(|w| w.locked)
    }

    fn try_acquire_exclusive(&mut self, tx: TxId) -> Attempt {
        let mut upgrading = false;
        match self.waiters.get_mut(&tx) {
            Some(w) if w.locked && !w.for_read => return Attempt::Granted,
            Some(w) if w.locked && w.for_read => {
                // Held shared lock becomes an upgrade request. The grant is
                // dropped for the duration of the attempt; a rejection
                // restores it below.
                w.locked = false;
                w.upgraded = true;
                upgrading = true;
            }
            Some(_) => {
                return Attempt::Fault(Error::internal(format!(
                    "{tx} already has a pending request; per-key operations \
                     within one transaction must be serialized"
                )));
            }
            None => {
                self.waiters.insert(tx, Waiter::exclusive());
            }
        }

        // Wound-wait: any younger granted waiter rejects the request.
        if let Some(conflicting) = self.younger_locked(&tx, false) {
            if upgrading {
                let w = self.waiters.get_mut(&tx).expect("upgrading waiter present");
                w.upgraded = false;
                w.locked = true;
            } else {
                self.waiters.remove(&tx);
            }
            return Attempt::Rejected(conflicting);
        }

        if self.oldest() == Some(tx) {
            let w = self.waiters.get_mut(&tx).expect("oldest waiter present");
            w.locked = true;
            w.upgraded = false;
            w.for_read = false;
            return Attempt::Granted;
        }

        let (sx, rx) = oneshot::channel();
        let w = self.waiters.get_mut(&tx).expect("inserted waiter present");
        w.signal = Some(sx);
        Attempt::Wait(rx)
    }

    fn try_acquire_shared(&mut self, tx: TxId) -> Attempt {
        match self.waiters.get(&tx) {
            // Reenter on any held mode.
            Some(w) if w.locked => return Attempt::Granted,
            Some(_) => {
                return Attempt::Fault(Error::internal(format!(
                    "{tx} already has a pending request; per-key operations \
                     within one transaction must be serialized"
                )));
            }
            None => {
                self.waiters.insert(tx, Waiter::shared());
            }
        }

        // Wound-wait: a younger granted *exclusive* waiter rejects a read.
        if let Some(conflicting) = self.younger_locked(&tx, true) {
            self.waiters.remove(&tx);
            return Attempt::Rejected(conflicting);
        }

        // Grant if there is no older waiter, or the immediately-older waiter
        // is a granted shared waiter (contiguous read prefix, inductively).
        let grantable = match self.waiters.range(..tx).next_back() {
            None => true,
            Some((_, prev)) => prev.locked && prev.for_read,
        };
        if grantable {
            let w = self.waiters.get_mut(&tx).expect("inserted waiter present");
            w.locked = true;
            return Attempt::Granted;
        }

        let (sx, rx) = oneshot::channel();
        let w = self.waiters.get_mut(&tx).expect("inserted waiter present");
        w.signal = Some(sx);
        Attempt::Wait(rx)
    }

    /// Head walk after an exclusive release
    ///
    /// Grants the next exclusive waiter, or the contiguous shared prefix.
    /// Any `upgraded` waiter reached at the head is invalidated: its upgrade
    /// future fails with `LockConflict` against the released writer, and its
    /// record is downgraded back to a granted read lock. An upgrade must not
    /// succeed across an intervening exclusive writer.
    fn grants_after_exclusive_release(&mut self, released: TxId, signals: &mut Vec<Signal>) {
        let mut head = true;
        for w in self.waiters.values_mut() {
            if head && !w.for_read && !w.upgraded {
                w.locked = true;
                if let Some(sx) = w.signal.take() {
                    signals.push((sx, Ok(())));
                }
                return;
            }
            head = false;
            if w.upgraded {
                w.upgraded = false;
                w.locked = true;
                if let Some(sx) = w.signal.take() {
                    signals.push((sx, Err(Error::lock_conflict(released))));
                }
            } else if w.for_read {
                if !w.locked {
                    w.locked = true;
                    if let Some(sx) = w.signal.take() {
                        signals.push((sx, Ok(())));
                    }
                }
            } else {
                // Plain exclusive waiter ends the read prefix.
                return;
            }
        }
    }

    /// Re-evaluation after a shared release or a cancelled waiter removal
    ///
    /// Promotes a head upgrade or grants a head exclusive once nothing is
    /// locked, and extends the contiguous read prefix over waiters that a
    /// removed record was blocking.
    fn grants_after_removal(&mut self, signals: &mut Vec<Signal>) {
        if !self.any_locked() {
            if let Some(w) = self.waiters.values_mut().next() {
                if w.upgraded || !w.for_read {
                    w.locked = true;
                    w.upgraded = false;
                    w.for_read = false;
                    if let Some(sx) = w.signal.take() {
                        signals.push((sx, Ok(())));
                    }
                    return;
                }
            }
        }
        for w in self.waiters.values_mut() {
            if w.upgraded || !w.for_read {
                return;
            }
            if !w.locked {
                w.locked = true;
                if let Some(sx) = w.signal.take() {
                    signals.push((sx, Ok(())));
                }
            }
        }
    }
}

/// Per-key shared/exclusive lock queues with wound-wait ordering
///
/// The manager owns all lock state for one partition. It stores only
/// `TxId` values, never transaction contexts, which keeps the ownership
/// graph acyclic. A per-transaction key registry supports releasing
/// everything a transaction touched at finish time.
pub struct LockManager {
    states: DashMap<Key, Arc<Mutex<LockState>>>,
    held: DashMap<TxId, BTreeSet<Key>>,
}

impl LockManager {
    /// Create an empty lock manager
    pub fn new() -> Self {
        LockManager {
            states: DashMap::new(),
            held: DashMap::new(),
        }
    }

    /// Acquire an exclusive lock on `key` for `tx`
    ///
    /// Reenters a held exclusive lock immediately; converts a held shared
    /// lock into an upgrade request. Fails fast with `LockConflict` if a
    /// younger transaction is currently granted on the key; a rejected
    /// upgrade restores the previously held shared lock.
    pub async fn acquire_exclusive(&self, key: &Key, tx: TxId) -> Result<()> {
        let attempt = self.attempt(key, |st| st.try_acquire_exclusive(tx));
        self.resolve(attempt, key, tx, false).await
    }

    /// Acquire a shared lock on `key` for `tx`
    ///
    /// Reenters immediately if `tx` already holds the key in any mode.
    /// Fails fast with `LockConflict` if a younger transaction holds the
    /// key exclusively.
    pub async fn acquire_shared(&self, key: &Key, tx: TxId) -> Result<()> {
        let attempt = self.attempt(key, |st| st.try_acquire_shared(tx));
        self.resolve(attempt, key, tx, true).await
    }

    /// Release an exclusive lock held by `tx` on `key`
    ///
    /// `tx` must be the granted exclusive holder. Ownership of the queue
    /// head then moves per the grant rules; upgrades reached at the head
    /// are invalidated.
    pub fn release_exclusive(&self, key: &Key, tx: TxId) -> Result<()> {
        self.release(key, tx, false)
    }

    /// Release a shared lock held by `tx` on `key`
    pub fn release_shared(&self, key: &Key, tx: TxId) -> Result<()> {
        self.release(key, tx, true)
    }

    /// Release every lock and cancel every pending request owned by `tx`
    ///
    /// Pending futures fail with `LockConflict`; waiters that were blocked
    /// by the removed records are re-evaluated under the grant rules. Used
    /// by the finish path (commit and rollback both end the lock scope) and
    /// by cancellation.
    pub fn release_all(&self, tx: TxId) {
        let keys = match self.held.remove(&tx) {
            Some((_, keys)) => keys,
            None => return,
        };
        for key in keys {
            self.evict(&key, tx);
        }
    }

    /// Snapshot of the waiter queue for `key`, in timestamp order
    pub fn queue(&self, key: &Key) -> Vec<TxId> {
        match self.states.get(key) {
            Some(state) => state.lock().waiters.keys().copied().collect(),
            None => Vec::new(),
        }
    }

    /// True when no key has any waiters
    pub fn is_quiescent(&self) -> bool {
        self.states.is_empty()
    }

    /// Keys currently registered to `tx` (granted or pending)
    pub fn keys_of(&self, tx: TxId) -> Vec<Key> {
        self.held
            .get(&tx)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Run one acquisition attempt, retrying past obsolete states
    fn attempt(&self, key: &Key, mut f: impl FnMut(&mut LockState) -> Attempt) -> Attempt {
        loop {
            let state = self
                .states
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(LockState::default())))
                .clone();
            let mut st = state.lock();
            if st.marked_for_remove {
                // Lost the race against compare-and-remove; the entry we
                // cloned is no longer in the map.
                continue;
            }
            return f(&mut st);
        }
    }

    async fn resolve(&self, attempt: Attempt, key: &Key, tx: TxId, shared: bool) -> Result<()> {
        match attempt {
            Attempt::Granted => {
                self.track(tx, key);
                Ok(())
            }
            Attempt::Rejected(conflicting) => {
                tracing::debug!(%tx, %key, %conflicting, shared, "lock request wounded");
                Err(Error::lock_conflict(conflicting))
            }
            Attempt::Wait(rx) => {
                self.track(tx, key);
                match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(Error::internal(format!(
                        "lock waiter for {tx} on {key} dropped without a grant"
                    ))),
                }
            }
            Attempt::Fault(e) => Err(e),
        }
    }

    fn track(&self, tx: TxId, key: &Key) {
        self.held.entry(tx).or_default().insert(key.clone());
    }

    fn untrack(&self, tx: TxId, key: &Key) {
        if let Some(mut keys) = self.held.get_mut(&tx) {
            keys.remove(key);
            if keys.is_empty() {
                drop(keys);
                self.held.remove_if(&tx, |_, keys| keys.is_empty());
            }
        }
    }

    fn release(&self, key: &Key, tx: TxId, shared: bool) -> Result<()> {
        let state = match self.states.get(key) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                return Err(Error::internal(format!(
                    "release of {key} by {tx} with no lock state"
                )))
            }
        };

        let mut signals = Vec::new();
        {
            let mut st = state.lock();
            match st.waiters.get(&tx) {
                Some(w) if w.locked && w.for_read == shared => {}
                Some(_) => {
                    return Err(Error::internal(format!(
                        "{tx} does not hold {key} in the released mode"
                    )))
                }
                None => {
                    return Err(Error::internal(format!(
                        "release of {key} by {tx} which holds nothing"
                    )))
                }
            }
            st.waiters.remove(&tx);
            if shared {
                st.grants_after_removal(&mut signals);
            } else {
                st.grants_after_exclusive_release(tx, &mut signals);
            }
            if st.waiters.is_empty() {
                st.marked_for_remove = true;
            }
        }
        self.untrack(tx, key);
        for (sx, result) in signals {
            let _ = sx.send(result);
        }
        self.remove_if_marked(key);
        Ok(())
    }

    /// Remove `tx`'s waiter record from `key` whatever its mode or progress
    fn evict(&self, key: &Key, tx: TxId) {
        let state = match self.states.get(key) {
            Some(entry) => Arc::clone(entry.value()),
            None => return,
        };

        let mut signals = Vec::new();
        {
            let mut st = state.lock();
            let removed = match st.waiters.remove(&tx) {
                Some(w) => w,
                None => return,
            };
            if let Some(sx) = removed.signal {
                signals.push((sx, Err(Error::lock_conflict(tx))));
            }
            if removed.locked && !removed.for_read {
                st.grants_after_exclusive_release(tx, &mut signals);
            } else {
                st.grants_after_removal(&mut signals);
            }
            if st.waiters.is_empty() {
                st.marked_for_remove = true;
            }
        }
        for (sx, result) in signals {
            let _ = sx.send(result);
        }
        self.remove_if_marked(key);
    }

    /// Compare-and-remove: drop the key's entry only if it is still the
    /// obsolete state we marked
    fn remove_if_marked(&self, key: &Key) {
        self.states
            .remove_if(key, |_, state| state.lock().marked_for_remove);
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
