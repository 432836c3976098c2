//! Correlation slots for in-flight commands.
//!
//! Both transports correlate responses to requests by device identifier, so
//! they share this one bookkeeping type (and nothing else). A slot is
//! acquired before sending and released on *every* exit path (success,
//! timeout, transport error, or the caller's future being dropped) via the
//! RAII guard. Acquisition fails if a slot already exists: the protocol
//! allows at most one in-flight command per device.
//!
//! The map is only ever touched under a sync mutex with no `.await` inside
//! the critical section, so read-modify-write sequences cannot interleave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::error::{Result, TrackError};

struct Slot<M> {
    /// Consumed on resolution; `None` marks an already-resolved slot whose
    /// guard has not torn it down yet.
    tx: Option<oneshot::Sender<Result<String>>>,
    meta: M,
}

/// Map of device identifier to in-flight command slot.
pub(crate) struct PendingCommands<M = ()> {
    slots: Mutex<HashMap<String, Slot<M>>>,
}

impl<M> PendingCommands<M> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self { slots: Mutex::new(HashMap::new()) })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot<M>>> {
        self.slots.lock().expect("pending-command map lock poisoned")
    }

    /// Claims the slot for `key`, failing if one is already in flight.
    ///
    /// Returns the receiver the caller awaits plus a guard that releases the
    /// slot when dropped.
    pub(crate) fn acquire(
        &self,
        key: &str,
        meta: M,
    ) -> Result<(PendingGuard<'_, M>, oneshot::Receiver<Result<String>>)> {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.lock();
        if slots.contains_key(key) {
            return Err(TrackError::CommandInFlight { device: key.to_owned() });
        }
        slots.insert(key.to_owned(), Slot { tx: Some(tx), meta });
        drop(slots);

        Ok((PendingGuard { owner: self, key: key.to_owned() }, rx))
    }

    /// Resolves `key`'s slot with `outcome` if it exists, is unresolved, and
    /// `pred` accepts its metadata. Returns whether the outcome was delivered.
    pub(crate) fn resolve_if(
        &self,
        key: &str,
        pred: impl FnOnce(&M) -> bool,
        outcome: Result<String>,
    ) -> bool {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(key) else {
            return false;
        };
        if slot.tx.is_some() && !pred(&slot.meta) {
            return false;
        }
        match slot.tx.take() {
            // A closed receiver means the caller gave up in the instant
            // before its guard ran; nothing to deliver to.
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Resolves `key`'s slot unconditionally (if present and unresolved).
    pub(crate) fn resolve(&self, key: &str, outcome: Result<String>) -> bool {
        self.resolve_if(key, |_| true, outcome)
    }

    /// Whether any command is still awaiting a response.
    pub(crate) fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Releases a claimed slot on drop.
pub(crate) struct PendingGuard<'a, M> {
    owner: &'a PendingCommands<M>,
    key: String,
}

impl<M> Drop for PendingGuard<'_, M> {
    fn drop(&mut self) {
        self.owner.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_is_exclusive_per_key() {
        let pending: Arc<PendingCommands> = PendingCommands::new();
        let (_guard, _rx) = pending.acquire("356307042441013", ()).unwrap();
        assert!(matches!(
            pending.acquire("356307042441013", ()),
            Err(TrackError::CommandInFlight { .. })
        ));
        // A different device is unaffected.
        assert!(pending.acquire("356307042441014", ()).is_ok());
    }

    #[tokio::test]
    async fn resolve_delivers_once() {
        let pending: Arc<PendingCommands> = PendingCommands::new();
        let (_guard, rx) = pending.acquire("a", ()).unwrap();

        assert!(pending.resolve("a", Ok("OK".into())));
        // Slot still occupied (guard alive) but already resolved.
        assert!(!pending.resolve("a", Ok("AGAIN".into())));

        assert_eq!(rx.await.unwrap().unwrap(), "OK");
    }

    #[test]
    fn resolve_ignores_unknown_keys() {
        let pending: Arc<PendingCommands> = PendingCommands::new();
        assert!(!pending.resolve("nobody", Ok("hi".into())));
    }

    #[test]
    fn guard_drop_frees_the_slot() {
        let pending: Arc<PendingCommands> = PendingCommands::new();
        {
            let (_guard, _rx) = pending.acquire("a", ()).unwrap();
            assert!(!pending.is_empty());
        }
        assert!(pending.is_empty());
        assert!(pending.acquire("a", ()).is_ok());
    }

    #[test]
    fn resolve_if_consults_metadata() {
        let pending: Arc<PendingCommands<u32>> = PendingCommands::new();
        let (_guard, mut rx) = pending.acquire("a", 5).unwrap();

        assert!(!pending.resolve_if("a", |floor| 3 >= *floor, Ok("early".into())));
        assert!(rx.try_recv().is_err());
        assert!(pending.resolve_if("a", |floor| 7 >= *floor, Ok("late".into())));
    }
}
