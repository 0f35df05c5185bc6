//! Process-wide kiosk state shared by the detector, the attempt tasks and the
//! heartbeat.
//!
//! The `processing` flag is the single-flight lock of the machine. It is
//! claimed with a compare-and-set and handed out as a [`ProcessingGuard`];
//! dropping the guard (normally, or while unwinding) clears the flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ketl_core::CardUid;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Snapshot of the machine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineStatistics {
    pub daily_dispensed: u64,
    pub total_dispensed: u64,
    pub auth_failures: u64,
    /// Authentication attempts dispatched since start.
    pub attempts: u64,
}

#[derive(Debug)]
pub struct MachineState {
    processing: AtomicBool,
    current_uid: Mutex<Option<CardUid>>,
    online: AtomicBool,
    daily_dispensed: AtomicU64,
    total_dispensed: AtomicU64,
    auth_failures: AtomicU64,
    attempts: AtomicU64,
}

impl MachineState {
    /// Fresh state: idle, no card, assumed online until a heartbeat says otherwise.
    pub fn new() -> Self {
        Self {
            processing: AtomicBool::new(false),
            current_uid: Mutex::new(None),
            online: AtomicBool::new(true),
            daily_dispensed: AtomicU64::new(0),
            total_dispensed: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
        }
    }

    /// Claim the single-flight flag.
    ///
    /// Returns `None` if an attempt is already in flight.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use ketl_kiosk::MachineState;
    ///
    /// let state = Arc::new(MachineState::new());
    /// let guard = state.try_claim().unwrap();
    /// assert!(state.try_claim().is_none());
    ///
    /// drop(guard);
    /// assert!(!state.is_processing());
    /// ```
    pub fn try_claim(self: &Arc<Self>) -> Option<ProcessingGuard> {
        self.processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ProcessingGuard {
                state: Arc::clone(self),
            })
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    fn uid_slot(&self) -> MutexGuard<'_, Option<CardUid>> {
        self.current_uid
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// UID of the card currently considered "in the field".
    pub fn current_uid(&self) -> Option<CardUid> {
        self.uid_slot().clone()
    }

    /// Replace the current UID, returning the previous one.
    pub fn replace_current_uid(&self, uid: Option<CardUid>) -> Option<CardUid> {
        std::mem::replace(&mut *self.uid_slot(), uid)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Record the heartbeat verdict, returning the previous one.
    pub fn set_online(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::AcqRel)
    }

    pub fn record_dispense(&self) {
        self.daily_dispensed.fetch_add(1, Ordering::Relaxed);
        self.total_dispensed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn statistics(&self) -> MachineStatistics {
        MachineStatistics {
            daily_dispensed: self.daily_dispensed.load(Ordering::Relaxed),
            total_dispensed: self.total_dispensed.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
        }
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof that the holder owns the single-flight flag.
///
/// Not `Clone`; releasing consumes it.
#[derive(Debug)]
#[must_use = "dropping the guard immediately releases the machine"]
pub struct ProcessingGuard {
    state: Arc<MachineState>,
}

impl ProcessingGuard {
    /// Release the machine for the next card.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.state.processing.store(false, Ordering::Release);
        debug!("Processing flag released");
    }
}
