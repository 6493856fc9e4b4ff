//! Microphone availability flag.
//!
//! Not a mutual-exclusion lock: multiple "noisy" activities (speaking,
//! navigating, ...) may hold it concurrently. `available()` is true iff
//! no activity currently holds it. Acquiring returns a typed guard so
//! "release without acquire" cannot be expressed in code.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Default)]
struct State {
    activities: HashSet<String>,
}

/// Process-wide microphone availability flag.
#[derive(Clone)]
pub struct MicMutex {
    state: Arc<Mutex<State>>,
}

impl MicMutex {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Acquire the mutex for `activity_name`. Returns a guard that
    /// releases on drop. Acquiring the same name twice is idempotent
    /// at the set level but logged, since it usually indicates a
    /// caller bug (double-acquire without matching release).
    pub fn acquire(&self, activity_name: impl Into<String>) -> MicMutexGuard {
        let name = activity_name.into();
        let mut state = self.state.lock().unwrap();
        if !state.activities.insert(name.clone()) {
            warn!("mic mutex: '{}' acquired again while already held", name);
        } else {
            debug!("mic mutex: acquired by '{}'", name);
        }
        MicMutexGuard {
            mutex: self.clone(),
            activity_name: name,
        }
    }

    fn release(&self, activity_name: &str) {
        let mut state = self.state.lock().unwrap();
        if state.activities.remove(activity_name) {
            debug!("mic mutex: released by '{}'", activity_name);
        } else {
            warn!("mic mutex: release('{}') with no matching acquire", activity_name);
        }
    }

    /// True iff no activity currently holds the mutex.
    pub fn available(&self) -> bool {
        self.state.lock().unwrap().activities.is_empty()
    }

    /// Snapshot of activity names currently holding the mutex.
    pub fn activities(&self) -> HashSet<String> {
        self.state.lock().unwrap().activities.clone()
    }
}

impl Default for MicMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle returned by [`MicMutex::acquire`]. Releases the named
/// activity when dropped; there is no other way to release.
#[must_use = "the microphone stays unavailable until this guard is dropped"]
pub struct MicMutexGuard {
    mutex: MicMutex,
    activity_name: String,
}

impl Drop for MicMutexGuard {
    fn drop(&mut self) {
        self.mutex.release(&self.activity_name);
    }
}

impl MicMutexGuard {
    pub fn activity_name(&self) -> &str {
        &self.activity_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_when_empty() {
        let mutex = MicMutex::new();
        assert!(mutex.available());
    }

    #[test]
    fn acquire_blocks_availability_until_drop() {
        let mutex = MicMutex::new();
        let guard = mutex.acquire("speaking");
        assert!(!mutex.available());
        assert_eq!(guard.activity_name(), "speaking");
        drop(guard);
        assert!(mutex.available());
    }

    #[test]
    fn multiple_activities_concurrent() {
        let mutex = MicMutex::new();
        let g1 = mutex.acquire("speaking");
        let g2 = mutex.acquire("navigating");
        assert!(!mutex.available());
        assert_eq!(mutex.activities().len(), 2);
        drop(g1);
        assert!(!mutex.available());
        drop(g2);
        assert!(mutex.available());
    }

    #[test]
    fn balance_over_many_acquire_release_pairs() {
        let mutex = MicMutex::new();
        for _ in 0..50 {
            let a = mutex.acquire("speaking");
            let b = mutex.acquire("navigating");
            drop(b);
            drop(a);
        }
        assert!(mutex.available());
    }
}
