// CLASSIFICATION: COMMUNITY
// Filename: pm.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! Runtime power-management reference counting.
//!
//! Every holder that needs the ABOX powered takes a reference; the device
//! may only suspend once the count drops back to zero.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

#[derive(Debug, Default)]
struct PmState {
    usage: usize,
    last_busy: Option<Instant>,
}

/// Usage counter of the ABOX power domain.
#[derive(Debug, Default)]
pub struct RuntimePm {
    state: Mutex<PmState>,
    idle: Condvar,
}

impl RuntimePm {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PmState> {
        // Counter updates cannot leave the state inconsistent.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Take a reference without waiting for the device to resume.
    pub fn get(&self) {
        let mut st = self.lock();
        st.usage += 1;
        debug!("pm get: usage {}", st.usage);
    }

    /// Take a reference for a caller that needs the device active now.
    pub fn get_sync(&self) {
        self.get();
    }

    /// Drop a reference.
    pub fn put(&self) {
        let mut st = self.lock();
        if st.usage == 0 {
            warn!("pm put: usage count underflow");
            return;
        }
        st.usage -= 1;
        debug!("pm put: usage {}", st.usage);
        if st.usage == 0 {
            self.idle.notify_all();
        }
    }

    /// Drop a reference and record activity for the autosuspend timer.
    pub fn put_autosuspend(&self) {
        self.lock().last_busy = Some(Instant::now());
        self.put();
    }

    pub fn mark_last_busy(&self) {
        self.lock().last_busy = Some(Instant::now());
    }

    pub fn last_busy(&self) -> Option<Instant> {
        self.lock().last_busy
    }

    pub fn usage_count(&self) -> usize {
        self.lock().usage
    }

    pub fn is_idle(&self) -> bool {
        self.usage_count() == 0
    }

    /// Block until every reference is dropped; false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .idle
            .wait_timeout_while(guard, timeout, |st| st.usage > 0)
            .unwrap_or_else(|p| p.into_inner());
        guard.usage == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn underflow_is_ignored() {
        let pm = RuntimePm::new();
        pm.put();
        assert_eq!(pm.usage_count(), 0);
        pm.get();
        pm.get_sync();
        pm.put_autosuspend();
        assert_eq!(pm.usage_count(), 1);
        assert!(pm.last_busy().is_some());
    }

    #[test]
    fn wait_idle_wakes_on_last_put() {
        let pm = Arc::new(RuntimePm::new());
        pm.get();
        let pm2 = pm.clone();
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            pm2.put();
        });
        assert!(pm.wait_idle(Duration::from_secs(2)));
        h.join().expect("put thread");
        pm.get();
        assert!(!pm.wait_idle(Duration::from_millis(5)));
    }
}
