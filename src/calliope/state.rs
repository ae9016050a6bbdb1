// CLASSIFICATION: COMMUNITY
// Filename: state.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! Calliope power state shared by the state machine and the IPC worker.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use log::info;

use crate::error::{AboxError, Result};

/// Power and boot state of the co-processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalliopeState {
    #[default]
    Disabled,
    /// Powered, waiting for the boot acknowledgment.
    Enabling,
    Enabled,
    /// Suspend requested, power still applied.
    Disabling,
}

impl CalliopeState {
    /// Messages can reach the firmware in this state.
    pub fn accepts_ipc(self) -> bool {
        matches!(self, CalliopeState::Enabled | CalliopeState::Disabling)
    }
}

impl fmt::Display for CalliopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CalliopeState::Disabled => "disabled",
            CalliopeState::Enabling => "enabling",
            CalliopeState::Enabled => "enabled",
            CalliopeState::Disabling => "disabling",
        };
        f.write_str(s)
    }
}

#[derive(Default)]
struct Inner {
    state: CalliopeState,
    version: u32,
}

/// State plus firmware version, with a wait queue for state changes.
#[derive(Default)]
pub struct BootState {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl BootState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn get(&self) -> CalliopeState {
        self.lock().state
    }

    /// Move to `state` and wake every waiter. Returns the previous state.
    pub fn set(&self, state: CalliopeState) -> CalliopeState {
        let old = {
            let mut inner = self.lock();
            std::mem::replace(&mut inner.state, state)
        };
        if old != state {
            info!("calliope state: {} -> {}", old, state);
        }
        self.changed.notify_all();
        old
    }

    /// Move to `to` only if the current state is one of `from`, checked and
    /// written under one lock. Returns the previous state.
    pub fn transition(&self, from: &[CalliopeState], to: CalliopeState) -> Result<CalliopeState> {
        self.transition_inner(from, to, None)
    }

    /// ENABLING or ENABLED to ENABLED, recording `version` in the same step.
    pub fn acknowledge(&self, version: u32) -> Result<CalliopeState> {
        self.transition_inner(
            &[CalliopeState::Enabling, CalliopeState::Enabled],
            CalliopeState::Enabled,
            Some(version),
        )
    }

    fn transition_inner(
        &self,
        from: &[CalliopeState],
        to: CalliopeState,
        version: Option<u32>,
    ) -> Result<CalliopeState> {
        let old = {
            let mut inner = self.lock();
            if !from.contains(&inner.state) {
                return Err(AboxError::InvalidState(inner.state));
            }
            if let Some(v) = version {
                inner.version = v;
            }
            std::mem::replace(&mut inner.state, to)
        };
        if old != to {
            info!("calliope state: {} -> {}", old, to);
        }
        self.changed.notify_all();
        Ok(old)
    }

    pub fn version(&self) -> u32 {
        self.lock().version
    }

    pub fn set_version(&self, version: u32) {
        self.lock().version = version;
    }

    /// Wait up to `timeout` for `state`. True if it was reached.
    pub fn wait_for(&self, state: CalliopeState, timeout: Duration) -> bool {
        let inner = self.lock();
        let (inner, _) = self
            .changed
            .wait_timeout_while(inner, timeout, |i| i.state != state)
            .unwrap_or_else(|p| p.into_inner());
        inner.state == state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn waiter_wakes_on_transition() {
        let boot = Arc::new(BootState::new());
        boot.set(CalliopeState::Enabling);
        let b = boot.clone();
        let t = thread::spawn(move || b.wait_for(CalliopeState::Enabled, Duration::from_secs(2)));
        thread::sleep(Duration::from_millis(10));
        boot.set(CalliopeState::Enabled);
        assert!(t.join().unwrap());
    }

    #[test]
    fn wait_times_out_without_transition() {
        let boot = BootState::new();
        assert!(!boot.wait_for(CalliopeState::Enabled, Duration::from_millis(10)));
        assert_eq!(boot.get(), CalliopeState::Disabled);
        assert!(!boot.get().accepts_ipc());
    }

    #[test]
    fn transition_checks_source_state() {
        let boot = BootState::new();
        assert!(matches!(
            boot.acknowledge(7),
            Err(AboxError::InvalidState(CalliopeState::Disabled))
        ));
        assert_eq!(boot.version(), 0);
        assert_eq!(
            boot.transition(&[CalliopeState::Disabled], CalliopeState::Enabling).unwrap(),
            CalliopeState::Disabled
        );
        assert!(boot
            .transition(&[CalliopeState::Disabled], CalliopeState::Enabling)
            .is_err());
        boot.acknowledge(7).unwrap();
        assert_eq!((boot.get(), boot.version()), (CalliopeState::Enabled, 7));
    }

    #[test]
    fn racing_transitions_have_one_winner() {
        let boot = Arc::new(BootState::new());
        let wins: usize = (0..8)
            .map(|_| {
                let b = boot.clone();
                thread::spawn(move || {
                    b.transition(&[CalliopeState::Disabled], CalliopeState::Enabling)
                        .is_ok()
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
    }
}
