// CLASSIFICATION: COMMUNITY
// Filename: failsafe.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! Failsafe reporter.
//!
//! Faults from any component funnel into [`Failsafe::report`]. A single
//! latch makes sure one incident produces one notification to user space no
//! matter how many paths observe it; later reports only bump the counter
//! until [`Failsafe::report_reset`] opens the latch again.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, info};

use crate::config::{AboxConfig, DebugPolicy};
use crate::error::Result;
use crate::platform::{EventSink, Platform};
use crate::pm::RuntimePm;
use crate::qos::{Qos, QosClass};
use crate::workqueue::{Work, WorkQueue};

/// Reset code accepted by [`Failsafe::trigger`].
pub const RESET_CODE: &str = "CALLIOPE";

/// Outcome of [`Failsafe::report`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailsafeReport {
    /// This call opened a new incident.
    Primary,
    /// An incident was already latched.
    Duplicate,
}

/// Debounced fault latch of one ABOX device.
pub struct Failsafe {
    reported: AtomicBool,
    error: AtomicBool,
    reset_count: Arc<AtomicU64>,
    incidents: AtomicU64,
    service: AtomicBool,
    service_ref: AtomicBool,
    debug_mode: AtomicBool,
    policy: DebugPolicy,
    pm: Arc<RuntimePm>,
    platform: Arc<dyn Platform>,
    qos: Arc<Qos>,
    uevent: Work,
    _wq: WorkQueue,
}

impl Failsafe {
    pub fn new(
        cfg: &AboxConfig,
        pm: Arc<RuntimePm>,
        platform: Arc<dyn Platform>,
        qos: Arc<Qos>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let reset_count = Arc::new(AtomicU64::new(0));
        let wq = WorkQueue::new("abox_failsafe")?;
        let count = reset_count.clone();
        let uevent = wq.work("failsafe_report", move || {
            let env = vec![format!("COUNT={}", count.load(Ordering::Acquire))];
            info!("failsafe uevent: {}", env[0]);
            events.uevent(&env);
        });
        Ok(Self {
            reported: AtomicBool::new(false),
            error: AtomicBool::new(false),
            reset_count,
            incidents: AtomicU64::new(0),
            service: AtomicBool::new(cfg.failsafe_service),
            service_ref: AtomicBool::new(false),
            debug_mode: AtomicBool::new(cfg.debug_mode),
            policy: cfg.debug_policy,
            pm,
            platform,
            qos,
            uevent,
            _wq: wq,
        })
    }

    /// Report a fault. `error` marks a hard error as opposed to a soft
    /// failure such as a boot timeout.
    pub fn report(&self, error: bool) -> FailsafeReport {
        if error && self.debug_mode.load(Ordering::Acquire) {
            match self.policy {
                DebugPolicy::Panic => panic!("abox: error reported in debug mode"),
                DebugPolicy::Log => error!("abox: error reported in debug mode"),
            }
        }

        let count = self.reset_count.fetch_add(1, Ordering::AcqRel) + 1;
        if self
            .reported
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("failsafe already reported, count {}", count);
            return FailsafeReport::Duplicate;
        }

        self.incidents.fetch_add(1, Ordering::AcqRel);
        self.error.store(error, Ordering::Release);
        if self.service.load(Ordering::Acquire) && !self.service_ref.swap(true, Ordering::AcqRel) {
            self.pm.get();
        }
        error!("failsafe report: error={} count={}", error, count);
        self.uevent.queue();
        FailsafeReport::Primary
    }

    /// Mark the incident as recovered.
    pub fn report_reset(&self) {
        if self
            .reported
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!("failsafe cleared");
            self.error.store(false, Ordering::Release);
            self.release_service_ref();
        }
    }

    /// Recovery requested from user space. Only acts while an incident is
    /// latched; returns whether it did.
    pub fn reset(&self) -> bool {
        if !self.is_reported() {
            debug!("failsafe reset without incident");
            return false;
        }
        self.platform.silent_reset(true);
        self.release_service_ref();
        info!("failsafe reset");
        self.qos.clear(QosClass::Aud);
        true
    }

    /// Run [`Failsafe::reset`] if `code` names the co-processor.
    pub fn trigger(&self, code: &str) -> bool {
        let code = code.trim_end_matches(|c: char| c == '\n' || c == '\r');
        let n = code.len().min(RESET_CODE.len());
        if n == 0 || code.as_bytes()[..n] != RESET_CODE.as_bytes()[..n] {
            debug!("failsafe trigger ignored: {:?}", code);
            return false;
        }
        self.reset()
    }

    fn release_service_ref(&self) {
        if self.service_ref.swap(false, Ordering::AcqRel) {
            self.pm.put();
        }
    }

    pub fn is_reported(&self) -> bool {
        self.reported.load(Ordering::Acquire)
    }

    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }

    /// Every report, duplicates included.
    pub fn reset_count(&self) -> u64 {
        self.reset_count.load(Ordering::Acquire)
    }

    /// Primary reports only.
    pub fn incidents(&self) -> u64 {
        self.incidents.load(Ordering::Acquire)
    }

    pub fn set_service(&self, on: bool) {
        self.service.store(on, Ordering::Release);
    }

    pub fn set_debug_mode(&self, on: bool) {
        self.debug_mode.store(on, Ordering::Release);
    }

    /// Wait for a queued notification to reach the event sink.
    pub fn flush(&self) {
        self.uevent.flush();
    }
}
