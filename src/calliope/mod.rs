// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! Calliope boot and power sequencing.
//!
//! ```text
//! DISABLED --enable--> ENABLING --boot done--> ENABLED
//!     ^                                           |
//!     +-------------- DISABLING <----disable------+
//! ```
//!
//! The watchdog path power-cycles the core without leaving ENABLED and
//! hands recovery to the failsafe reporter.

pub mod state;

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::config::AboxConfig;
use crate::error::{AboxError, Result};
use crate::failsafe::Failsafe;
use crate::gear::{CpuGear, BOOT_GEAR_ID, DEFAULT_GEAR_ID, GEAR_MAX, GEAR_MIN};
use crate::ipc::{DeviceId, IpcDispatcher, SystemMsg, SystemMsgType};
use crate::platform::Platform;
use crate::qos::{Qos, QosClass};
use crate::workqueue::{DelayedWork, Work, WorkQueue};

pub use state::{BootState, CalliopeState};

/// Device id used for messages the core itself originates.
pub const CALLIOPE_DEVICE: DeviceId = DeviceId(0);

/// Fault classes reported by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    DataAbort,
    PrefetchAbort,
    OsError,
    VssError,
    UndefinedException,
    Unknown(i32),
}

impl From<i32> for FaultKind {
    fn from(code: i32) -> Self {
        match code {
            1 => FaultKind::DataAbort,
            2 => FaultKind::PrefetchAbort,
            3 => FaultKind::OsError,
            4 => FaultKind::VssError,
            5 => FaultKind::UndefinedException,
            other => FaultKind::Unknown(other),
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::DataAbort => f.write_str("data abort"),
            FaultKind::PrefetchAbort => f.write_str("prefetch abort"),
            FaultKind::OsError => f.write_str("os error"),
            FaultKind::VssError => f.write_str("vss error"),
            FaultKind::UndefinedException => f.write_str("undefined exception"),
            FaultKind::Unknown(code) => write!(f, "unknown error {}", code),
        }
    }
}

/// Firmware version as the four ASCII characters it packs, most
/// significant byte first.
pub fn version_string(version: u32) -> String {
    version
        .to_be_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
        .collect()
}

/// Boot/power state machine of the co-processor.
pub struct Calliope {
    cfg: AboxConfig,
    boot: Arc<BootState>,
    platform: Arc<dyn Platform>,
    ipc: Arc<IpcDispatcher>,
    gear: Arc<CpuGear>,
    qos: Arc<Qos>,
    failsafe: Arc<Failsafe>,
    restored: Mutex<bool>,
    restored_cv: Condvar,
    epoch: Instant,
    restore_work: Work,
    boot_done_work: Work,
    boot_clear: DelayedWork,
    wdt_recovery: DelayedWork,
    _wq: WorkQueue,
}

impl Calliope {
    pub fn new(
        cfg: &AboxConfig,
        boot: Arc<BootState>,
        platform: Arc<dyn Platform>,
        ipc: Arc<IpcDispatcher>,
        gear: Arc<CpuGear>,
        qos: Arc<Qos>,
        failsafe: Arc<Failsafe>,
    ) -> Result<Arc<Self>> {
        let wq = WorkQueue::new("abox_calliope")?;
        Ok(Arc::new_cyclic(|me: &Weak<Calliope>| {
            let work = |name: &str, f: fn(&Calliope)| {
                let me = me.clone();
                wq.work(name, move || {
                    if let Some(c) = me.upgrade() {
                        f(c.as_ref());
                    }
                })
            };
            let restore_work = work("restore_data", Calliope::restore);
            let boot_done_work = work("boot_done", Calliope::run_boot_done);
            let boot_clear = DelayedWork::new(work("boot_clear", Calliope::run_boot_clear));
            let wdt_recovery = DelayedWork::new(work("wdt_recovery", Calliope::wdt_recovery));
            Calliope {
                cfg: cfg.clone(),
                boot,
                platform,
                ipc,
                gear,
                qos,
                failsafe,
                restored: Mutex::new(false),
                restored_cv: Condvar::new(),
                epoch: Instant::now(),
                restore_work,
                boot_done_work,
                boot_clear,
                wdt_recovery,
                _wq: wq,
            }
        }))
    }

    pub fn state(&self) -> CalliopeState {
        self.boot.get()
    }

    pub fn version(&self) -> u32 {
        self.boot.version()
    }

    pub fn version_string(&self) -> String {
        version_string(self.version())
    }

    /// Power the core and start it. Returns once the core runs; boot
    /// completion is signalled separately through [`Calliope::boot_done`].
    ///
    /// Only one caller can leave DISABLED; a failed power-up returns the
    /// state to DISABLED with the enable gear vote dropped.
    pub fn enable(&self) -> Result<()> {
        self.boot
            .transition(&[CalliopeState::Disabled], CalliopeState::Enabling)?;
        info!("calliope enable");

        let has_reset = match self.power_up() {
            Ok(has_reset) => has_reset,
            Err(e) => {
                if let Err(g) = self.gear.request(DEFAULT_GEAR_ID, GEAR_MIN, "enable") {
                    warn!("enable gear release failed: {}", g);
                }
                self.set_stable_qos(false);
                if let Err(s) = self
                    .boot
                    .transition(&[CalliopeState::Enabling], CalliopeState::Disabled)
                {
                    warn!("enable rollback skipped: {}", s);
                }
                return Err(e);
            }
        };

        if has_reset {
            self.platform.core_power(true);
            self.platform.core_enable(true);
        } else {
            self.boot_done(self.boot.version());
        }
        self.restore_work.queue();
        Ok(())
    }

    /// Clocks, enable gear and firmware. True when the core lost its state
    /// and has to be released from reset.
    fn power_up(&self) -> Result<bool> {
        self.set_stable_qos(true);
        self.platform.silent_reset(false);
        self.gear.request(DEFAULT_GEAR_ID, GEAR_MAX, "enable")?;
        if let Err(e) = self.platform.enable_clocks(true) {
            error!("failed to enable cpu clock: {}", e);
            return Err(e);
        }

        let has_reset = !self.platform.is_timer_set();
        if has_reset {
            if let Err(e) = self.platform.download_firmware() {
                error!("failed to download firmware: {}", e);
                return Err(e);
            }
        } else {
            info!("wakeup from WFI");
        }
        Ok(has_reset)
    }

    fn set_stable_qos(&self, on: bool) {
        let min = self.cfg.pm_qos_stable_min;
        if min == 0 {
            return;
        }
        self.qos.apply_base(QosClass::Aud, if on { min } else { 0 });
    }

    /// Boot acknowledgment from the firmware.
    pub fn boot_done(&self, version: u32) {
        if let Err(e) = self.boot.acknowledge(version) {
            warn!("boot done ignored: {}", e);
            return;
        }
        info!("Calliope is ready to sing (version:{})", version_string(version));
        self.boot_done_work.queue();
        self.boot_clear.cancel();
        if let Err(e) = self.boot_clear.schedule(self.cfg.boot_clear_delay()) {
            warn!("boot clear not armed: {}", e);
        }
        self.ipc.kick();
    }

    /// Block until the core is ENABLED. A timeout is a soft failure: it is
    /// reported and the state stays ENABLING.
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        if self.boot.wait_for(CalliopeState::Enabled, timeout) {
            return Ok(());
        }
        error!("calliope boot timeout ({:?})", timeout);
        self.failsafe.report(false);
        Err(AboxError::Timeout {
            what: "boot done",
            after: timeout,
        })
    }

    /// Suspend the firmware and remove power.
    pub fn disable(&self) -> Result<()> {
        let state = self.boot.transition(
            &[
                CalliopeState::Disabled,
                CalliopeState::Enabling,
                CalliopeState::Enabled,
            ],
            CalliopeState::Disabling,
        )?;
        info!("calliope disable from {}", state);
        self.boot_done_work.flush();
        if state != CalliopeState::Disabled {
            if let Err(e) = self.pm_ipc(SystemMsgType::Suspend) {
                warn!("suspend ipc failed: {}", e);
            }
            self.wait_quiescent();
        }
        if !self.platform.is_timer_set() {
            self.platform.core_enable(false);
            self.platform.core_power(false);
        }
        if let Err(e) = self.platform.enable_clocks(false) {
            warn!("failed to disable cpu clock: {}", e);
        }
        self.boot.set(CalliopeState::Disabled);
        self.set_restored(false);
        self.failsafe.report_reset();
        self.set_stable_qos(false);
        Ok(())
    }

    fn wait_quiescent(&self) {
        let wait = self.cfg.waiting(false, self.failsafe.has_error());
        let suspend = self.platform.suspend_complete(wait);
        let standby = self.platform.core_standby(wait);
        if let Err(e) = suspend.as_ref().and(standby.as_ref()) {
            error!("calliope did not quiesce: {}", e);
            self.platform.silent_reset(true);
        }
    }

    /// Send a power management notification straight to the transport.
    pub fn pm_ipc(&self, msgtype: SystemMsgType) -> Result<()> {
        let now = self.epoch.elapsed().as_nanos() as u64;
        let msg = SystemMsg::new(msgtype).bundle_u64(now, now).into_message();
        self.ipc.request(CALLIOPE_DEVICE, &msg, true, true)
    }

    /// Watchdog expiry. Returns whether the core was power cycled.
    pub fn watchdog(&self) -> bool {
        error!("abox watchdog timeout");
        if self.boot.get() != CalliopeState::Enabled {
            info!("watchdog: no power");
            return false;
        }
        self.platform.core_enable(false);
        self.platform.core_power(false);
        self.platform.core_power(true);
        self.platform.core_enable(true);
        if let Err(e) = self.wdt_recovery.schedule(self.cfg.wdt_recovery_delay()) {
            error!("watchdog recovery not armed: {}", e);
            self.failsafe.report(true);
        }
        true
    }

    /// Fault reported by the firmware.
    pub fn report_fault(&self, kind: FaultKind) {
        error!("{} is reported from calliope", kind);
        self.failsafe.report(true);
    }

    /// Gear request; a boot gear vote while ENABLING means the firmware
    /// already runs.
    pub fn request_cpu_gear(&self, id: u32, level: u32, tag: &str) -> Result<u32> {
        let old = self.gear.request(id, level, tag)?;
        if id == BOOT_GEAR_ID && self.boot.get() == CalliopeState::Enabling {
            self.boot_done(self.boot.version());
        }
        Ok(old)
    }

    pub fn is_restored(&self) -> bool {
        *self.restored.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Wait until state restore after power-on finished.
    pub fn wait_restored(&self, timeout: Duration) -> bool {
        let guard = self.restored.lock().unwrap_or_else(|p| p.into_inner());
        let (guard, _) = self
            .restored_cv
            .wait_timeout_while(guard, timeout, |r| !*r)
            .unwrap_or_else(|p| p.into_inner());
        *guard
    }

    fn set_restored(&self, on: bool) {
        *self.restored.lock().unwrap_or_else(|p| p.into_inner()) = on;
        self.restored_cv.notify_all();
    }

    fn restore(&self) {
        debug!("restore data");
        self.set_restored(true);
    }

    fn run_boot_done(&self) {
        debug!("boot done work");
        if let Err(e) = self.pm_ipc(SystemMsgType::Resume) {
            warn!("resume ipc failed: {}", e);
        }
        if let Err(e) = self.gear.request(DEFAULT_GEAR_ID, GEAR_MIN, "boot_done") {
            warn!("boot_done gear release failed: {}", e);
        }
    }

    fn run_boot_clear(&self) {
        if !self.gear.is_idle(BOOT_GEAR_ID) {
            warn!("boot clear activated");
            if let Err(e) = self.gear.request(BOOT_GEAR_ID, GEAR_MIN, "boot_clear") {
                warn!("boot clear failed: {}", e);
            }
        }
    }

    fn wdt_recovery(&self) {
        self.failsafe.report(true);
    }

    /// Wait for queued boot work to finish.
    pub fn flush(&self) {
        self.boot_done_work.flush();
    }
}
