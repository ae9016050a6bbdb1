// CLASSIFICATION: COMMUNITY
// Filename: sim.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! In-memory host environment.
//!
//! Used by the test suites and by `aboxctl` to drive the core without real
//! hardware. The simulated firmware can acknowledge boot by feeding a
//! `BootDone` message back through a registered callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::error::{AboxError, Result};
use crate::ipc::message::{IpcMessage, SystemMsg, SystemMsgType};
use crate::platform::{Env, EventSink, IpcTransport, Platform, QosSink};
use crate::qos::QosClass;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// Calls recorded by [`SimPlatform`], in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformOp {
    Power(bool),
    Enable(bool),
    Standby,
    SuspendComplete,
    SilentReset(bool),
    Firmware,
    Clocks(bool),
}

/// Simulated ABOX power and boot hardware.
#[derive(Default)]
pub struct SimPlatform {
    ops: Mutex<Vec<PlatformOp>>,
    timer_set: AtomicBool,
    silent_reset: AtomicBool,
    fail_firmware: AtomicBool,
    fail_standby: AtomicBool,
    fail_suspend: AtomicBool,
    fail_clocks: AtomicBool,
    firmware_delay: Mutex<Duration>,
    boot_hook: Mutex<Option<(Duration, BootHook)>>,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<PlatformOp> {
        lock(&self.ops).clone()
    }

    pub fn clear_ops(&self) {
        lock(&self.ops).clear();
    }

    /// Pretend the core kept running across power-down.
    pub fn set_timer(&self, on: bool) {
        self.timer_set.store(on, Ordering::Release);
    }

    pub fn fail_firmware(&self, fail: bool) {
        self.fail_firmware.store(fail, Ordering::Release);
    }

    pub fn fail_standby(&self, fail: bool) {
        self.fail_standby.store(fail, Ordering::Release);
    }

    pub fn fail_suspend(&self, fail: bool) {
        self.fail_suspend.store(fail, Ordering::Release);
    }

    pub fn fail_clocks(&self, fail: bool) {
        self.fail_clocks.store(fail, Ordering::Release);
    }

    /// Make every firmware download take `delay`.
    pub fn set_firmware_delay(&self, delay: Duration) {
        *lock(&self.firmware_delay) = delay;
    }

    /// Run `f` on its own thread `delay` after every core release, the way
    /// firmware reports boot completion.
    pub fn on_boot<F>(&self, delay: Duration, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *lock(&self.boot_hook) = Some((delay, Arc::new(f)));
    }

    pub fn silent_reset_armed(&self) -> bool {
        self.silent_reset.load(Ordering::Acquire)
    }

    fn record(&self, op: PlatformOp) {
        trace!("sim platform: {:?}", op);
        lock(&self.ops).push(op);
    }
}

impl Platform for SimPlatform {
    fn core_power(&self, on: bool) {
        self.record(PlatformOp::Power(on));
    }

    fn core_enable(&self, on: bool) {
        self.record(PlatformOp::Enable(on));
        if !on {
            return;
        }
        let hook = lock(&self.boot_hook).clone();
        if let Some((delay, boot)) = hook {
            let spawned = thread::Builder::new()
                .name("sim-firmware".into())
                .spawn(move || {
                    thread::sleep(delay);
                    boot();
                });
            if let Err(e) = spawned {
                warn!("sim firmware thread: {}", e);
            }
        }
    }

    fn core_standby(&self, timeout: Duration) -> Result<()> {
        self.record(PlatformOp::Standby);
        if self.fail_standby.load(Ordering::Acquire) {
            thread::sleep(timeout.min(Duration::from_millis(5)));
            return Err(AboxError::Standby("core not in standby".into()));
        }
        Ok(())
    }

    fn suspend_complete(&self, timeout: Duration) -> Result<()> {
        self.record(PlatformOp::SuspendComplete);
        if self.fail_suspend.load(Ordering::Acquire) {
            return Err(AboxError::Timeout {
                what: "suspend complete",
                after: timeout,
            });
        }
        Ok(())
    }

    fn silent_reset(&self, reset: bool) {
        self.record(PlatformOp::SilentReset(reset));
        self.silent_reset.store(reset, Ordering::Release);
    }

    fn is_timer_set(&self) -> bool {
        self.timer_set.load(Ordering::Acquire)
    }

    fn download_firmware(&self) -> Result<()> {
        self.record(PlatformOp::Firmware);
        let delay = *lock(&self.firmware_delay);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if self.fail_firmware.load(Ordering::Acquire) {
            return Err(AboxError::Firmware("image rejected".into()));
        }
        Ok(())
    }

    fn enable_clocks(&self, on: bool) -> Result<()> {
        self.record(PlatformOp::Clocks(on));
        if on && self.fail_clocks.load(Ordering::Acquire) {
            return Err(AboxError::Firmware("cpu clock stuck".into()));
        }
        Ok(())
    }
}

type Responder = Arc<dyn Fn(&IpcMessage) + Send + Sync>;
type BootHook = Arc<dyn Fn() + Send + Sync>;

/// Transport that records every message and can play firmware.
#[derive(Default)]
pub struct LoopbackTransport {
    sent: Mutex<Vec<IpcMessage>>,
    fail: AtomicBool,
    busy_for: AtomicUsize,
    delay: Mutex<Duration>,
    responder: Mutex<Option<Responder>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoded messages seen so far.
    pub fn sent(&self) -> Vec<IpcMessage> {
        lock(&self.sent).clone()
    }

    /// System message types seen so far.
    pub fn system_types(&self) -> Vec<SystemMsgType> {
        lock(&self.sent)
            .iter()
            .filter_map(|m| m.system().ok())
            .map(|m| m.msgtype)
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.sent).clear();
    }

    /// Reject every send with a transport error.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Release);
    }

    /// Reject the next `n` sends as busy.
    pub fn set_busy(&self, n: usize) {
        self.busy_for.store(n, Ordering::Release);
    }

    /// Block every send for `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    /// Called for every accepted message, after it is recorded.
    pub fn set_responder<F>(&self, f: F)
    where
        F: Fn(&IpcMessage) + Send + Sync + 'static,
    {
        *lock(&self.responder) = Some(Arc::new(f));
    }
}

impl IpcTransport for LoopbackTransport {
    fn send(&self, raw: &[u8]) -> Result<()> {
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if self.fail.load(Ordering::Acquire) {
            return Err(AboxError::Transport("link down".into()));
        }
        if self
            .busy_for
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AboxError::Transport("mailbox busy".into()));
        }
        let msg = IpcMessage::decode(raw)?;
        debug!("loopback send: {:?} ({} bytes)", msg.id, raw.len());
        lock(&self.sent).push(msg.clone());
        let responder = lock(&self.responder).clone();
        if let Some(respond) = responder {
            respond(&msg);
        }
        Ok(())
    }
}

/// Builds the `BootDone` message firmware sends once it runs.
pub fn boot_done_message(version: u32) -> IpcMessage {
    SystemMsg::new(SystemMsgType::BootDone)
        .params(0, 0, version as i32)
        .into_message()
}

/// QoS sink that stores the last value per class.
#[derive(Default)]
pub struct RecordingQosSink {
    values: Mutex<HashMap<QosClass, u32>>,
    history: Mutex<Vec<(QosClass, u32)>>,
    bases: Mutex<Vec<(QosClass, u32)>>,
}

impl RecordingQosSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<(QosClass, u32)> {
        lock(&self.history).clone()
    }

    /// Static base values applied so far.
    pub fn bases(&self) -> Vec<(QosClass, u32)> {
        lock(&self.bases).clone()
    }
}

impl QosSink for RecordingQosSink {
    fn update(&self, class: QosClass, value: u32) {
        lock(&self.values).insert(class, value);
        lock(&self.history).push((class, value));
    }

    fn update_base(&self, class: QosClass, value: u32) {
        lock(&self.bases).push((class, value));
    }

    fn current(&self, class: QosClass) -> u32 {
        lock(&self.values)
            .get(&class)
            .copied()
            .unwrap_or_else(|| class.idle_value())
    }
}

/// Event sink that keeps every uevent.
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<Vec<String>>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Vec<String>> {
        lock(&self.events).clone()
    }
}

impl EventSink for RecordingEvents {
    fn uevent(&self, env: &[String]) {
        lock(&self.events).push(env.to_vec());
    }
}

/// Simulated environment with typed handles for inspection.
pub struct SimEnv {
    pub platform: Arc<SimPlatform>,
    pub transport: Arc<LoopbackTransport>,
    pub qos_sink: Arc<RecordingQosSink>,
    pub events: Arc<RecordingEvents>,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    pub fn new() -> Self {
        Self {
            platform: Arc::new(SimPlatform::new()),
            transport: Arc::new(LoopbackTransport::new()),
            qos_sink: Arc::new(RecordingQosSink::new()),
            events: Arc::new(RecordingEvents::new()),
        }
    }

    pub fn env(&self) -> Env {
        Env {
            platform: self.platform.clone(),
            transport: self.transport.clone(),
            qos_sink: self.qos_sink.clone(),
            events: self.events.clone(),
        }
    }
}
