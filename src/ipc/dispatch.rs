// CLASSIFICATION: COMMUNITY
// Filename: dispatch.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! Outbound IPC dispatch.
//!
//! Callers in any context put messages on the ring; the `abox_ipc` worker
//! drains it into the transport once Calliope can take them. Callers that
//! are both atomic and synchronous bypass the ring and send directly.

use std::hint;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use super::message::{IpcId, IpcMessage};
use super::queue::{DeviceId, IpcQueue, IPC_QUEUE_SIZE};
use crate::calliope::state::{BootState, CalliopeState};
use crate::config::AboxConfig;
use crate::error::{AboxError, Result};
use crate::failsafe::Failsafe;
use crate::platform::IpcTransport;
use crate::pm::RuntimePm;
use crate::workqueue::{Work, WorkQueue};

struct DispatchShared {
    queue: IpcQueue<IPC_QUEUE_SIZE>,
    transport: Arc<dyn IpcTransport>,
    boot: Arc<BootState>,
    failsafe: Arc<Failsafe>,
    pm: Arc<RuntimePm>,
    cfg: AboxConfig,
}

impl DispatchShared {
    fn can_ipc(&self) -> bool {
        let state = match self.boot.get() {
            CalliopeState::Enabling => {
                let wait = self.cfg.waiting(true, self.failsafe.has_error());
                self.boot.wait_for(CalliopeState::Enabled, wait);
                self.boot.get()
            }
            other => other,
        };
        if !state.accepts_ipc() {
            warn!("invalid calliope state: {}", state);
            return false;
        }
        true
    }

    fn process(&self) {
        debug!("process ipc: {:?}", self.queue.indices());
        self.pm.get_sync();
        if self.can_ipc() {
            while let Ok(slot) = self.queue.get() {
                if let Err(e) = self.transport.send(slot.payload()) {
                    error!("ipc {:?} from {:?} failed: {}", slot.hw_irq, slot.device, e);
                    self.failsafe.report(true);
                }
            }
        }
        self.pm.mark_last_busy();
        self.pm.put_autosuspend();
    }
}

/// Busy-wait for `delay`; atomic callers must not sleep.
fn spin_for(delay: Duration) {
    let deadline = Instant::now() + delay;
    while Instant::now() < deadline {
        hint::spin_loop();
    }
}

/// Ring queue plus the worker that drains it.
pub struct IpcDispatcher {
    shared: Arc<DispatchShared>,
    work: Work,
    _wq: WorkQueue,
}

impl IpcDispatcher {
    pub fn new(
        cfg: &AboxConfig,
        transport: Arc<dyn IpcTransport>,
        boot: Arc<BootState>,
        failsafe: Arc<Failsafe>,
        pm: Arc<RuntimePm>,
    ) -> Result<Self> {
        let shared = Arc::new(DispatchShared {
            queue: IpcQueue::new(),
            transport,
            boot,
            failsafe,
            pm,
            cfg: cfg.clone(),
        });
        let wq = WorkQueue::new("abox_ipc")?;
        let worker = shared.clone();
        let work = wq.work("ipc_work", move || worker.process());
        Ok(Self {
            shared,
            work,
            _wq: wq,
        })
    }

    /// Send `msg` on behalf of `device`.
    ///
    /// `atomic` callers never sleep; `sync` callers return once the message
    /// left the ring, or once it was sent when both flags are set.
    pub fn request(&self, device: DeviceId, msg: &IpcMessage, atomic: bool, sync: bool) -> Result<()> {
        let raw = msg.encode();
        if atomic && sync {
            return self.shared.transport.send(&raw);
        }
        self.schedule(device, msg.id, &raw, atomic, sync)
    }

    fn schedule(&self, device: DeviceId, hw_irq: IpcId, raw: &[u8], atomic: bool, sync: bool) -> Result<()> {
        debug!("schedule ipc({:?}, {}, {}, {})", hw_irq, raw.len(), atomic, sync);
        let mut ret = Ok(());
        for retry in 0..=self.shared.cfg.ipc_retry {
            ret = self.shared.queue.put(device, hw_irq, raw);
            self.work.queue();
            if !atomic && sync {
                self.work.flush();
            }
            match ret {
                Ok(()) | Err(AboxError::InvalidMessage { .. }) => break,
                Err(_) => {}
            }
            if !atomic {
                info!("ipc queue full: flush({})", retry);
                self.work.flush();
            } else {
                info!("ipc queue full: delay({})", retry);
                spin_for(self.shared.cfg.atomic_retry_delay());
            }
        }

        match ret {
            Err(e @ AboxError::InvalidMessage { .. }) => {
                error!("ipc({:?}): invalid message: {}", hw_irq, e);
                Err(e)
            }
            Err(e) => {
                error!("ipc({:?}): ipc queue overflow", hw_irq);
                self.shared.failsafe.report(true);
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }

    /// Run the worker again, e.g. once boot completed.
    pub fn kick(&self) {
        self.work.queue();
    }

    /// Wait for the worker to go idle.
    pub fn flush(&self) {
        self.work.flush();
    }

    /// Messages still on the ring.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }
}
