// CLASSIFICATION: COMMUNITY
// Filename: device.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! ABOX device context.
//!
//! [`AboxData`] owns every component of one probed device and is the only
//! entry point the rest of the system needs: outbound and inbound IPC,
//! runtime power transitions and the component accessors.

use std::sync::{Arc, Weak};
use std::time::Instant;

use log::{debug, info, warn};

use crate::calliope::{BootState, Calliope, CalliopeState, FaultKind, CALLIOPE_DEVICE};
use crate::config::AboxConfig;
use crate::error::{AboxError, Result};
use crate::failsafe::Failsafe;
use crate::gear::CpuGear;
use crate::ipc::{
    DeviceId, HandlerRegistry, IpcDispatcher, IpcHandler, IpcId, IpcMessage, IrqReturn, SystemMsg,
    SystemMsgType,
};
use crate::platform::Env;
use crate::pm::RuntimePm;
use crate::qos::{Qos, QosClass};

/// Tag attached to requests the firmware makes.
const FIRMWARE_TAG: &str = "calliope";

pub struct AboxData {
    cfg: AboxConfig,
    pm: Arc<RuntimePm>,
    qos: Arc<Qos>,
    gear: Arc<CpuGear>,
    failsafe: Arc<Failsafe>,
    boot: Arc<BootState>,
    ipc: Arc<IpcDispatcher>,
    handlers: HandlerRegistry,
    calliope: Arc<Calliope>,
}

impl AboxData {
    /// Validate `cfg` and wire every component against `env`.
    pub fn probe(cfg: AboxConfig, env: Env) -> Result<Arc<Self>> {
        cfg.validate()?;
        let pm = Arc::new(RuntimePm::new());
        let qos = Arc::new(Qos::new(&cfg, env.qos_sink.clone(), pm.clone())?);
        let failsafe = Arc::new(Failsafe::new(
            &cfg,
            pm.clone(),
            env.platform.clone(),
            qos.clone(),
            env.events.clone(),
        )?);
        let boot = Arc::new(BootState::new());
        let ipc = Arc::new(IpcDispatcher::new(
            &cfg,
            env.transport.clone(),
            boot.clone(),
            failsafe.clone(),
            pm.clone(),
        )?);
        let gear = Arc::new(CpuGear::new(qos.clone(), cfg.cpu_gear_table.clone()));
        let calliope = Calliope::new(
            &cfg,
            boot.clone(),
            env.platform.clone(),
            ipc.clone(),
            gear.clone(),
            qos.clone(),
            failsafe.clone(),
        )?;

        // Weak: the dispatcher already reaches the aggregator through the
        // failsafe reporter.
        let notify_ipc: Weak<IpcDispatcher> = Arc::downgrade(&ipc);
        let notify_boot = boot.clone();
        let epoch = Instant::now();
        qos.add_notifier(QosClass::Aud, move |_, freq| {
            if !matches!(notify_boot.get(), CalliopeState::Enabling | CalliopeState::Enabled) {
                return;
            }
            let Some(ipc) = notify_ipc.upgrade() else {
                return;
            };
            let t = epoch.elapsed();
            debug!("notify cpu gear({})", freq);
            let msg = SystemMsg::new(SystemMsgType::ChangedGear)
                .params(freq as i32, t.as_secs() as i32, t.subsec_nanos() as i32)
                .into_message();
            if let Err(e) = ipc.request(CALLIOPE_DEVICE, &msg, false, false) {
                warn!("changed gear notification dropped: {}", e);
            }
        });

        info!("abox probed: {} qos slots per class", cfg.qos_max_requests);
        Ok(Arc::new(Self {
            cfg,
            pm,
            qos,
            gear,
            failsafe,
            boot,
            ipc,
            handlers: HandlerRegistry::new(),
            calliope,
        }))
    }

    /// Queue or send `msg` to the firmware on behalf of `device`.
    pub fn request_ipc(&self, device: DeviceId, msg: &IpcMessage, atomic: bool, sync: bool) -> Result<()> {
        self.ipc.request(device, msg, atomic, sync)
    }

    pub fn register_ipc_handler(&self, id: IpcId, owner: DeviceId, handler: Arc<dyn IpcHandler>) {
        self.handlers.register(id, owner, handler);
    }

    pub fn unregister_ipc_handler(&self, id: IpcId, owner: DeviceId) -> bool {
        self.handlers.unregister(id, owner)
    }

    /// Entry point for a raw message from the firmware.
    pub fn handle_ipc(&self, raw: &[u8]) -> Result<IrqReturn> {
        let msg = IpcMessage::decode(raw)?;
        if msg.id != IpcId::System {
            return Ok(self.handlers.dispatch(&msg, false));
        }
        let system = msg.system()?;
        debug!("system ipc: {:?}", system.msgtype);
        match system.msgtype {
            SystemMsgType::BootDone => {
                self.calliope.boot_done(system.param3 as u32);
                self.handlers.dispatch(&msg, true);
                Ok(IrqReturn::Handled)
            }
            SystemMsgType::ChangeGear => {
                self.calliope.request_cpu_gear(
                    system.param2 as u32,
                    system.param1 as u32,
                    FIRMWARE_TAG,
                )?;
                Ok(IrqReturn::Handled)
            }
            SystemMsgType::RequestSysclk => {
                let class = match system.param2 {
                    1 => QosClass::Int,
                    _ => QosClass::Mif,
                };
                self.qos.request(
                    class,
                    system.param3 as u32,
                    system.param1 as u32,
                    FIRMWARE_TAG,
                )?;
                Ok(IrqReturn::Handled)
            }
            SystemMsgType::ReportFault => {
                self.calliope.report_fault(FaultKind::from(system.param1));
                Ok(IrqReturn::Handled)
            }
            _ => Ok(self.handlers.dispatch(&msg, false)),
        }
    }

    /// Power up and boot the core.
    pub fn runtime_resume(&self) -> Result<()> {
        debug!("runtime resume");
        self.calliope.enable()
    }

    /// Power down the core unless someone still holds a reference.
    pub fn runtime_suspend(&self) -> Result<()> {
        debug!("runtime suspend");
        self.calliope.flush();
        self.gear.barrier();
        self.ipc.flush();
        let usage = self.pm.usage_count();
        if usage > 0 {
            return Err(AboxError::Busy { usage });
        }
        self.calliope.disable()
    }

    /// System suspend: settle pending work and tell a running firmware.
    pub fn suspend_prepare(&self) -> Result<()> {
        self.gear.barrier();
        self.ipc.flush();
        if self.boot.get().accepts_ipc() {
            self.calliope.pm_ipc(SystemMsgType::ApSuspend)?;
        }
        Ok(())
    }

    /// System resume counterpart of [`AboxData::suspend_prepare`].
    pub fn resume_complete(&self) -> Result<()> {
        if self.boot.get().accepts_ipc() {
            self.calliope.pm_ipc(SystemMsgType::ApResume)?;
        }
        Ok(())
    }

    pub fn config(&self) -> &AboxConfig {
        &self.cfg
    }

    pub fn pm(&self) -> &Arc<RuntimePm> {
        &self.pm
    }

    pub fn qos(&self) -> &Arc<Qos> {
        &self.qos
    }

    pub fn gear(&self) -> &Arc<CpuGear> {
        &self.gear
    }

    pub fn failsafe(&self) -> &Arc<Failsafe> {
        &self.failsafe
    }

    pub fn ipc(&self) -> &Arc<IpcDispatcher> {
        &self.ipc
    }

    pub fn calliope(&self) -> &Arc<Calliope> {
        &self.calliope
    }

    pub fn state(&self) -> CalliopeState {
        self.boot.get()
    }
}
