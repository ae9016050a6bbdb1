// CLASSIFICATION: COMMUNITY
// Filename: platform.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! Host environment seams.
//!
//! The driver core only talks to hardware and to the rest of the system
//! through these traits. Implementations are chosen once at probe time.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::qos::QosClass;

/// Power, clock and boot control of the co-processor cores.
pub trait Platform: Send + Sync {
    /// Switch core power on or off.
    fn core_power(&self, on: bool);

    /// Release or hold the cores in reset.
    fn core_enable(&self, on: bool);

    /// Wait until every core reports standby.
    fn core_standby(&self, timeout: Duration) -> Result<()>;

    /// Wait until the firmware signals it entered WFI after a suspend request.
    fn suspend_complete(&self, timeout: Duration) -> Result<()>;

    /// Arm or disarm the PMU silent reset option.
    fn silent_reset(&self, reset: bool);

    /// True when the core kept its state (timer still running) across the
    /// last power-down, i.e. the next enable is a wake-up from WFI.
    fn is_timer_set(&self) -> bool;

    fn download_firmware(&self) -> Result<()>;

    fn enable_clocks(&self, on: bool) -> Result<()>;
}

/// Outbound message path to the co-processor.
pub trait IpcTransport: Send + Sync {
    /// Deliver one encoded message. May block.
    fn send(&self, msg: &[u8]) -> Result<()>;
}

/// Platform QoS layer that finally receives aggregated votes.
pub trait QosSink: Send + Sync {
    /// Update the driver's request for `class`. May block.
    fn update(&self, class: QosClass, value: u32);

    /// Update the static base request for `class`.
    fn update_base(&self, class: QosClass, value: u32) {
        self.update(class, value);
    }

    /// Value currently in effect for `class` across all platform users.
    fn current(&self, class: QosClass) -> u32;
}

/// Broadcast of device change events to user space.
pub trait EventSink: Send + Sync {
    fn uevent(&self, env: &[String]);
}

/// Host environment handed to `AboxData::probe`.
#[derive(Clone)]
pub struct Env {
    pub platform: Arc<dyn Platform>,
    pub transport: Arc<dyn IpcTransport>,
    pub qos_sink: Arc<dyn QosSink>,
    pub events: Arc<dyn EventSink>,
}
