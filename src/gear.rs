// CLASSIFICATION: COMMUNITY
// Filename: gear.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! CPU gear requests.
//!
//! A gear is a coarse performance level for the ABOX CPU. Level 1 is the
//! fastest entry of the platform's AUD frequency table; `GEAR_MIN` and any
//! level past the table mean "no floor". Levels above `GEAR_MIN` are taken
//! as a raw frequency.

use std::sync::Arc;

use log::debug;

use crate::error::Result;
use crate::qos::{Qos, QosClass, DEFAULT_ID};

pub const GEAR_MAX: u32 = 1;
pub const GEAR_MIN: u32 = 12;

pub const DEFAULT_GEAR_ID: u32 = DEFAULT_ID;
pub const BOOT_GEAR_ID: u32 = 0xB00D;
pub const ABSOLUTE_GEAR_ID: u32 = 0xABC0_ABC0;
pub const CALL_VSS_GEAR_ID: u32 = 0xCA11;
pub const CALL_KERNEL_GEAR_ID: u32 = 0xCA12;

/// Gear front-end of the AUD QoS class.
pub struct CpuGear {
    qos: Arc<Qos>,
    table: Vec<u32>,
}

impl CpuGear {
    pub fn new(qos: Arc<Qos>, table: Vec<u32>) -> Self {
        Self { qos, table }
    }

    /// Frequency requested for `level`.
    pub fn level_to_value(&self, level: u32) -> u32 {
        match level {
            0 => 0,
            l if (l as usize) <= self.table.len() => self.table[l as usize - 1],
            l if l <= GEAR_MIN => 0,
            l => l,
        }
    }

    /// Request `level` for `id`. Returns the previous vote of `id`.
    pub fn request(&self, id: u32, level: u32, tag: &str) -> Result<u32> {
        let value = self.level_to_value(level);
        let old = self.qos.get_value(QosClass::Aud, id);
        debug!("cpu gear request({:#x}, {}): {} -> {}", id, level, old, value);
        self.qos.request(QosClass::Aud, id, value, tag)?;
        Ok(old)
    }

    /// Wait for pending gear changes to reach the platform.
    pub fn barrier(&self) {
        self.qos.complete();
    }

    pub fn clear(&self) {
        self.qos.clear(QosClass::Aud);
    }

    pub fn is_idle(&self, id: u32) -> bool {
        !self.qos.is_active(QosClass::Aud, id)
    }

    /// True while any call path pins the CPU.
    pub fn is_call_active(&self) -> bool {
        [ABSOLUTE_GEAR_ID, CALL_VSS_GEAR_ID, CALL_KERNEL_GEAR_ID]
            .iter()
            .any(|&id| self.qos.is_active(QosClass::Aud, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AboxConfig;
    use crate::pm::RuntimePm;
    use crate::sim::RecordingQosSink;

    fn gear() -> CpuGear {
        let cfg = AboxConfig::default();
        let qos = Qos::new(
            &cfg,
            Arc::new(RecordingQosSink::new()),
            Arc::new(RuntimePm::new()),
        )
        .expect("qos");
        CpuGear::new(Arc::new(qos), vec![1000, 800, 600])
    }

    #[test]
    fn levels_map_through_table() {
        let g = gear();
        assert_eq!(g.level_to_value(0), 0);
        assert_eq!(g.level_to_value(GEAR_MAX), 1000);
        assert_eq!(g.level_to_value(3), 600);
        assert_eq!(g.level_to_value(4), 0);
        assert_eq!(g.level_to_value(GEAR_MIN), 0);
        assert_eq!(g.level_to_value(250_000), 250_000);
    }

    #[test]
    fn request_reports_previous_vote() {
        let g = gear();
        assert_eq!(g.request(BOOT_GEAR_ID, GEAR_MAX, "boot").unwrap(), 0);
        assert!(!g.is_idle(BOOT_GEAR_ID));
        assert_eq!(g.request(BOOT_GEAR_ID, GEAR_MIN, "boot").unwrap(), 1000);
        assert!(g.is_idle(BOOT_GEAR_ID));
    }

    #[test]
    fn call_state_tracks_call_ids() {
        let g = gear();
        assert!(!g.is_call_active());
        g.request(CALL_VSS_GEAR_ID, 2, "vss").unwrap();
        assert!(g.is_call_active());
        g.clear();
        assert!(!g.is_call_active());
    }
}
