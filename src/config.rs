// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! Runtime configuration for the ABOX driver core.
//!
//! Values come from three layers: built-in defaults, an optional TOML file
//! and `ABOX_*` environment overrides.

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use serde::Deserialize;

use crate::error::{AboxError, Result};

/// What to do when an error is reported while debug mode is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugPolicy {
    /// Abort the host so the fault can be inspected.
    Panic,
    /// Log the fault and continue.
    Log,
}

impl Default for DebugPolicy {
    fn default() -> Self {
        DebugPolicy::Log
    }
}

/// Tunables of the ABOX core.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AboxConfig {
    /// Enqueue attempts after the first one.
    pub ipc_retry: u32,
    /// Spin between retries of atomic callers.
    pub atomic_retry_delay_us: u64,
    pub coarse_wait_ms: u64,
    pub fine_wait_ms: u64,
    /// Upper bound for the boot acknowledgment.
    pub boot_done_timeout_ms: u64,
    pub boot_clear_delay_ms: u64,
    pub wdt_recovery_delay_ms: u64,
    /// Distinct requester ids each QoS class can track.
    pub qos_max_requests: usize,
    /// Static AUD base in kHz held while the core is powered; 0 disables it.
    pub pm_qos_stable_min: u32,
    /// AUD frequencies in kHz for gear levels 1..=N.
    pub cpu_gear_table: Vec<u32>,
    pub debug_mode: bool,
    pub failsafe_service: bool,
    pub debug_policy: DebugPolicy,
}

impl Default for AboxConfig {
    fn default() -> Self {
        Self {
            ipc_retry: 10,
            atomic_retry_delay_us: 1000,
            coarse_wait_ms: 1000,
            fine_wait_ms: 100,
            boot_done_timeout_ms: 10_000,
            boot_clear_delay_ms: 1000,
            wdt_recovery_delay_ms: 100,
            qos_max_requests: 32,
            pm_qos_stable_min: 0,
            cpu_gear_table: vec![1_180_000, 800_000, 590_000, 394_000, 266_000, 133_000],
            debug_mode: false,
            failsafe_service: false,
            debug_policy: DebugPolicy::Log,
        }
    }
}

impl AboxConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: AboxConfig =
            toml::from_str(text).map_err(|e| AboxError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a TOML file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("loading abox config from {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Apply `ABOX_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = env_bool("ABOX_DEBUG_MODE")? {
            self.debug_mode = v;
        }
        if let Some(v) = env_bool("ABOX_FAILSAFE_SERVICE")? {
            self.failsafe_service = v;
        }
        if let Ok(v) = std::env::var("ABOX_IPC_RETRY") {
            self.ipc_retry = v
                .trim()
                .parse()
                .map_err(|_| AboxError::Config(format!("ABOX_IPC_RETRY: {v:?}")))?;
        }
        if let Ok(v) = std::env::var("ABOX_DEBUG_POLICY") {
            self.debug_policy = match v.trim() {
                "panic" => DebugPolicy::Panic,
                "log" => DebugPolicy::Log,
                other => {
                    return Err(AboxError::Config(format!("ABOX_DEBUG_POLICY: {other:?}")))
                }
            };
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject settings the driver cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.qos_max_requests == 0 {
            return Err(AboxError::Config("qos_max_requests must be nonzero".into()));
        }
        if self.cpu_gear_table.iter().any(|&v| v == 0) {
            return Err(AboxError::Config("cpu_gear_table has a zero entry".into()));
        }
        if self.cpu_gear_table.len() >= crate::gear::GEAR_MIN as usize {
            warn!(
                "cpu gear table has {} levels, levels above {} are ignored",
                self.cpu_gear_table.len(),
                crate::gear::GEAR_MIN - 1
            );
        }
        Ok(())
    }

    /// Waiting budget for blocking calls.
    ///
    /// Collapses to zero while the failsafe error flag is set so that a dead
    /// core does not stall every caller.
    pub fn waiting(&self, coarse: bool, error: bool) -> Duration {
        if error {
            Duration::ZERO
        } else if coarse {
            Duration::from_millis(self.coarse_wait_ms)
        } else {
            Duration::from_millis(self.fine_wait_ms)
        }
    }

    pub fn boot_done_timeout(&self) -> Duration {
        Duration::from_millis(self.boot_done_timeout_ms)
    }

    pub fn boot_clear_delay(&self) -> Duration {
        Duration::from_millis(self.boot_clear_delay_ms)
    }

    pub fn wdt_recovery_delay(&self) -> Duration {
        Duration::from_millis(self.wdt_recovery_delay_ms)
    }

    pub fn atomic_retry_delay(&self) -> Duration {
        Duration::from_micros(self.atomic_retry_delay_us)
    }
}

fn env_bool(key: &str) -> Result<Option<bool>> {
    match std::env::var(key) {
        Ok(v) => match v.trim() {
            "1" | "true" | "on" => Ok(Some(true)),
            "0" | "false" | "off" => Ok(Some(false)),
            other => Err(AboxError::Config(format!("{key}: {other:?}"))),
        },
        Err(_) => Ok(None),
    }
}
