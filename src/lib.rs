// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v2.0
// Date Modified: 2026-10-15
// Author: Lukas Bower

//! Control core for the ABOX audio co-processor.

/// Error taxonomy shared by every component
pub mod error;

/// File and environment configuration
pub mod config;

/// Runtime power reference counting
pub mod pm;

/// Ordered worker threads and delayed work
pub mod workqueue;

/// Host environment traits
pub mod platform;

/// QoS request aggregation
pub mod qos;

/// CPU gear front-end of the AUD QoS class
pub mod gear;

/// Message framing, ring queue, dispatch and handlers
pub mod ipc;

/// Calliope boot and power state machine
pub mod calliope;

/// Debounced fault reporting
pub mod failsafe;

/// Device context owning all components
pub mod device;

/// In-memory host environment
pub mod sim;

pub use calliope::CalliopeState;
pub use config::AboxConfig;
pub use device::AboxData;
pub use error::{AboxError, Result};
