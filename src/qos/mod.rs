// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! QoS request aggregation.
//!
//! Requesters vote on a resource class with a unique id. Each class keeps
//! one vote per id and aggregates the active votes with a fixed policy:
//! the highest wins for floor classes, the lowest for ceiling classes.
//! The aggregate is cached under the table lock on every change; pushing it
//! to the platform happens on the `abox_qos` worker, never under that lock.
//!
//! A nonzero AUD aggregate holds a runtime PM reference, so the device
//! cannot suspend while anyone votes for an audio clock.

pub mod request;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::config::AboxConfig;
use crate::error::{AboxError, Result};
use crate::platform::QosSink;
use crate::pm::RuntimePm;
use crate::workqueue::{Work, WorkQueue};

pub use request::QosRequest;
use request::{RequestTable, Upsert};

/// Id substituted for requests made with id 0.
pub const DEFAULT_ID: u32 = 0xAB0C_DEFA;

/// Resource classes the ABOX votes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QosClass {
    /// ABOX CPU clock floor.
    Aud,
    /// ABOX CPU clock ceiling.
    AudMax,
    Mif,
    Int,
    Cl0,
    Cl1,
    Cl2,
}

/// How a class combines its active requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosPolicy {
    Max,
    Min,
}

impl QosClass {
    /// Every class, in apply order.
    pub const ALL: [QosClass; 7] = [
        QosClass::Aud,
        QosClass::AudMax,
        QosClass::Mif,
        QosClass::Int,
        QosClass::Cl0,
        QosClass::Cl1,
        QosClass::Cl2,
    ];

    pub fn policy(self) -> QosPolicy {
        match self {
            QosClass::AudMax => QosPolicy::Min,
            _ => QosPolicy::Max,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            QosClass::Aud => "AUD",
            QosClass::AudMax => "AUD_MAX",
            QosClass::Mif => "MIF",
            QosClass::Int => "INT",
            QosClass::Cl0 => "CL0",
            QosClass::Cl1 => "CL1",
            QosClass::Cl2 => "CL2",
        }
    }

    /// Aggregate of a class without active requests.
    pub fn idle_value(self) -> u32 {
        match self.policy() {
            QosPolicy::Max => 0,
            QosPolicy::Min => u32::MAX,
        }
    }

    fn index(self) -> usize {
        match self {
            QosClass::Aud => 0,
            QosClass::AudMax => 1,
            QosClass::Mif => 2,
            QosClass::Int => 3,
            QosClass::Cl0 => 4,
            QosClass::Cl1 => 5,
            QosClass::Cl2 => 6,
        }
    }
}

type Notifier = Arc<dyn Fn(QosClass, u32) + Send + Sync>;

struct ClassEntry {
    table: RequestTable,
    target: u32,
}

struct QosShared {
    classes: Mutex<Vec<ClassEntry>>,
    /// Last value pushed to the sink. Only the worker writes it.
    applied: Mutex<[u32; 7]>,
    notifiers: Mutex<Vec<(QosClass, Notifier)>>,
    sink: Arc<dyn QosSink>,
    pm: Arc<RuntimePm>,
    epoch: Instant,
}

impl QosShared {
    fn classes(&self) -> MutexGuard<'_, Vec<ClassEntry>> {
        self.classes.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn applied(&self) -> MutexGuard<'_, [u32; 7]> {
        self.applied.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn apply_all(&self) {
        for class in QosClass::ALL {
            self.apply(class);
        }
    }

    fn apply(&self, class: QosClass) {
        let target = self.classes()[class.index()].target;
        {
            let mut applied = self.applied();
            let old = applied[class.index()];
            if old == target {
                return;
            }
            if class == QosClass::Aud {
                if old == 0 && target != 0 {
                    self.pm.get();
                } else if old != 0 && target == 0 {
                    self.pm.put_autosuspend();
                }
            }
            applied[class.index()] = target;
        }

        self.sink.update(class, target);
        debug!(
            "applying qos({}, {}kHz): {}kHz",
            class.name(),
            target,
            self.sink.current(class)
        );

        let notifiers: Vec<Notifier> = self
            .notifiers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|(c, _)| *c == class)
            .map(|(_, n)| n.clone())
            .collect();
        for notify in notifiers {
            notify(class, target);
        }
    }
}

/// Per-class view returned by [`Qos::snapshot`].
#[derive(Debug, Clone)]
pub struct ClassSnapshot {
    pub class: QosClass,
    /// Value applied by this driver.
    pub requested: u32,
    /// Value in effect on the platform.
    pub value: u32,
    pub requests: Vec<QosRequest>,
}

/// Point-in-time copy of every class and request.
#[derive(Debug, Clone)]
pub struct QosSnapshot {
    pub classes: Vec<ClassSnapshot>,
}

impl fmt::Display for QosSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.classes {
            writeln!(
                f,
                "name={}, requested={}, value={}",
                c.class.name(),
                c.requested,
                c.value
            )?;
            for r in &c.requests {
                writeln!(
                    f,
                    "{:#X}\t{}\t{} updated at {}.{:09}s",
                    r.id,
                    r.value,
                    r.tag,
                    r.updated.as_secs(),
                    r.updated.subsec_nanos()
                )?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// QoS aggregator owned by the ABOX device.
pub struct Qos {
    shared: Arc<QosShared>,
    work: Work,
    _wq: WorkQueue,
}

impl Qos {
    pub fn new(cfg: &AboxConfig, sink: Arc<dyn QosSink>, pm: Arc<RuntimePm>) -> Result<Self> {
        let classes = QosClass::ALL
            .iter()
            .map(|c| ClassEntry {
                table: RequestTable::new(cfg.qos_max_requests),
                target: c.idle_value(),
            })
            .collect();
        let mut applied = [0u32; 7];
        for c in QosClass::ALL {
            applied[c.index()] = c.idle_value();
        }
        let shared = Arc::new(QosShared {
            classes: Mutex::new(classes),
            applied: Mutex::new(applied),
            notifiers: Mutex::new(Vec::new()),
            sink,
            pm,
            epoch: Instant::now(),
        });
        let wq = WorkQueue::new("abox_qos")?;
        let worker = shared.clone();
        let work = wq.work("qos_apply", move || worker.apply_all());
        Ok(Self {
            shared,
            work,
            _wq: wq,
        })
    }

    fn now(&self) -> Duration {
        self.shared.epoch.elapsed()
    }

    /// Insert or update the vote of `id` on `class` and schedule the apply.
    pub fn request(&self, class: QosClass, id: u32, value: u32, tag: &str) -> Result<()> {
        let id = if id == 0 { DEFAULT_ID } else { id };
        let now = self.now();
        let changed = {
            let mut classes = self.shared.classes();
            let entry = &mut classes[class.index()];
            match entry.table.upsert(id, value, tag, now) {
                None => {
                    let capacity = entry.table.capacity();
                    drop(classes);
                    error!(
                        "qos request failed: {}, {:#x}, {}, {}",
                        class.name(),
                        id,
                        value,
                        tag
                    );
                    return Err(AboxError::QosTableFull { class, capacity });
                }
                Some(Upsert::Unchanged) => false,
                Some(outcome) => {
                    if let Upsert::Reused { evicted } = outcome {
                        debug!("qos {}: {:#x} reuses slot of {:#x}", class.name(), id, evicted);
                    }
                    entry.target = entry.table.aggregate(class.policy());
                    true
                }
            }
        };
        debug!("qos request({}, {:#x}, {}, {})", class.name(), id, value, tag);
        if changed {
            self.work.queue();
        }
        Ok(())
    }

    pub fn request_aud(&self, id: u32, value: u32, tag: &str) -> Result<()> {
        self.request(QosClass::Aud, id, value, tag)
    }

    pub fn request_aud_max(&self, id: u32, value: u32, tag: &str) -> Result<()> {
        self.request(QosClass::AudMax, id, value, tag)
    }

    pub fn request_mif(&self, id: u32, value: u32, tag: &str) -> Result<()> {
        self.request(QosClass::Mif, id, value, tag)
    }

    pub fn request_int(&self, id: u32, value: u32, tag: &str) -> Result<()> {
        self.request(QosClass::Int, id, value, tag)
    }

    /// Zero every request of `class`.
    pub fn clear(&self, class: QosClass) {
        let now = self.now();
        let cleared = {
            let mut classes = self.shared.classes();
            let entry = &mut classes[class.index()];
            let cleared = entry.table.clear(now);
            if !cleared.is_empty() {
                entry.target = entry.table.aggregate(class.policy());
            }
            cleared
        };
        for id in &cleared {
            info!("clearing qos: {}, {:#x}", class.name(), id);
        }
        if !cleared.is_empty() {
            self.work.queue();
        }
    }

    /// Cached aggregate of `class`.
    pub fn get_target(&self, class: QosClass) -> u32 {
        let target = self.shared.classes()[class.index()].target;
        debug!("qos get_target({}): {}", class.name(), target);
        target
    }

    /// Value last applied to the platform by the worker.
    pub fn applied(&self, class: QosClass) -> u32 {
        self.shared.applied()[class.index()]
    }

    /// Value in effect on the platform for `class`.
    pub fn get_request(&self, class: QosClass) -> u32 {
        self.shared.sink.current(class)
    }

    /// Current vote of `id`, 0 if it never voted.
    pub fn get_value(&self, class: QosClass, id: u32) -> u32 {
        let id = if id == 0 { DEFAULT_ID } else { id };
        self.shared.classes()[class.index()]
            .table
            .find(id)
            .map(|r| r.value)
            .unwrap_or(0)
    }

    pub fn is_active(&self, class: QosClass, id: u32) -> bool {
        self.get_value(class, id) != 0
    }

    /// Wait until scheduled applies have run.
    pub fn complete(&self) {
        self.work.flush();
    }

    /// Log every active request of `class`.
    pub fn print(&self, class: QosClass) {
        let classes = self.shared.classes();
        for req in classes[class.index()].table.iter().filter(|r| r.is_active()) {
            warn!("qos: {}, {:#x} ({})", class.name(), req.id, req.tag);
        }
    }

    /// Push a static base value straight to the platform.
    pub fn apply_base(&self, class: QosClass, value: u32) {
        debug!("applying static qos({}, {}kHz)", class.name(), value);
        self.shared.sink.update_base(class, value);
    }

    /// Run `f` on the worker every time the applied value of `class` changes.
    pub fn add_notifier<F>(&self, class: QosClass, f: F)
    where
        F: Fn(QosClass, u32) + Send + Sync + 'static,
    {
        self.shared
            .notifiers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((class, Arc::new(f)));
    }

    pub fn snapshot(&self) -> QosSnapshot {
        let per_class: Vec<(QosClass, Vec<QosRequest>)> = {
            let classes = self.shared.classes();
            QosClass::ALL
                .iter()
                .map(|&c| (c, classes[c.index()].table.iter().cloned().collect()))
                .collect()
        };
        let classes = per_class
            .into_iter()
            .map(|(class, requests)| ClassSnapshot {
                class,
                requested: self.applied(class),
                value: self.shared.sink.current(class),
                requests,
            })
            .collect();
        QosSnapshot { classes }
    }
}
