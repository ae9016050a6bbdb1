// CLASSIFICATION: COMMUNITY
// Filename: request.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! Fixed-capacity request table backing one QoS class.

use std::time::Duration;

use super::QosPolicy;

/// Longest tag kept for a request, in characters.
pub const TAG_MAX: usize = 31;

/// One requester's vote inside a QoS class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QosRequest {
    pub id: u32,
    pub value: u32,
    pub tag: String,
    /// Time of the last change, relative to aggregator start.
    pub updated: Duration,
}

impl QosRequest {
    pub fn is_active(&self) -> bool {
        self.value != 0
    }
}

/// Outcome of [`RequestTable::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Upsert {
    Inserted,
    /// A new id took over the slot of an inactive one.
    Reused { evicted: u32 },
    Updated { old: u32 },
    Unchanged,
}

#[derive(Debug)]
pub(crate) struct RequestTable {
    requests: Vec<QosRequest>,
    capacity: usize,
}

fn clip(tag: &str) -> String {
    tag.chars().take(TAG_MAX).collect()
}

impl RequestTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            requests: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn find(&self, id: u32) -> Option<&QosRequest> {
        self.requests.iter().find(|r| r.id == id)
    }

    /// Insert or update the request of `id`. `None` when the table is full
    /// and no inactive slot can be reused.
    pub(crate) fn upsert(
        &mut self,
        id: u32,
        value: u32,
        tag: &str,
        now: Duration,
    ) -> Option<Upsert> {
        if let Some(req) = self.requests.iter_mut().find(|r| r.id == id) {
            if req.value == value {
                return Some(Upsert::Unchanged);
            }
            let old = req.value;
            req.value = value;
            req.tag = clip(tag);
            req.updated = now;
            return Some(Upsert::Updated { old });
        }

        let fresh = QosRequest {
            id,
            value,
            tag: clip(tag),
            updated: now,
        };
        if self.requests.len() < self.capacity {
            self.requests.push(fresh);
            return Some(Upsert::Inserted);
        }
        let slot = self.requests.iter_mut().find(|r| !r.is_active())?;
        let evicted = slot.id;
        *slot = fresh;
        Some(Upsert::Reused { evicted })
    }

    /// Zero every active request. Returns the ids that were cleared.
    pub(crate) fn clear(&mut self, now: Duration) -> Vec<u32> {
        let mut cleared = Vec::new();
        for req in self.requests.iter_mut().filter(|r| r.is_active()) {
            req.value = 0;
            req.tag = "clear".to_string();
            req.updated = now;
            cleared.push(req.id);
        }
        cleared
    }

    /// Aggregate over active requests.
    pub(crate) fn aggregate(&self, policy: QosPolicy) -> u32 {
        let active = self.requests.iter().filter(|r| r.is_active()).map(|r| r.value);
        match policy {
            QosPolicy::Max => active.max().unwrap_or(0),
            QosPolicy::Min => active.min().unwrap_or(u32::MAX),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &QosRequest> {
        self.requests.iter()
    }
}
