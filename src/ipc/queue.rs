// CLASSIFICATION: COMMUNITY
// Filename: queue.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! Fixed-capacity IPC ring queue.
//!
//! Producers may be interrupt or atomic callers, so neither side blocks
//! beyond the short index lock. One slot is always left free to tell a full
//! ring from an empty one: a ring of `N` slots holds `N - 1` messages.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::debug;

use super::message::{IpcId, IPC_MSG_MAX};
use crate::error::{AboxError, Result};

/// Slots of the driver's outbound queue.
pub const IPC_QUEUE_SIZE: usize = 64;

/// Identifies the component that queued a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceId(pub u32);

/// One queued message.
#[derive(Clone)]
pub struct IpcSlot {
    pub device: DeviceId,
    pub hw_irq: IpcId,
    /// Enqueue time, relative to queue creation.
    pub put_time: Duration,
    /// Dequeue time, relative to queue creation.
    pub get_time: Duration,
    msg: [u8; IPC_MSG_MAX],
    size: usize,
}

impl IpcSlot {
    fn empty() -> Self {
        Self {
            device: DeviceId::default(),
            hw_irq: IpcId::System,
            put_time: Duration::ZERO,
            get_time: Duration::ZERO,
            msg: [0; IPC_MSG_MAX],
            size: 0,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.msg[..self.size]
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl std::fmt::Debug for IpcSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcSlot")
            .field("device", &self.device)
            .field("hw_irq", &self.hw_irq)
            .field("put_time", &self.put_time)
            .field("get_time", &self.get_time)
            .field("size", &self.size)
            .finish()
    }
}

struct Ring {
    slots: Vec<IpcSlot>,
    start: usize,
    end: usize,
}

impl Ring {
    fn is_empty(&self) -> bool {
        self.start == self.end
    }

    fn is_full(&self) -> bool {
        (self.end + 1) % self.slots.len() == self.start
    }

    fn len(&self) -> usize {
        (self.end + self.slots.len() - self.start) % self.slots.len()
    }
}

/// Ring of `N` message slots.
pub struct IpcQueue<const N: usize> {
    ring: Mutex<Ring>,
    epoch: Instant,
}

impl<const N: usize> Default for IpcQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> IpcQueue<N> {
    pub fn new() -> Self {
        assert!(N >= 2, "ipc queue needs at least two slots");
        Self {
            ring: Mutex::new(Ring {
                slots: (0..N).map(|_| IpcSlot::empty()).collect(),
                start: 0,
                end: 0,
            }),
            epoch: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Copy `msg` into the next free slot.
    pub fn put(&self, device: DeviceId, hw_irq: IpcId, msg: &[u8]) -> Result<()> {
        if msg.len() > IPC_MSG_MAX {
            return Err(AboxError::InvalidMessage {
                size: msg.len(),
                max: IPC_MSG_MAX,
            });
        }
        let now = self.epoch.elapsed();
        let mut ring = self.lock();
        if ring.is_full() {
            return Err(AboxError::QueueFull);
        }
        let end = ring.end;
        let slot = &mut ring.slots[end];
        slot.device = device;
        slot.hw_irq = hw_irq;
        slot.put_time = now;
        slot.get_time = Duration::ZERO;
        slot.msg[..msg.len()].copy_from_slice(msg);
        slot.size = msg.len();
        ring.end = (end + 1) % N;
        Ok(())
    }

    /// Take the oldest message.
    pub fn get(&self) -> Result<IpcSlot> {
        let now = self.epoch.elapsed();
        let mut ring = self.lock();
        if ring.is_empty() {
            return Err(AboxError::QueueEmpty);
        }
        let start = ring.start;
        ring.slots[start].get_time = now;
        let slot = ring.slots[start].clone();
        ring.start = (start + 1) % N;
        debug!(
            "ipc queue get: {:?} waited {:?}",
            slot.hw_irq,
            slot.get_time.saturating_sub(slot.put_time)
        );
        Ok(slot)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Messages the ring can hold at once.
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Current (start, end) indices.
    pub fn indices(&self) -> (usize, usize) {
        let ring = self.lock();
        (ring.start, ring.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEV: DeviceId = DeviceId(1);

    #[test]
    fn fifo_with_one_slot_reserved() {
        let q: IpcQueue<4> = IpcQueue::new();
        for m in [b"A", b"B", b"C"] {
            q.put(DEV, IpcId::System, m).unwrap();
        }
        assert!(matches!(q.put(DEV, IpcId::System, b"D"), Err(AboxError::QueueFull)));
        assert_eq!(q.get().unwrap().payload(), b"A");
        assert_eq!(q.get().unwrap().payload(), b"B");
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().unwrap().payload(), b"C");
        assert!(matches!(q.get(), Err(AboxError::QueueEmpty)));
    }

    #[test]
    fn wraps_around() {
        let q: IpcQueue<3> = IpcQueue::new();
        for round in 0u8..10 {
            q.put(DEV, IpcId::Erap, &[round]).unwrap();
            q.put(DEV, IpcId::Erap, &[round, 1]).unwrap();
            assert_eq!(q.get().unwrap().payload(), &[round]);
            assert_eq!(q.get().unwrap().payload(), &[round, 1]);
        }
        assert!(q.is_empty());
    }

    #[test]
    fn oversized_message_is_invalid() {
        let q: IpcQueue<4> = IpcQueue::new();
        let big = vec![0u8; IPC_MSG_MAX + 1];
        assert!(matches!(
            q.put(DEV, IpcId::System, &big),
            Err(AboxError::InvalidMessage { .. })
        ));
        assert!(q.is_empty());
    }

    #[test]
    fn slot_keeps_origin_and_timestamps() {
        let q: IpcQueue<4> = IpcQueue::new();
        q.put(DeviceId(7), IpcId::Offload, &[9; 12]).unwrap();
        let slot = q.get().unwrap();
        assert_eq!(slot.device, DeviceId(7));
        assert_eq!(slot.hw_irq, IpcId::Offload);
        assert_eq!(slot.size(), 12);
        assert!(slot.get_time >= slot.put_time);
    }
}
