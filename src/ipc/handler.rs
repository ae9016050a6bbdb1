// CLASSIFICATION: COMMUNITY
// Filename: handler.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! Incoming IPC handler registry.

use std::sync::{Arc, RwLock};

use log::{debug, info};

use super::message::{IpcId, IpcMessage};
use super::queue::DeviceId;

/// Whether a handler consumed a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    None,
    Handled,
}

/// Component that reacts to messages from the co-processor.
pub trait IpcHandler: Send + Sync {
    fn handle(&self, id: IpcId, msg: &IpcMessage) -> IrqReturn;
}

impl<F> IpcHandler for F
where
    F: Fn(IpcId, &IpcMessage) -> IrqReturn + Send + Sync,
{
    fn handle(&self, id: IpcId, msg: &IpcMessage) -> IrqReturn {
        self(id, msg)
    }
}

struct Entry {
    id: IpcId,
    owner: DeviceId,
    handler: Arc<dyn IpcHandler>,
}

/// Handlers keyed by channel and owner.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: RwLock<Vec<Entry>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `id`. A second registration by the same owner
    /// replaces the first.
    pub fn register(&self, id: IpcId, owner: DeviceId, handler: Arc<dyn IpcHandler>) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        if let Some(e) = entries.iter_mut().find(|e| e.id == id && e.owner == owner) {
            debug!("ipc handler for {:?} replaced by {:?}", id, owner);
            e.handler = handler;
            return;
        }
        info!("ipc handler registered: {:?} by {:?}", id, owner);
        entries.push(Entry { id, owner, handler });
    }

    pub fn unregister(&self, id: IpcId, owner: DeviceId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        let before = entries.len();
        entries.retain(|e| !(e.id == id && e.owner == owner));
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand `msg` to the handlers of its channel in registration order.
    /// Without `broadcast` the first `Handled` ends the walk.
    pub fn dispatch(&self, msg: &IpcMessage, broadcast: bool) -> IrqReturn {
        let handlers: Vec<Arc<dyn IpcHandler>> = self
            .entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|e| e.id == msg.id)
            .map(|e| e.handler.clone())
            .collect();

        let mut ret = IrqReturn::None;
        for handler in handlers {
            if handler.handle(msg.id, msg) == IrqReturn::Handled {
                ret = IrqReturn::Handled;
                if !broadcast {
                    break;
                }
            }
        }
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(hits: &Arc<AtomicUsize>, ret: IrqReturn) -> Arc<dyn IpcHandler> {
        let hits = hits.clone();
        Arc::new(move |_: IpcId, _: &IpcMessage| {
            hits.fetch_add(1, Ordering::SeqCst);
            ret
        })
    }

    #[test]
    fn same_owner_replaces() {
        let reg = HandlerRegistry::new();
        let old = Arc::new(AtomicUsize::new(0));
        let new = Arc::new(AtomicUsize::new(0));
        reg.register(IpcId::Erap, DeviceId(1), counting(&old, IrqReturn::Handled));
        reg.register(IpcId::Erap, DeviceId(1), counting(&new, IrqReturn::Handled));
        assert_eq!(reg.len(), 1);
        reg.dispatch(&IpcMessage::new(IpcId::Erap, &[]), false);
        assert_eq!(old.load(Ordering::SeqCst), 0);
        assert_eq!(new.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn first_handled_stops_unless_broadcast() {
        let reg = HandlerRegistry::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        reg.register(IpcId::System, DeviceId(1), counting(&a, IrqReturn::Handled));
        reg.register(IpcId::System, DeviceId(2), counting(&b, IrqReturn::Handled));
        let msg = IpcMessage::new(IpcId::System, &[]);

        assert_eq!(reg.dispatch(&msg, false), IrqReturn::Handled);
        assert_eq!((a.load(Ordering::SeqCst), b.load(Ordering::SeqCst)), (1, 0));
        reg.dispatch(&msg, true);
        assert_eq!((a.load(Ordering::SeqCst), b.load(Ordering::SeqCst)), (2, 1));
    }

    #[test]
    fn other_channels_are_ignored() {
        let reg = HandlerRegistry::new();
        let a = Arc::new(AtomicUsize::new(0));
        reg.register(IpcId::PcmPlayback, DeviceId(3), counting(&a, IrqReturn::Handled));
        let ret = reg.dispatch(&IpcMessage::new(IpcId::PcmCapture, &[]), false);
        assert_eq!(ret, IrqReturn::None);
        assert!(reg.unregister(IpcId::PcmPlayback, DeviceId(3)));
        assert!(reg.is_empty());
    }
}
