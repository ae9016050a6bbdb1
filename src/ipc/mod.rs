// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! Host to co-processor messaging.

pub mod dispatch;
pub mod handler;
pub mod message;
pub mod queue;

pub use dispatch::IpcDispatcher;
pub use handler::{HandlerRegistry, IpcHandler, IrqReturn};
pub use message::{IpcId, IpcMessage, SystemMsg, SystemMsgType, IPC_MSG_MAX};
pub use queue::{DeviceId, IpcQueue, IpcSlot, IPC_QUEUE_SIZE};
