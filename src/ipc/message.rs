// CLASSIFICATION: COMMUNITY
// Filename: message.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! IPC message framing.
//!
//! Wire layout, little endian:
//!
//! ```text
//! ipcid:u32 | body...
//! system body: msgtype:u32 | param1:i32 | param2:i32 | param3:i32 | bundle...
//! ```

use std::convert::TryFrom;

use crate::error::{AboxError, Result};

/// Largest encoded message an IPC slot holds.
pub const IPC_MSG_MAX: usize = 768;
/// Largest bundle carried by a system message.
pub const BUNDLE_MAX: usize = IPC_MSG_MAX - 20;

/// Logical IPC channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum IpcId {
    System = 0,
    PcmPlayback = 1,
    PcmCapture = 2,
    Offload = 3,
    Erap = 4,
    Config = 5,
}

impl TryFrom<u32> for IpcId {
    type Error = AboxError;

    fn try_from(v: u32) -> Result<Self> {
        Ok(match v {
            0 => IpcId::System,
            1 => IpcId::PcmPlayback,
            2 => IpcId::PcmCapture,
            3 => IpcId::Offload,
            4 => IpcId::Erap,
            5 => IpcId::Config,
            other => return Err(AboxError::InvalidIpcId(other)),
        })
    }
}

/// System message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SystemMsgType {
    BootDone = 1,
    ChangeGear = 2,
    RequestSysclk = 3,
    Suspend = 4,
    Resume = 5,
    ApSuspend = 6,
    ApResume = 7,
    ChangedGear = 8,
    RequestDebug = 9,
    ReportFault = 10,
}

impl TryFrom<u32> for SystemMsgType {
    type Error = AboxError;

    fn try_from(v: u32) -> Result<Self> {
        use SystemMsgType::*;
        Ok(match v {
            1 => BootDone,
            2 => ChangeGear,
            3 => RequestSysclk,
            4 => Suspend,
            5 => Resume,
            6 => ApSuspend,
            7 => ApResume,
            8 => ChangedGear,
            9 => RequestDebug,
            10 => ReportFault,
            other => return Err(AboxError::Malformed(format!("system msgtype {other}"))),
        })
    }
}

/// Body of an [`IpcId::System`] message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemMsg {
    pub msgtype: SystemMsgType,
    pub param1: i32,
    pub param2: i32,
    pub param3: i32,
    pub bundle: Vec<u8>,
}

impl SystemMsg {
    pub fn new(msgtype: SystemMsgType) -> Self {
        Self {
            msgtype,
            param1: 0,
            param2: 0,
            param3: 0,
            bundle: Vec::new(),
        }
    }

    pub fn params(mut self, p1: i32, p2: i32, p3: i32) -> Self {
        self.param1 = p1;
        self.param2 = p2;
        self.param3 = p3;
        self
    }

    pub fn bundle(mut self, bundle: &[u8]) -> Self {
        self.bundle = bundle.to_vec();
        self
    }

    /// Bundle of two u64 values, as carried by suspend/resume messages.
    pub fn bundle_u64(self, a: u64, b: u64) -> Self {
        let mut raw = [0u8; 16];
        raw[..8].copy_from_slice(&a.to_le_bytes());
        raw[8..].copy_from_slice(&b.to_le_bytes());
        self.bundle(&raw)
    }

    pub fn into_message(self) -> IpcMessage {
        let mut body = Vec::with_capacity(16 + self.bundle.len());
        body.extend_from_slice(&(self.msgtype as u32).to_le_bytes());
        body.extend_from_slice(&self.param1.to_le_bytes());
        body.extend_from_slice(&self.param2.to_le_bytes());
        body.extend_from_slice(&self.param3.to_le_bytes());
        body.extend_from_slice(&self.bundle);
        IpcMessage {
            id: IpcId::System,
            body,
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        if body.len() < 16 {
            return Err(AboxError::Malformed(format!(
                "system body of {} bytes",
                body.len()
            )));
        }
        let word = |i: usize| {
            let mut w = [0u8; 4];
            w.copy_from_slice(&body[i * 4..i * 4 + 4]);
            w
        };
        Ok(Self {
            msgtype: SystemMsgType::try_from(u32::from_le_bytes(word(0)))?,
            param1: i32::from_le_bytes(word(1)),
            param2: i32::from_le_bytes(word(2)),
            param3: i32::from_le_bytes(word(3)),
            bundle: body[16..].to_vec(),
        })
    }
}

/// One message on an IPC channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcMessage {
    pub id: IpcId,
    pub body: Vec<u8>,
}

impl IpcMessage {
    pub fn new(id: IpcId, body: &[u8]) -> Self {
        Self {
            id,
            body: body.to_vec(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        4 + self.body.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&(self.id as u32).to_le_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < 4 {
            return Err(AboxError::Malformed("missing ipc id".into()));
        }
        if raw.len() > IPC_MSG_MAX {
            return Err(AboxError::InvalidMessage {
                size: raw.len(),
                max: IPC_MSG_MAX,
            });
        }
        let mut id = [0u8; 4];
        id.copy_from_slice(&raw[..4]);
        Ok(Self {
            id: IpcId::try_from(u32::from_le_bytes(id))?,
            body: raw[4..].to_vec(),
        })
    }

    /// Decode the body as a system message.
    pub fn system(&self) -> Result<SystemMsg> {
        if self.id != IpcId::System {
            return Err(AboxError::Malformed(format!("{:?} is not a system message", self.id)));
        }
        SystemMsg::decode(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_done_frame_layout() {
        let raw = SystemMsg::new(SystemMsgType::BootDone)
            .params(0, 0, 0x4142_4344)
            .into_message()
            .encode();
        assert_eq!(raw.len(), 20);
        assert_eq!(&raw[..4], &0u32.to_le_bytes());
        assert_eq!(&raw[4..8], &1u32.to_le_bytes());
        let back = IpcMessage::decode(&raw).unwrap().system().unwrap();
        assert_eq!(back.param3, 0x4142_4344);
    }

    #[test]
    fn unknown_ids_rejected() {
        let raw = 42u32.to_le_bytes();
        assert!(matches!(
            IpcMessage::decode(&raw),
            Err(AboxError::InvalidIpcId(42))
        ));
        assert!(SystemMsg::decode(&[0u8; 8]).is_err());
    }

    #[test]
    fn pcm_message_is_not_system() {
        let msg = IpcMessage::new(IpcId::PcmPlayback, &[1, 2, 3]);
        assert!(msg.system().is_err());
        assert_eq!(msg.encoded_len(), 7);
    }
}
