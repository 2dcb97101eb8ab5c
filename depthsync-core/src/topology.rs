//! 有线同步拓扑校验
//!
//! 同步角色代表物理接线关系：主机必须插着 Sync Out，从机必须插着 Sync In。
//! 校验是纯函数，只依赖请求的角色和打开设备时读取的接口快照，
//! 在任何硬件编程之前执行。

use std::fmt;

use bitflags::bitflags;
use thiserror::Error;

use crate::builder::WiredSyncMode;

bitflags! {
    /// 同步接口上是否插有线缆 (硬件上报，连接期间不变)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SyncJacks: u8 {
        const SYNC_IN = 0b01;
        const SYNC_OUT = 0b10;
    }
}

impl SyncJacks {
    pub fn from_presence(in_present: bool, out_present: bool) -> Self {
        let mut jacks = Self::empty();
        jacks.set(Self::SYNC_IN, in_present);
        jacks.set(Self::SYNC_OUT, out_present);
        jacks
    }

    pub fn in_present(self) -> bool {
        self.contains(Self::SYNC_IN)
    }

    pub fn out_present(self) -> bool {
        self.contains(Self::SYNC_OUT)
    }
}

impl fmt::Display for SyncJacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "in={} out={}",
            if self.in_present() { "yes" } else { "no" },
            if self.out_present() { "yes" } else { "no" }
        )
    }
}

/// 同步角色不可满足的原因
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum SyncViolation {
    #[error("master mode requires a cable on the sync-out jack")]
    NoSyncOutCable,

    #[error("subordinate mode requires a cable on the sync-in jack")]
    NoSyncInCable,
}

/// 拓扑校验结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    Legal,
    Illegal(SyncViolation),
}

impl SyncDecision {
    pub fn is_legal(self) -> bool {
        matches!(self, Self::Legal)
    }

    pub fn reason(self) -> Option<SyncViolation> {
        match self {
            Self::Legal => None,
            Self::Illegal(v) => Some(v),
        }
    }

    pub fn into_result(self) -> Result<(), SyncViolation> {
        match self {
            Self::Legal => Ok(()),
            Self::Illegal(v) => Err(v),
        }
    }
}

/// 判断角色在当前接线下是否可用
pub fn decide(role: WiredSyncMode, jacks: SyncJacks) -> SyncDecision {
    match role {
        WiredSyncMode::Standalone => SyncDecision::Legal,
        WiredSyncMode::Master if jacks.out_present() => SyncDecision::Legal,
        WiredSyncMode::Master => SyncDecision::Illegal(SyncViolation::NoSyncOutCable),
        WiredSyncMode::Subordinate if jacks.in_present() => SyncDecision::Legal,
        WiredSyncMode::Subordinate => SyncDecision::Illegal(SyncViolation::NoSyncInCable),
    }
}
