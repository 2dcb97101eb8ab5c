use std::time::Duration;

use thiserror::Error;

use crate::topology::SyncViolation;
use crate::validate::ConfigViolation;

/// 设备控制层的统一错误类型
///
/// 按来源分为五类：争用 (AlreadyOpen)、配置 (ConfigurationInvalid)、
/// 硬件 (HardwareStartFailed / Disconnected)、状态 (InvalidState)、
/// 活性 (TimedOut / StreamStopped)。
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Device {index} is already open")]
    AlreadyOpen { index: u32 },

    #[error("Device {index} not found ({installed} installed)")]
    NotFound { index: u32, installed: u32 },

    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(#[from] ConfigurationError),

    #[error("Hardware rejected start: {0}")]
    HardwareStartFailed(String),

    #[error("Operation `{operation}` not allowed while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("No data within {0:?}")]
    TimedOut(Duration),

    #[error("Stream stopped")]
    StreamStopped,

    #[error("Device disconnected: {0}")]
    Disconnected(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 配置被拒绝的原因，拓扑问题与参数问题分开保存
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error(transparent)]
    Topology(#[from] SyncViolation),

    #[error(transparent)]
    Parameters(#[from] ConfigViolation),
}

impl CameraError {
    /// 是否属于"暂时没数据 / 流已结束"这类正常运行中的结果
    pub fn is_liveness(&self) -> bool {
        matches!(self, Self::TimedOut(_) | Self::StreamStopped)
    }

    pub fn invalid_state(operation: &'static str, state: impl ToString) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }
}

impl From<SyncViolation> for CameraError {
    fn from(v: SyncViolation) -> Self {
        Self::ConfigurationInvalid(v.into())
    }
}

impl From<ConfigViolation> for CameraError {
    fn from(v: ConfigViolation) -> Self {
        Self::ConfigurationInvalid(v.into())
    }
}

pub type Result<T> = std::result::Result<T, CameraError>;
