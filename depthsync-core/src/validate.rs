use thiserror::Error;

use crate::builder::{ColorResolution, DepthMode, DeviceConfiguration, Fps, WiredSyncMode};
use crate::error::ConfigurationError;
use crate::topology::{self, SyncJacks};

/// 与接线无关的参数错误
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum ConfigViolation {
    #[error("at least one of the color or depth cameras must be enabled")]
    NoCamerasEnabled,

    #[error("master mode requires the color camera")]
    MasterRequiresColor,

    #[error("30 fps is not supported by the requested color/depth mode")]
    FpsNotSupported,

    #[error("subordinate delay is only valid in subordinate mode")]
    SubordinateDelayWithoutSubordinate,

    #[error("subordinate delay {delay_usec}us exceeds one frame period ({period_usec}us)")]
    SubordinateDelayTooLarge { delay_usec: u32, period_usec: u32 },

    #[error("depth delay {delay_usec}us exceeds one frame period ({period_usec}us)")]
    DepthDelayTooLarge { delay_usec: i32, period_usec: u32 },

    #[error("synchronized images require both color and depth cameras")]
    SynchronizedImagesRequiresBoth,
}

/// 参数校验 (纯函数)
pub fn check_parameters(config: &DeviceConfiguration) -> Result<(), ConfigViolation> {
    if !config.any_camera_enabled() {
        return Err(ConfigViolation::NoCamerasEnabled);
    }

    if config.wired_sync_mode == WiredSyncMode::Master && !config.color_resolution.is_enabled() {
        return Err(ConfigViolation::MasterRequiresColor);
    }

    if config.camera_fps == Fps::Fps30
        && (config.color_resolution == ColorResolution::R3072p
            || config.depth_mode == DepthMode::WfovUnbinned)
    {
        return Err(ConfigViolation::FpsNotSupported);
    }

    let period_usec = config.camera_fps.period_usec();

    if config.subordinate_delay_off_master_usec != 0 {
        if config.wired_sync_mode != WiredSyncMode::Subordinate {
            return Err(ConfigViolation::SubordinateDelayWithoutSubordinate);
        }
        if config.subordinate_delay_off_master_usec > period_usec {
            return Err(ConfigViolation::SubordinateDelayTooLarge {
                delay_usec: config.subordinate_delay_off_master_usec,
                period_usec,
            });
        }
    }

    if config.depth_delay_off_color_usec.unsigned_abs() > period_usec {
        return Err(ConfigViolation::DepthDelayTooLarge {
            delay_usec: config.depth_delay_off_color_usec,
            period_usec,
        });
    }

    if config.synchronized_images_only
        && !(config.color_resolution.is_enabled() && config.depth_mode.is_enabled())
    {
        return Err(ConfigViolation::SynchronizedImagesRequiresBoth);
    }

    Ok(())
}

/// 启动前的完整校验：先参数，再拓扑。
/// 任何一步失败都不会触碰硬件。
pub fn check_start(
    config: &DeviceConfiguration,
    jacks: SyncJacks,
) -> Result<(), ConfigurationError> {
    check_parameters(config)?;
    topology::decide(config.wired_sync_mode, jacks).into_result()?;
    Ok(())
}
