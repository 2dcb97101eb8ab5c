use std::fmt;
use std::time::Duration;

use crate::pixel_format::ImageFormat;

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// 彩色相机分辨率
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum ColorResolution {
    #[default]
    Off,
    R720p,
    R1080p,
    R1440p,
    R1536p,
    R2160p,
    R3072p,
}

impl ColorResolution {
    /// (宽, 高)，关闭时返回 None
    pub fn dimensions(self) -> Option<(u32, u32)> {
        match self {
            Self::Off => None,
            Self::R720p => Some((1280, 720)),
            Self::R1080p => Some((1920, 1080)),
            Self::R1440p => Some((2560, 1440)),
            Self::R1536p => Some((2048, 1536)),
            Self::R2160p => Some((3840, 2160)),
            Self::R3072p => Some((4096, 3072)),
        }
    }

    pub fn is_enabled(self) -> bool {
        self != Self::Off
    }
}

/// 深度相机工作模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum DepthMode {
    #[default]
    Off,
    /// 窄视场，2x2 合并
    NfovBinned,
    NfovUnbinned,
    /// 宽视场，2x2 合并
    WfovBinned,
    WfovUnbinned,
    /// 仅被动红外，无深度
    PassiveIr,
}

impl DepthMode {
    pub fn dimensions(self) -> Option<(u32, u32)> {
        match self {
            Self::Off => None,
            Self::NfovBinned => Some((320, 288)),
            Self::NfovUnbinned => Some((640, 576)),
            Self::WfovBinned => Some((512, 512)),
            Self::WfovUnbinned => Some((1024, 1024)),
            Self::PassiveIr => Some((1024, 1024)),
        }
    }

    pub fn is_enabled(self) -> bool {
        self != Self::Off
    }

    /// 被动红外模式下只有 IR 图，没有深度图
    pub fn produces_depth(self) -> bool {
        !matches!(self, Self::Off | Self::PassiveIr)
    }
}

/// 相机帧率
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum Fps {
    Fps5,
    Fps15,
    #[default]
    Fps30,
}

impl Fps {
    pub fn hz(self) -> u32 {
        match self {
            Self::Fps5 => 5,
            Self::Fps15 => 15,
            Self::Fps30 => 30,
        }
    }

    /// 一帧的周期 (微秒)
    pub fn period_usec(self) -> u32 {
        1_000_000 / self.hz()
    }

    pub fn period(self) -> Duration {
        Duration::from_micros(self.period_usec() as u64)
    }
}

/// 有线同步链中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum WiredSyncMode {
    /// 不参与同步链，忽略同步线
    #[default]
    Standalone,
    /// 通过 Sync Out 驱动下游设备
    Master,
    /// 通过 Sync In 跟随上游设备
    Subordinate,
}

impl fmt::Display for WiredSyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Standalone => "standalone",
            Self::Master => "master",
            Self::Subordinate => "subordinate",
        };
        f.write_str(s)
    }
}

/// 启动相机时的完整配置
///
/// 与同步和生命周期相关的字段由本库校验；
/// 其余字段 (格式、延迟等) 原样转交给传输层。
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct DeviceConfiguration {
    pub color_format: ImageFormat,
    pub color_resolution: ColorResolution,
    pub depth_mode: DepthMode,
    pub camera_fps: Fps,
    /// 只交付彩色与深度同时齐全的 Capture
    pub synchronized_images_only: bool,
    /// 深度相对彩色的触发偏移 (微秒，可为负)
    pub depth_delay_off_color_usec: i32,
    pub wired_sync_mode: WiredSyncMode,
    /// 从机相对主机的触发延迟 (微秒)，仅从机可用
    pub subordinate_delay_off_master_usec: u32,
    pub disable_streaming_indicator: bool,
}

impl Default for DeviceConfiguration {
    fn default() -> Self {
        Self::disable_all()
    }
}

impl DeviceConfiguration {
    /// 所有传感器关闭的初始配置，按需逐项打开
    pub fn disable_all() -> Self {
        Self {
            color_format: ImageFormat::ColorMjpg,
            color_resolution: ColorResolution::Off,
            depth_mode: DepthMode::Off,
            camera_fps: Fps::Fps30,
            synchronized_images_only: false,
            depth_delay_off_color_usec: 0,
            wired_sync_mode: WiredSyncMode::Standalone,
            subordinate_delay_off_master_usec: 0,
            disable_streaming_indicator: false,
        }
    }

    pub fn color(mut self, format: ImageFormat, resolution: ColorResolution) -> Self {
        self.color_format = format;
        self.color_resolution = resolution;
        self
    }

    pub fn depth(mut self, mode: DepthMode) -> Self {
        self.depth_mode = mode;
        self
    }

    pub fn fps(mut self, fps: Fps) -> Self {
        self.camera_fps = fps;
        self
    }

    pub fn wired_sync(mut self, mode: WiredSyncMode) -> Self {
        self.wired_sync_mode = mode;
        self
    }

    pub fn subordinate_delay_usec(mut self, usec: u32) -> Self {
        self.subordinate_delay_off_master_usec = usec;
        self
    }

    pub fn depth_delay_usec(mut self, usec: i32) -> Self {
        self.depth_delay_off_color_usec = usec;
        self
    }

    pub fn synchronized_images_only(mut self, enabled: bool) -> Self {
        self.synchronized_images_only = enabled;
        self
    }

    /// 至少一个相机被打开
    pub fn any_camera_enabled(&self) -> bool {
        self.color_resolution.is_enabled() || self.depth_mode.is_enabled()
    }

    /// 同一配置改为另一个同步角色，常用于失败后以 Standalone 重试
    pub fn with_role(&self, mode: WiredSyncMode) -> Self {
        Self {
            wired_sync_mode: mode,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disable_all_turns_every_camera_off() {
        let cfg = DeviceConfiguration::disable_all();
        assert!(!cfg.any_camera_enabled());
        assert_eq!(cfg.wired_sync_mode, WiredSyncMode::Standalone);
    }

    #[test]
    fn builder_sets_requested_modes() {
        let cfg = DeviceConfiguration::disable_all()
            .color(ImageFormat::ColorMjpg, ColorResolution::R1080p)
            .depth(DepthMode::NfovBinned)
            .fps(Fps::Fps30)
            .wired_sync(WiredSyncMode::Master);

        assert!(cfg.any_camera_enabled());
        assert_eq!(cfg.color_resolution.dimensions(), Some((1920, 1080)));
        assert_eq!(cfg.depth_mode.dimensions(), Some((320, 288)));

        let standalone = cfg.with_role(WiredSyncMode::Standalone);
        assert_eq!(standalone.wired_sync_mode, WiredSyncMode::Standalone);
        assert_eq!(standalone.color_resolution, cfg.color_resolution);
    }

    #[test]
    fn frame_period_matches_rate() {
        assert_eq!(Fps::Fps30.period_usec(), 33_333);
        assert_eq!(Fps::Fps5.period(), Duration::from_millis(200));
    }

    #[cfg(feature = "serialize")]
    #[test]
    fn configuration_persists_as_json() -> anyhow::Result<()> {
        let cfg = DeviceConfiguration::disable_all()
            .depth(DepthMode::WfovBinned)
            .wired_sync(WiredSyncMode::Subordinate)
            .subordinate_delay_usec(160);

        let text = serde_json::to_string(&cfg)?;
        let back: DeviceConfiguration = serde_json::from_str(&text)?;
        assert_eq!(back, cfg);
        Ok(())
    }
}
