use std::fmt;

#[cfg(feature = "serialize")]
use serde::Serialize;

/// 单条流水线的计数快照
#[derive(Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct PipelineStats {
    /// 传输层成功送入队列的数量
    pub delivered: u64,
    /// 被调用方取走的数量
    pub consumed: u64,
    /// 停流时仍在队列中、由流水线自行释放的数量
    pub discarded: u64,
    /// 流水线关闭后传输层仍尝试送入而被拒绝的数量
    pub rejected: u64,
}

impl PipelineStats {
    /// 当前仍在队列中的数量
    pub fn queued(&self) -> u64 {
        self.delivered
            .saturating_sub(self.consumed)
            .saturating_sub(self.discarded)
    }

    pub fn accumulate(&mut self, other: PipelineStats) {
        self.delivered += other.delivered;
        self.consumed += other.consumed;
        self.discarded += other.discarded;
        self.rejected += other.rejected;
    }
}

impl fmt::Debug for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStats")
            .field("in", &self.delivered)
            .field("out", &self.consumed)
            .field("discarded", &self.discarded)
            .field("rejected", &self.rejected)
            .finish()
    }
}

/// 会话级遥测：相机与 IMU 两条流水线的累计值
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct SessionTelemetry {
    pub captures: PipelineStats,
    pub imu: PipelineStats,
    pub camera_starts: u32,
    pub failed_starts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthIssue {
    /// 调用方取数据太慢，停流时队列里还堆着数据
    DroppedOnStop,
    /// 启动失败次数多于成功次数
    UnreliableStart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceHealthStatus {
    Healthy,
    Warning(HealthIssue),
}

impl SessionTelemetry {
    pub fn assess_health(&self) -> DeviceHealthStatus {
        if self.failed_starts > self.camera_starts {
            return DeviceHealthStatus::Warning(HealthIssue::UnreliableStart);
        }
        if self.captures.discarded > 0 {
            return DeviceHealthStatus::Warning(HealthIssue::DroppedOnStop);
        }
        DeviceHealthStatus::Healthy
    }
}
