//! 设备会话：一台被独占打开的设备及其流状态机
//!
//! 相机: Idle → Starting → Running → Stopping → Idle
//! IMU:  Idle → Running → Idle (只能在相机 Running 时启动)
//!
//! 生命周期操作 (start/stop/close) 通过设备锁串行化；
//! `get_next_capture` 只在取流水线句柄时短暂加状态锁，等待期间不持任何锁，
//! 因此另一个线程的 `stop_cameras` 能立刻唤醒它。

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use depthsync_core::builder::{DeviceConfiguration, WiredSyncMode};
use depthsync_core::error::{CameraError, Result};
use depthsync_core::frame::{Capture, ImuSample};
use depthsync_core::pipeline::Pipeline;
use depthsync_core::telemetry::SessionTelemetry;
use depthsync_core::topology::SyncJacks;
use depthsync_core::traits::Device;
use depthsync_core::validate;

use crate::internal::lock;
use crate::registry::{DeviceRegistry, OwnershipToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum CameraState {
    Idle,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum ImuState {
    Idle,
    Running,
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "cameras idle",
            Self::Starting => "cameras starting",
            Self::Running => "cameras running",
            Self::Stopping => "cameras stopping",
        };
        f.write_str(s)
    }
}

impl fmt::Display for ImuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("imu idle"),
            Self::Running => f.write_str("imu running"),
        }
    }
}

#[derive(Debug)]
struct Status {
    cameras: CameraState,
    imu: ImuState,
    config: Option<DeviceConfiguration>,
    captures: Option<Arc<Pipeline<Capture>>>,
    imu_samples: Option<Arc<Pipeline<ImuSample>>>,
    // 已结束的流水线累计值
    telemetry: SessionTelemetry,
}

pub struct DeviceSession {
    registry: Arc<DeviceRegistry>,
    index: u32,
    token: OwnershipToken,
    serial_number: String,
    /// 打开时读取的接线快照
    jacks: SyncJacks,
    // None 表示已关闭
    device: Mutex<Option<Box<dyn Device>>>,
    status: Mutex<Status>,
    closed: AtomicBool,
}

impl DeviceSession {
    pub(crate) fn new(
        registry: Arc<DeviceRegistry>,
        index: u32,
        token: OwnershipToken,
        device: Box<dyn Device>,
        serial_number: String,
        jacks: SyncJacks,
    ) -> Self {
        Self {
            registry,
            index,
            token,
            serial_number,
            jacks,
            device: Mutex::new(Some(device)),
            status: Mutex::new(Status {
                cameras: CameraState::Idle,
                imu: ImuState::Idle,
                config: None,
                captures: None,
                imu_samples: None,
                telemetry: SessionTelemetry::default(),
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn ownership_token(&self) -> OwnershipToken {
        self.token
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn sync_jacks(&self) -> SyncJacks {
        self.jacks
    }

    pub fn camera_state(&self) -> CameraState {
        self.status().cameras
    }

    pub fn imu_state(&self) -> ImuState {
        self.status().imu
    }

    /// 相机运行中使用的配置
    pub fn active_configuration(&self) -> Option<DeviceConfiguration> {
        self.status().config.clone()
    }

    /// 当前生效的同步角色，相机未运行时为 None
    pub fn wired_sync_mode(&self) -> Option<WiredSyncMode> {
        self.status().config.as_ref().map(|c| c.wired_sync_mode)
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        lock(&self.status)
    }

    /// 启动相机
    ///
    /// 仅在 Idle 时可用。先校验参数与同步拓扑 (失败时不碰硬件)，
    /// 再编程硬件；硬件拒绝时会话完整回到 Idle。
    pub fn start_cameras(&self, config: &DeviceConfiguration) -> Result<()> {
        let mut device_slot = lock(&self.device);
        let device = device_slot
            .as_mut()
            .ok_or_else(|| CameraError::invalid_state("start_cameras", "session closed"))?;

        {
            let status = self.status();
            if status.cameras != CameraState::Idle {
                return Err(CameraError::invalid_state("start_cameras", status.cameras));
            }
        }

        if let Err(reason) = validate::check_start(config, self.jacks) {
            tracing::warn!(
                target: "depthsync::session",
                index = self.index,
                role = %config.wired_sync_mode,
                jacks = %self.jacks,
                %reason,
                "start rejected before touching hardware"
            );
            return Err(reason.into());
        }

        self.status().cameras = CameraState::Starting;
        let pipeline = Arc::new(Pipeline::new("captures"));

        match device.start_cameras(config, pipeline.sink()) {
            Ok(()) => {
                let mut status = self.status();
                status.cameras = CameraState::Running;
                status.config = Some(config.clone());
                status.captures = Some(pipeline);
                status.telemetry.camera_starts += 1;
                tracing::info!(
                    target: "depthsync::session",
                    index = self.index,
                    serial = %self.serial_number,
                    role = %config.wired_sync_mode,
                    color = ?config.color_resolution,
                    depth = ?config.depth_mode,
                    fps = config.camera_fps.hz(),
                    "cameras started"
                );
                Ok(())
            }
            Err(e) => {
                // 后端保证失败时硬件未启动；这里清掉可能残留的数据
                pipeline.close();
                pipeline.drain();
                let mut status = self.status();
                status.cameras = CameraState::Idle;
                status.telemetry.failed_starts += 1;
                status.telemetry.captures.accumulate(pipeline.stats());
                tracing::warn!(target: "depthsync::session", index = self.index, error = %e, "hardware rejected camera start");
                Err(match e {
                    CameraError::HardwareStartFailed(msg) => CameraError::HardwareStartFailed(msg),
                    other => CameraError::HardwareStartFailed(other.to_string()),
                })
            }
        }
    }

    /// 停止相机，释放所有未取走的 Capture，唤醒等待中的 `get_next_capture`。
    /// 已经停止时什么也不做。
    pub fn stop_cameras(&self) {
        let mut device_slot = lock(&self.device);
        let Some(device) = device_slot.as_mut() else {
            return;
        };

        let pipeline = {
            let mut status = self.status();
            if status.cameras == CameraState::Idle {
                return;
            }
            status.cameras = CameraState::Stopping;
            status.captures.take()
        };

        // 1. 先唤醒等待者，再停硬件
        if let Some(pipeline) = &pipeline {
            pipeline.close();
        }
        if let Err(e) = device.stop_cameras() {
            tracing::warn!(target: "depthsync::session", index = self.index, error = %e, "error while stopping cameras");
        }

        // 2. 硬件已不再推送，释放残留数据
        let mut status = self.status();
        if let Some(pipeline) = pipeline {
            let released = pipeline.drain();
            status.telemetry.captures.accumulate(pipeline.stats());
            tracing::debug!(target: "depthsync::session", index = self.index, released, "capture queue drained");
        }
        status.cameras = CameraState::Idle;
        status.config = None;
        tracing::info!(target: "depthsync::session", index = self.index, "cameras stopped");
    }

    /// 启动 IMU；相机必须处于 Running
    pub fn start_imu(&self) -> Result<()> {
        let mut device_slot = lock(&self.device);
        let device = device_slot
            .as_mut()
            .ok_or_else(|| CameraError::invalid_state("start_imu", "session closed"))?;

        {
            let status = self.status();
            if status.cameras != CameraState::Running {
                return Err(CameraError::invalid_state("start_imu", status.cameras));
            }
            if status.imu != ImuState::Idle {
                return Err(CameraError::invalid_state("start_imu", status.imu));
            }
        }

        let pipeline = Arc::new(Pipeline::new("imu"));
        if let Err(e) = device.start_imu(pipeline.sink()) {
            pipeline.close();
            pipeline.drain();
            tracing::warn!(target: "depthsync::session", index = self.index, error = %e, "hardware rejected imu start");
            return Err(match e {
                CameraError::HardwareStartFailed(msg) => CameraError::HardwareStartFailed(msg),
                other => CameraError::HardwareStartFailed(other.to_string()),
            });
        }

        let mut status = self.status();
        status.imu = ImuState::Running;
        status.imu_samples = Some(pipeline);
        tracing::info!(target: "depthsync::session", index = self.index, "imu started");
        Ok(())
    }

    pub fn stop_imu(&self) {
        let mut device_slot = lock(&self.device);
        let Some(device) = device_slot.as_mut() else {
            return;
        };

        let pipeline = {
            let mut status = self.status();
            if status.imu == ImuState::Idle {
                return;
            }
            status.imu_samples.take()
        };

        if let Some(pipeline) = &pipeline {
            pipeline.close();
        }
        if let Err(e) = device.stop_imu() {
            tracing::warn!(target: "depthsync::session", index = self.index, error = %e, "error while stopping imu");
        }

        let mut status = self.status();
        if let Some(pipeline) = pipeline {
            pipeline.drain();
            status.telemetry.imu.accumulate(pipeline.stats());
        }
        status.imu = ImuState::Idle;
        tracing::info!(target: "depthsync::session", index = self.index, "imu stopped");
    }

    /// 取下一个 Capture，最多等待 `timeout`
    ///
    /// 相机未运行时立即返回 `StreamStopped`；等待期间相机被停止也返回
    /// `StreamStopped`。取到的 Capture 归调用方所有。
    pub fn get_next_capture(&self, timeout: Duration) -> Result<Capture> {
        let pipeline = self
            .status()
            .captures
            .clone()
            .ok_or(CameraError::StreamStopped)?;
        pipeline.next(timeout)
    }

    /// 取下一个 IMU 采样，语义同 [`get_next_capture`](Self::get_next_capture)
    pub fn get_imu_sample(&self, timeout: Duration) -> Result<ImuSample> {
        let pipeline = self
            .status()
            .imu_samples
            .clone()
            .ok_or(CameraError::StreamStopped)?;
        pipeline.next(timeout)
    }

    /// 历史累计值加上正在运行的流水线
    pub fn telemetry(&self) -> SessionTelemetry {
        let status = self.status();
        let mut telemetry = status.telemetry;
        if let Some(p) = &status.captures {
            telemetry.captures.accumulate(p.stats());
        }
        if let Some(p) = &status.imu_samples {
            telemetry.imu.accumulate(p.stats());
        }
        telemetry
    }

    /// 导出会话状态快照
    #[cfg(feature = "serialize")]
    pub fn export_state(&self) -> Result<serde_json::Value> {
        use serde_json::json;

        let backend = match lock(&self.device).as_ref() {
            Some(device) => device.export_state()?,
            None => serde_json::Value::Null,
        };
        let status = self.status();
        let config = match &status.config {
            Some(c) => serde_json::to_value(c).map_err(|e| CameraError::Io(e.into()))?,
            None => serde_json::Value::Null,
        };
        drop(status);

        Ok(json!({
            "index": self.index,
            "token": self.token.value(),
            "serial": self.serial_number,
            "sync_in": self.jacks.in_present(),
            "sync_out": self.jacks.out_present(),
            "cameras": self.camera_state(),
            "imu": self.imu_state(),
            "config": config,
            "telemetry": self.telemetry(),
            "backend": backend,
        }))
    }

    /// 关闭会话：停 IMU、停相机、释放硬件锁，最后归还注册表中的 index。
    /// 不会失败。
    pub fn close(self) {
        self.shutdown();
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.stop_imu();
        self.stop_cameras();

        // 硬件锁必须先于注册表槽位释放，否则新所有者可能撞上未释放的硬件
        let device = lock(&self.device).take();
        drop(device);

        self.registry.release(self.index, self.token);
        tracing::info!(target: "depthsync::session", index = self.index, token = %self.token, "session closed");
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("index", &self.index)
            .field("token", &self.token)
            .field("serial", &self.serial_number)
            .field("jacks", &self.jacks)
            .field("cameras", &self.camera_state())
            .field("imu", &self.imu_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use depthsync_core::builder::{ColorResolution, DepthMode, Fps};
    use depthsync_core::error::ConfigurationError;
    use depthsync_core::pixel_format::ImageFormat;
    use depthsync_core::topology::SyncViolation;
    use depthsync_simulation::{Fault, SimulatedHub, UnitSpec};

    use super::*;

    fn setup(jacks: SyncJacks) -> (SimulatedHub, Arc<DeviceRegistry>) {
        let hub = SimulatedHub::with_units([UnitSpec::new("unit-0")
            .jacks(jacks)
            .frame_interval(Duration::from_millis(3))
            .imu_interval(Duration::from_millis(1))]);
        let registry = DeviceRegistry::new(Arc::new(hub.clone()));
        (hub, registry)
    }

    fn config() -> DeviceConfiguration {
        DeviceConfiguration::disable_all()
            .color(ImageFormat::ColorMjpg, ColorResolution::R1080p)
            .depth(DepthMode::NfovBinned)
            .fps(Fps::Fps30)
    }

    #[test]
    fn start_requires_idle() -> anyhow::Result<()> {
        let (_hub, registry) = setup(SyncJacks::empty());
        let session = registry.open(0)?;

        session.start_cameras(&config())?;
        assert_eq!(session.camera_state(), CameraState::Running);
        assert!(matches!(
            session.start_cameras(&config()),
            Err(CameraError::InvalidState { operation: "start_cameras", .. })
        ));

        session.stop_cameras();
        assert_eq!(session.camera_state(), CameraState::Idle);
        // 重复停止是安全的
        session.stop_cameras();
        Ok(())
    }

    #[test]
    fn illegal_role_leaves_session_idle_and_restartable() -> anyhow::Result<()> {
        let (hub, registry) = setup(SyncJacks::SYNC_IN);
        let session = registry.open(0)?;

        let err = session
            .start_cameras(&config().wired_sync(WiredSyncMode::Master))
            .expect_err("master without sync-out must fail");
        assert!(matches!(
            err,
            CameraError::ConfigurationInvalid(ConfigurationError::Topology(SyncViolation::NoSyncOutCable))
        ));
        assert_eq!(session.camera_state(), CameraState::Idle);
        assert_eq!(hub.buffer_pool(0).map(|p| p.total_allocated()), Some(0));

        session.start_cameras(&config().wired_sync(WiredSyncMode::Standalone))?;
        assert_eq!(session.wired_sync_mode(), Some(WiredSyncMode::Standalone));
        session.stop_cameras();

        session.start_cameras(&config().wired_sync(WiredSyncMode::Subordinate))?;
        session.stop_cameras();
        Ok(())
    }

    #[test]
    fn hardware_failure_returns_to_idle() -> anyhow::Result<()> {
        let (hub, registry) = setup(SyncJacks::empty());
        hub.inject_fault(0, Fault::CameraStart("firmware busy".into()));
        let session = registry.open(0)?;

        assert!(matches!(
            session.start_cameras(&config()),
            Err(CameraError::HardwareStartFailed(_))
        ));
        assert_eq!(session.camera_state(), CameraState::Idle);
        assert!(matches!(
            session.get_next_capture(Duration::from_millis(5)),
            Err(CameraError::StreamStopped)
        ));
        assert_eq!(session.telemetry().failed_starts, 1);

        session.start_cameras(&config())?;
        Ok(())
    }

    #[test]
    fn imu_only_after_cameras() -> anyhow::Result<()> {
        let (_hub, registry) = setup(SyncJacks::empty());
        let session = registry.open(0)?;

        assert!(matches!(
            session.start_imu(),
            Err(CameraError::InvalidState { operation: "start_imu", .. })
        ));

        session.start_cameras(&config())?;
        session.start_imu()?;
        assert_eq!(session.imu_state(), ImuState::Running);
        assert!(matches!(session.start_imu(), Err(CameraError::InvalidState { .. })));

        let first = session.get_imu_sample(Duration::from_secs(2))?;
        let second = session.get_imu_sample(Duration::from_secs(2))?;
        assert!(second.sequence > first.sequence);
        assert!(second.acc_timestamp >= first.acc_timestamp);

        session.stop_imu();
        assert!(matches!(
            session.get_imu_sample(Duration::from_millis(5)),
            Err(CameraError::StreamStopped)
        ));
        Ok(())
    }

    #[test]
    fn captures_arrive_in_order_without_gaps() -> anyhow::Result<()> {
        let (_hub, registry) = setup(SyncJacks::empty());
        let session = registry.open(0)?;
        session.start_cameras(&config())?;

        let mut previous: Option<Capture> = None;
        for _ in 0..30 {
            let capture = session.get_next_capture(Duration::from_secs(2))?;
            if let Some(prev) = previous.take() {
                assert_eq!(capture.sequence(), prev.sequence() + 1);
                assert!(capture.timestamp() >= prev.timestamp());
                prev.release();
            }
            previous = Some(capture);
        }
        Ok(())
    }

    #[test]
    fn stop_from_other_thread_unblocks_waiter() -> anyhow::Result<()> {
        let hub = SimulatedHub::with_units([UnitSpec::new("slow").frame_interval(Duration::from_secs(60))]);
        let registry = DeviceRegistry::new(Arc::new(hub));
        let session = registry.open(0)?;
        session.start_cameras(&config())?;

        let (result, waited) = thread::scope(|s| {
            let waiter = s.spawn(|| {
                let started = Instant::now();
                let result = session.get_next_capture(Duration::from_secs(30));
                (result, started.elapsed())
            });
            thread::sleep(Duration::from_millis(100));
            session.stop_cameras();
            waiter.join().expect("waiter panicked")
        });

        assert!(matches!(result, Err(CameraError::StreamStopped)));
        assert!(waited < Duration::from_secs(5), "waited {waited:?}");
        Ok(())
    }

    #[test]
    fn stop_imu_from_other_thread_unblocks_waiter() -> anyhow::Result<()> {
        let hub = SimulatedHub::with_units([UnitSpec::new("quiet-imu")
            .frame_interval(Duration::from_millis(5))
            .imu_interval(Duration::from_secs(60))]);
        let registry = DeviceRegistry::new(Arc::new(hub));
        let session = registry.open(0)?;
        session.start_cameras(&config())?;
        session.start_imu()?;

        let (result, waited) = thread::scope(|s| {
            let waiter = s.spawn(|| {
                let started = Instant::now();
                let result = session.get_imu_sample(Duration::from_secs(30));
                (result, started.elapsed())
            });
            thread::sleep(Duration::from_millis(50));
            session.stop_imu();
            waiter.join().expect("waiter panicked")
        });

        assert!(matches!(result, Err(CameraError::StreamStopped)));
        assert!(waited < Duration::from_secs(5), "waited {waited:?}");
        assert_eq!(session.imu_state(), ImuState::Idle);
        // 相机不受 IMU 停止影响
        assert_eq!(session.camera_state(), CameraState::Running);
        Ok(())
    }

    #[test]
    fn stop_releases_unconsumed_captures() -> anyhow::Result<()> {
        let (hub, registry) = setup(SyncJacks::empty());
        let session = registry.open(0)?;
        session.start_cameras(&config())?;

        let held = session.get_next_capture(Duration::from_secs(2))?;
        thread::sleep(Duration::from_millis(50));
        session.stop_cameras();

        let pool = hub.buffer_pool(0).expect("unit present");
        // 只剩调用方手里这一个 Capture (彩色 + 深度 + 红外三块缓冲)
        assert_eq!(pool.outstanding(), 3);
        held.release();
        assert_eq!(pool.outstanding(), 0);

        let telemetry = session.telemetry();
        assert!(telemetry.captures.discarded > 0);
        assert_eq!(telemetry.captures.queued(), 0);
        Ok(())
    }

    #[test]
    fn close_stops_everything_and_frees_index() -> anyhow::Result<()> {
        let (hub, registry) = setup(SyncJacks::empty());
        let session = registry.open(0)?;
        session.start_cameras(&config())?;
        session.start_imu()?;

        session.close();
        assert!(!registry.is_open(0));
        assert!(!hub.is_claimed(0));
        assert_eq!(hub.buffer_pool(0).map(|p| p.outstanding()), Some(0));
        Ok(())
    }

    #[cfg(feature = "serialize")]
    #[test]
    fn export_state_reports_running_config() -> anyhow::Result<()> {
        let (_hub, registry) = setup(SyncJacks::SYNC_OUT);
        let session = registry.open(0)?;
        session.start_cameras(&config().wired_sync(WiredSyncMode::Master))?;

        let state = session.export_state()?;
        assert_eq!(state["serial"], "unit-0");
        assert_eq!(state["sync_out"], true);
        assert_eq!(state["cameras"], "Running");
        assert_eq!(state["config"]["wired_sync_mode"], "Master");
        assert_eq!(state["backend"]["backend"], "simulation");
        Ok(())
    }
}
