use std::sync::Arc;
use std::time::Instant;

use depthsync_core::builder::DeviceConfiguration;
use depthsync_core::error::{CameraError, Result};
use depthsync_core::frame::{BufferPool, Capture, ImuSample};
use depthsync_core::pipeline::Sink;
use depthsync_core::topology::SyncJacks;
use depthsync_core::traits::Device;

use crate::stream::{run_cameras, run_imu, CameraPlan, Producer};
use crate::{Fault, HubInner, UnitSpec};

/// 一台已打开 (持有硬件锁) 的仿真设备
#[derive(Debug)]
pub struct SimulatedDevice {
    hub: Arc<HubInner>,
    unit_id: u64,
    spec: UnitSpec,
    pool: BufferPool,
    cameras: Option<Producer>,
    camera_epoch: Option<Instant>,
    imu: Option<Producer>,
    captures_produced: u64,
    imu_samples_produced: u64,
}

impl SimulatedDevice {
    pub(crate) fn new(hub: Arc<HubInner>, unit_id: u64, spec: UnitSpec, pool: BufferPool) -> Self {
        Self {
            hub,
            unit_id,
            spec,
            pool,
            cameras: None,
            camera_epoch: None,
            imu: None,
            captures_produced: 0,
            imu_samples_produced: 0,
        }
    }

    fn ensure_present(&self) -> Result<()> {
        if self.hub.is_present(self.unit_id) {
            Ok(())
        } else {
            Err(CameraError::HardwareStartFailed(format!(
                "{} is no longer connected",
                self.spec.serial_number
            )))
        }
    }
}

impl Device for SimulatedDevice {
    fn serial_number(&self) -> Result<String> {
        Ok(self.spec.serial_number.clone())
    }

    fn sync_jacks(&self) -> Result<SyncJacks> {
        if !self.hub.is_present(self.unit_id) {
            return Err(CameraError::Disconnected(self.spec.serial_number.clone()));
        }
        Ok(self.spec.jacks)
    }

    fn start_cameras(&mut self, config: &DeviceConfiguration, sink: Sink<Capture>) -> Result<()> {
        if self.cameras.is_some() {
            return Err(CameraError::HardwareStartFailed("camera stream already running".into()));
        }
        self.ensure_present()?;
        if let Some(Fault::CameraStart(msg)) = self
            .hub
            .take_fault(self.unit_id, |f| matches!(f, Fault::CameraStart(_)))
        {
            return Err(CameraError::HardwareStartFailed(msg));
        }

        let epoch = Instant::now();
        let plan = CameraPlan {
            config: config.clone(),
            interval: self
                .spec
                .frame_interval
                .unwrap_or_else(|| config.camera_fps.period()),
            compressed_bytes: self.spec.compressed_bytes,
            pool: self.pool.clone(),
            epoch,
        };

        let name = format!("depthsync-sim-{}-cam", self.spec.serial_number);
        let producer = Producer::spawn(name, move |stop| run_cameras(plan, sink, stop))?;

        self.cameras = Some(producer);
        self.camera_epoch = Some(epoch);
        tracing::debug!(
            target: "depthsync::sim",
            serial = %self.spec.serial_number,
            role = %config.wired_sync_mode,
            "camera stream programmed"
        );
        Ok(())
    }

    fn stop_cameras(&mut self) -> Result<()> {
        if let Some(producer) = self.cameras.take() {
            self.captures_produced += producer.stop();
        }
        self.camera_epoch = None;
        Ok(())
    }

    fn start_imu(&mut self, sink: Sink<ImuSample>) -> Result<()> {
        if self.imu.is_some() {
            return Err(CameraError::HardwareStartFailed("imu stream already running".into()));
        }
        let epoch = self.camera_epoch.ok_or_else(|| {
            CameraError::HardwareStartFailed("imu requires a running camera stream".into())
        })?;
        self.ensure_present()?;
        if let Some(Fault::ImuStart(msg)) = self
            .hub
            .take_fault(self.unit_id, |f| matches!(f, Fault::ImuStart(_)))
        {
            return Err(CameraError::HardwareStartFailed(msg));
        }

        let interval = self.spec.imu_interval;
        let name = format!("depthsync-sim-{}-imu", self.spec.serial_number);
        let producer = Producer::spawn(name, move |stop| run_imu(epoch, interval, sink, stop))?;
        self.imu = Some(producer);
        Ok(())
    }

    fn stop_imu(&mut self) -> Result<()> {
        if let Some(producer) = self.imu.take() {
            self.imu_samples_produced += producer.stop();
        }
        Ok(())
    }

    fn export_state(&self) -> Result<serde_json::Value> {
        use serde_json::json;

        Ok(json!({
            "backend": "simulation",
            "serial": self.spec.serial_number,
            "cameras_running": self.cameras.is_some(),
            "imu_running": self.imu.is_some(),
            "captures_produced": self.captures_produced,
            "imu_samples_produced": self.imu_samples_produced,
            "buffers_outstanding": self.pool.outstanding(),
        }))
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        // 先停线程，再释放硬件锁
        if let Some(producer) = self.imu.take() {
            producer.stop();
        }
        if let Some(producer) = self.cameras.take() {
            producer.stop();
        }
        self.hub.release(self.unit_id);
        tracing::debug!(target: "depthsync::sim", serial = %self.spec.serial_number, "hardware lock released");
    }
}
