//! 仿真后端
//!
//! 用纯软件模拟一组深度相机：每台设备有序列号、同步接口状态、
//! 独立的缓冲池，并按配置的帧率推送 Capture / IMU 采样。
//! [`SimulatedHub`] 可以被多个注册表共享，相当于多个进程看到同一批硬件，
//! 设备级独占锁在这里实现。

mod device;
mod stream;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use depthsync_core::error::{CameraError, Result};
use depthsync_core::frame::BufferPool;
use depthsync_core::topology::SyncJacks;
use depthsync_core::traits::{Device, Driver};

pub use device::SimulatedDevice;

/// 一台仿真设备的静态描述
#[derive(Debug, Clone)]
pub struct UnitSpec {
    pub serial_number: String,
    pub jacks: SyncJacks,
    /// 覆盖帧间隔，None 时按配置的 fps
    pub frame_interval: Option<Duration>,
    pub imu_interval: Duration,
    /// MJPG 等压缩格式每帧的字节数
    pub compressed_bytes: usize,
}

impl UnitSpec {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            jacks: SyncJacks::empty(),
            frame_interval: None,
            imu_interval: Duration::from_millis(5),
            compressed_bytes: 4096,
        }
    }

    pub fn jacks(mut self, jacks: SyncJacks) -> Self {
        self.jacks = jacks;
        self
    }

    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    pub fn imu_interval(mut self, interval: Duration) -> Self {
        self.imu_interval = interval;
        self
    }
}

/// 注入的硬件故障
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// 下一次 start_cameras 被固件拒绝
    CameraStart(String),
    /// 下一次 start_imu 被固件拒绝
    ImuStart(String),
}

#[derive(Debug)]
struct Unit {
    id: u64,
    spec: UnitSpec,
    claimed: bool,
    faults: VecDeque<Fault>,
    pool: BufferPool,
}

#[derive(Debug, Default)]
struct HubState {
    units: Vec<Unit>,
    next_id: u64,
}

#[derive(Debug, Default)]
pub(crate) struct HubInner {
    state: Mutex<HubState>,
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 设备被关闭时释放硬件锁 (设备已拔出则忽略)
    pub(crate) fn release(&self, unit_id: u64) {
        let mut state = self.lock();
        if let Some(unit) = state.units.iter_mut().find(|u| u.id == unit_id) {
            unit.claimed = false;
        }
    }

    pub(crate) fn take_fault(&self, unit_id: u64, matches: impl Fn(&Fault) -> bool) -> Option<Fault> {
        let mut state = self.lock();
        let unit = state.units.iter_mut().find(|u| u.id == unit_id)?;
        let pos = unit.faults.iter().position(matches)?;
        unit.faults.remove(pos)
    }

    pub(crate) fn is_present(&self, unit_id: u64) -> bool {
        self.lock().units.iter().any(|u| u.id == unit_id)
    }
}

/// 一组仿真硬件，实现 [`Driver`]
///
/// Clone 得到的是同一批硬件的另一个视图。
#[derive(Debug, Clone, Default)]
pub struct SimulatedHub {
    inner: Arc<HubInner>,
}

impl SimulatedHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_units(units: impl IntoIterator<Item = UnitSpec>) -> Self {
        let hub = Self::new();
        for spec in units {
            hub.plug(spec);
        }
        hub
    }

    /// 常见的双机台架：0 号是主机 (只插 Sync Out)，1 号是从机 (只插 Sync In)
    pub fn master_subordinate_pair() -> Self {
        Self::with_units([
            UnitSpec::new("000101-master").jacks(SyncJacks::SYNC_OUT),
            UnitSpec::new("000102-subordinate").jacks(SyncJacks::SYNC_IN),
        ])
    }

    /// 插入一台设备，追加在枚举列表末尾，返回其 index
    pub fn plug(&self, spec: UnitSpec) -> u32 {
        let mut state = self.inner.lock();
        let id = state.next_id;
        state.next_id += 1;
        tracing::info!(target: "depthsync::sim", serial = %spec.serial_number, "unit plugged");
        state.units.push(Unit {
            id,
            spec,
            claimed: false,
            faults: VecDeque::new(),
            pool: BufferPool::new(),
        });
        (state.units.len() - 1) as u32
    }

    /// 拔出第 `index` 台设备，后面的设备 index 前移
    pub fn unplug(&self, index: u32) -> Option<UnitSpec> {
        let mut state = self.inner.lock();
        if (index as usize) >= state.units.len() {
            return None;
        }
        let unit = state.units.remove(index as usize);
        tracing::info!(target: "depthsync::sim", serial = %unit.spec.serial_number, "unit unplugged");
        Some(unit.spec)
    }

    pub fn inject_fault(&self, index: u32, fault: Fault) -> bool {
        let mut state = self.inner.lock();
        match state.units.get_mut(index as usize) {
            Some(unit) => {
                unit.faults.push_back(fault);
                true
            }
            None => false,
        }
    }

    /// 第 `index` 台设备的缓冲池，用于检查缓冲区是否全部归还
    pub fn buffer_pool(&self, index: u32) -> Option<BufferPool> {
        self.inner
            .lock()
            .units
            .get(index as usize)
            .map(|u| u.pool.clone())
    }

    /// 硬件锁是否被某个所有者持有
    pub fn is_claimed(&self, index: u32) -> bool {
        self.inner
            .lock()
            .units
            .get(index as usize)
            .is_some_and(|u| u.claimed)
    }
}

impl Driver for SimulatedHub {
    fn installed_count(&self) -> u32 {
        self.inner.lock().units.len() as u32
    }

    fn open(&self, index: u32) -> Result<Box<dyn Device>> {
        let mut state = self.inner.lock();
        let installed = state.units.len() as u32;
        let unit = state
            .units
            .get_mut(index as usize)
            .ok_or(CameraError::NotFound { index, installed })?;

        if unit.claimed {
            return Err(CameraError::AlreadyOpen { index });
        }
        unit.claimed = true;

        let device = SimulatedDevice::new(
            self.inner.clone(),
            unit.id,
            unit.spec.clone(),
            unit.pool.clone(),
        );
        tracing::debug!(target: "depthsync::sim", index, serial = %unit.spec.serial_number, "hardware lock acquired");
        Ok(Box::new(device))
    }

    fn backend(&self) -> &'static str {
        "simulation"
    }
}
