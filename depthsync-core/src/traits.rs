use crate::builder::DeviceConfiguration;
use crate::error::Result;
use crate::frame::{Capture, ImuSample};
use crate::pipeline::Sink;
use crate::topology::SyncJacks;

/// 1. 驱动入口：设备计数与打开
///
/// 枚举机制由后端自行决定，本库只关心当前安装了几台设备。
pub trait Driver: Send + Sync {
    /// 当前安装的设备数量 (热插拔时会变化，调用方不要长期缓存)
    fn installed_count(&self) -> u32;

    /// 打开第 `index` 台设备并获取其硬件独占锁
    ///
    /// 设备已被其他所有者 (包括其他进程) 持有时返回 `AlreadyOpen`，
    /// 不存在时返回 `NotFound`。返回的 [`Device`] 被 Drop 时释放硬件锁。
    fn open(&self, index: u32) -> Result<Box<dyn Device>>;

    /// 后端名称，用于日志
    fn backend(&self) -> &'static str;
}

/// 2. 单台设备的硬件控制面
///
/// 调用方保证同一时刻只有一个生命周期操作在进行；
/// 采集数据由后端自己的线程推送到给定的 [`Sink`]。
pub trait Device: Send {
    fn serial_number(&self) -> Result<String>;

    /// 读取同步接口的线缆状态
    fn sync_jacks(&self) -> Result<SyncJacks>;

    /// 按配置编程硬件并开始推送 Capture。
    /// 失败时必须保证硬件回到未启动状态。
    fn start_cameras(&mut self, config: &DeviceConfiguration, sink: Sink<Capture>) -> Result<()>;

    /// 停止相机；返回前必须保证不会再向 Sink 推送数据
    fn stop_cameras(&mut self) -> Result<()>;

    /// 开始推送 IMU 采样，时间基准与相机流一致
    fn start_imu(&mut self, sink: Sink<ImuSample>) -> Result<()>;

    fn stop_imu(&mut self) -> Result<()>;

    /// 导出后端特有的状态快照 (用于诊断)
    #[cfg(feature = "serialize")]
    fn export_state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }
}

// Box<dyn Device> 也能被当作 Device 使用
impl<D: Device + ?Sized> Device for Box<D> {
    fn serial_number(&self) -> Result<String> {
        (**self).serial_number()
    }

    fn sync_jacks(&self) -> Result<SyncJacks> {
        (**self).sync_jacks()
    }

    fn start_cameras(&mut self, config: &DeviceConfiguration, sink: Sink<Capture>) -> Result<()> {
        (**self).start_cameras(config, sink)
    }

    fn stop_cameras(&mut self) -> Result<()> {
        (**self).stop_cameras()
    }

    fn start_imu(&mut self, sink: Sink<ImuSample>) -> Result<()> {
        (**self).start_imu(sink)
    }

    fn stop_imu(&mut self) -> Result<()> {
        (**self).stop_imu()
    }

    #[cfg(feature = "serialize")]
    fn export_state(&self) -> Result<serde_json::Value> {
        (**self).export_state()
    }
}
