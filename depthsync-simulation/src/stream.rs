use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use depthsync_core::builder::DeviceConfiguration;
use depthsync_core::frame::{BufferPool, Capture, Image, ImuSample, Timestamp};
use depthsync_core::pipeline::Sink;
use depthsync_core::pixel_format::ImageFormat;
use depthsync_core::time::ClockSynchronizer;

/// 后台采集线程
///
/// 停止时丢弃 stop_tx 让线程退出并 join；返回前线程已不再推送数据。
#[derive(Debug)]
pub(crate) struct Producer {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<u64>>,
}

impl Producer {
    pub(crate) fn spawn<F>(name: String, body: F) -> io::Result<Self>
    where
        F: FnOnce(Receiver<()>) -> u64 + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded(0);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || body(stop_rx))?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// 停止线程并返回其产出数量
    pub(crate) fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        self.stop_tx.take();
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(produced)) => produced,
            Some(Err(_)) => {
                tracing::error!(target: "depthsync::sim", "producer thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 按固定节拍等待；收到停止信号 (或发送端被丢弃) 时返回 false
fn wait_tick(stop: &Receiver<()>, deadline: Instant) -> bool {
    matches!(stop.recv_deadline(deadline), Err(RecvTimeoutError::Timeout))
}

/// 相机线程的参数
#[derive(Debug, Clone)]
pub(crate) struct CameraPlan {
    pub(crate) config: DeviceConfiguration,
    pub(crate) interval: Duration,
    pub(crate) compressed_bytes: usize,
    pub(crate) pool: BufferPool,
    pub(crate) epoch: Instant,
}

impl CameraPlan {
    fn buffer_len(&self, format: ImageFormat, width: u32, height: u32) -> usize {
        match format {
            ImageFormat::ColorMjpg => self.compressed_bytes,
            // Y 平面 + 半高的 UV 平面
            ImageFormat::ColorNv12 => width as usize * height as usize * 3 / 2,
            other => other.stride_for(width) * height as usize,
        }
    }

    fn image(&self, format: ImageFormat, (width, height): (u32, u32), ts: Timestamp) -> Image {
        let buffer = self.pool.allocate(self.buffer_len(format, width, height));
        Image::new(format, width, height, ts, buffer)
    }

    fn build_capture(&self, sequence: u64, clock: &mut ClockSynchronizer) -> Capture {
        let interval_ns = self.interval.as_nanos() as u64;
        // 从机在主机触发后延迟曝光
        let base_ns = sequence * interval_ns
            + self.config.subordinate_delay_off_master_usec as u64 * 1_000;
        let system_synced = clock.correct(base_ns, Instant::now());

        let color_ts = Timestamp {
            hw_raw_ns: base_ns,
            system_synced,
        };
        let depth_offset_ns = self.config.depth_delay_off_color_usec as i64 * 1_000;
        let depth_ts = Timestamp {
            hw_raw_ns: base_ns.saturating_add_signed(depth_offset_ns),
            system_synced: if depth_offset_ns >= 0 {
                system_synced + Duration::from_nanos(depth_offset_ns as u64)
            } else {
                system_synced.saturating_sub(Duration::from_nanos(depth_offset_ns.unsigned_abs()))
            },
        };

        let color = self
            .config
            .color_resolution
            .dimensions()
            .map(|dims| self.image(self.config.color_format, dims, color_ts));

        let depth_dims = self.config.depth_mode.dimensions();
        let depth = depth_dims
            .filter(|_| self.config.depth_mode.produces_depth())
            .map(|dims| self.image(ImageFormat::Depth16, dims, depth_ts));
        let ir = depth_dims.map(|dims| self.image(ImageFormat::Ir16, dims, depth_ts));

        Capture::new(sequence, color, depth, ir)
    }
}

pub(crate) fn run_cameras(plan: CameraPlan, sink: Sink<Capture>, stop: Receiver<()>) -> u64 {
    let mut clock = ClockSynchronizer::new(30, plan.epoch);
    let mut sequence = 0u64;

    loop {
        let deadline = plan.epoch + plan.interval * (sequence as u32 + 1);
        if !wait_tick(&stop, deadline) {
            break;
        }
        if !sink.push(plan.build_capture(sequence, &mut clock)) {
            break;
        }
        sequence += 1;
    }

    tracing::trace!(target: "depthsync::sim", produced = sequence, "camera producer exiting");
    sequence
}

pub(crate) fn run_imu(
    camera_epoch: Instant,
    interval: Duration,
    sink: Sink<ImuSample>,
    stop: Receiver<()>,
) -> u64 {
    let started = Instant::now();
    let mut clock = ClockSynchronizer::new(100, camera_epoch);
    let mut sequence = 0u64;

    loop {
        let deadline = started + interval * (sequence as u32 + 1);
        if !wait_tick(&stop, deadline) {
            break;
        }

        let now = Instant::now();
        // IMU 与相机共用同一个设备时间基准
        let hw_raw_ns = now.saturating_duration_since(camera_epoch).as_nanos() as u64;
        let ts = Timestamp {
            hw_raw_ns,
            system_synced: clock.correct(hw_raw_ns, now),
        };
        let sample = ImuSample {
            sequence,
            temperature_c: 31.5,
            acc: [0.0, 0.0, 9.81],
            acc_timestamp: ts,
            gyro: [0.0; 3],
            gyro_timestamp: ts,
        };
        if !sink.push(sample) {
            break;
        }
        sequence += 1;
    }

    sequence
}
