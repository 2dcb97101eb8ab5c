use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::pixel_format::ImageFormat;

/// 时间戳集合
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    /// 设备时钟 (纳秒，自相机启动起单调递增)
    pub hw_raw_ns: u64,

    /// 经 ClockSynchronizer 矫正后的系统时间
    pub system_synced: Duration,
}

impl Timestamp {
    pub fn device_usec(&self) -> u64 {
        self.hw_raw_ns / 1_000
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    outstanding: AtomicUsize,
    allocated: AtomicU64,
}

/// 帧缓冲池
///
/// 统计借出未归还的缓冲区数量。传输层从这里申请图像内存，
/// 最后一个持有者释放时自动归还，泄漏和重复释放都能在计数上看出来。
#[derive(Debug, Clone, Default)]
pub struct BufferPool {
    counters: Arc<PoolCounters>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, len: usize) -> PooledBuffer {
        self.counters.outstanding.fetch_add(1, Ordering::AcqRel);
        self.counters.allocated.fetch_add(1, Ordering::Relaxed);
        PooledBuffer {
            data: vec![0u8; len],
            counters: self.counters.clone(),
        }
    }

    /// 当前仍被持有的缓冲区数量
    pub fn outstanding(&self) -> usize {
        self.counters.outstanding.load(Ordering::Acquire)
    }

    /// 历史累计分配次数
    pub fn total_allocated(&self) -> u64 {
        self.counters.allocated.load(Ordering::Relaxed)
    }
}

/// 从 BufferPool 借出的一块内存，Drop 时归还
pub struct PooledBuffer {
    data: Vec<u8>,
    counters: Arc<PoolCounters>,
}

impl PooledBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.counters.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

/// 图像级元数据
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImageMetadata {
    pub exposure_usec: Option<u32>,
    pub white_balance_k: Option<u32>,
    pub iso_speed: Option<u32>,
}

/// Capture 中的一张图 (彩色 / 深度 / 红外)
#[derive(Debug)]
pub struct Image {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    /// 行跨距 (字节)，压缩格式为 0
    pub stride: usize,
    pub timestamp: Timestamp,
    pub metadata: ImageMetadata,
    buffer: PooledBuffer,
}

impl Image {
    pub fn new(
        format: ImageFormat,
        width: u32,
        height: u32,
        timestamp: Timestamp,
        buffer: PooledBuffer,
    ) -> Self {
        Self {
            format,
            width,
            height,
            stride: format.stride_for(width),
            timestamp,
            metadata: ImageMetadata::default(),
            buffer,
        }
    }

    pub fn with_metadata(mut self, metadata: ImageMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn data(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// 以 u16 视图访问深度 / 红外数据
    ///
    /// 仅对 16-bit 格式有效；缓冲区未按 2 字节对齐时返回 None。
    pub fn as_u16(&self) -> Option<&[u16]> {
        match self.format {
            ImageFormat::Depth16 | ImageFormat::Ir16 => {
                bytemuck::try_cast_slice(self.buffer.as_slice()).ok()
            }
            _ => None,
        }
    }
}

#[derive(Debug)]
struct CaptureInner {
    sequence: u64,
    color: Option<Image>,
    depth: Option<Image>,
    ir: Option<Image>,
}

/// 一次同步采集产生的图像集合
///
/// 引用计数句柄：`clone()` 增加一个引用，`release()` / Drop 减少一个。
/// 最后一个引用消失时，底层缓冲区归还给设备的 BufferPool。
/// `release` 消耗句柄本身，因此同一个引用不可能被释放两次。
#[derive(Debug, Clone)]
pub struct Capture {
    inner: Arc<CaptureInner>,
}

impl Capture {
    pub fn new(sequence: u64, color: Option<Image>, depth: Option<Image>, ir: Option<Image>) -> Self {
        Self {
            inner: Arc::new(CaptureInner {
                sequence,
                color,
                depth,
                ir,
            }),
        }
    }

    /// 设备内的采集序号，从 0 开始连续递增
    pub fn sequence(&self) -> u64 {
        self.inner.sequence
    }

    pub fn color(&self) -> Option<&Image> {
        self.inner.color.as_ref()
    }

    pub fn depth(&self) -> Option<&Image> {
        self.inner.depth.as_ref()
    }

    pub fn ir(&self) -> Option<&Image> {
        self.inner.ir.as_ref()
    }

    /// Capture 的代表时间戳：所含图像中最早的一个
    pub fn timestamp(&self) -> Timestamp {
        [self.color(), self.depth(), self.ir()]
            .into_iter()
            .flatten()
            .map(|img| img.timestamp)
            .min()
            .unwrap_or_default()
    }

    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// 归还当前引用
    pub fn release(self) {
        drop(self);
    }
}

/// IMU 单次采样 (内容由传输层解码，本库只负责排队与交付)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    pub sequence: u64,
    pub temperature_c: f32,
    /// 加速度 (m/s^2)
    pub acc: [f32; 3],
    pub acc_timestamp: Timestamp,
    /// 角速度 (rad/s)
    pub gyro: [f32; 3],
    pub gyro_timestamp: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth_image(pool: &BufferPool, ns: u64) -> Image {
        let ts = Timestamp {
            hw_raw_ns: ns,
            system_synced: Duration::from_nanos(ns),
        };
        Image::new(ImageFormat::Depth16, 320, 288, ts, pool.allocate(320 * 288 * 2))
    }

    #[test]
    fn buffers_return_to_pool_on_last_release() {
        let pool = BufferPool::new();
        let capture = Capture::new(0, None, Some(depth_image(&pool, 1_000)), None);
        assert_eq!(pool.outstanding(), 1);

        let shared = capture.clone();
        assert_eq!(capture.reference_count(), 2);

        capture.release();
        assert_eq!(pool.outstanding(), 1, "another holder still uses the buffer");

        shared.release();
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.total_allocated(), 1);
    }

    #[test]
    fn capture_timestamp_is_earliest_image() {
        let pool = BufferPool::new();
        let ts = Timestamp {
            hw_raw_ns: 500,
            system_synced: Duration::ZERO,
        };
        let ir = Image::new(ImageFormat::Ir16, 320, 288, ts, pool.allocate(16));
        let capture = Capture::new(7, None, Some(depth_image(&pool, 900)), Some(ir));

        assert_eq!(capture.sequence(), 7);
        assert_eq!(capture.timestamp().hw_raw_ns, 500);
        assert!(capture.color().is_none());
    }

    #[test]
    fn empty_capture_has_default_timestamp() {
        let capture = Capture::new(0, None, None, None);
        assert_eq!(capture.timestamp(), Timestamp::default());
    }

    #[test]
    fn u16_view_only_for_sixteen_bit_formats() {
        let pool = BufferPool::new();
        let ts = Timestamp::default();
        let color = Image::new(ImageFormat::ColorMjpg, 1920, 1080, ts, pool.allocate(64));
        assert!(color.as_u16().is_none());
        assert_eq!(color.stride, 0);
        assert_eq!(color.data().len(), 64);
    }
}
