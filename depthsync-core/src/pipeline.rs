//! 单生产者 / 单消费者的数据交接队列
//!
//! 生产者是传输层的采集线程 (通过 [`Sink`] 推送)，消费者是调用
//! `next()` 的用户线程。队列按到达顺序交付 (FIFO)。
//!
//! 关闭流水线会立刻唤醒所有阻塞在 `next()` 上的线程，
//! 之后由流水线自己释放队列里剩余的数据。

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{select, unbounded, Receiver, Sender};

use crate::error::{CameraError, Result};
use crate::telemetry::PipelineStats;

#[derive(Debug)]
struct Shared {
    open: AtomicBool,
    delivered: AtomicU64,
    consumed: AtomicU64,
    discarded: AtomicU64,
    rejected: AtomicU64,
}

pub struct Pipeline<T> {
    name: &'static str,
    tx: Sender<T>,
    rx: Receiver<T>,
    // 只用于广播关闭：丢弃 Sender 后所有 recv(stop_rx) 立即返回
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
    shared: Arc<Shared>,
}

impl<T> Pipeline<T> {
    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();
        Self {
            name,
            tx,
            rx,
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
            shared: Arc::new(Shared {
                open: AtomicBool::new(true),
                delivered: AtomicU64::new(0),
                consumed: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    /// 生产端句柄，交给传输层
    pub fn sink(&self) -> Sink<T> {
        Sink {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    /// 阻塞等待最早的一条数据，最多等待 `timeout`
    pub fn next(&self, timeout: Duration) -> Result<T> {
        if !self.is_open() {
            return Err(CameraError::StreamStopped);
        }

        select! {
            recv(self.rx) -> msg => match msg {
                Ok(item) if self.is_open() => {
                    self.shared.consumed.fetch_add(1, Ordering::Relaxed);
                    Ok(item)
                }
                Ok(item) => {
                    // 等待期间流水线被关闭，这条数据归流水线释放
                    drop(item);
                    self.shared.discarded.fetch_add(1, Ordering::Relaxed);
                    Err(CameraError::StreamStopped)
                }
                Err(_) => Err(CameraError::StreamStopped),
            },
            recv(self.stop_rx) -> _ => Err(CameraError::StreamStopped),
            default(timeout) => Err(CameraError::TimedOut(timeout)),
        }
    }

    /// 停止接收新数据并唤醒所有等待者
    pub fn close(&self) {
        if self.shared.open.swap(false, Ordering::AcqRel) {
            let mut stop_tx = self.stop_tx.lock().unwrap_or_else(PoisonError::into_inner);
            stop_tx.take();
            tracing::debug!(target: "depthsync::pipeline", pipeline = self.name, "closed");
        }
    }

    /// 释放队列中所有尚未被取走的数据，返回释放数量
    pub fn drain(&self) -> u64 {
        let mut released = 0;
        while let Ok(item) = self.rx.try_recv() {
            drop(item);
            released += 1;
        }
        if released > 0 {
            self.shared.discarded.fetch_add(released, Ordering::Relaxed);
            tracing::debug!(
                target: "depthsync::pipeline",
                pipeline = self.name,
                released,
                "released unconsumed items"
            );
        }
        released
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            consumed: self.shared.consumed.load(Ordering::Relaxed),
            discarded: self.shared.discarded.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
        }
    }
}

impl<T> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .field("queued", &self.rx.len())
            .finish()
    }
}

/// 生产端：传输层的采集线程通过它推送数据
pub struct Sink<T> {
    tx: Sender<T>,
    shared: Arc<Shared>,
}

impl<T> Sink<T> {
    /// 推送一条数据；流水线已关闭时返回 false，数据被直接释放
    pub fn push(&self, item: T) -> bool {
        if !self.shared.open.load(Ordering::Acquire) {
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.tx.send(item) {
            Ok(()) => {
                self.shared.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.shared.rejected.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for Sink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink").field("open", &self.is_open()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn delivers_in_arrival_order() -> anyhow::Result<()> {
        let pipeline = Pipeline::new("test");
        let sink = pipeline.sink();
        for i in 0..100u32 {
            assert!(sink.push(i));
        }

        for expected in 0..100u32 {
            assert_eq!(pipeline.next(Duration::from_millis(10))?, expected);
        }
        assert_eq!(pipeline.stats().consumed, 100);
        Ok(())
    }

    #[test]
    fn times_out_close_to_requested_bound() {
        let pipeline: Pipeline<u32> = Pipeline::new("idle");
        let timeout = Duration::from_millis(50);

        let started = Instant::now();
        let result = pipeline.next(timeout);
        let waited = started.elapsed();

        assert!(matches!(result, Err(CameraError::TimedOut(t)) if t == timeout));
        assert!(waited >= timeout);
        assert!(waited < timeout + Duration::from_millis(250), "waited {waited:?}");
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let pipeline: Arc<Pipeline<u32>> = Arc::new(Pipeline::new("wake"));
        let waiter = {
            let pipeline = pipeline.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let result = pipeline.next(Duration::from_secs(30));
                (result, started.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(50));
        pipeline.close();

        let (result, waited) = waiter.join().expect("waiter panicked");
        assert!(matches!(result, Err(CameraError::StreamStopped)));
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn closed_pipeline_rejects_and_drains() {
        let pipeline = Pipeline::new("drain");
        let sink = pipeline.sink();
        sink.push(1u32);
        sink.push(2u32);

        pipeline.close();
        assert!(!sink.push(3));
        assert!(matches!(
            pipeline.next(Duration::from_millis(1)),
            Err(CameraError::StreamStopped)
        ));

        assert_eq!(pipeline.drain(), 2);
        let stats = pipeline.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.discarded, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.queued(), 0);
    }
}
