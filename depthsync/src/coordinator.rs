//! 多设备并行生命周期协调
//!
//! 每个参与者一个线程。所有线程先在闸门处集合，全部到齐后同时放行，
//! 保证多台设备的启动 (或停止+关闭) 尽量在同一时刻落到硬件上。
//! 每个参与者各自返回结果；部分失败不会自动回滚其他设备。

use std::io;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use depthsync_core::builder::DeviceConfiguration;
use depthsync_core::error::{CameraError, Result};

use crate::session::DeviceSession;

/// 基于通道的集合点
///
/// 控制端等待 N 次到达，然后丢弃放行通道的发送端，
/// 所有阻塞在 `recv` 上的参与者同时醒来。
#[derive(Debug)]
pub struct Gate {
    arrivals: Receiver<()>,
    release: Option<Sender<()>>,
    participants: usize,
}

/// 单个参与者的通行证，只能使用一次
#[derive(Debug)]
pub struct GatePass {
    arrive: Sender<()>,
    release: Receiver<()>,
}

impl Gate {
    pub fn new(participants: usize) -> (Self, Vec<GatePass>) {
        let (arrive_tx, arrive_rx) = bounded(participants.max(1));
        let (release_tx, release_rx) = bounded(0);
        let passes = (0..participants)
            .map(|_| GatePass {
                arrive: arrive_tx.clone(),
                release: release_rx.clone(),
            })
            .collect();
        let gate = Self {
            arrivals: arrive_rx,
            release: Some(release_tx),
            participants,
        };
        (gate, passes)
    }

    /// 等待全部参与者到达后放行
    ///
    /// 未使用就被丢弃的通行证不会让控制端永远等待：
    /// 所有到达端都断开后视为到齐。
    pub fn open(mut self) {
        let mut arrived = 0;
        while arrived < self.participants {
            if self.arrivals.recv().is_err() {
                break;
            }
            arrived += 1;
        }
        tracing::debug!(target: "depthsync::coordinator", arrived, expected = self.participants, "gate open");
        self.release.take();
    }
}

impl GatePass {
    /// 报到并阻塞，直到闸门打开
    pub fn wait(self) {
        let Self { arrive, release } = self;
        let _ = arrive.send(());
        drop(arrive);
        // 发送端被丢弃时 recv 返回 Err，即放行
        let _ = release.recv();
    }
}

/// 一台设备的启动请求
#[derive(Debug, Clone)]
pub struct StartRequest<'a> {
    pub session: &'a DeviceSession,
    pub config: DeviceConfiguration,
    pub start_imu: bool,
}

impl<'a> StartRequest<'a> {
    pub fn new(session: &'a DeviceSession, config: DeviceConfiguration) -> Self {
        Self {
            session,
            config,
            start_imu: false,
        }
    }

    /// 相机启动成功后接着启动 IMU
    pub fn with_imu(mut self) -> Self {
        self.start_imu = true;
        self
    }
}

#[derive(Debug)]
pub struct ParticipantResult {
    pub index: u32,
    pub result: Result<()>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParallelOutcome {
    AllSucceeded,
    PartialFailure { succeeded: Vec<u32>, failed: Vec<u32> },
    AllFailed,
}

/// 并行操作的结果，按请求顺序排列
#[derive(Debug)]
pub struct ParallelReport {
    results: Vec<ParticipantResult>,
}

impl ParallelReport {
    pub fn results(&self) -> &[ParticipantResult] {
        &self.results
    }

    pub fn succeeded(&self) -> Vec<u32> {
        self.results
            .iter()
            .filter(|r| r.result.is_ok())
            .map(|r| r.index)
            .collect()
    }

    pub fn failed(&self) -> Vec<(u32, &CameraError)> {
        self.results
            .iter()
            .filter_map(|r| r.result.as_ref().err().map(|e| (r.index, e)))
            .collect()
    }

    /// 空请求视为全部成功
    pub fn outcome(&self) -> ParallelOutcome {
        let succeeded = self.succeeded();
        let failed: Vec<u32> = self.failed().into_iter().map(|(index, _)| index).collect();
        match (succeeded.is_empty(), failed.is_empty()) {
            (_, true) => ParallelOutcome::AllSucceeded,
            (true, false) => ParallelOutcome::AllFailed,
            (false, false) => ParallelOutcome::PartialFailure { succeeded, failed },
        }
    }

    pub fn is_all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.result.is_ok())
    }

    pub fn into_results(self) -> Vec<ParticipantResult> {
        self.results
    }
}

fn participant_panicked() -> CameraError {
    CameraError::Io(io::Error::other("participant thread panicked"))
}

/// 在同一时刻启动多台设备
///
/// 对单台设备而言是全有或全无的：IMU 启动失败时会停掉这台设备
/// 刚启动的相机。其他设备的结果不受影响。
pub fn start_parallel(requests: &[StartRequest<'_>]) -> ParallelReport {
    let (gate, passes) = Gate::new(requests.len());
    tracing::info!(target: "depthsync::coordinator", participants = requests.len(), "parallel start");

    let results = thread::scope(|s| {
        // 1. 每个请求一个线程，先到闸门集合
        let handles: Vec<_> = requests
            .iter()
            .zip(passes)
            .map(|(request, pass)| {
                let index = request.session.index();
                let spawned = thread::Builder::new()
                    .name(format!("depthsync-start-{index}"))
                    .spawn_scoped(s, move || {
                        pass.wait();
                        start_one(request)
                    });
                (index, spawned)
            })
            .collect();

        // 2. 全部到齐后放行
        gate.open();

        // 3. 收集结果
        handles
            .into_iter()
            .map(|(index, spawned)| {
                let result = match spawned {
                    Ok(handle) => handle.join().unwrap_or_else(|_| Err(participant_panicked())),
                    Err(e) => Err(CameraError::Io(e)),
                };
                ParticipantResult { index, result }
            })
            .collect()
    });

    let report = ParallelReport { results };
    log_outcome("start", &report);
    report
}

fn start_one(request: &StartRequest<'_>) -> Result<()> {
    let session = request.session;
    session.start_cameras(&request.config)?;
    if request.start_imu {
        if let Err(e) = session.start_imu() {
            session.stop_cameras();
            return Err(e);
        }
    }
    Ok(())
}

/// 同时停止并关闭多个会话；返回后这些 index 在注册表中均已空闲
pub fn stop_and_close_parallel(sessions: Vec<DeviceSession>) -> ParallelReport {
    let (gate, passes) = Gate::new(sessions.len());
    tracing::info!(target: "depthsync::coordinator", participants = sessions.len(), "parallel stop and close");

    let results = thread::scope(|s| {
        let handles: Vec<_> = sessions
            .into_iter()
            .zip(passes)
            .map(|(session, pass)| {
                let index = session.index();
                // spawn 失败时闭包 (连同会话) 被丢弃，Drop 仍会关闭会话
                let spawned = thread::Builder::new()
                    .name(format!("depthsync-close-{index}"))
                    .spawn_scoped(s, move || {
                        pass.wait();
                        session.close();
                    });
                (index, spawned)
            })
            .collect();

        gate.open();

        handles
            .into_iter()
            .map(|(index, spawned)| {
                let result = match spawned {
                    Ok(handle) => handle.join().map_err(|_| participant_panicked()),
                    Err(e) => Err(CameraError::Io(e)),
                };
                ParticipantResult { index, result }
            })
            .collect()
    });

    let report = ParallelReport { results };
    log_outcome("stop+close", &report);
    report
}

fn log_outcome(operation: &str, report: &ParallelReport) {
    match report.outcome() {
        ParallelOutcome::AllSucceeded => {
            tracing::info!(target: "depthsync::coordinator", operation, "all participants succeeded");
        }
        ParallelOutcome::PartialFailure { succeeded, failed } => {
            tracing::warn!(target: "depthsync::coordinator", operation, ?succeeded, ?failed, "partial failure");
        }
        ParallelOutcome::AllFailed => {
            tracing::warn!(target: "depthsync::coordinator", operation, "all participants failed");
        }
    }
}
