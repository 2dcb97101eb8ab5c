use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// 软件锁相环：把设备时间戳映射到主机时间轴
///
/// 设备时钟与主机时钟存在固定偏移和漂移，USB 传输又给到达时刻带来抖动。
/// 在最近 `window_size` 个样本上做最小二乘线性回归，
/// 用拟合出的直线预测当前设备时间戳对应的主机时刻。
///
/// 输出是相对 `epoch` (通常为相机启动时刻) 的 Duration。
#[derive(Debug)]
pub struct ClockSynchronizer {
    window_size: usize,
    epoch: Instant,
    /// (设备纳秒, 到达主机的时刻)
    history: VecDeque<(u64, Instant)>,
    slope: f64,
    offset: f64,
}

/// 样本少于这个数时不做回归
const MIN_REGRESSION_SAMPLES: usize = 5;

impl ClockSynchronizer {
    pub fn new(window_size: usize, epoch: Instant) -> Self {
        let window_size = window_size.max(2);
        Self {
            window_size,
            epoch,
            history: VecDeque::with_capacity(window_size),
            slope: 1.0,
            offset: 0.0,
        }
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// 输入设备时间戳与到达时刻，返回矫正后的主机时间
    pub fn correct(&mut self, hw_ns: u64, arrival: Instant) -> Duration {
        if self.history.len() >= self.window_size {
            self.history.pop_front();
        }
        self.history.push_back((hw_ns, arrival));

        let Some(&(base_hw, base_arrival)) = self.history.front() else {
            return self.since_epoch(arrival);
        };

        // 样本不足：假设无漂移，按第一个样本的偏移外推
        if self.history.len() < MIN_REGRESSION_SAMPLES {
            let elapsed_hw = Duration::from_nanos(hw_ns.saturating_sub(base_hw));
            return self.since_epoch(base_arrival) + elapsed_hw;
        }

        self.fit(base_hw, base_arrival);

        let dx = hw_ns as f64 - base_hw as f64;
        let dy_ns = (self.slope * dx + self.offset).max(0.0);
        self.since_epoch(base_arrival) + Duration::from_nanos(dy_ns as u64)
    }

    /// 当前估计的漂移率 (1.0 表示无漂移)
    pub fn drift(&self) -> f64 {
        self.slope
    }

    fn fit(&mut self, base_hw: u64, base_arrival: Instant) {
        let n = self.history.len() as f64;
        let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);

        for &(hw, arrival) in &self.history {
            let x = hw as f64 - base_hw as f64;
            let y = arrival.saturating_duration_since(base_arrival).as_nanos() as f64;
            sum_x += x;
            sum_y += y;
            sum_xy += x * y;
            sum_xx += x * x;
        }

        let denominator = n * sum_xx - sum_x * sum_x;
        if denominator.abs() < 1e-6 {
            // 时间戳没有变化，无法拟合
            self.slope = 1.0;
            self.offset = 0.0;
        } else {
            self.slope = (n * sum_xy - sum_x * sum_y) / denominator;
            self.offset = (sum_y * sum_xx - sum_x * sum_xy) / denominator;
        }
    }

    fn since_epoch(&self, t: Instant) -> Duration {
        t.saturating_duration_since(self.epoch)
    }
}
