//! 设备句柄注册表
//!
//! 进程内唯一被多个独立所有者同时修改的结构：index → 所有权令牌。
//! 打开流程分两步：先在锁内登记预留，再在锁外打开硬件，
//! 这样同一 index 的并发 open 只有一个能赢，而不同 index 互不阻塞。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use depthsync_core::error::{CameraError, Result};
use depthsync_core::traits::Driver;

use crate::internal::lock;
use crate::session::DeviceSession;

/// 每次成功 open 分配的唯一令牌
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnershipToken(u64);

impl OwnershipToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OwnershipToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// 已预留，正在打开硬件
    Opening(OwnershipToken),
    Open(OwnershipToken),
}

impl Slot {
    fn token(self) -> OwnershipToken {
        match self {
            Self::Opening(t) | Self::Open(t) => t,
        }
    }
}

pub struct DeviceRegistry {
    driver: Arc<dyn Driver>,
    slots: Mutex<HashMap<u32, Slot>>,
    next_token: AtomicU64,
}

impl DeviceRegistry {
    pub fn new(driver: Arc<dyn Driver>) -> Arc<Self> {
        tracing::debug!(target: "depthsync::registry", backend = driver.backend(), "registry created");
        Arc::new(Self {
            driver,
            slots: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        })
    }

    /// 当前安装的设备数量 (每次调用都重新查询)
    pub fn installed_count(&self) -> u32 {
        self.driver.installed_count()
    }

    /// 独占打开第 `index` 台设备
    pub fn open(self: &Arc<Self>, index: u32) -> Result<DeviceSession> {
        let installed = self.installed_count();
        if index >= installed {
            return Err(CameraError::NotFound { index, installed });
        }

        // 1. 登记预留；守卫在成功转为正式持有前被丢弃 (包括 panic 展开) 都会撤销预留
        let token = OwnershipToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        {
            let mut slots = lock(&self.slots);
            if slots.contains_key(&index) {
                tracing::debug!(target: "depthsync::registry", index, "open rejected: already owned");
                return Err(CameraError::AlreadyOpen { index });
            }
            slots.insert(index, Slot::Opening(token));
        }
        let reservation = Reservation {
            registry: self,
            index,
            token,
        };

        // 2. 锁外打开硬件并读取身份信息
        let opened = self.driver.open(index).and_then(|device| {
            let serial = device.serial_number()?;
            let jacks = device.sync_jacks()?;
            Ok((device, serial, jacks))
        });

        let (device, serial, jacks) = match opened {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!(target: "depthsync::registry", index, error = %e, "open failed");
                return Err(e);
            }
        };

        // 3. 预留转为正式持有
        lock(&self.slots).insert(index, Slot::Open(token));
        reservation.disarm();
        tracing::info!(
            target: "depthsync::registry",
            index,
            %token,
            serial = %serial,
            %jacks,
            "device opened"
        );

        Ok(DeviceSession::new(self.clone(), index, token, device, serial, jacks))
    }

    /// 释放 index；令牌不匹配时忽略 (防止过期所有者误释放)
    pub(crate) fn release(&self, index: u32, token: OwnershipToken) {
        let mut slots = lock(&self.slots);
        match slots.get(&index) {
            Some(slot) if slot.token() == token => {
                slots.remove(&index);
                tracing::debug!(target: "depthsync::registry", index, %token, "slot released");
            }
            Some(_) => {
                tracing::warn!(target: "depthsync::registry", index, %token, "release with stale token ignored");
            }
            None => {}
        }
    }

    pub fn is_open(&self, index: u32) -> bool {
        lock(&self.slots).contains_key(&index)
    }

    /// 当前持有中的 index，升序
    pub fn open_indices(&self) -> Vec<u32> {
        let mut indices: Vec<u32> = lock(&self.slots).keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    pub fn open_count(&self) -> usize {
        lock(&self.slots).len()
    }

    /// 没有任何会话存活，可以安全销毁
    pub fn is_idle(&self) -> bool {
        self.open_count() == 0
    }
}

/// 打开过程中的预留；Drop 时撤销，除非已 disarm
struct Reservation<'a> {
    registry: &'a DeviceRegistry,
    index: u32,
    token: OwnershipToken,
}

impl Reservation<'_> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.registry.release(self.index, self.token);
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("backend", &self.driver.backend())
            .field("open", &self.open_indices())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::AtomicBool;
    use std::thread;

    use depthsync_core::traits::Device;

    use depthsync_simulation::{SimulatedHub, UnitSpec};

    use super::*;

    fn registry(units: usize) -> Arc<DeviceRegistry> {
        let hub = SimulatedHub::with_units((0..units).map(|i| UnitSpec::new(format!("unit-{i}"))));
        DeviceRegistry::new(Arc::new(hub))
    }

    #[test]
    fn second_open_of_same_index_is_rejected() -> anyhow::Result<()> {
        let registry = registry(2);
        let session = registry.open(0)?;

        assert!(matches!(registry.open(0), Err(CameraError::AlreadyOpen { index: 0 })));
        assert_eq!(registry.open_indices(), vec![0]);

        session.close();
        assert!(registry.is_idle());
        assert!(registry.open(0).is_ok());
        Ok(())
    }

    #[test]
    fn tokens_are_unique_per_open() -> anyhow::Result<()> {
        let registry = registry(1);
        let first = registry.open(0)?;
        let first_token = first.ownership_token();
        first.close();

        let second = registry.open(0)?;
        assert_ne!(second.ownership_token(), first_token);
        Ok(())
    }

    #[test]
    fn stale_token_cannot_release_new_owner() -> anyhow::Result<()> {
        let registry = registry(1);
        let session = registry.open(0)?;

        registry.release(0, OwnershipToken(u64::MAX));
        assert!(registry.is_open(0));
        drop(session);
        assert!(!registry.is_open(0));
        Ok(())
    }

    #[test]
    fn concurrent_open_has_exactly_one_winner() {
        let registry = registry(1);

        let sessions: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let registry = registry.clone();
                    s.spawn(move || registry.open(0))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("open thread panicked"))
                .collect()
        });

        let winners = sessions.iter().filter(|r| r.is_ok()).count();
        let already_open = sessions
            .iter()
            .filter(|r| matches!(r, Err(CameraError::AlreadyOpen { index: 0 })))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(already_open, 7);
    }

    /// 第一次 open 时 panic 的驱动
    #[derive(Debug)]
    struct FlakyDriver {
        inner: SimulatedHub,
        panicked: AtomicBool,
    }

    impl Driver for FlakyDriver {
        fn installed_count(&self) -> u32 {
            self.inner.installed_count()
        }

        fn open(&self, index: u32) -> Result<Box<dyn Device>> {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("driver bug while opening {index}");
            }
            self.inner.open(index)
        }

        fn backend(&self) -> &'static str {
            "flaky"
        }
    }

    #[test]
    fn panicking_driver_does_not_leak_reservation() -> anyhow::Result<()> {
        let registry = DeviceRegistry::new(Arc::new(FlakyDriver {
            inner: SimulatedHub::with_units([UnitSpec::new("flaky-0")]),
            panicked: AtomicBool::new(false),
        }));

        let first = panic::catch_unwind(AssertUnwindSafe(|| registry.open(0)));
        assert!(first.is_err(), "first open should panic");
        assert!(!registry.is_open(0));
        assert!(registry.is_idle());

        let session = registry.open(0)?;
        assert_eq!(session.serial_number(), "flaky-0");
        Ok(())
    }

    #[test]
    fn failed_hardware_open_releases_reservation() {
        let hub = SimulatedHub::with_units([UnitSpec::new("shared")]);
        // 另一个进程已经持有硬件锁
        let other_process = DeviceRegistry::new(Arc::new(hub.clone()));
        let registry = DeviceRegistry::new(Arc::new(hub));

        let held = other_process.open(0).expect("first owner opens");
        assert!(matches!(registry.open(0), Err(CameraError::AlreadyOpen { index: 0 })));
        assert!(!registry.is_open(0), "reservation must be rolled back");

        held.close();
        assert!(registry.open(0).is_ok());
    }
}
