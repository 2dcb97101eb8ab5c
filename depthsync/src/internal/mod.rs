use std::sync::{Mutex, MutexGuard, PoisonError};

/// 获取锁；持锁线程 panic 过也继续使用内部数据
///
/// 被保护的状态在每次修改后都保持一致，所以中毒标记可以忽略。
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
