// ============================================================================
// src/sync/sleep_lock.rs - スリープロック
//
// spin::Mutex はロック待ちの間CPUを占有し続ける
// → ディスクI/Oのように長時間保持されるロックには不向き
//
// 解決: 短期ロック (IrqMutex) で held/owner を保護し、
//       競合時はスケジューラ経由で眠る（ブロードキャスト起床＋再確認）
// ============================================================================

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use super::irq_mutex::IrqMutex;
use super::wait::{Scheduler, TaskId, WaitChannel, next_channel_key, sleep_on};

/// held/owner の組。owner は held の間のみ意味を持つ。
struct LockState {
    held: bool,
    owner: Option<TaskId>,
}

/// スリープロック
///
/// 競合時は呼び出し元をスケジューラで眠らせる。
/// ガードがドロップされると全待機者を起床させ、
/// 待機者は held を再確認して一つだけが取得に成功する。
///
/// # Usage
/// ```ignore
/// let lock = SleepLock::new("scratch", buffer, &SCHEDULER);
/// let mut guard = lock.lock();
/// guard[0] = 0xAA;
/// assert!(lock.holding());
/// ```
pub struct SleepLock<T: ?Sized> {
    /// held/owner を保護する短期ロック
    state: IrqMutex<LockState>,
    /// このロック専用の待機チャネル
    chan: WaitChannel,
    sched: &'static dyn Scheduler,
    name: &'static str,
    data: UnsafeCell<T>,
}

// SAFETY: data へのアクセスは held を立てたガード経由のみ
unsafe impl<T: ?Sized + Send> Sync for SleepLock<T> {}
unsafe impl<T: ?Sized + Send> Send for SleepLock<T> {}

impl<T> SleepLock<T> {
    /// 新しいスリープロックを作成
    pub fn new(name: &'static str, data: T, sched: &'static dyn Scheduler) -> Self {
        Self {
            state: IrqMutex::new(LockState { held: false, owner: None }),
            chan: WaitChannel::SleepLock { lock: next_channel_key() },
            sched,
            name,
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SleepLock<T> {
    /// ロックを取得（競合時は眠る）
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let mut state = self.state.lock();
        while state.held {
            state = sleep_on(self.sched, self.chan, &self.state, state);
        }
        state.held = true;
        state.owner = Some(self.sched.current());
        drop(state);

        SleepLockGuard { lock: self }
    }

    /// ロックを試行（保持されていれば即座に None）
    pub fn try_lock(&self) -> Option<SleepLockGuard<'_, T>> {
        let mut state = self.state.lock();
        if state.held {
            return None;
        }
        state.held = true;
        state.owner = Some(self.sched.current());
        drop(state);

        Some(SleepLockGuard { lock: self })
    }

    /// 呼び出し元がこのロックを保持しているか
    pub fn holding(&self) -> bool {
        let state = self.state.lock();
        state.held && state.owner == Some(self.sched.current())
    }

    /// ロック状態を確認（デバッグ用）
    pub fn is_locked(&self) -> bool {
        self.state.lock().held
    }

    /// ロック名
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn unlock(&self) {
        let mut state = self.state.lock();
        state.held = false;
        state.owner = None;
        // 一つではなく全員を起こす。取得できなかった者は再び眠る。
        self.sched.wakeup(self.chan);
    }
}

/// SleepLock のガード
///
/// ドロップ時にロックを解放し、待機者を起床させる。
pub struct SleepLockGuard<'a, T: ?Sized> {
    lock: &'a SleepLock<T>,
}

impl<T: ?Sized> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: held を立てているのはこのガードのみ
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: held を立てているのはこのガードのみ
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
