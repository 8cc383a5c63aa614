// ============================================================================
// src/sync/irq_mutex.rs - 割り込み禁止Mutex
//
// 問題: spin::Mutex はロック中でも割り込みを許可する
// → 完了割り込みが送信中のコアに届くと、ハンドラが同じMutexで永久にスピンする
//
// 解決: ロック取得前にそのコアの割り込みを禁止 (cli)
//       ロック解放時に元の状態へ復元 (sti)
//       ネストしたロックは各ガードが保存した状態を逆順に戻す
//
// cli/sti 自体はプラットフォームが `InterruptControl` として登録する。
//
// 参考: Linux の spin_lock_irqsave / spin_unlock_irqrestore
// ============================================================================

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Once;

/// コアローカルな割り込みフラグの操作
///
/// すべて呼び出し元のコアに対して作用する。
pub trait InterruptControl: Sync {
    /// 割り込みが有効か (RFLAGS.IF)
    fn are_enabled(&self) -> bool;

    /// 割り込みを禁止 (cli)
    fn disable(&self);

    /// 割り込みを許可 (sti)
    ///
    /// 禁止中に保留された割り込みはここで配送されうる。
    fn enable(&self);
}

/// x86_64 の RFLAGS.IF を直接操作する実装
#[cfg(target_arch = "x86_64")]
pub struct CpuInterrupts;

#[cfg(target_arch = "x86_64")]
impl InterruptControl for CpuInterrupts {
    fn are_enabled(&self) -> bool {
        x86_64::instructions::interrupts::are_enabled()
    }

    fn disable(&self) {
        x86_64::instructions::interrupts::disable();
    }

    fn enable(&self) {
        x86_64::instructions::interrupts::enable();
    }
}

/// 登録済みの割り込み制御
static CONTROL: Once<&'static dyn InterruptControl> = Once::new();

/// 割り込み制御を登録
///
/// 最初の登録のみ有効。割り込みハンドラを設定する前に呼ぶこと。
/// 未登録の間、`IrqMutex` は割り込みに触れない単なるスピンロックとして動く。
pub fn install(control: &'static dyn InterruptControl) {
    CONTROL.call_once(|| control);
}

/// 割り込み制御が登録済みか
pub fn is_installed() -> bool {
    CONTROL.get().is_some()
}

/// 割り込みフラグを保存して割り込みを禁止
///
/// # Returns
/// 元の割り込み有効状態 (true = 有効だった)
#[inline]
fn save_and_disable_interrupts() -> bool {
    match CONTROL.get() {
        Some(control) => {
            let was_enabled = control.are_enabled();
            control.disable();
            was_enabled
        }
        None => false,
    }
}

/// 割り込みを復元（元々有効だった場合のみ有効化）
#[inline]
fn restore_interrupts(was_enabled: bool) {
    if !was_enabled {
        return;
    }
    if let Some(control) = CONTROL.get() {
        control.enable();
    }
}

/// 割り込み禁止Mutex
///
/// ロック取得時にそのコアの割り込みを禁止し、
/// ロック解放時に元の状態に復元する。
///
/// # 割り込みハンドラからの使用
/// 割り込みハンドラ内でこのMutexをロックしても、
/// 保持者と同じコアにハンドラが割り込むことはないため、デッドロックしない。
pub struct IrqMutex<T: ?Sized> {
    /// スピンロック本体
    locked: AtomicBool,
    /// 保護されるデータ
    data: UnsafeCell<T>,
}

// SAFETY: IrqMutex は排他的アクセスを保証する
unsafe impl<T: ?Sized + Send> Sync for IrqMutex<T> {}
unsafe impl<T: ?Sized + Send> Send for IrqMutex<T> {}

impl<T> IrqMutex<T> {
    /// 新しい IrqMutex を作成
    pub const fn new(data: T) -> Self {
        Self { locked: AtomicBool::new(false), data: UnsafeCell::new(data) }
    }
}

impl<T: ?Sized> IrqMutex<T> {
    /// ロックを取得
    ///
    /// 割り込みを禁止してからスピンロックを取得する。
    /// ガードがドロップされると自動的に割り込みが復元される。
    pub fn lock(&self) -> IrqMutexGuard<'_, T> {
        let irq_was_enabled = save_and_disable_interrupts();

        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }

        IrqMutexGuard { lock: self, irq_was_enabled }
    }

    /// ロックを試行（失敗したら即座に返る）
    pub fn try_lock(&self) -> Option<IrqMutexGuard<'_, T>> {
        let irq_was_enabled = save_and_disable_interrupts();

        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(IrqMutexGuard { lock: self, irq_was_enabled })
        } else {
            // ロック失敗 → 割り込みを復元
            restore_interrupts(irq_was_enabled);
            None
        }
    }

    /// ロック状態を確認（デバッグ用）
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// IrqMutex のガード
///
/// ドロップ時にロックを解放し、割り込み状態を復元する。
pub struct IrqMutexGuard<'a, T: ?Sized> {
    lock: &'a IrqMutex<T>,
    irq_was_enabled: bool,
}

impl<T: ?Sized> Deref for IrqMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: ロックを保持しているので安全にアクセス可能
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for IrqMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: ロックを保持しているので安全にアクセス可能
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for IrqMutexGuard<'_, T> {
    fn drop(&mut self) {
        // 1. スピンロックを解放
        self.lock.locked.store(false, Ordering::Release);

        // 2. 割り込み状態を復元
        restore_interrupts(self.irq_was_enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::cpu;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::thread;

    #[test]
    fn test_irq_mutex_basic() {
        let mutex = IrqMutex::new(42u64);

        {
            let mut guard = mutex.lock();
            assert_eq!(*guard, 42);
            *guard = 100;
        }

        {
            let guard = mutex.lock();
            assert_eq!(*guard, 100);
        }
    }

    #[test]
    fn test_try_lock() {
        let mutex = IrqMutex::new(0u64);

        let guard = mutex.lock();
        assert!(mutex.try_lock().is_none()); // 既にロック中
        drop(guard);

        assert!(mutex.try_lock().is_some()); // 解放後は取得可能
    }

    #[test]
    fn test_nested_locks_restore_in_order() {
        cpu::install();
        // 各スレッドが独立したコア
        thread::spawn(|| {
            let outer = IrqMutex::new(());
            let inner = IrqMutex::new(());
            assert!(cpu::CPU.are_enabled());

            let a = outer.lock();
            assert!(!cpu::CPU.are_enabled());
            let b = inner.lock();
            drop(b);
            // 外側のロックがまだ割り込みを禁止している
            assert!(!cpu::CPU.are_enabled());
            drop(a);
            assert!(cpu::CPU.are_enabled());

            // 失敗した try_lock も状態を戻す
            let a = outer.lock();
            assert!(outer.try_lock().is_none());
            assert!(!cpu::CPU.are_enabled());
            drop(a);
            assert!(cpu::CPU.are_enabled());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_interrupt_deferred_while_locked() {
        cpu::install();
        thread::spawn(|| {
            let mutex = IrqMutex::new(0u32);
            let fired = Rc::new(Cell::new(false));

            let guard = mutex.lock();
            let flag = fired.clone();
            cpu::raise(move || flag.set(true));
            // ロック中は配送されない
            assert!(!fired.get());
            assert_eq!(cpu::pending(), 1);

            drop(guard);
            assert!(fired.get());
            assert_eq!(cpu::pending(), 0);
        })
        .join()
        .unwrap();
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_cpu_interrupts_reads_flags() {
        // ユーザーモードでは IF は常に立っている
        assert!(CpuInterrupts.are_enabled());
    }
}
