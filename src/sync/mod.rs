// ============================================================================
// src/sync/mod.rs - 同期プリミティブ
// 割り込み禁止Mutex・スリープロック・スケジューラ境界（待機チャネル）
// ============================================================================

pub mod irq_mutex;
pub mod sleep_lock;
pub mod wait;

pub use irq_mutex::{InterruptControl, IrqMutex, IrqMutexGuard};
pub use sleep_lock::{SleepLock, SleepLockGuard};
pub use wait::{Scheduler, TaskId, WaitChannel, next_channel_key, sleep_on};
