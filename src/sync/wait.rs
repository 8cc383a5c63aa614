// ============================================================================
// src/sync/wait.rs - Wait Channels & Scheduler Boundary
// ============================================================================
//!
//! 待機チャネルとスケジューラ境界
//!
//! ブロッキング（自発的なデスケジュール）はスケジューラの責務であり、
//! このクレートは `Scheduler` トレイト経由でのみ利用する。
//!
//! 待機理由ごとに名前付きのチャネルを持つ。アドレスを暗黙の
//! 起床キーとして使うことはない。
//!
//! ## ロストウェイクアップ回避
//! `sleep_on` は短期ロックを手放す前に `prepare_to_sleep` で待機を登録する。
//! 起床側は同じロックを保持して `wakeup` を呼ぶため、
//! 条件確認から待機開始までの間に起床が失われることはない。

use core::sync::atomic::{AtomicU64, Ordering};
use super::irq_mutex::{IrqMutex, IrqMutexGuard};

/// タスク識別子
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

/// 名前付き待機チャネル
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WaitChannel {
    /// デバイスのディスクリプタ空き待ち
    FreeDescriptor { device: u64 },
    /// 個々のリクエスト完了待ち
    Completion { device: u64, ticket: u64 },
    /// スリープロック解放待ち
    SleepLock { lock: u64 },
}

/// チャネルキーの発行元
static NEXT_CHANNEL_KEY: AtomicU64 = AtomicU64::new(1);

/// 新しいチャネルキーを発行
///
/// デバイスやロックごとに一意なキーを割り当て、
/// `WaitChannel` の識別に使う。
pub fn next_channel_key() -> u64 {
    NEXT_CHANNEL_KEY.fetch_add(1, Ordering::Relaxed)
}

/// スケジューラとの境界
///
/// 実装は複数コアから同時に呼ばれる。
pub trait Scheduler: Sync {
    /// 呼び出し元タスクの識別子
    fn current(&self) -> TaskId;

    /// 呼び出し元を `chan` の待機者として登録する
    ///
    /// 登録後に `wakeup(chan)` が呼ばれた場合、続く `sleep` は即座に戻る。
    fn prepare_to_sleep(&self, chan: WaitChannel);

    /// `prepare_to_sleep` で登録したチャネルへの起床まで呼び出し元をブロックする
    fn sleep(&self);

    /// `chan` で待機している全タスクを起床させる
    fn wakeup(&self, chan: WaitChannel);
}

/// 短期ロックを手放して `chan` で眠り、起床後に再取得する
///
/// ガードの解放で割り込みも復元されるため、眠っている間このコアは
/// 割り込みを受け付ける。
/// 戻った時点で待機条件が成立しているとは限らない。
/// 呼び出し側はループで条件を再確認すること。
pub fn sleep_on<'a, T>(
    sched: &dyn Scheduler,
    chan: WaitChannel,
    lock: &'a IrqMutex<T>,
    guard: IrqMutexGuard<'a, T>,
) -> IrqMutexGuard<'a, T> {
    sched.prepare_to_sleep(chan);
    drop(guard);
    sched.sleep();
    lock.lock()
}
