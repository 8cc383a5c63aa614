// ============================================================================
// src/test/sched.rs - Thread-backed Scheduler
// ============================================================================
//!
//! ホストスレッドをタスクに見立てた `Scheduler` 実装。
//! sleep は park、wakeup は該当チャネルの全待機者を unpark する。

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, Thread};
use std::vec::Vec;

use crate::sync::{Scheduler, TaskId, WaitChannel};

/// 全テスト共有のスケジューラ
pub static SCHED: ThreadScheduler = ThreadScheduler::new();

static NEXT_TASK: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static TASK: TaskId = TaskId(NEXT_TASK.fetch_add(1, Ordering::Relaxed));
    /// prepare_to_sleep で登録した起床フラグ
    static ARMED: RefCell<Option<Arc<AtomicBool>>> = const { RefCell::new(None) };
}

struct Waiter {
    chan: WaitChannel,
    thread: Thread,
    woken: Arc<AtomicBool>,
}

pub struct ThreadScheduler {
    waiters: Mutex<Vec<Waiter>>,
}

impl ThreadScheduler {
    pub const fn new() -> Self {
        Self { waiters: Mutex::new(Vec::new()) }
    }

    /// `chan` で眠っているスレッド数
    pub fn sleepers(&self, chan: WaitChannel) -> usize {
        self.waiters.lock().unwrap().iter().filter(|w| w.chan == chan).count()
    }
}

impl Scheduler for ThreadScheduler {
    fn current(&self) -> TaskId {
        TASK.with(|t| *t)
    }

    fn prepare_to_sleep(&self, chan: WaitChannel) {
        let woken = Arc::new(AtomicBool::new(false));
        self.waiters.lock().unwrap().push(Waiter {
            chan,
            thread: thread::current(),
            woken: woken.clone(),
        });
        ARMED.with(|a| *a.borrow_mut() = Some(woken));
    }

    fn sleep(&self) {
        let Some(woken) = ARMED.with(|a| a.borrow_mut().take()) else {
            return;
        };
        while !woken.load(Ordering::Acquire) {
            thread::park();
        }
    }

    fn wakeup(&self, chan: WaitChannel) {
        self.waiters.lock().unwrap().retain(|w| {
            if w.chan != chan {
                return true;
            }
            w.woken.store(true, Ordering::Release);
            w.thread.unpark();
            false
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::next_channel_key;

    #[test]
    fn test_wakeup_before_sleep_not_lost() {
        let sched = ThreadScheduler::new();
        let chan = WaitChannel::FreeDescriptor { device: next_channel_key() };

        sched.prepare_to_sleep(chan);
        sched.wakeup(chan);
        sched.sleep(); // 即座に戻る
        assert_eq!(sched.sleepers(chan), 0);
    }

    #[test]
    fn test_task_ids_per_thread() {
        let here = SCHED.current();
        assert_eq!(here, SCHED.current());
        let there = thread::spawn(|| SCHED.current()).join().unwrap();
        assert_ne!(here, there);
    }
}
