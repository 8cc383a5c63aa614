// ============================================================================
// src/lib.rs - rany_blk: VirtIO-blk I/O Stack
// ============================================================================
//!
//! ブロックストレージI/Oスタック
//!
//! ## 構成
//! - `sync`: 割り込み禁止Mutex・スリープロック・待機チャネル（スケジューラとの境界）
//! - `io::virtio`: virtio-mmio ブロックデバイスドライバ
//! - `fs::sector`: 512バイトセクタ ⇔ ネイティブブロックの変換
//! - `fs::registry`: ファイルシステム向け `disk_*` 契約
//!
//! スケジューラ・コンソール・ページアロケータは外部コラボレータとして
//! トレイト経由でのみ参照する。

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod fs;
pub mod io;
pub mod sync;

#[cfg(test)]
mod test;

pub use error::{BlockError, DiskError, DiskStatus, InitError};
pub use fs::registry::DeviceRegistry;
pub use io::virtio::blk::VirtioBlk;
pub use sync::{InterruptControl, IrqMutex, Scheduler, SleepLock, TaskId, WaitChannel};
