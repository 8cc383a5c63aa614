// ============================================================================
// src/io/virtio/mod.rs - VirtIO Driver Framework
// ============================================================================
//!
//! # VirtIO (virtio-mmio v2)
//!
//! - `defs`: レジスタ・フラグ・リングレイアウト
//! - `transport`: レジスタアクセスの抽象化
//! - `queue`: split virtqueue とディスクリプタプール
//! - `blk`: ブロックデバイスドライバ

pub mod blk;
pub mod defs;
pub mod queue;
pub mod transport;

pub use blk::{DriverState, IoStatsSnapshot, VirtioBlk};
pub use transport::{MmioTransport, VirtioTransport};
