// ============================================================================
// src/io/mod.rs - I/O Subsystem
// ============================================================================
//!
//! I/Oサブシステム
//!
//! - `dma`: デバイス共有メモリ
//! - `virtio`: virtio-mmio ブロックデバイスドライバ
//! - `log`: `log` クレートのバックエンド

pub mod dma;
pub mod log;
pub mod virtio;
