// ============================================================================
// src/fs/mod.rs - Filesystem-facing Block Layer
// ============================================================================
//!
//! ファイルシステム向けブロック層
//!
//! - `block`: ブロックデバイス抽象とリクエスト
//! - `sector`: 512バイトセクタ変換
//! - `registry`: ドライブ番号ごとの `disk_*` 入口

pub mod block;
pub mod registry;
pub mod sector;

pub use block::{BlockDevice, BlockRequest, BlockResult};
pub use registry::{DeviceRegistry, IoctlCommand, fattime};
