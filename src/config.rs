// ============================================================================
// src/config.rs - Block Stack Configuration
// ============================================================================
//!
//! コンパイル時定数とドライブごとの実行時設定

/// ファイルシステムが扱うセクタサイズ
pub const SECTOR_SIZE: usize = 512;

/// デバイスのネイティブ転送単位（デフォルト）
pub const BLOCK_SIZE: usize = 1024;

/// ディスクリプタ数（デフォルト）
pub const QUEUE_SIZE: u16 = 8;

/// ディスクリプタプールの上限（空きビットマップが u64 のため）
pub const MAX_QUEUE_SIZE: u16 = 64;

/// リングメモリのアライメント
pub const PAGE_SIZE: usize = 4096;

/// 最初の virtio-mmio デバイスのベースアドレス (QEMU virt)
pub const VIRTIO0_BASE: usize = 0x1000_1000;

/// virtio-mmio デバイス間のストライド
pub const VIRTIO_MMIO_STRIDE: usize = 0x1000;

/// GET_SECTOR_COUNT が返す容量 (8MB)
pub const DEFAULT_SECTOR_COUNT: u32 = 2048 * 8;

/// ドライブ設定
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DriveConfig {
    /// ネイティブブロックサイズ（SECTOR_SIZE の倍数）
    pub block_size: usize,
    /// ディスクリプタプールのスロット数
    pub queue_size: u16,
    /// ファイルシステムに報告するセクタ数
    pub sector_count: u32,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            queue_size: QUEUE_SIZE,
            sector_count: DEFAULT_SECTOR_COUNT,
        }
    }
}

impl DriveConfig {
    /// 1ブロックあたりのセクタ数
    pub const fn sectors_per_block(&self) -> usize {
        self.block_size / SECTOR_SIZE
    }

    /// 設定値の整合性を確認
    ///
    /// ブロックサイズはセクタの倍数かつ1ページ以内、
    /// キューは1リクエスト（3ディスクリプタ）以上を保持できること。
    pub fn is_valid(&self) -> bool {
        self.block_size >= SECTOR_SIZE
            && self.block_size % SECTOR_SIZE == 0
            && self.block_size <= PAGE_SIZE
            && self.queue_size >= 3
            && self.queue_size <= MAX_QUEUE_SIZE
    }
}

/// n番目の virtio-mmio デバイスのベースアドレス
pub const fn virtio_mmio_base(index: usize) -> usize {
    VIRTIO0_BASE + index * VIRTIO_MMIO_STRIDE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DriveConfig::default();
        assert!(config.is_valid());
        assert_eq!(config.sectors_per_block(), 2);
        assert_eq!(config.sector_count, 16384);
    }

    #[test]
    fn test_invalid_config() {
        let odd = DriveConfig { block_size: 1000, ..DriveConfig::default() };
        assert!(!odd.is_valid());

        let tiny_queue = DriveConfig { queue_size: 2, ..DriveConfig::default() };
        assert!(!tiny_queue.is_valid());

        let huge_queue = DriveConfig { queue_size: 128, ..DriveConfig::default() };
        assert!(!huge_queue.is_valid());
    }

    #[test]
    fn test_mmio_base() {
        assert_eq!(virtio_mmio_base(0), 0x1000_1000);
        assert_eq!(virtio_mmio_base(1), 0x1000_2000);
    }
}
