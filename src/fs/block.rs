// ============================================================================
// src/fs/block.rs - Block Device Abstraction
// ============================================================================
//!
//! ブロックデバイス抽象化レイヤー
//!
//! ## 設計
//! - 1リクエスト = ネイティブブロック1個
//! - 呼び出し元スレッドは完了まで眠る（同期I/O）
//! - バッファは呼び出し元が所有し、ドライバは借用するだけ

use core::marker::PhantomData;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

pub use crate::error::BlockError;

/// Result type for block operations
pub type BlockResult<T> = Result<T, BlockError>;

// ============================================================================
// Block Request
// ============================================================================

/// A block I/O request
///
/// 呼び出し元のスタック上に置かれ、送信から完了までの間だけ
/// ドライバに借用される。デバイスはデータバッファへ直接 DMA するため、
/// 借用中はバッファへの排他アクセスを保持し続ける。
pub struct BlockRequest<'a> {
    /// Target block (native block units)
    block: u64,
    /// Data buffer (exactly one native block)
    data: NonNull<u8>,
    len: usize,
    /// 送信時に立ち、完了割り込みで下ろされる
    pending: AtomicBool,
    _buffer: PhantomData<&'a mut [u8]>,
}

// SAFETY: data は呼び出し元が排他借用しているバッファを指す
unsafe impl Send for BlockRequest<'_> {}
unsafe impl Sync for BlockRequest<'_> {}

impl<'a> BlockRequest<'a> {
    /// Create a new request over `buf`
    pub fn new(block: u64, buf: &'a mut [u8]) -> Self {
        let len = buf.len();
        Self {
            block,
            data: NonNull::from(buf).cast(),
            len,
            pending: AtomicBool::new(false),
            _buffer: PhantomData,
        }
    }

    pub fn block(&self) -> u64 {
        self.block
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// バッファ先頭（恒等マッピングのため物理アドレスとしても使える）
    pub fn data_ptr(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// デバイスが処理中かどうか
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn pending_flag(&self) -> &AtomicBool {
        &self.pending
    }
}

// ============================================================================
// Block Device Trait
// ============================================================================

/// Block device trait
pub trait BlockDevice: Sync {
    /// ネイティブブロックサイズ（バイト）
    fn block_size(&self) -> usize;

    /// 1ブロックの読み書きを行い、完了まで呼び出し元を眠らせる
    fn submit(&self, request: &BlockRequest<'_>, write: bool) -> BlockResult<()>;

    /// Synchronous read
    fn read_block(&self, block: u64, buf: &mut [u8]) -> BlockResult<()> {
        let request = BlockRequest::new(block, buf);
        self.submit(&request, false)
    }

    /// Synchronous write
    ///
    /// デバイスは書き込み時にバッファを読むだけだが、
    /// リクエストは排他借用を要求する。
    fn write_block(&self, block: u64, buf: &mut [u8]) -> BlockResult<()> {
        let request = BlockRequest::new(block, buf);
        self.submit(&request, true)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::RamDisk;

    #[test]
    fn test_block_request() {
        let mut buf = [0u8; 1024];
        let ptr = buf.as_mut_ptr();
        let req = BlockRequest::new(7, &mut buf);
        assert_eq!(req.block(), 7);
        assert_eq!(req.len(), 1024);
        assert_eq!(req.data_ptr(), ptr);
        assert!(!req.is_pending());
    }

    #[test]
    fn test_ram_disk_sync_io() {
        let disk = RamDisk::new(16, 1024);

        let mut data = [0x42u8; 1024];
        disk.write_block(3, &mut data).unwrap();

        let mut buf = [0u8; 1024];
        disk.read_block(3, &mut buf).unwrap();
        assert_eq!(buf, data);

        assert_eq!(disk.read_block(16, &mut buf), Err(BlockError::InvalidBlock));
    }

    #[test]
    fn test_wrong_buffer_size_rejected() {
        let disk = RamDisk::new(16, 1024);
        let mut short = [0u8; 512];
        assert_eq!(disk.read_block(0, &mut short), Err(BlockError::InvalidBufferSize));
    }
}
