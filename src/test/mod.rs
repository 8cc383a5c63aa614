// ============================================================================
// src/test/mod.rs - Test Support
// スケジューラ・割り込み・デバイスのテストダブル（ホスト上のスレッドで動作）
// ============================================================================

pub mod sched;

use std::sync::Mutex;
use std::vec::Vec;

use crate::error::BlockError;
use crate::fs::block::{BlockDevice, BlockRequest, BlockResult};

/// Simple RAM disk for testing
///
/// `submit` はその場で完了する。`fail_from` 以降のブロックは I/O エラー。
pub struct RamDisk {
    block_size: usize,
    blocks: u64,
    data: Mutex<Vec<u8>>,
    fail_from: Option<u64>,
    submits: Mutex<Vec<(u64, bool)>>,
}

impl RamDisk {
    pub fn new(blocks: u64, block_size: usize) -> Self {
        Self {
            block_size,
            blocks,
            data: Mutex::new(vec![0u8; blocks as usize * block_size]),
            fail_from: None,
            submits: Mutex::new(Vec::new()),
        }
    }

    /// `block` 以降へのリクエストを失敗させる
    pub fn failing_from(mut self, block: u64) -> Self {
        self.fail_from = Some(block);
        self
    }

    pub fn bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        self.data.lock().unwrap()[offset..offset + len].to_vec()
    }

    pub fn fill(&self, offset: usize, len: usize, value: u8) {
        self.data.lock().unwrap()[offset..offset + len].fill(value);
    }

    /// 送信された (block, write) の履歴
    pub fn submits(&self) -> Vec<(u64, bool)> {
        self.submits.lock().unwrap().clone()
    }
}

impl BlockDevice for RamDisk {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn submit(&self, request: &BlockRequest<'_>, write: bool) -> BlockResult<()> {
        if request.len() != self.block_size {
            return Err(BlockError::InvalidBufferSize);
        }
        if request.block() >= self.blocks {
            return Err(BlockError::InvalidBlock);
        }
        self.submits.lock().unwrap().push((request.block(), write));
        if self.fail_from.is_some_and(|f| request.block() >= f) {
            return Err(BlockError::IoError);
        }

        let offset = request.block() as usize * self.block_size;
        let mut data = self.data.lock().unwrap();
        let buf = unsafe { core::slice::from_raw_parts_mut(request.data_ptr(), request.len()) };
        if write {
            data[offset..offset + self.block_size].copy_from_slice(buf);
        } else {
            buf.copy_from_slice(&data[offset..offset + self.block_size]);
        }
        Ok(())
    }
}
