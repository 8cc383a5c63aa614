// ============================================================================
// src/io/dma.rs - DMA Region Management
// ============================================================================
//!
//! # デバイス共有メモリ
//!
//! virtqueue のディスクリプタテーブル・Availリング・Usedリング、
//! およびリクエストヘッダ・ステータスバイトはデバイスと共有される。
//! これらはページアライメントでゼロ初期化された領域として確保する。
//!
//! カーネルは恒等マッピングで動作するため、物理アドレスは
//! 仮想アドレスと等しい。

use alloc::alloc::{Layout, alloc_zeroed, dealloc};
use core::ptr::NonNull;
use x86_64::PhysAddr;

use crate::config::PAGE_SIZE;

/// ページアライメントのゼロ初期化済み共有領域
///
/// CPU 側からのアクセスは volatile で行うこと。
/// デバイスは任意のタイミングで書き込む。
pub struct DmaRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: 領域は唯一の所有者が解放する。内容へのアクセス規律は利用側
// （デバイスごとのロック）が保証する。
unsafe impl Send for DmaRegion {}
unsafe impl Sync for DmaRegion {}

impl DmaRegion {
    /// `size` バイト以上の領域を確保（ページ単位に切り上げ）
    pub fn zeroed(size: usize) -> Option<Self> {
        let size = size.max(1).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let layout = Layout::from_size_align(size, PAGE_SIZE).ok()?;

        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr)?;

        Some(Self { ptr, layout })
    }

    /// 領域先頭を `T` へのポインタとして取得
    pub fn as_ptr<T>(&self) -> *mut T {
        self.ptr.as_ptr().cast()
    }

    /// 領域先頭の物理アドレス
    pub fn phys_addr(&self) -> PhysAddr {
        PhysAddr::new(self.ptr.as_ptr() as u64)
    }

    /// 領域内オフセットの物理アドレス
    pub fn phys_at(&self, offset: usize) -> u64 {
        debug_assert!(offset < self.layout.size());
        self.phys_addr().as_u64() + offset as u64
    }

    /// 領域サイズ
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_alignment_and_zero() {
        let region = DmaRegion::zeroed(100).unwrap();
        assert_eq!(region.len(), PAGE_SIZE);
        assert_eq!(region.phys_addr().as_u64() % PAGE_SIZE as u64, 0);

        let bytes = unsafe { core::slice::from_raw_parts(region.as_ptr::<u8>(), region.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rounds_up_to_pages() {
        let region = DmaRegion::zeroed(PAGE_SIZE + 1).unwrap();
        assert_eq!(region.len(), 2 * PAGE_SIZE);
        assert_eq!(region.phys_at(16), region.phys_addr().as_u64() + 16);
    }
}
