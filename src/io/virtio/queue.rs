// ============================================================================
// src/io/virtio/queue.rs - Split Virtqueue
// ============================================================================
//!
//! # Split Virtqueue
//!
//! ディスクリプタプール、Availリング、Usedリングの三領域。
//! いずれもデバイスと共有されるため、リング上のインデックスと
//! エントリは volatile でアクセスし、公開順序はフェンスで保証する。
//!
//! この構造体自体はロックを持たない。排他はデバイスごとの
//! スピンロックが担う。

use core::ptr;
use core::sync::atomic::{Ordering, fence};

use super::defs::{VringDesc, VringUsedElem, avail_layout, used_layout};
use crate::config::MAX_QUEUE_SIZE;
use crate::error::InitError;
use crate::io::dma::DmaRegion;

// ============================================================================
// Descriptor Pool
// ============================================================================

/// ディスクリプタテーブルと空きビットマップ
///
/// 割り当ては常に最小インデックスの空きスロットから行う。
pub struct DescriptorPool {
    /// デバイス共有のディスクリプタテーブル
    table: DmaRegion,
    /// スロット数
    size: u16,
    /// 空きビットマップ（ビット i = スロット i が空き）
    free: u64,
}

impl DescriptorPool {
    /// 全スロット空きのプールを作成
    pub fn new(size: u16) -> Result<Self, InitError> {
        if size == 0 || size > MAX_QUEUE_SIZE {
            return Err(InitError::InvalidConfig);
        }
        let table = DmaRegion::zeroed(size as usize * core::mem::size_of::<VringDesc>())
            .ok_or(InitError::OutOfMemory)?;

        let free = if size == 64 { u64::MAX } else { (1u64 << size) - 1 };
        Ok(Self { table, size, free })
    }

    /// スロット数
    pub fn size(&self) -> u16 {
        self.size
    }

    /// 空きスロット数
    pub fn num_free(&self) -> usize {
        self.free.count_ones() as usize
    }

    /// スロットが空きかどうか
    pub fn is_free(&self, index: u16) -> bool {
        index < self.size && self.free & (1u64 << index) != 0
    }

    /// テーブルの物理アドレス
    pub fn phys_addr(&self) -> u64 {
        self.table.phys_addr().as_u64()
    }

    /// 空きスロットを1つ取得
    pub fn alloc_one(&mut self) -> Option<u16> {
        if self.free == 0 {
            return None;
        }
        let index = self.free.trailing_zeros() as u16;
        self.free &= !(1u64 << index);
        Some(index)
    }

    /// N個のスロットをまとめて取得
    ///
    /// 全てを確保できない場合は途中で取得した分を返却し、
    /// プールの状態を変えずに `None` を返す。
    pub fn alloc_chain<const N: usize>(&mut self) -> Option<[u16; N]> {
        let mut out = [0u16; N];
        for i in 0..N {
            match self.alloc_one() {
                Some(index) => out[i] = index,
                None => {
                    for &index in &out[..i] {
                        self.free_one(index);
                    }
                    return None;
                }
            }
        }
        Some(out)
    }

    /// スロットを返却（内容はゼロクリア）
    ///
    /// # Panics
    /// 範囲外、または既に空きのスロットを返却した場合
    pub fn free_one(&mut self, index: u16) {
        if index >= self.size {
            panic!("free_desc: index {} out of range", index);
        }
        if self.free & (1u64 << index) != 0 {
            panic!("free_desc: descriptor {} already free", index);
        }
        self.set(index, VringDesc::empty());
        self.free |= 1u64 << index;
    }

    /// NEXT を辿ってチェーン全体を返却し、返却数を返す
    ///
    /// # Panics
    /// チェーン長がプールサイズを超えた場合（循環チェーン）
    pub fn free_chain(&mut self, head: u16) -> usize {
        let mut index = head;
        let mut freed = 0;
        loop {
            if freed >= self.size as usize {
                panic!("free_chain: chain from {} does not terminate", head);
            }
            let desc = self.get(index);
            self.free_one(index);
            freed += 1;

            if !desc.has_next() {
                return freed;
            }
            index = desc.next;
        }
    }

    /// ディスクリプタを書き込み
    pub fn set(&mut self, index: u16, desc: VringDesc) {
        assert!(index < self.size);
        unsafe { ptr::write_volatile(self.table.as_ptr::<VringDesc>().add(index as usize), desc) }
    }

    /// ディスクリプタを読み出し
    pub fn get(&self, index: u16) -> VringDesc {
        assert!(index < self.size);
        unsafe { ptr::read_volatile(self.table.as_ptr::<VringDesc>().add(index as usize)) }
    }
}

// ============================================================================
// Available Ring
// ============================================================================

/// ドライバ → デバイス方向のリング
pub struct AvailRing {
    region: DmaRegion,
    size: u16,
}

impl AvailRing {
    pub fn new(size: u16) -> Result<Self, InitError> {
        let bytes = avail_layout::RING + 2 * size as usize + 2;
        let region = DmaRegion::zeroed(bytes).ok_or(InitError::OutOfMemory)?;
        Ok(Self { region, size })
    }

    pub fn phys_addr(&self) -> u64 {
        self.region.phys_addr().as_u64()
    }

    fn field(&self, offset: usize) -> *mut u16 {
        unsafe { self.region.as_ptr::<u8>().add(offset).cast() }
    }

    /// 現在の idx
    pub fn index(&self) -> u16 {
        unsafe { ptr::read_volatile(self.field(avail_layout::IDX)) }
    }

    /// チェーン先頭をデバイスに公開
    ///
    /// エントリを書いてから idx を進める。デバイスが idx の更新を
    /// 観測した時点でエントリとディスクリプタは可視でなければならない。
    pub fn push(&mut self, head: u16) {
        let idx = self.index();
        let slot = avail_layout::RING + 2 * (idx % self.size) as usize;
        unsafe { ptr::write_volatile(self.field(slot), head) };

        fence(Ordering::SeqCst);
        unsafe { ptr::write_volatile(self.field(avail_layout::IDX), idx.wrapping_add(1)) };
        fence(Ordering::SeqCst);
    }
}

// ============================================================================
// Used Ring
// ============================================================================

/// デバイス → ドライバ方向のリング
pub struct UsedRing {
    region: DmaRegion,
    size: u16,
    /// 次に処理するエントリ位置（ドライバ側カーソル）
    last_seen: u16,
}

impl UsedRing {
    pub fn new(size: u16) -> Result<Self, InitError> {
        let bytes = used_layout::RING + 8 * size as usize + 2;
        let region = DmaRegion::zeroed(bytes).ok_or(InitError::OutOfMemory)?;
        Ok(Self { region, size, last_seen: 0 })
    }

    pub fn phys_addr(&self) -> u64 {
        self.region.phys_addr().as_u64()
    }

    /// デバイスが書いた idx
    pub fn device_index(&self) -> u16 {
        let idx = unsafe {
            ptr::read_volatile(self.region.as_ptr::<u8>().add(used_layout::IDX).cast::<u16>())
        };
        fence(Ordering::SeqCst);
        idx
    }

    /// 未処理の完了エントリを1つ取り出す
    pub fn pop(&mut self) -> Option<VringUsedElem> {
        if self.last_seen == self.device_index() {
            return None;
        }
        let slot = used_layout::RING + 8 * (self.last_seen % self.size) as usize;
        let elem = unsafe {
            ptr::read_volatile(self.region.as_ptr::<u8>().add(slot).cast::<VringUsedElem>())
        };
        self.last_seen = self.last_seen.wrapping_add(1);
        Some(elem)
    }
}

// ============================================================================
// VirtQueue
// ============================================================================

/// キュー0を構成する三領域
pub struct VirtQueue {
    pub pool: DescriptorPool,
    pub avail: AvailRing,
    pub used: UsedRing,
}

impl VirtQueue {
    /// 全領域をゼロ初期化して確保
    pub fn new(size: u16) -> Result<Self, InitError> {
        Ok(Self {
            pool: DescriptorPool::new(size)?,
            avail: AvailRing::new(size)?,
            used: UsedRing::new(size)?,
        })
    }

    pub fn size(&self) -> u16 {
        self.pool.size()
    }
}
