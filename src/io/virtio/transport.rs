// ============================================================================
// src/io/virtio/transport.rs - VirtIO Transport Layer Abstraction
// ============================================================================
//!
//! # VirtIO トランスポート層抽象化
//!
//! ドライバはレジスタ操作をこのトレイト経由でのみ行う。
//! 実機では virtio-mmio (QEMU virt) を使い、
//! テストではメモリ上のデバイスモデルに差し替える。
//!
//! ## 参考
//! - VirtIO Specification v1.2
//! - MMIO Transport: Section 4.2

use super::defs::mmio_regs;
use crate::config::virtio_mmio_base;

// ============================================================================
// VirtIO Transport Trait
// ============================================================================

/// VirtIO トランスポート層トレイト
///
/// 対象はキュー0のみ、フィーチャーは下位32ビットのみを扱う。
pub trait VirtioTransport: Send {
    /// マジック値 ("virt")
    fn magic(&self) -> u32;

    /// トランスポートバージョン
    fn version(&self) -> u32;

    /// デバイスID
    fn device_id(&self) -> u32;

    /// ベンダID
    fn vendor_id(&self) -> u32;

    /// デバイスステータスを取得
    fn get_status(&self) -> u8;

    /// デバイスステータスを設定
    fn set_status(&mut self, status: u8);

    /// デバイスをリセット
    fn reset(&mut self) {
        self.set_status(0);
    }

    /// デバイスフィーチャーを取得（ビット0-31）
    fn device_features(&mut self) -> u32;

    /// ドライバフィーチャーを設定（ビット0-31）
    fn set_driver_features(&mut self, features: u32);

    /// キューを選択
    fn select_queue(&mut self, queue_index: u16);

    /// 選択されたキューの最大サイズを取得（0 = キューなし）
    fn queue_max_size(&self) -> u32;

    /// キューサイズを設定
    fn set_queue_size(&mut self, size: u16);

    /// キューが有効かどうかを確認
    fn is_queue_ready(&self) -> bool;

    /// キューを有効化
    fn enable_queue(&mut self);

    /// キューのディスクリプタテーブルアドレスを設定
    fn set_queue_desc_addr(&mut self, addr: u64);

    /// キューのAvailリングアドレスを設定
    fn set_queue_avail_addr(&mut self, addr: u64);

    /// キューのUsedリングアドレスを設定
    fn set_queue_used_addr(&mut self, addr: u64);

    /// キューに通知
    fn notify_queue(&mut self, queue_index: u16);

    /// 割り込みステータスを取得
    fn interrupt_status(&self) -> u32;

    /// 割り込みをACK
    fn ack_interrupt(&mut self, status: u32);

    /// コンフィグ空間から32ビット値を読み取り
    fn read_config_u32(&self, offset: usize) -> u32;

    /// コンフィグ空間から64ビット値を読み取り
    fn read_config_u64(&self, offset: usize) -> u64 {
        let low = self.read_config_u32(offset) as u64;
        let high = self.read_config_u32(offset + 4) as u64;
        low | (high << 32)
    }
}

// ============================================================================
// MMIO Transport Implementation
// ============================================================================

/// VirtIO MMIO トランスポート
pub struct MmioTransport {
    /// MMIOベースアドレス
    base: usize,
}

impl MmioTransport {
    /// 新しいMMIOトランスポートを作成
    ///
    /// 識別レジスタの検証はドライバの初期化時に行う。
    ///
    /// # Safety
    /// - `base` は virtio-mmio レジスタ窓を指し、恒等マッピングされていること
    pub unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    /// n番目の virtio-mmio スロット
    ///
    /// # Safety
    /// `new` と同じ
    pub unsafe fn for_slot(index: usize) -> Self {
        unsafe { Self::new(virtio_mmio_base(index)) }
    }

    /// 32ビットレジスタを読み取り
    #[inline]
    fn read32(&self, offset: usize) -> u32 {
        unsafe { core::ptr::read_volatile((self.base + offset) as *const u32) }
    }

    /// 32ビットレジスタに書き込み
    #[inline]
    fn write32(&self, offset: usize, value: u32) {
        unsafe { core::ptr::write_volatile((self.base + offset) as *mut u32, value) }
    }
}

impl VirtioTransport for MmioTransport {
    fn magic(&self) -> u32 {
        self.read32(mmio_regs::MAGIC_VALUE)
    }

    fn version(&self) -> u32 {
        self.read32(mmio_regs::VERSION)
    }

    fn device_id(&self) -> u32 {
        self.read32(mmio_regs::DEVICE_ID)
    }

    fn vendor_id(&self) -> u32 {
        self.read32(mmio_regs::VENDOR_ID)
    }

    fn get_status(&self) -> u8 {
        self.read32(mmio_regs::STATUS) as u8
    }

    fn set_status(&mut self, status: u8) {
        self.write32(mmio_regs::STATUS, status as u32);
    }

    fn device_features(&mut self) -> u32 {
        self.write32(mmio_regs::DEVICE_FEATURES_SEL, 0);
        self.read32(mmio_regs::DEVICE_FEATURES)
    }

    fn set_driver_features(&mut self, features: u32) {
        self.write32(mmio_regs::DRIVER_FEATURES_SEL, 0);
        self.write32(mmio_regs::DRIVER_FEATURES, features);
    }

    fn select_queue(&mut self, queue_index: u16) {
        self.write32(mmio_regs::QUEUE_SEL, queue_index as u32);
    }

    fn queue_max_size(&self) -> u32 {
        self.read32(mmio_regs::QUEUE_NUM_MAX)
    }

    fn set_queue_size(&mut self, size: u16) {
        self.write32(mmio_regs::QUEUE_NUM, size as u32);
    }

    fn is_queue_ready(&self) -> bool {
        self.read32(mmio_regs::QUEUE_READY) != 0
    }

    fn enable_queue(&mut self) {
        self.write32(mmio_regs::QUEUE_READY, 1);
    }

    fn set_queue_desc_addr(&mut self, addr: u64) {
        self.write32(mmio_regs::QUEUE_DESC_LOW, addr as u32);
        self.write32(mmio_regs::QUEUE_DESC_HIGH, (addr >> 32) as u32);
    }

    fn set_queue_avail_addr(&mut self, addr: u64) {
        self.write32(mmio_regs::QUEUE_AVAIL_LOW, addr as u32);
        self.write32(mmio_regs::QUEUE_AVAIL_HIGH, (addr >> 32) as u32);
    }

    fn set_queue_used_addr(&mut self, addr: u64) {
        self.write32(mmio_regs::QUEUE_USED_LOW, addr as u32);
        self.write32(mmio_regs::QUEUE_USED_HIGH, (addr >> 32) as u32);
    }

    fn notify_queue(&mut self, queue_index: u16) {
        self.write32(mmio_regs::QUEUE_NOTIFY, queue_index as u32);
    }

    fn interrupt_status(&self) -> u32 {
        self.read32(mmio_regs::INTERRUPT_STATUS)
    }

    fn ack_interrupt(&mut self, status: u32) {
        self.write32(mmio_regs::INTERRUPT_ACK, status);
    }

    fn read_config_u32(&self, offset: usize) -> u32 {
        self.read32(mmio_regs::CONFIG + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::virtio::defs::ident;

    /// レジスタ窓をメモリ上に再現して MMIO アクセスを確認する
    #[repr(C, align(4096))]
    struct FakeWindow([u32; 0x140 / 4]);

    #[test]
    fn test_mmio_register_layout() {
        let mut window = Box::new(FakeWindow([0; 0x140 / 4]));
        window.0[mmio_regs::MAGIC_VALUE / 4] = ident::MAGIC;
        window.0[mmio_regs::VERSION / 4] = 2;
        window.0[mmio_regs::DEVICE_ID / 4] = ident::DEVICE_ID_BLOCK;
        window.0[mmio_regs::VENDOR_ID / 4] = ident::VENDOR_QEMU;
        window.0[mmio_regs::QUEUE_NUM_MAX / 4] = 16;
        window.0[mmio_regs::CONFIG / 4] = 0x4000;
        window.0[mmio_regs::CONFIG / 4 + 1] = 0x1;

        let base = window.0.as_mut_ptr() as usize;
        let mut t = unsafe { MmioTransport::new(base) };

        assert_eq!(t.magic(), ident::MAGIC);
        assert_eq!(t.version(), 2);
        assert_eq!(t.device_id(), 2);
        assert_eq!(t.vendor_id(), ident::VENDOR_QEMU);
        assert_eq!(t.queue_max_size(), 16);
        assert_eq!(t.read_config_u64(0), 0x1_0000_4000);

        t.set_queue_desc_addr(0x1_2345_6000);
        assert_eq!(window.0[mmio_regs::QUEUE_DESC_LOW / 4], 0x2345_6000);
        assert_eq!(window.0[mmio_regs::QUEUE_DESC_HIGH / 4], 0x1);

        t.set_status(0x7);
        assert_eq!(t.get_status(), 0x7);
        t.reset();
        assert_eq!(t.get_status(), 0);

        t.notify_queue(0);
        t.enable_queue();
        assert!(t.is_queue_ready());
    }
}
