// ============================================================================
// src/io/virtio/defs.rs - VirtIO Common Definitions
// ============================================================================
//!
//! VirtIO共通定数・構造体定義
//!
//! virtio-mmio レジスタ、ステータスビット、フィーチャービット、
//! split virtqueue のメモリレイアウト、ブロックリクエスト形式。

/// virtio-mmio レジスタオフセット
pub mod mmio_regs {
    pub const MAGIC_VALUE: usize = 0x000;
    pub const VERSION: usize = 0x004;
    pub const DEVICE_ID: usize = 0x008;
    pub const VENDOR_ID: usize = 0x00C;
    pub const DEVICE_FEATURES: usize = 0x010;
    pub const DEVICE_FEATURES_SEL: usize = 0x014;
    pub const DRIVER_FEATURES: usize = 0x020;
    pub const DRIVER_FEATURES_SEL: usize = 0x024;
    pub const QUEUE_SEL: usize = 0x030;
    pub const QUEUE_NUM_MAX: usize = 0x034;
    pub const QUEUE_NUM: usize = 0x038;
    pub const QUEUE_READY: usize = 0x044;
    pub const QUEUE_NOTIFY: usize = 0x050;
    pub const INTERRUPT_STATUS: usize = 0x060;
    pub const INTERRUPT_ACK: usize = 0x064;
    pub const STATUS: usize = 0x070;
    pub const QUEUE_DESC_LOW: usize = 0x080;
    pub const QUEUE_DESC_HIGH: usize = 0x084;
    pub const QUEUE_AVAIL_LOW: usize = 0x090;
    pub const QUEUE_AVAIL_HIGH: usize = 0x094;
    pub const QUEUE_USED_LOW: usize = 0x0A0;
    pub const QUEUE_USED_HIGH: usize = 0x0A4;
    pub const CONFIG: usize = 0x100;
}

/// 識別レジスタの期待値
pub mod ident {
    /// "virt"
    pub const MAGIC: u32 = 0x7472_6976;
    pub const VERSION: u32 = 2;
    /// ブロックデバイス
    pub const DEVICE_ID_BLOCK: u32 = 2;
    /// "QEMU"
    pub const VENDOR_QEMU: u32 = 0x554D_4551;
}

bitflags::bitflags! {
    /// デバイスステータスビット
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DeviceStatus: u8 {
        /// ドライバがデバイスを認識した
        const ACKNOWLEDGE = 1;
        /// ドライバがデバイスを駆動できる
        const DRIVER = 2;
        /// ドライバの設定が完了し、駆動準備が整った
        const DRIVER_OK = 4;
        /// ドライバがフィーチャーネゴシエーションを完了した
        const FEATURES_OK = 8;
        /// デバイスが回復不能なエラーを経験した
        const DEVICE_NEEDS_RESET = 64;
        /// ドライバがデバイスを放棄した
        const FAILED = 128;
    }
}

bitflags::bitflags! {
    /// ブロックデバイスのフィーチャービット（下位32ビット）
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BlkFeatures: u32 {
        const SIZE_MAX = 1 << 1;
        const SEG_MAX = 1 << 2;
        const GEOMETRY = 1 << 4;
        /// 読み取り専用デバイス
        const RO = 1 << 5;
        const BLK_SIZE = 1 << 6;
        /// SCSI パススルー
        const SCSI = 1 << 7;
        const FLUSH = 1 << 9;
        const TOPOLOGY = 1 << 10;
        /// ライトバックキャッシュ設定
        const CONFIG_WCE = 1 << 11;
        /// マルチキュー
        const MQ = 1 << 12;
        const ANY_LAYOUT = 1 << 27;
        /// 間接ディスクリプタ
        const RING_INDIRECT_DESC = 1 << 28;
        const RING_EVENT_IDX = 1 << 29;

        const _ = !0;
    }
}

impl BlkFeatures {
    /// このドライバが受け入れないフィーチャー
    ///
    /// これらを拒否することで 3ディスクリプタ固定のレガシー形式が維持される。
    pub const UNSUPPORTED: Self = Self::RO
        .union(Self::SCSI)
        .union(Self::CONFIG_WCE)
        .union(Self::MQ)
        .union(Self::ANY_LAYOUT)
        .union(Self::RING_EVENT_IDX)
        .union(Self::RING_INDIRECT_DESC);

    /// デバイスが提示したフィーチャーから受け入れる集合を計算
    pub fn negotiate(offered: u32) -> Self {
        Self::from_bits_retain(offered).difference(Self::UNSUPPORTED)
    }
}

bitflags::bitflags! {
    /// Virtqueueディスクリプタフラグ
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    #[repr(transparent)]
    pub struct DescFlags: u16 {
        /// チェーン内に次のディスクリプタがある
        const NEXT = 1;
        /// このバッファはデバイスが書き込む
        const WRITE = 2;
        /// 間接ディスクリプタテーブルを指す
        const INDIRECT = 4;
    }
}

/// Virtqueueディスクリプタ
///
/// 各ディスクリプタはバッファの物理アドレス、長さ、フラグ、
/// およびチェーン内の次のディスクリプタへのインデックスを保持する。
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VringDesc {
    /// ゲスト物理アドレス
    pub addr: u64,
    /// バッファ長（バイト）
    pub len: u32,
    /// フラグ (NEXT, WRITE)
    pub flags: DescFlags,
    /// 次のディスクリプタインデックス（NEXT が設定されている場合有効）
    pub next: u16,
}

impl VringDesc {
    pub const fn empty() -> Self {
        Self { addr: 0, len: 0, flags: DescFlags::empty(), next: 0 }
    }

    pub fn has_next(&self) -> bool {
        self.flags.contains(DescFlags::NEXT)
    }
}

/// Availリングのヘッダ部オフセット: flags(u16), idx(u16), ring[u16; N]
pub mod avail_layout {
    pub const FLAGS: usize = 0;
    pub const IDX: usize = 2;
    pub const RING: usize = 4;
}

/// Usedリングのヘッダ部オフセット: flags(u16), idx(u16), ring[VringUsedElem; N]
pub mod used_layout {
    pub const FLAGS: usize = 0;
    pub const IDX: usize = 2;
    pub const RING: usize = 4;
}

/// Used element
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct VringUsedElem {
    /// 完了したチェーンの先頭ディスクリプタ
    pub id: u32,
    /// デバイスが書き込んだバイト数
    pub len: u32,
}

/// VirtIO block request types
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VirtioBlkReqType {
    /// Read from device
    In = 0,
    /// Write to device
    Out = 1,
}

/// VirtIO block request header (16 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VirtioBlkReqHeader {
    /// Request type (IN / OUT)
    pub req_type: u32,
    /// Reserved
    pub reserved: u32,
    /// Sector number (512-byte sectors)
    pub sector: u64,
}

/// VirtIO block status codes
pub mod blk_status {
    pub const OK: u8 = 0;
    pub const IOERR: u8 = 1;
    pub const UNSUPP: u8 = 2;
    /// 送信時の初期値。デバイスが成功時に 0 を書き込む。
    pub const PENDING: u8 = 0xff;
}

/// 割り込みステータスのうちACK対象のビット（used buffer / config change）
pub const INTERRUPT_MASK: u32 = 0x3;
