// ============================================================================
// src/io/virtio/blk.rs - VirtIO Block Device Driver
// ============================================================================
//!
//! # VirtIO-blk ドライバ
//!
//! 1リクエスト = 3ディスクリプタ（ヘッダ / データ / ステータス）。
//! 送信側はディスクリプタが空くまで、そして完了割り込みが
//! pending を下ろすまでスケジューラ上で眠る。
//!
//! ## 状態遷移
//! `Uninitialized → Negotiating → Ready`、失敗時は `Incompatible`（終端）。
//!
//! ## ロック
//! リング・空きビットマップ・in-flight 表・Usedカーソルは
//! デバイスごとの `IrqMutex` 一つで保護する。完了割り込みも同じロックを取るため、
//! 保持中はそのコアの割り込みを禁止しておく。
//! 眠る際は `sleep_on` がこのロックを手放し、割り込みも再び許可される。

use alloc::vec::Vec;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering, fence};

use log::{debug, error, info, warn};

use super::defs::{
    BlkFeatures, DescFlags, DeviceStatus, INTERRUPT_MASK, VirtioBlkReqHeader, VirtioBlkReqType,
    VringDesc, blk_status, ident,
};
use super::queue::VirtQueue;
use super::transport::VirtioTransport;
use crate::config::DriveConfig;
use crate::error::{BlockError, InitError};
use crate::fs::block::{BlockDevice, BlockRequest, BlockResult};
use crate::io::dma::DmaRegion;
use crate::sync::irq_mutex;
use crate::sync::{IrqMutex, Scheduler, WaitChannel, next_channel_key, sleep_on};

/// ディスクリプタ3個で1リクエスト
const DESCS_PER_REQUEST: usize = 3;

/// ドライバ状態
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    /// 未初期化
    Uninitialized,
    /// ハンドシェイク中
    Negotiating,
    /// リクエスト受付可能
    Ready,
    /// 初期化に失敗した（以後は何も受け付けない）
    Incompatible,
}

/// 送信済みリクエストの記録
struct InFlight {
    /// 呼び出し元の pending フラグ
    pending: NonNull<AtomicBool>,
    /// 完了チャネルの識別子
    ticket: u64,
}

// SAFETY: pending の指す先は、送信元が完了を待って眠っている間だけ有効で、
// アクセスはデバイスロック下でのみ行われる
unsafe impl Send for InFlight {}

/// キュー0と、先頭ディスクリプタごとのヘッダ・ステータス領域
struct Rings {
    queue: VirtQueue,
    /// `VirtioBlkReqHeader` × N
    headers: DmaRegion,
    /// ステータスバイト × N
    status: DmaRegion,
    /// 先頭ディスクリプタ → 送信元
    in_flight: Vec<Option<InFlight>>,
}

impl Rings {
    fn new(size: u16) -> Result<Self, InitError> {
        let n = size as usize;
        let headers = DmaRegion::zeroed(n * core::mem::size_of::<VirtioBlkReqHeader>())
            .ok_or(InitError::OutOfMemory)?;
        let status = DmaRegion::zeroed(n).ok_or(InitError::OutOfMemory)?;

        let mut in_flight = Vec::new();
        in_flight.resize_with(n, || None);

        Ok(Self { queue: VirtQueue::new(size)?, headers, status, in_flight })
    }

    fn header_phys(&self, head: u16) -> u64 {
        self.headers.phys_at(head as usize * core::mem::size_of::<VirtioBlkReqHeader>())
    }

    fn write_header(&mut self, head: u16, header: VirtioBlkReqHeader) {
        unsafe {
            ptr::write_volatile(self.headers.as_ptr::<VirtioBlkReqHeader>().add(head as usize), header)
        }
    }

    fn status_phys(&self, head: u16) -> u64 {
        self.status.phys_at(head as usize)
    }

    fn status_byte(&self, head: u16) -> u8 {
        unsafe { ptr::read_volatile(self.status.as_ptr::<u8>().add(head as usize)) }
    }

    fn set_status_byte(&mut self, head: u16, value: u8) {
        unsafe { ptr::write_volatile(self.status.as_ptr::<u8>().add(head as usize), value) }
    }
}

/// デバイスごとの可変状態（スピンロックで保護）
struct DeviceContext<T> {
    transport: T,
    state: DriverState,
    rings: Option<Rings>,
    features: BlkFeatures,
    /// デバイスが読み取り専用メディアを報告したか (VIRTIO_BLK_F_RO)
    read_only: bool,
    /// 容量（512バイトセクタ数）
    capacity: u64,
    next_ticket: u64,
}

/// ハンドシェイクの結果
struct Handshake {
    rings: Rings,
    features: BlkFeatures,
    read_only: bool,
    capacity: u64,
}

/// I/O statistics
#[derive(Default)]
struct IoStats {
    reads: AtomicU64,
    writes: AtomicU64,
    completions: AtomicU64,
}

/// I/O statistics snapshot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoStatsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub completions: u64,
}

/// VirtIO block device
pub struct VirtioBlk<T: VirtioTransport> {
    inner: IrqMutex<DeviceContext<T>>,
    sched: &'static dyn Scheduler,
    /// 待機チャネルのデバイスキー
    key: u64,
    config: DriveConfig,
    stats: IoStats,
}

impl<T: VirtioTransport> VirtioBlk<T> {
    /// 未初期化のデバイスを作成
    pub fn new(transport: T, sched: &'static dyn Scheduler, config: DriveConfig) -> Self {
        Self {
            inner: IrqMutex::new(DeviceContext {
                transport,
                state: DriverState::Uninitialized,
                rings: None,
                features: BlkFeatures::empty(),
                read_only: false,
                capacity: 0,
                next_ticket: 0,
            }),
            sched,
            key: next_channel_key(),
            config,
            stats: IoStats::default(),
        }
    }

    /// Initialize the device
    ///
    /// 失敗した場合デバイスは `Incompatible` に落ち、以後の初期化も送信も拒否される。
    pub fn init(&self) -> Result<(), InitError> {
        let mut ctx = self.inner.lock();
        if ctx.state != DriverState::Uninitialized {
            return Err(InitError::InvalidState);
        }
        if !self.config.is_valid() {
            ctx.state = DriverState::Incompatible;
            return Err(InitError::InvalidConfig);
        }
        ctx.state = DriverState::Negotiating;
        if !irq_mutex::is_installed() {
            warn!("virtio-blk: no interrupt control installed, completions must not arrive on a submitting core");
        }

        match Self::handshake(&mut ctx.transport, self.config.queue_size) {
            Ok(ready) => {
                let Handshake { rings, features, read_only, capacity } = ready;
                ctx.rings = Some(rings);
                ctx.features = features;
                ctx.read_only = read_only;
                ctx.capacity = capacity;
                ctx.state = DriverState::Ready;
                info!(
                    "virtio-blk: ready, {} sectors, queue {}, features {:#x}",
                    capacity,
                    self.config.queue_size,
                    features.bits()
                );
                Ok(())
            }
            Err(e) => {
                ctx.state = DriverState::Incompatible;
                error!("virtio-blk: initialization failed: {}", e);
                Err(e)
            }
        }
    }

    /// ハンドシェイク本体
    fn handshake(t: &mut T, queue_size: u16) -> Result<Handshake, InitError> {
        Self::check_identity("magic", ident::MAGIC, t.magic())?;
        Self::check_identity("version", ident::VERSION, t.version())?;
        Self::check_identity("device id", ident::DEVICE_ID_BLOCK, t.device_id())?;
        Self::check_identity("vendor id", ident::VENDOR_QEMU, t.vendor_id())?;

        let mut status = DeviceStatus::empty();
        t.reset();

        status |= DeviceStatus::ACKNOWLEDGE;
        t.set_status(status.bits());
        status |= DeviceStatus::DRIVER;
        t.set_status(status.bits());

        // Negotiate features
        let offered = t.device_features();
        let read_only = BlkFeatures::from_bits_retain(offered).contains(BlkFeatures::RO);
        let features = BlkFeatures::negotiate(offered);
        t.set_driver_features(features.bits());

        status |= DeviceStatus::FEATURES_OK;
        t.set_status(status.bits());
        if !DeviceStatus::from_bits_retain(t.get_status()).contains(DeviceStatus::FEATURES_OK) {
            t.set_status((status | DeviceStatus::FAILED).bits());
            return Err(InitError::FeaturesRejected);
        }

        // Setup queue 0
        t.select_queue(0);
        if t.is_queue_ready() {
            return Err(InitError::QueueAlreadyLive);
        }
        let max = t.queue_max_size();
        if max == 0 {
            return Err(InitError::QueueUnavailable);
        }
        if max < queue_size as u32 {
            return Err(InitError::QueueTooShort { max, needed: queue_size });
        }

        let rings = Rings::new(queue_size)?;

        t.set_queue_size(queue_size);
        t.set_queue_desc_addr(rings.queue.pool.phys_addr());
        t.set_queue_avail_addr(rings.queue.avail.phys_addr());
        t.set_queue_used_addr(rings.queue.used.phys_addr());
        t.enable_queue();

        status |= DeviceStatus::DRIVER_OK;
        t.set_status(status.bits());

        let capacity = t.read_config_u64(0);
        Ok(Handshake { rings, features, read_only, capacity })
    }

    fn check_identity(register: &'static str, expected: u32, found: u32) -> Result<(), InitError> {
        if expected != found {
            return Err(InitError::IdentityMismatch { register, expected, found });
        }
        Ok(())
    }

    /// 現在の状態
    pub fn state(&self) -> DriverState {
        self.inner.lock().state
    }

    /// 容量（512バイトセクタ数）
    pub fn capacity(&self) -> u64 {
        self.inner.lock().capacity
    }

    /// ネゴシエーションで受け入れたフィーチャー
    pub fn features(&self) -> BlkFeatures {
        self.inner.lock().features
    }

    /// メディアが書き込み禁止か
    ///
    /// RO はネゴシエーションで受け入れないが、提示された事実は保持する。
    pub fn is_read_only(&self) -> bool {
        self.inner.lock().read_only
    }

    /// 空きディスクリプタ数（未初期化なら 0）
    pub fn free_descriptors(&self) -> usize {
        self.inner
            .lock()
            .rings
            .as_ref()
            .map_or(0, |r| r.queue.pool.num_free())
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    pub fn stats(&self) -> IoStatsSnapshot {
        IoStatsSnapshot {
            reads: self.stats.reads.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            completions: self.stats.completions.load(Ordering::Relaxed),
        }
    }

    /// 1ブロックを送信し、完了まで眠る
    pub fn submit(&self, request: &BlockRequest<'_>, write: bool) -> BlockResult<()> {
        let block_size = self.config.block_size;
        if request.len() != block_size {
            return Err(BlockError::InvalidBufferSize);
        }

        let spb = self.config.sectors_per_block() as u64;
        let sector = request.block().checked_mul(spb).ok_or(BlockError::InvalidBlock)?;

        let mut ctx = self.inner.lock();
        if ctx.state != DriverState::Ready || ctx.rings.is_none() {
            return Err(BlockError::NotReady);
        }
        if sector.saturating_add(spb) > ctx.capacity {
            return Err(BlockError::InvalidBlock);
        }

        // 空きが3個に満たない間は眠る
        let free_chan = WaitChannel::FreeDescriptor { device: self.key };
        let idx = loop {
            let pool = &mut ctx.rings.as_mut().ok_or(BlockError::NotReady)?.queue.pool;
            if pool.num_free() >= DESCS_PER_REQUEST {
                if let Some(idx) = pool.alloc_chain::<DESCS_PER_REQUEST>() {
                    break idx;
                }
            }
            ctx = sleep_on(self.sched, free_chan, &self.inner, ctx);
        };

        let ticket = ctx.next_ticket;
        ctx.next_ticket = ctx.next_ticket.wrapping_add(1);

        let DeviceContext { transport, rings, .. } = &mut *ctx;
        let rings = rings.as_mut().ok_or(BlockError::NotReady)?;
        let head = idx[0];

        let req_type = if write { VirtioBlkReqType::Out } else { VirtioBlkReqType::In };
        rings.write_header(head, VirtioBlkReqHeader { req_type: req_type as u32, reserved: 0, sector });
        rings.set_status_byte(head, blk_status::PENDING);

        let header_addr = rings.header_phys(head);
        let status_addr = rings.status_phys(head);
        let pool = &mut rings.queue.pool;
        pool.set(idx[0], VringDesc {
            addr: header_addr,
            len: core::mem::size_of::<VirtioBlkReqHeader>() as u32,
            flags: DescFlags::NEXT,
            next: idx[1],
        });
        // 読み込みならデバイスがデータバッファに書く
        let data_flags = if write { DescFlags::NEXT } else { DescFlags::NEXT | DescFlags::WRITE };
        pool.set(idx[1], VringDesc {
            addr: request.data_ptr() as u64,
            len: block_size as u32,
            flags: data_flags,
            next: idx[2],
        });
        pool.set(idx[2], VringDesc { addr: status_addr, len: 1, flags: DescFlags::WRITE, next: 0 });

        request.pending_flag().store(true, Ordering::Release);
        rings.in_flight[head as usize] = Some(InFlight {
            pending: NonNull::from(request.pending_flag()),
            ticket,
        });

        rings.queue.avail.push(head);
        transport.notify_queue(0);

        debug!(
            "virtio-blk: {} block {} (sector {}) head {}",
            if write { "write" } else { "read" },
            request.block(),
            sector,
            head
        );

        let done_chan = WaitChannel::Completion { device: self.key, ticket };
        while request.is_pending() {
            ctx = sleep_on(self.sched, done_chan, &self.inner, ctx);
        }
        drop(ctx);

        let counter = if write { &self.stats.writes } else { &self.stats.reads };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// 完了割り込みハンドラ
    ///
    /// 任意のコアから呼ばれる。Usedリングの未処理エントリをすべて回収し、
    /// 各送信元を起床させ、ディスクリプタを返却する。
    ///
    /// # Panics
    /// ステータスが OK 以外、または in-flight 表にない先頭が報告された場合
    pub fn on_completion_interrupt(&self) {
        let mut ctx = self.inner.lock();
        let DeviceContext { transport, rings, .. } = &mut *ctx;
        let Some(rings) = rings.as_mut() else {
            warn!("virtio-blk: interrupt before initialization");
            return;
        };

        let pending_bits = transport.interrupt_status();
        transport.ack_interrupt(pending_bits & INTERRUPT_MASK);
        fence(Ordering::SeqCst);

        while let Some(elem) = rings.queue.used.pop() {
            let head = elem.id as u16;
            let entry = match rings.in_flight.get_mut(elem.id as usize).and_then(Option::take) {
                Some(entry) => entry,
                None => {
                    error!("virtio-blk: completion for unknown head {}", elem.id);
                    panic!("virtio_disk_intr: no request for head {}", elem.id);
                }
            };

            let status = rings.status_byte(head);
            if status != blk_status::OK {
                error!("virtio-blk: request at head {} failed with status {}", head, status);
                panic!("virtio_disk_intr status {}", status);
            }

            // SAFETY: 送信元は pending が下りるまでこのロックを待って眠っている
            unsafe { entry.pending.as_ref() }.store(false, Ordering::Release);
            self.sched.wakeup(WaitChannel::Completion { device: self.key, ticket: entry.ticket });

            rings.queue.pool.free_chain(head);
            self.sched.wakeup(WaitChannel::FreeDescriptor { device: self.key });

            self.stats.completions.fetch_add(1, Ordering::Relaxed);
            debug!("virtio-blk: completed head {}", head);
        }
    }
}

impl<T: VirtioTransport> BlockDevice for VirtioBlk<T> {
    fn block_size(&self) -> usize {
        self.config.block_size
    }

    fn submit(&self, request: &BlockRequest<'_>, write: bool) -> BlockResult<()> {
        VirtioBlk::submit(self, request, write)
    }
}

// ============================================================================
// Tests
// ============================================================================
