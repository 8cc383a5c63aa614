// ============================================================================
// src/fs/registry.rs - Disk I/O Interface for FAT Filesystems
// ============================================================================
//!
//! # ドライブレジストリ
//!
//! ファイルシステムライブラリ（FatFs 形式の `disk_*` 契約）向けの入口。
//! ドライブ番号 (`u8`) ごとに virtio-blk デバイスとスクラッチブロックを保持する。
//!
//! 各ドライブのスクラッチはスリープロックで保護され、読み書きは
//! 呼び出しの間ずっとそれを保持する。

use alloc::vec;
use alloc::vec::Vec;

use hashbrown::HashMap;
use log::{error, warn};

use super::sector::{read_sectors, write_sectors};
use crate::config::{DriveConfig, SECTOR_SIZE};
use crate::error::{DiskError, DiskResult, DiskStatus};
use crate::io::virtio::blk::{DriverState, VirtioBlk};
use crate::io::virtio::transport::VirtioTransport;
use crate::sync::{Scheduler, SleepLock};

/// ioctl コマンド
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum IoctlCommand {
    /// 書き込みの完了を待つ（常に完了済み）
    CtrlSync = 0,
    /// セクタ数 (DWORD)
    GetSectorCount = 1,
    /// セクタサイズ (WORD)
    GetSectorSize = 2,
    /// 消去ブロックサイズ (DWORD, セクタ単位)
    GetBlockSize = 3,
}

impl TryFrom<u8> for IoctlCommand {
    type Error = DiskError;

    fn try_from(cmd: u8) -> Result<Self, Self::Error> {
        match cmd {
            0 => Ok(IoctlCommand::CtrlSync),
            1 => Ok(IoctlCommand::GetSectorCount),
            2 => Ok(IoctlCommand::GetSectorSize),
            3 => Ok(IoctlCommand::GetBlockSize),
            _ => Err(DiskError::Parameter),
        }
    }
}

/// 登録済みドライブ
struct Drive<T: VirtioTransport> {
    dev: VirtioBlk<T>,
    /// ネイティブブロック1個分の作業領域
    scratch: SleepLock<Vec<u8>>,
}

/// ドライブ番号 → デバイス
pub struct DeviceRegistry<T: VirtioTransport> {
    drives: HashMap<u8, Drive<T>>,
    sched: &'static dyn Scheduler,
}

impl<T: VirtioTransport> DeviceRegistry<T> {
    pub fn new(sched: &'static dyn Scheduler) -> Self {
        Self { drives: HashMap::new(), sched }
    }

    /// ドライブを登録（既存の番号は置き換える）
    pub fn register(&mut self, id: u8, transport: T, config: DriveConfig) {
        let dev = VirtioBlk::new(transport, self.sched, config);
        let scratch = SleepLock::new("disk scratch", vec![0u8; config.block_size], self.sched);
        self.drives.insert(id, Drive { dev, scratch });
    }

    /// 登録済みドライブ数
    pub fn len(&self) -> usize {
        self.drives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drives.is_empty()
    }

    /// ドライブのデバイスを参照
    pub fn device(&self, id: u8) -> Option<&VirtioBlk<T>> {
        self.drives.get(&id).map(|d| &d.dev)
    }

    fn ready_drive(&self, id: u8) -> DiskResult<&Drive<T>> {
        let drive = self.drives.get(&id).ok_or(DiskError::Parameter)?;
        if drive.dev.state() != DriverState::Ready {
            return Err(DiskError::NotReady);
        }
        Ok(drive)
    }

    /// ドライブ状態 (disk_status)
    ///
    /// 読み取り専用ビルド、またはデバイスが RO を提示したドライブは PROTECT を含む。
    pub fn status(&self, id: u8) -> DiskStatus {
        match self.drives.get(&id) {
            Some(drive) if drive.dev.state() == DriverState::Ready => {
                ready_status(cfg!(feature = "read_only") || drive.dev.is_read_only())
            }
            Some(_) => DiskStatus::NOINIT,
            None => DiskStatus::NOINIT | DiskStatus::NODISK,
        }
    }

    /// ドライブを初期化 (disk_initialize)
    ///
    /// # Panics
    /// ハンドシェイクに失敗した場合（デバイスが使えないまま続行しない）
    pub fn initialize(&self, id: u8) -> DiskStatus {
        let Some(drive) = self.drives.get(&id) else {
            return DiskStatus::NOINIT | DiskStatus::NODISK;
        };
        if drive.dev.state() == DriverState::Ready {
            return DiskStatus::empty();
        }
        if let Err(e) = drive.dev.init() {
            error!("disk {}: virtio disk initialization failed: {}", id, e);
            panic!("virtio disk {}: {}", id, e);
        }
        self.status(id)
    }

    /// `count` セクタを読み込む (disk_read)
    pub fn read(&self, id: u8, buf: &mut [u8], sector: u64, count: usize) -> DiskResult {
        let drive = self.ready_drive(id)?;
        if buf.len() < count.saturating_mul(SECTOR_SIZE) {
            return Err(DiskError::Parameter);
        }
        let mut scratch = drive.scratch.lock();
        read_sectors(&drive.dev, buf, sector, count, &mut scratch).map_err(DiskError::from)
    }

    /// `count` セクタを書き込む (disk_write)
    #[cfg(not(feature = "read_only"))]
    pub fn write(&self, id: u8, buf: &[u8], sector: u64, count: usize) -> DiskResult {
        let drive = self.ready_drive(id)?;
        if drive.dev.is_read_only() {
            return Err(DiskError::WriteProtected);
        }
        if buf.len() < count.saturating_mul(SECTOR_SIZE) {
            return Err(DiskError::Parameter);
        }
        let mut scratch = drive.scratch.lock();
        write_sectors(&drive.dev, buf, sector, count, &mut scratch).map_err(DiskError::from)
    }

    /// 型付き ioctl
    pub fn control(&self, id: u8, cmd: IoctlCommand) -> DiskResult<u32> {
        let drive = self.drives.get(&id).ok_or(DiskError::Parameter)?;
        match cmd {
            IoctlCommand::CtrlSync => Ok(0),
            IoctlCommand::GetSectorCount => Ok(drive.dev.config().sector_count),
            IoctlCommand::GetSectorSize => Ok(SECTOR_SIZE as u32),
            IoctlCommand::GetBlockSize => Ok(1),
        }
    }

    /// ioctl (disk_ioctl)
    ///
    /// 結果は `buff` にリトルエンディアンで書く（WORD または DWORD）。
    pub fn ioctl(&self, id: u8, cmd: u8, buff: &mut [u8]) -> DiskResult {
        let cmd = IoctlCommand::try_from(cmd)?;
        let value = self.control(id, cmd)?;

        let width = match cmd {
            IoctlCommand::CtrlSync => 0,
            IoctlCommand::GetSectorSize => 2,
            IoctlCommand::GetSectorCount | IoctlCommand::GetBlockSize => 4,
        };
        let out = buff.get_mut(..width).ok_or(DiskError::Parameter)?;
        out.copy_from_slice(&value.to_le_bytes()[..width]);
        Ok(())
    }

    /// 割り込みディスパッチャからの入口
    pub fn on_completion_interrupt(&self, id: u8) {
        match self.drives.get(&id) {
            Some(drive) => drive.dev.on_completion_interrupt(),
            None => warn!("disk interrupt for unknown drive {}", id),
        }
    }
}

/// 初期化済みドライブの状態ビット
const fn ready_status(write_protected: bool) -> DiskStatus {
    if write_protected { DiskStatus::PROTECT } else { DiskStatus::empty() }
}

/// FAT タイムスタンプ（固定: 2024-03-01 12:00:00）
///
/// bit31:25 年-1980, bit24:21 月, bit20:16 日, bit15:11 時, bit10:5 分, bit4:0 秒/2
pub const fn fattime() -> u32 {
    ((2024 - 1980) << 25) | (3 << 21) | (1 << 16) | (12 << 11)
}
