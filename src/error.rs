//! 統一エラーハンドリングモジュール
//!
//! ブロックI/Oスタックで使用されるエラー型を定義し、
//! ファイルシステム向けの結果コード (FatFs DRESULT 互換) への変換を提供します。

use core::fmt;

/// デバイス初期化の失敗
///
/// いずれもデバイスを `Incompatible` 状態に落とす。
/// レジストリはこれを受けてシステムを停止させる。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// 識別レジスタが期待値と一致しない
    IdentityMismatch {
        /// 不一致だったレジスタ
        register: &'static str,
        /// 期待値
        expected: u32,
        /// 実際の値
        found: u32,
    },
    /// FEATURES_OK がデバイスに受理されなかった
    FeaturesRejected,
    /// キュー0が既に有効
    QueueAlreadyLive,
    /// キュー0が存在しない
    QueueUnavailable,
    /// デバイスのキュー最大長がプールより短い
    QueueTooShort {
        /// デバイスが報告した最大長
        max: u32,
        /// 必要な長さ
        needed: u16,
    },
    /// リングメモリの確保に失敗
    OutOfMemory,
    /// ドライブ設定が不正
    InvalidConfig,
    /// 既に初期化済み、または初期化不能
    InvalidState,
}

/// ブロックI/Oリクエストのエラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// デバイスが Ready 状態ではない
    NotReady,
    /// ブロック番号がデバイス容量を超えている
    InvalidBlock,
    /// バッファ長がブロックサイズと一致しない
    InvalidBufferSize,
    /// デバイスからのI/Oエラー
    IoError,
}

/// ファイルシステム向けディスク操作の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    /// 読み書き中のエラー (RES_ERROR)
    Io,
    /// 書き込み保護 (RES_WRPRT)
    WriteProtected,
    /// ドライブ未準備 (RES_NOTRDY)
    NotReady,
    /// 引数エラー (RES_PARERR)
    Parameter,
}

/// Disk operation result type
pub type DiskResult<T = ()> = Result<T, DiskError>;

/// FatFs 結果コード
pub mod codes {
    pub const RES_OK: u8 = 0;
    pub const RES_ERROR: u8 = 1;
    pub const RES_WRPRT: u8 = 2;
    pub const RES_NOTRDY: u8 = 3;
    pub const RES_PARERR: u8 = 4;
}

impl DiskError {
    /// DRESULT 数値コード
    pub const fn code(self) -> u8 {
        match self {
            DiskError::Io => codes::RES_ERROR,
            DiskError::WriteProtected => codes::RES_WRPRT,
            DiskError::NotReady => codes::RES_NOTRDY,
            DiskError::Parameter => codes::RES_PARERR,
        }
    }
}

/// `DiskResult` を DRESULT 数値コードへ変換
pub fn result_code(result: DiskResult) -> u8 {
    match result {
        Ok(()) => codes::RES_OK,
        Err(e) => e.code(),
    }
}

impl From<BlockError> for DiskError {
    fn from(e: BlockError) -> Self {
        match e {
            BlockError::InvalidBufferSize => DiskError::Parameter,
            // セクタ変換層の途中失敗はすべて汎用I/Oエラー
            BlockError::NotReady | BlockError::InvalidBlock | BlockError::IoError => DiskError::Io,
        }
    }
}

bitflags::bitflags! {
    /// ドライブ状態ビット (DSTATUS)
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DiskStatus: u8 {
        /// ドライブ未初期化
        const NOINIT = 0x01;
        /// メディアなし
        const NODISK = 0x02;
        /// 書き込み保護
        const PROTECT = 0x04;
    }
}

// ===== Display implementations =====

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::IdentityMismatch { register, expected, found } => write!(
                f,
                "{} mismatch: expected {:#x}, found {:#x}",
                register, expected, found
            ),
            InitError::FeaturesRejected => write!(f, "FEATURES_OK unset"),
            InitError::QueueAlreadyLive => write!(f, "queue 0 should not be ready"),
            InitError::QueueUnavailable => write!(f, "no queue 0"),
            InitError::QueueTooShort { max, needed } => {
                write!(f, "max queue too short ({} < {})", max, needed)
            }
            InitError::OutOfMemory => write!(f, "ring allocation failed"),
            InitError::InvalidConfig => write!(f, "invalid drive configuration"),
            InitError::InvalidState => write!(f, "device not in an initializable state"),
        }
    }
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockError::NotReady => write!(f, "device not ready"),
            BlockError::InvalidBlock => write!(f, "block beyond device capacity"),
            BlockError::InvalidBufferSize => write!(f, "invalid buffer size"),
            BlockError::IoError => write!(f, "I/O error"),
        }
    }
}

impl fmt::Display for DiskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskError::Io => write!(f, "disk I/O error"),
            DiskError::WriteProtected => write!(f, "write protected"),
            DiskError::NotReady => write!(f, "drive not ready"),
            DiskError::Parameter => write!(f, "invalid parameter"),
        }
    }
}
