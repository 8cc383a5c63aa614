// ============================================================================
// src/io/log.rs - Kernel Logging System using the `log` crate
// ============================================================================
//!
//! ブロックI/Oスタック用ロギング。
//!
//! ## 機能
//! - `log`クレートを使用した標準的なログインターフェース
//! - 出力先はコンソール側が実装する `LogSink`
//! - コンパイル時のログレベルフィルタリング
//! - マルチコア安全なSpinlock保護
//!
//! ## 使用方法
//! ```ignore
//! static CONSOLE: Uart = Uart::new();
//! rany_blk::io::log::init(&CONSOLE).ok();
//! log::info!("virtio disk ready");
//! ```

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::{Mutex, Once};

// ============================================================================
// ログレベル定義
// ============================================================================

/// コンパイル時のログレベル（featureで変更可能）
#[cfg(feature = "verbose_logging")]
const MAX_LOG_LEVEL: LevelFilter = LevelFilter::Trace;

#[cfg(not(feature = "verbose_logging"))]
const MAX_LOG_LEVEL: LevelFilter = LevelFilter::Info;

// ============================================================================
// 出力先
// ============================================================================

/// ログの出力先（コンソール）
///
/// 複数コアから呼ばれるが、呼び出しは `KernelLogger` 側で直列化される。
pub trait LogSink: Sync {
    fn write_str(&self, s: &str);
}

// ============================================================================
// ロガー状態管理
// ============================================================================

/// ロガーの初期化状態
static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// 現在のログレベル（実行時変更可能）
static CURRENT_LOG_LEVEL: AtomicU8 = AtomicU8::new(LevelFilter::Info as u8);

/// 出力先
static SINK: Once<&'static dyn LogSink> = Once::new();

/// 出力排他制御用Spinlock
///
/// 1レコードの途中で他コアの出力が混ざらないようにする。
static SINK_LOCK: Mutex<()> = Mutex::new(());

// ============================================================================
// ロガー実装
// ============================================================================

struct KernelLogger;

impl KernelLogger {
    /// ログレベルのプレフィックスを取得
    fn level_prefix(level: Level) -> &'static str {
        match level {
            Level::Error => "[ERROR] ",
            Level::Warn => "[WARN]  ",
            Level::Info => "[INFO]  ",
            Level::Debug => "[DEBUG] ",
            Level::Trace => "[TRACE] ",
        }
    }
}

/// `[LEVEL] [module] message` 形式で1行書き出す
fn write_record(
    w: &mut dyn Write,
    level: Level,
    module: Option<&str>,
    args: fmt::Arguments<'_>,
) -> fmt::Result {
    w.write_str(KernelLogger::level_prefix(level))?;
    if let Some(module) = module {
        write!(w, "[{}] ", module)?;
    }
    w.write_fmt(args)?;
    w.write_str("\n")
}

/// `LogSink` への `fmt::Write` アダプタ（アロケーションなし）
struct SinkWriter(&'static dyn LogSink);

impl Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= current_log_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Some(sink) = SINK.get() else {
            return;
        };

        let _guard = SINK_LOCK.lock();
        let mut writer = SinkWriter(*sink);
        let _ = write_record(&mut writer, record.level(), record.module_path(), *record.args());
    }

    fn flush(&self) {}
}

/// グローバルロガーインスタンス
static LOGGER: KernelLogger = KernelLogger;

// ============================================================================
// 公開API
// ============================================================================

/// ロギングシステムを初期化
///
/// 二度目以降の呼び出しは `SetLoggerError` を返し、出力先は変わらない。
pub fn init(sink: &'static dyn LogSink) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    SINK.call_once(|| sink);
    log::set_max_level(MAX_LOG_LEVEL);
    CURRENT_LOG_LEVEL.store(MAX_LOG_LEVEL as u8, Ordering::SeqCst);
    LOGGER_INITIALIZED.store(true, Ordering::SeqCst);
    Ok(())
}

/// 実行時にログレベルを変更（コンパイル時の上限を超えない）
pub fn set_log_level(level: LevelFilter) {
    let level = level.min(MAX_LOG_LEVEL);
    CURRENT_LOG_LEVEL.store(level as u8, Ordering::SeqCst);
    log::set_max_level(level);
}

/// 現在のログレベルを取得
pub fn current_log_level() -> LevelFilter {
    LevelFilter::iter()
        .nth(CURRENT_LOG_LEVEL.load(Ordering::Relaxed) as usize)
        .unwrap_or(LevelFilter::Info)
}

/// ロガーが初期化済みかどうか
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::String;
    use std::sync::Mutex as StdMutex;

    struct Capture(StdMutex<String>);

    impl LogSink for Capture {
        fn write_str(&self, s: &str) {
            self.0.lock().unwrap().push_str(s);
        }
    }

    static CAPTURE: Capture = Capture(StdMutex::new(String::new()));

    #[test]
    fn test_record_format() {
        let mut out = String::new();
        write_record(&mut out, Level::Warn, Some("rany_blk::fs"), format_args!("drive {}", 3)).unwrap();
        assert_eq!(out, "[WARN]  [rany_blk::fs] drive 3\n");

        let mut out = String::new();
        write_record(&mut out, Level::Error, None, format_args!("halt")).unwrap();
        assert_eq!(out, "[ERROR] halt\n");
    }

    #[test]
    fn test_init_and_level() {
        // プロセス内で init を呼ぶのはこのテストのみ
        init(&CAPTURE).unwrap();
        assert!(is_initialized());
        assert!(init(&CAPTURE).is_err());

        log::logger().log(
            &Record::builder()
                .level(Level::Info)
                .module_path(Some("capture"))
                .args(format_args!("ready"))
                .build(),
        );
        assert!(CAPTURE.0.lock().unwrap().contains("[INFO]  [capture] ready\n"));

        set_log_level(LevelFilter::Error);
        assert_eq!(current_log_level(), LevelFilter::Error);
        assert!(!LOGGER.enabled(&Metadata::builder().level(Level::Warn).build()));

        set_log_level(MAX_LOG_LEVEL);
    }
}
