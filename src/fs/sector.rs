// ============================================================================
// src/fs/sector.rs - Sector Adapter
// ============================================================================
//!
//! # 512バイトセクタ ⇔ ネイティブブロック変換
//!
//! ファイルシステムは 512バイトセクタ単位で読み書きするが、
//! デバイスの転送単位はそれより大きい（既定 1024バイト）。
//!
//! - 読み込み: 整列した完全ブロックは転送先へ直接読み、
//!   それ以外はスクラッチに読んで必要なセクタだけコピーする。
//! - 書き込み: ブロック全体を覆わない部分は read-modify-write。
//!   完全ブロックはスクラッチに載せて読み込みなしで書く。
//!
//! 最初の失敗で中断する。既に書いたセクタは巻き戻さない。

use super::block::{BlockDevice, BlockError, BlockResult};
use crate::config::SECTOR_SIZE;

/// 処理単位（1ブロック内の連続セクタ）
struct Span {
    block: u64,
    /// ブロック内オフセット（バイト）
    offset: usize,
    /// バイト数
    len: usize,
}

/// `[sector, sector + remaining)` の先頭からブロック境界までを切り出す
fn next_span(sector: u64, remaining: usize, spb: usize) -> Span {
    let block = sector / spb as u64;
    let first = (sector % spb as u64) as usize;
    let count = (spb - first).min(remaining);
    Span { block, offset: first * SECTOR_SIZE, len: count * SECTOR_SIZE }
}

fn check_buffers<D: BlockDevice + ?Sized>(
    dev: &D,
    buf_len: usize,
    count: usize,
    scratch: &[u8],
) -> BlockResult<usize> {
    let block_size = dev.block_size();
    if block_size < SECTOR_SIZE || block_size % SECTOR_SIZE != 0 {
        return Err(BlockError::InvalidBufferSize);
    }
    let needed = count.checked_mul(SECTOR_SIZE).ok_or(BlockError::InvalidBufferSize)?;
    if buf_len < needed || scratch.len() != block_size {
        return Err(BlockError::InvalidBufferSize);
    }
    Ok(block_size / SECTOR_SIZE)
}

/// `count` セクタを `start` から `buf` に読み込む
///
/// `scratch` はネイティブブロック1個分の作業領域。
pub fn read_sectors<D: BlockDevice + ?Sized>(
    dev: &D,
    buf: &mut [u8],
    start: u64,
    count: usize,
    scratch: &mut [u8],
) -> BlockResult<()> {
    let spb = check_buffers(dev, buf.len(), count, scratch)?;
    let block_size = dev.block_size();

    let mut sector = start;
    let mut remaining = count;
    let mut pos = 0;

    while remaining > 0 {
        let span = next_span(sector, remaining, spb);

        if span.len == block_size {
            // 整列した完全ブロック
            dev.read_block(span.block, &mut buf[pos..pos + block_size])?;
        } else {
            dev.read_block(span.block, scratch)?;
            buf[pos..pos + span.len].copy_from_slice(&scratch[span.offset..span.offset + span.len]);
        }

        let done = span.len / SECTOR_SIZE;
        sector += done as u64;
        remaining -= done;
        pos += span.len;
    }
    Ok(())
}

/// `buf` の `count` セクタを `start` から書き込む
///
/// 同じブロックを共有する隣接セクタへの並行した書き込みは
/// RMW 同士で上書きし合う。呼び出し側で直列化すること。
pub fn write_sectors<D: BlockDevice + ?Sized>(
    dev: &D,
    buf: &[u8],
    start: u64,
    count: usize,
    scratch: &mut [u8],
) -> BlockResult<()> {
    let spb = check_buffers(dev, buf.len(), count, scratch)?;
    let block_size = dev.block_size();

    let mut sector = start;
    let mut remaining = count;
    let mut pos = 0;

    while remaining > 0 {
        let span = next_span(sector, remaining, spb);

        if span.len != block_size {
            dev.read_block(span.block, scratch)?;
        }
        scratch[span.offset..span.offset + span.len].copy_from_slice(&buf[pos..pos + span.len]);
        dev.write_block(span.block, scratch)?;

        let done = span.len / SECTOR_SIZE;
        sector += done as u64;
        remaining -= done;
        pos += span.len;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::RamDisk;

    fn pattern(count: usize, seed: u8) -> Vec<u8> {
        (0..count * SECTOR_SIZE)
            .map(|i| seed.wrapping_add((i / SECTOR_SIZE) as u8).wrapping_mul(3) ^ (i as u8))
            .collect()
    }

    #[test]
    fn test_round_trip_1024() {
        let disk = RamDisk::new(32, 1024);
        let mut scratch = vec![0u8; 1024];

        for (seed, (start, count)) in [(0u64, 4usize), (1, 1), (2, 3)].into_iter().enumerate() {
            let data = pattern(count, seed as u8 + 1);
            write_sectors(&disk, &data, start, count, &mut scratch).unwrap();

            let mut back = vec![0u8; count * SECTOR_SIZE];
            read_sectors(&disk, &mut back, start, count, &mut scratch).unwrap();
            assert_eq!(back, data, "sectors [{}, {})", start, start + count as u64);
        }
    }

    #[test]
    fn test_neighbour_isolation() {
        let disk = RamDisk::new(8, 1024);
        let mut scratch = vec![0u8; 1024];

        write_sectors(&disk, &[0xBB; 512], 4, 1, &mut scratch).unwrap();
        write_sectors(&disk, &[0xAA; 512], 5, 1, &mut scratch).unwrap();

        let mut back = vec![0u8; 1024];
        read_sectors(&disk, &mut back, 4, 2, &mut scratch).unwrap();
        assert!(back[..512].iter().all(|&b| b == 0xBB));
        assert!(back[512..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_aligned_write_skips_read() {
        let disk = RamDisk::new(8, 1024);
        let mut scratch = vec![0u8; 1024];

        write_sectors(&disk, &pattern(4, 9), 2, 4, &mut scratch).unwrap();
        assert_eq!(disk.submits(), vec![(1, true), (2, true)]);
    }

    #[test]
    fn test_unaligned_write_is_rmw() {
        let disk = RamDisk::new(8, 1024);
        let mut scratch = vec![0u8; 1024];

        // セクタ 1..4 = ブロック0の後半 + ブロック1 + ブロック2の前半
        write_sectors(&disk, &pattern(4, 3), 1, 4, &mut scratch).unwrap();
        assert_eq!(
            disk.submits(),
            vec![(0, false), (0, true), (1, true), (2, false), (2, true)]
        );
    }

    #[test]
    fn test_larger_block_partial_run() {
        // 2048バイトブロック: 1ブロック = 4セクタ
        let disk = RamDisk::new(8, 2048);
        let mut scratch = vec![0u8; 2048];
        disk.fill(0, 2048 * 8, 0x11);

        let data = pattern(2, 5);
        write_sectors(&disk, &data, 5, 2, &mut scratch).unwrap();

        let mut back = vec![0u8; 4 * SECTOR_SIZE];
        read_sectors(&disk, &mut back, 4, 4, &mut scratch).unwrap();
        assert!(back[..512].iter().all(|&b| b == 0x11));
        assert_eq!(&back[512..1536], &data[..]);
        assert!(back[1536..].iter().all(|&b| b == 0x11));
    }

    #[test]
    fn test_failure_keeps_earlier_sectors() {
        let disk = RamDisk::new(8, 1024).failing_from(2);
        let mut scratch = vec![0u8; 1024];

        let data = vec![0xCC; 6 * SECTOR_SIZE];
        let err = write_sectors(&disk, &data, 0, 6, &mut scratch).unwrap_err();
        assert_eq!(err, BlockError::IoError);

        // ブロック 0,1 は書き込まれたまま
        assert!(disk.bytes(0, 2048).iter().all(|&b| b == 0xCC));
        assert!(disk.bytes(2048, 1024).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_short_buffers_rejected() {
        let disk = RamDisk::new(8, 1024);
        let mut scratch = vec![0u8; 1024];

        let mut short = vec![0u8; 1000];
        assert_eq!(
            read_sectors(&disk, &mut short, 0, 2, &mut scratch),
            Err(BlockError::InvalidBufferSize)
        );

        let mut wrong_scratch = vec![0u8; 512];
        let mut buf = vec![0u8; 1024];
        assert_eq!(
            read_sectors(&disk, &mut buf, 0, 2, &mut wrong_scratch),
            Err(BlockError::InvalidBufferSize)
        );
        assert!(disk.submits().is_empty());
    }

    #[test]
    fn test_zero_count_is_noop() {
        let disk = RamDisk::new(8, 1024);
        let mut scratch = vec![0u8; 1024];
        read_sectors(&disk, &mut [], 3, 0, &mut scratch).unwrap();
        assert!(disk.submits().is_empty());
    }
}
