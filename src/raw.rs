use alloc::vec;
use log::{debug, error};

use crate::{DfuError, MmcDevice, RawArea, hwpart::with_partition};

/// Direction of a raw block transfer.
pub enum Transfer<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl Transfer<'_> {
    fn len(&self) -> usize {
        match self {
            Transfer::Read(buf) => buf.len(),
            Transfer::Write(buf) => buf.len(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Transfer::Read(_) => "MMC READ",
            Transfer::Write(_) => "MMC WRITE",
        }
    }
}

/// Block range covered by one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    pub blk_start: u64,
    pub blk_count: u64,
    /// Request length rounded up to whole blocks, in bytes
    pub len: usize,
}

impl RawArea {
    /// Maps `len` bytes at byte `offset` onto the blocks of this area.
    ///
    /// Fails with [`DfuError::OutOfRange`] if any block would fall outside
    /// `[lba_start, lba_start + lba_size)`.
    pub fn span(&self, offset: u64, len: usize) -> Result<BlockSpan, DfuError> {
        if self.lba_blk_size == 0 {
            return Err(DfuError::InvalidArgument);
        }
        let blk_size = self.lba_blk_size as u64;

        // Transfers always cover whole blocks
        let len = (len as u64)
            .checked_next_multiple_of(blk_size)
            .ok_or(DfuError::OutOfRange)?;
        let blk_start = self
            .lba_start
            .checked_add(offset / blk_size)
            .ok_or(DfuError::OutOfRange)?;
        let blk_count = len / blk_size;

        let end = blk_start.checked_add(blk_count);
        let limit = self.lba_start.checked_add(self.lba_size);
        match (end, limit) {
            (Some(end), Some(limit)) if end <= limit => {}
            _ => {
                error!("Request would exceed designated area!");
                return Err(DfuError::OutOfRange);
            }
        }

        Ok(BlockSpan {
            blk_start,
            blk_count,
            len: usize::try_from(len).map_err(|_| DfuError::OutOfRange)?,
        })
    }
}

/// Transfers the blocks covering `op`'s buffer at byte `offset` of `area`.
///
/// Returns the transferred length, which is the buffer length rounded up to
/// whole blocks. Buffers that do not end on a block boundary go through a
/// zero-padded bounce buffer. A short transfer fails the whole request.
pub fn block_op<D: MmcDevice + ?Sized>(
    dev: &mut D,
    area: &RawArea,
    op: Transfer<'_>,
    offset: u64,
) -> Result<usize, DfuError> {
    let span = area.span(offset, op.len())?;

    debug!(
        "{} start: {} cnt: {} len: {}",
        op.name(),
        span.blk_start,
        span.blk_count,
        span.len
    );

    with_partition(dev, area.hw_partition, |dev| {
        let n = match op {
            Transfer::Read(buf) if buf.len() == span.len => {
                dev.block_read(span.blk_start, span.blk_count, buf)
            }
            Transfer::Read(buf) => {
                let mut bounce = vec![0u8; span.len];
                let n = dev.block_read(span.blk_start, span.blk_count, &mut bounce);
                let copied = buf.len();
                buf.copy_from_slice(&bounce[..copied]);
                n
            }
            Transfer::Write(buf) if buf.len() == span.len => {
                dev.block_write(span.blk_start, span.blk_count, buf)
            }
            Transfer::Write(buf) => {
                let mut bounce = vec![0u8; span.len];
                bounce[..buf.len()].copy_from_slice(buf);
                dev.block_write(span.blk_start, span.blk_count, &bounce)
            }
        };

        if n != span.blk_count {
            error!(
                "MMC operation failed: {} of {} blocks transferred",
                n, span.blk_count
            );
            return Err(DfuError::Io);
        }
        Ok(span.len)
    })
}
