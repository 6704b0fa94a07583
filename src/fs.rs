use core::fmt;
use log::{debug, error};

use crate::{DfuError, FsTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsKind {
    Fat,
    Ext4,
}

impl FsKind {
    pub const fn name(&self) -> &'static str {
        match self {
            FsKind::Fat => "fat",
            FsKind::Ext4 => "ext4",
        }
    }
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Addresses one file on a filesystem partition of an MMC device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsRequest<'a> {
    pub kind: FsKind,
    pub dev: u32,
    pub part: u32,
    pub name: &'a str,
}

impl<'a> FsRequest<'a> {
    pub fn new(target: &FsTarget, name: &'a str) -> Self {
        Self {
            kind: target.kind,
            dev: target.dev,
            part: target.part,
            name,
        }
    }
}

/// Outcome of a filesystem load or size query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsReport {
    /// Size of the file in bytes, if the filesystem reported one
    pub filesize: Option<u64>,
}

/// Filesystem primitives the medium delegates file entities to.
pub trait FsOps {
    /// Writes `src` as the whole content of the file.
    fn write(&mut self, req: &FsRequest<'_>, src: &[u8]) -> Result<(), DfuError>;

    /// Loads the whole file into `dst`.
    fn load(&mut self, req: &FsRequest<'_>, dst: &mut [u8]) -> Result<FsReport, DfuError>;

    fn size(&mut self, req: &FsRequest<'_>) -> Result<FsReport, DfuError>;
}

impl<T: FsOps + ?Sized> FsOps for &mut T {
    fn write(&mut self, req: &FsRequest<'_>, src: &[u8]) -> Result<(), DfuError> {
        (**self).write(req, src)
    }

    fn load(&mut self, req: &FsRequest<'_>, dst: &mut [u8]) -> Result<FsReport, DfuError> {
        (**self).load(req, dst)
    }

    fn size(&mut self, req: &FsRequest<'_>) -> Result<FsReport, DfuError> {
        (**self).size(req)
    }
}

/// A single filesystem call.
pub enum FileOp<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
    Size,
}

impl FileOp<'_> {
    fn name(&self) -> &'static str {
        match self {
            FileOp::Read(_) => "load",
            FileOp::Write(_) => "write",
            FileOp::Size => "size",
        }
    }
}

/// Runs `op` against the file addressed by `req` and returns the number of
/// bytes written, loaded or reported.
pub fn file_op<F: FsOps + ?Sized>(
    fs: &mut F,
    req: &FsRequest<'_>,
    op: FileOp<'_>,
) -> Result<usize, DfuError> {
    debug!(
        "{}{} mmc {}:{} {}",
        req.kind,
        op.name(),
        req.dev,
        req.part,
        req.name
    );

    let limit = match &op {
        FileOp::Read(dst) => Some(dst.len()),
        _ => None,
    };

    let report = match op {
        FileOp::Write(src) => {
            return fs.write(req, src).map(|()| src.len()).inspect_err(|e| {
                error!("dfu: Write error on {}: {}", req.name, e);
            });
        }
        FileOp::Read(dst) => fs.load(req, dst),
        FileOp::Size => fs.size(req),
    }
    .inspect_err(|e| error!("dfu: Read error on {}: {}", req.name, e))?;

    let size = report
        .filesize
        .and_then(|size| usize::try_from(size).ok())
        .ok_or_else(|| {
            error!("dfu: Wrong file size!");
            DfuError::Io
        })?;

    match limit {
        Some(limit) if size > limit => {
            error!(
                "dfu: {} reports {} bytes, buffer holds {}",
                req.name, size, limit
            );
            Err(DfuError::Io)
        }
        _ => Ok(size),
    }
}
