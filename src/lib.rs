#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod block;
pub mod fs;
pub mod hwpart;
pub mod medium;
pub mod parse;
pub mod partition;
pub mod raw;
pub mod staging;

#[cfg(test)]
mod mock;

pub use crate::block::{MmcDevice, MmcHost};
pub use crate::fs::{FsKind, FsOps, FsReport, FsRequest};
pub use crate::hwpart::{PartitionGuard, with_partition};
pub use crate::medium::{DfuMedium, MmcMedium};
pub use crate::partition::{PartitionInfo, PartitionTable};
pub use crate::staging::StagingBuffer;

use alloc::boxed::Box;
use core::fmt;
use core::str::FromStr;

/// Sector size assumed when probing on-disk partition tables.
pub const BLOCK_SIZE: usize = 512;

/// Default capacity of the filesystem staging buffer (8 MiB).
pub const DEFAULT_MAX_FILE_SIZE: usize = 8 * 1024 * 1024;

const EINVAL: i32 = 22;
const ENODEV: i32 = 19;
const EIO: i32 = 5;
const ENOTSUPP: i32 = 524;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DfuError {
    /// Malformed entity descriptor
    InvalidArgument,
    /// No MMC device with the requested number
    DeviceNotFound,
    /// The MMC device could not be initialized
    InitFailure,
    /// Requested partition does not exist on the device
    PartitionNotFound,
    /// On-disk partition table could not be parsed
    InvalidPartitionTable,
    /// Request would exceed the entity's designated area
    OutOfRange,
    /// Failed or short block transfer, or missing file size
    Io,
    /// Staging buffer capacity exceeded; staged data was discarded
    BufferOverflow,
    /// Switching to a hardware partition failed
    Switch { partition: u32 },
    /// Switching back to the saved hardware partition failed.
    ///
    /// `cause` holds the error of the wrapped operation, if it failed too.
    PartitionNotRestored {
        partition: u32,
        cause: Option<Box<DfuError>>,
    },
    /// The entity has no layout this medium can handle
    UnsupportedLayout,
}

impl DfuError {
    /// Negative errno value reported to the DFU core.
    pub fn errno(&self) -> i32 {
        -match self {
            DfuError::InvalidArgument
            | DfuError::DeviceNotFound
            | DfuError::InitFailure
            | DfuError::PartitionNotFound => ENODEV,
            DfuError::OutOfRange | DfuError::BufferOverflow => EINVAL,
            DfuError::InvalidPartitionTable
            | DfuError::Io
            | DfuError::Switch { .. }
            | DfuError::PartitionNotRestored { .. } => EIO,
            DfuError::UnsupportedLayout => ENOTSUPP,
        }
    }

    /// Whether the device may have been left on a foreign hardware partition.
    pub fn partition_unknown(&self) -> bool {
        matches!(self, DfuError::PartitionNotRestored { .. })
    }
}

impl fmt::Display for DfuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DfuError::InvalidArgument => write!(f, "invalid entity descriptor"),
            DfuError::DeviceNotFound => write!(f, "MMC device not found"),
            DfuError::InitFailure => write!(f, "MMC device init failed"),
            DfuError::PartitionNotFound => write!(f, "partition not found"),
            DfuError::InvalidPartitionTable => write!(f, "invalid partition table"),
            DfuError::OutOfRange => write!(f, "request would exceed designated area"),
            DfuError::Io => write!(f, "I/O error"),
            DfuError::BufferOverflow => write!(f, "staging buffer overflow"),
            DfuError::Switch { partition } => {
                write!(f, "cannot switch to hardware partition {}", partition)
            }
            DfuError::PartitionNotRestored { partition, cause } => match cause {
                Some(cause) => write!(
                    f,
                    "{}; hardware partition {} not restored",
                    cause, partition
                ),
                None => write!(f, "hardware partition {} not restored", partition),
            },
            DfuError::UnsupportedLayout => write!(f, "layout not (yet) supported"),
        }
    }
}

/// First token of an entity descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Raw,
    Part,
    Fat,
    Ext4,
}

impl FromStr for EntityKind {
    type Err = DfuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(EntityKind::Raw),
            "part" => Ok(EntityKind::Part),
            "fat" => Ok(EntityKind::Fat),
            "ext4" => Ok(EntityKind::Ext4),
            _ => Err(DfuError::InvalidArgument),
        }
    }
}

/// A bounded range of logical blocks on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawArea {
    pub lba_start: u64,
    pub lba_size: u64,
    pub lba_blk_size: u32,
    /// Hardware partition to switch into around every access
    pub hw_partition: Option<u32>,
}

impl RawArea {
    /// Size of the area in bytes.
    pub fn byte_size(&self) -> u64 {
        self.lba_size * self.lba_blk_size as u64
    }
}

/// A file on a filesystem partition of an MMC device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsTarget {
    pub kind: FsKind,
    pub dev: u32,
    pub part: u32,
}

/// Storage layout of one update entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumConfig {
    RawAddress(RawArea),
    Filesystem(FsTarget),
}

impl MediumConfig {
    pub fn layout(&self) -> Layout {
        match self {
            MediumConfig::RawAddress(_) => Layout::RawAddr,
            MediumConfig::Filesystem(target) => match target.kind {
                FsKind::Fat => Layout::Fat,
                FsKind::Ext4 => Layout::Ext4,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    RawAddr,
    Fat,
    Ext4,
}

impl Layout {
    pub const fn name(&self) -> &'static str {
        match self {
            Layout::RawAddr => "RAW_ADDR",
            Layout::Fat => "FAT",
            Layout::Ext4 => "EXT4",
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-session settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Capacity of the staging buffer used for filesystem entities
    pub max_file_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}
