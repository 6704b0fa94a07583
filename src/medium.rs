use alloc::string::String;
use log::{error, info};

use crate::fs::{FileOp, file_op};
use crate::raw::{Transfer, block_op};
use crate::{
    DfuError, FsOps, FsRequest, Layout, MediumConfig, MmcHost, SessionConfig, StagingBuffer,
};

/// Entry points the DFU core drives an entity's storage through.
pub trait DfuMedium {
    /// Writes `buf` at byte `offset` and returns the number of bytes consumed.
    fn write_medium(&mut self, offset: u64, buf: &[u8]) -> Result<usize, DfuError>;

    /// Reads into `buf` from byte `offset` and returns the number of bytes read.
    fn read_medium(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, DfuError>;

    /// Commits pending data.
    fn flush_medium(&mut self) -> Result<(), DfuError>;

    fn medium_size(&mut self) -> Result<u64, DfuError>;
}

/// One update entity stored on an MMC device.
///
/// Raw entities go straight to the device's blocks. Filesystem entities are
/// staged in memory by `write` and handed to the filesystem as a whole file
/// by `flush`.
pub struct MmcMedium<H: MmcHost, F: FsOps> {
    host: H,
    fs: F,
    dev_num: u32,
    name: String,
    config: Option<MediumConfig>,
    staging: StagingBuffer,
}

impl<H: MmcHost, F: FsOps> MmcMedium<H, F> {
    /// Creates an entity with no layout yet; see [`MmcMedium::configure`].
    pub fn new(host: H, fs: F, dev_num: u32, name: &str, session: SessionConfig) -> Self {
        Self {
            host,
            fs,
            dev_num,
            name: String::from(name),
            config: None,
            staging: StagingBuffer::new(session.max_file_size),
        }
    }

    /// Creates an entity and configures it from `descriptor`.
    pub fn from_descriptor(
        host: H,
        fs: F,
        dev_num: u32,
        name: &str,
        descriptor: &str,
        session: SessionConfig,
    ) -> Result<Self, DfuError> {
        let mut medium = Self::new(host, fs, dev_num, name, session);
        medium.configure(descriptor)?;
        Ok(medium)
    }

    /// Parses `descriptor` and makes it the layout of this entity.
    ///
    /// Anything still staged for a previous layout is dropped.
    pub fn configure(&mut self, descriptor: &str) -> Result<&MediumConfig, DfuError> {
        let config = MediumConfig::from_descriptor(&mut self.host, self.dev_num, descriptor)?;
        info!("dfu entity '{}' uses layout {}", self.name, config.layout());
        self.staging.clear();
        Ok(self.config.insert(config))
    }

    pub fn config(&self) -> Option<&MediumConfig> {
        self.config.as_ref()
    }

    pub fn layout(&self) -> Option<Layout> {
        self.config.as_ref().map(MediumConfig::layout)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dev_num(&self) -> u32 {
        self.dev_num
    }

    /// Number of bytes waiting for the next flush.
    pub fn staged(&self) -> usize {
        self.staging.len()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn into_parts(self) -> (H, F) {
        (self.host, self.fs)
    }

    fn configured(&self) -> Result<MediumConfig, DfuError> {
        self.config.ok_or_else(|| {
            error!("dfu entity '{}': layout not (yet) supported!", self.name);
            DfuError::UnsupportedLayout
        })
    }

    pub fn write(&mut self, offset: u64, buf: &[u8]) -> Result<usize, DfuError> {
        match self.configured()? {
            MediumConfig::RawAddress(area) => {
                let dev = self
                    .host
                    .find_device(self.dev_num)
                    .ok_or(DfuError::DeviceNotFound)?;
                block_op(dev, &area, Transfer::Write(buf), offset)
            }
            MediumConfig::Filesystem(_) => {
                self.staging.append(buf)?;
                Ok(buf.len())
            }
        }
    }

    pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, DfuError> {
        match self.configured()? {
            MediumConfig::RawAddress(area) => {
                let dev = self
                    .host
                    .find_device(self.dev_num)
                    .ok_or(DfuError::DeviceNotFound)?;
                block_op(dev, &area, Transfer::Read(buf), offset)
            }
            // Files are always loaded whole
            MediumConfig::Filesystem(target) => {
                let req = FsRequest::new(&target, &self.name);
                file_op(&mut self.fs, &req, FileOp::Read(buf))
            }
        }
    }

    /// Writes staged data to the filesystem. The staging buffer is emptied
    /// even if the write fails.
    pub fn flush(&mut self) -> Result<(), DfuError> {
        match self.configured()? {
            MediumConfig::RawAddress(_) => Ok(()),
            MediumConfig::Filesystem(target) => {
                let req = FsRequest::new(&target, &self.name);
                let res = file_op(&mut self.fs, &req, FileOp::Write(self.staging.as_slice()));
                self.staging.clear();
                res.map(|_| ())
            }
        }
    }

    pub fn size(&mut self) -> Result<u64, DfuError> {
        match self.configured()? {
            MediumConfig::RawAddress(area) => Ok(area.byte_size()),
            MediumConfig::Filesystem(target) => {
                let req = FsRequest::new(&target, &self.name);
                file_op(&mut self.fs, &req, FileOp::Size).map(|len| len as u64)
            }
        }
    }
}

impl<H: MmcHost, F: FsOps> DfuMedium for MmcMedium<H, F> {
    fn write_medium(&mut self, offset: u64, buf: &[u8]) -> Result<usize, DfuError> {
        self.write(offset, buf)
    }

    fn read_medium(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, DfuError> {
        self.read(offset, buf)
    }

    fn flush_medium(&mut self) -> Result<(), DfuError> {
        self.flush()
    }

    fn medium_size(&mut self) -> Result<u64, DfuError> {
        self.size()
    }
}
