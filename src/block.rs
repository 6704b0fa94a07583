use crate::partition::{PartitionInfo, PartitionTable};
use crate::DfuError;

/// Block-level access to one MMC device.
pub trait MmcDevice {
    fn init(&mut self) -> Result<(), DfuError>;

    /// Native read block length in bytes.
    fn read_bl_len(&self) -> u32;

    /// Currently selected hardware partition.
    fn active_partition(&self) -> u32;

    /// Selects a hardware partition. On success `active_partition` must
    /// report `part`.
    fn switch_partition(&mut self, part: u32) -> Result<(), DfuError>;

    /// Reads `count` blocks starting at `start`, returns the number of blocks read.
    fn block_read(&mut self, start: u64, count: u64, dst: &mut [u8]) -> u64;

    /// Writes `count` blocks starting at `start`, returns the number of blocks written.
    fn block_write(&mut self, start: u64, count: u64, src: &[u8]) -> u64;

    /// Looks up partition `index` (1-based) of the on-disk partition table.
    fn find_partition(&mut self, index: u32) -> Result<PartitionInfo, DfuError> {
        PartitionTable::probe(self)?.find(index)
    }
}

impl<T: MmcDevice + ?Sized> MmcDevice for &mut T {
    fn init(&mut self) -> Result<(), DfuError> {
        (**self).init()
    }

    fn read_bl_len(&self) -> u32 {
        (**self).read_bl_len()
    }

    fn active_partition(&self) -> u32 {
        (**self).active_partition()
    }

    fn switch_partition(&mut self, part: u32) -> Result<(), DfuError> {
        (**self).switch_partition(part)
    }

    fn block_read(&mut self, start: u64, count: u64, dst: &mut [u8]) -> u64 {
        (**self).block_read(start, count, dst)
    }

    fn block_write(&mut self, start: u64, count: u64, src: &[u8]) -> u64 {
        (**self).block_write(start, count, src)
    }

    fn find_partition(&mut self, index: u32) -> Result<PartitionInfo, DfuError> {
        (**self).find_partition(index)
    }
}

/// Resolves MMC device numbers to devices.
pub trait MmcHost {
    type Device: MmcDevice;

    fn find_device(&mut self, dev_num: u32) -> Option<&mut Self::Device>;
}

impl<T: MmcHost + ?Sized> MmcHost for &mut T {
    type Device = T::Device;

    fn find_device(&mut self, dev_num: u32) -> Option<&mut Self::Device> {
        (**self).find_device(dev_num)
    }
}
