use alloc::{vec, vec::Vec};
use crc::{CRC_32_ISO_HDLC, Crc};
use gpt_parser::{GPTHeader, GPTPartition, Uuid};
use log::{debug, info, warn};
use mbrs::Mbr;

use crate::{BLOCK_SIZE, DfuError, MmcDevice};

pub(crate) const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Bytes of the GPT header covered by its CRC in revision 1.0.
const GPT_HEADER_SIZE: usize = 92;
const GPT_ENTRY_SIZE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionTableType {
    MBR,
    GPT,
}

/// Geometry of one partition, in device blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionInfo {
    pub start: u64,
    pub size: u64,
    pub blksz: u32,
}

/// Partition table read from sector 0 of an MMC device.
pub struct PartitionTable {
    table_type: PartitionTableType,
    entries: Vec<Option<PartitionInfo>>,
}

impl PartitionTable {
    /// Reads the partition table of `dev`.
    /// Automatically detects partition table type (GPT or MBR)
    pub fn probe<D: MmcDevice + ?Sized>(dev: &mut D) -> Result<Self, DfuError> {
        if dev.read_bl_len() as usize != BLOCK_SIZE {
            warn!(
                "Partition tables are only probed on {}-byte sectors, device uses {}",
                BLOCK_SIZE,
                dev.read_bl_len()
            );
            return Err(DfuError::PartitionNotFound);
        }

        let mut mbr_data = [0u8; BLOCK_SIZE];
        read_sector(dev, 0, &mut mbr_data)?;

        if mbr_data[510] != 0x55 || mbr_data[511] != 0xAA {
            warn!("Invalid MBR signature");
            return Err(DfuError::InvalidPartitionTable);
        }

        if is_protective_mbr(&mbr_data) {
            info!("Detected GPT partition table");
            Self::probe_gpt(dev)
        } else {
            info!("Detected MBR partition table");
            Self::probe_mbr(&mbr_data)
        }
    }

    fn probe_gpt<D: MmcDevice + ?Sized>(dev: &mut D) -> Result<Self, DfuError> {
        let gpt_header = verify_and_read_gpt(dev)?;
        let entries = read_partition_table(dev, &gpt_header)?;

        info!(
            "GPT table read, {} of {} slots used",
            entries.iter().flatten().count(),
            entries.len()
        );

        Ok(Self {
            table_type: PartitionTableType::GPT,
            entries,
        })
    }

    fn probe_mbr(mbr_data: &[u8; BLOCK_SIZE]) -> Result<Self, DfuError> {
        let mbr = Mbr::try_from_bytes(mbr_data).map_err(|_| {
            warn!("Invalid MBR data");
            DfuError::InvalidPartitionTable
        })?;

        let entries = mbr
            .partition_table
            .entries
            .iter()
            .map(|entry| {
                entry.as_ref().map(|partinfo| PartitionInfo {
                    start: partinfo.start_sector_lba() as u64,
                    size: partinfo.sector_count_lba() as u64,
                    blksz: BLOCK_SIZE as u32,
                })
            })
            .collect();

        Ok(Self {
            table_type: PartitionTableType::MBR,
            entries,
        })
    }

    /// Returns the partition table type
    pub fn table_type(&self) -> PartitionTableType {
        self.table_type
    }

    /// Number of partition slots, used or not.
    pub fn slots(&self) -> usize {
        self.entries.len()
    }

    /// Returns partition `index`, counting from 1.
    pub fn find(&self, index: u32) -> Result<PartitionInfo, DfuError> {
        let slot = (index as usize).checked_sub(1);
        match slot.and_then(|i| self.entries.get(i)).copied().flatten() {
            Some(info) => {
                debug!("Partition #{}: {:?}", index, info);
                Ok(info)
            }
            None => Err(DfuError::PartitionNotFound),
        }
    }
}

fn read_sector<D: MmcDevice + ?Sized>(
    dev: &mut D,
    lba: u64,
    buf: &mut [u8],
) -> Result<(), DfuError> {
    if dev.block_read(lba, 1, buf) != 1 {
        warn!("Failed to read LBA {}", lba);
        return Err(DfuError::Io);
    }
    Ok(())
}

fn verify_and_read_gpt<D: MmcDevice + ?Sized>(dev: &mut D) -> Result<GPTHeader, DfuError> {
    // GPT header lives in LBA 1
    let mut gpt_data = [0u8; BLOCK_SIZE];
    read_sector(dev, 1, &mut gpt_data)?;

    let gpt_header =
        unsafe { core::ptr::read_unaligned(gpt_data.as_ptr() as *const GPTHeader) };
    if !gpt_header.verify_signature() {
        warn!("Could not verify GPT header signature `EFI PART`");
        return Err(DfuError::InvalidPartitionTable);
    }

    let header_size = Into::<u32>::into(gpt_header.header_size_le) as usize;
    if !(GPT_HEADER_SIZE..=BLOCK_SIZE).contains(&header_size) {
        warn!("GPT header size {} out of range", header_size);
        return Err(DfuError::InvalidPartitionTable);
    }

    // CRC32 of the header is taken with its own CRC field zeroed
    let mut digest = CRC32.digest();
    digest.update(&gpt_data[..16]);
    digest.update(&[0u8; 4]);
    digest.update(&gpt_data[20..header_size]);
    if digest.finalize() != Into::<u32>::into(gpt_header.header_crc32) {
        warn!("GPT header CRC32 verification failed");
        return Err(DfuError::InvalidPartitionTable);
    }

    // Entry size has to be 2^x * 128
    let part_size = Into::<u32>::into(gpt_header.part_size) as usize;
    if part_size < GPT_ENTRY_SIZE
        || part_size % GPT_ENTRY_SIZE != 0
        || !(part_size / GPT_ENTRY_SIZE).is_power_of_two()
    {
        warn!("Invalid GPT partition entry size {}", part_size);
        return Err(DfuError::InvalidPartitionTable);
    }

    debug!(
        "GPT partition entries at LBA {}, {} entries of {} bytes",
        Into::<u64>::into(gpt_header.part_start_lba),
        Into::<u32>::into(gpt_header.num_parts),
        part_size
    );

    Ok(gpt_header)
}

/// Reads the partition entry array. Slot `i` of the result is on-disk entry
/// `i`, `None` when the slot is unused or its LBA range is inverted.
fn read_partition_table<D: MmcDevice + ?Sized>(
    dev: &mut D,
    gpt_header: &GPTHeader,
) -> Result<Vec<Option<PartitionInfo>>, DfuError> {
    let partition_start_lba = Into::<u64>::into(gpt_header.part_start_lba);
    let part_size = Into::<u32>::into(gpt_header.part_size) as usize;
    let num_parts = Into::<u32>::into(gpt_header.num_parts) as usize;

    let table_bytes = num_parts
        .checked_mul(part_size)
        .ok_or(DfuError::InvalidPartitionTable)?;
    let lba_blocks_needed = table_bytes.div_ceil(BLOCK_SIZE);

    let mut partition_data = vec![0u8; lba_blocks_needed * BLOCK_SIZE];
    for (i, chunk) in partition_data.chunks_mut(BLOCK_SIZE).enumerate() {
        read_sector(dev, partition_start_lba + i as u64, chunk)?;
    }

    if CRC32.checksum(&partition_data[..table_bytes])
        != Into::<u32>::into(gpt_header.part_table_crc32)
    {
        warn!("GPT partition array CRC32 verification failed");
        return Err(DfuError::InvalidPartitionTable);
    }

    let nil_uuid = Uuid::nil();
    let entries = partition_data[..table_bytes]
        .chunks_exact(part_size)
        .enumerate()
        .map(|(i, raw)| {
            let part = unsafe { core::ptr::read_unaligned(raw.as_ptr() as *const GPTPartition) };
            if part.part_type == nil_uuid {
                return None;
            }

            let start_lba = Into::<u64>::into(part.first_lba);
            let end_lba = Into::<u64>::into(part.last_lba);
            let Some(size) = end_lba.checked_sub(start_lba).map(|n| n + 1) else {
                warn!(
                    "Partition {}: last LBA {} before first LBA {}, ignored",
                    i + 1,
                    end_lba,
                    start_lba
                );
                return None;
            };

            match part.get_name() {
                Ok(name) => info!("Partition {}: '{}' (LBA {}-{})", i + 1, name, start_lba, end_lba),
                Err(_) => info!("Partition {}: (LBA {}-{})", i + 1, start_lba, end_lba),
            }
            Some(PartitionInfo {
                start: start_lba,
                size,
                blksz: BLOCK_SIZE as u32,
            })
        })
        .collect();

    Ok(entries)
}

/// Checks whether the MBR is a protective MBR (indicating GPT)
fn is_protective_mbr(data: &[u8; BLOCK_SIZE]) -> bool {
    (0..4).any(|i| data[446 + i * 16 + 4] == 0xEE)
}
