use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    vec,
    vec::Vec,
};

use crate::partition::CRC32;
use crate::{DfuError, FsKind, FsOps, FsReport, FsRequest, MmcDevice, MmcHost, PartitionInfo};

/// MMC device backed by one byte vector per hardware partition.
pub struct MemMmc {
    areas: Vec<Vec<u8>>,
    blk_len: u32,
    active: u32,
    pub fail_init: bool,
    pub fail_switch_to: Option<u32>,
    pub short_by: u64,
    pub geometry: Option<Vec<PartitionInfo>>,
    switches: Vec<u32>,
    reads: usize,
    writes: usize,
}

impl MemMmc {
    pub fn new(blocks: usize, blk_len: u32) -> Self {
        Self::with_areas(vec![vec![0u8; blocks * blk_len as usize]], blk_len)
    }

    /// Device whose user area holds `image`, with 512-byte blocks.
    pub fn with_image(image: Vec<u8>) -> Self {
        Self::with_areas(vec![image], 512)
    }

    pub fn with_areas(areas: Vec<Vec<u8>>, blk_len: u32) -> Self {
        Self {
            areas,
            blk_len,
            active: 0,
            fail_init: false,
            fail_switch_to: None,
            short_by: 0,
            geometry: None,
            switches: Vec::new(),
            reads: 0,
            writes: 0,
        }
    }

    /// Hardware partitions switched to, in order.
    pub fn switches(&self) -> &[u32] {
        &self.switches
    }

    pub fn reads(&self) -> usize {
        self.reads
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn area(&self, part: u32) -> &[u8] {
        &self.areas[part as usize]
    }

    fn span(&self, start: u64, count: u64) -> Option<(usize, usize)> {
        let blk = self.blk_len as usize;
        let from = start as usize * blk;
        let to = from + count as usize * blk;
        (to <= self.areas[self.active as usize].len()).then_some((from, to))
    }
}

impl MmcDevice for MemMmc {
    fn init(&mut self) -> Result<(), DfuError> {
        if self.fail_init {
            Err(DfuError::Io)
        } else {
            Ok(())
        }
    }

    fn read_bl_len(&self) -> u32 {
        self.blk_len
    }

    fn active_partition(&self) -> u32 {
        self.active
    }

    fn switch_partition(&mut self, part: u32) -> Result<(), DfuError> {
        if self.fail_switch_to == Some(part) || part as usize >= self.areas.len() {
            return Err(DfuError::Io);
        }
        self.switches.push(part);
        self.active = part;
        Ok(())
    }

    fn block_read(&mut self, start: u64, count: u64, dst: &mut [u8]) -> u64 {
        self.reads += 1;
        let Some((from, to)) = self.span(start, count) else {
            return 0;
        };
        let area = &self.areas[self.active as usize];
        dst[..to - from].copy_from_slice(&area[from..to]);
        count.saturating_sub(self.short_by)
    }

    fn block_write(&mut self, start: u64, count: u64, src: &[u8]) -> u64 {
        self.writes += 1;
        let Some((from, to)) = self.span(start, count) else {
            return 0;
        };
        let area = &mut self.areas[self.active as usize];
        area[from..to].copy_from_slice(&src[..to - from]);
        count.saturating_sub(self.short_by)
    }

    fn find_partition(&mut self, index: u32) -> Result<PartitionInfo, DfuError> {
        match &self.geometry {
            Some(parts) => (index as usize)
                .checked_sub(1)
                .and_then(|i| parts.get(i))
                .copied()
                .ok_or(DfuError::PartitionNotFound),
            None => crate::PartitionTable::probe(self)?.find(index),
        }
    }
}

/// Host exposing devices by their position.
pub struct MemHost {
    pub devices: Vec<MemMmc>,
}

impl MemHost {
    pub fn single(dev: MemMmc) -> Self {
        Self { devices: vec![dev] }
    }

    pub fn device(&self, dev_num: u32) -> &MemMmc {
        &self.devices[dev_num as usize]
    }
}

impl MmcHost for MemHost {
    type Device = MemMmc;

    fn find_device(&mut self, dev_num: u32) -> Option<&mut MemMmc> {
        self.devices.get_mut(dev_num as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsCall {
    pub op: &'static str,
    pub kind: FsKind,
    pub dev: u32,
    pub part: u32,
    pub name: String,
    pub len: usize,
}

/// Filesystem keeping files in a map keyed by name.
#[derive(Default)]
pub struct MemFs {
    pub files: BTreeMap<String, Vec<u8>>,
    pub calls: Vec<FsCall>,
    pub fail_write: bool,
    pub hide_size: bool,
    /// Added to every reported file size
    pub size_skew: u64,
}

impl MemFs {
    fn record(&mut self, op: &'static str, req: &FsRequest<'_>, len: usize) {
        self.calls.push(FsCall {
            op,
            kind: req.kind,
            dev: req.dev,
            part: req.part,
            name: req.name.to_string(),
            len,
        });
    }

    fn report(&self, len: usize) -> FsReport {
        FsReport {
            filesize: (!self.hide_size).then_some(len as u64 + self.size_skew),
        }
    }
}

impl FsOps for MemFs {
    fn write(&mut self, req: &FsRequest<'_>, src: &[u8]) -> Result<(), DfuError> {
        self.record("write", req, src.len());
        if self.fail_write {
            return Err(DfuError::Io);
        }
        self.files.insert(req.name.to_string(), src.to_vec());
        Ok(())
    }

    fn load(&mut self, req: &FsRequest<'_>, dst: &mut [u8]) -> Result<FsReport, DfuError> {
        self.record("load", req, dst.len());
        let data = self.files.get(req.name).ok_or(DfuError::Io)?;
        if data.len() > dst.len() {
            return Err(DfuError::Io);
        }
        dst[..data.len()].copy_from_slice(data);
        Ok(self.report(data.len()))
    }

    fn size(&mut self, req: &FsRequest<'_>) -> Result<FsReport, DfuError> {
        self.record("size", req, 0);
        let len = self.files.get(req.name).ok_or(DfuError::Io)?.len();
        Ok(self.report(len))
    }
}

/// 16-block disk image holding an MBR with Linux partitions at the given
/// `(start, sectors)` positions.
pub fn mbr_image(parts: &[(u32, u32)]) -> Vec<u8> {
    let mut image = vec![0u8; 16 * 512];
    for (i, (start, count)) in parts.iter().enumerate() {
        let entry = 446 + i * 16;
        image[entry + 1..entry + 4].copy_from_slice(&[0xFE, 0xFF, 0xFF]);
        image[entry + 4] = 0x83;
        image[entry + 5..entry + 8].copy_from_slice(&[0xFE, 0xFF, 0xFF]);
        image[entry + 8..entry + 12].copy_from_slice(&start.to_le_bytes());
        image[entry + 12..entry + 16].copy_from_slice(&count.to_le_bytes());
    }
    image[510] = 0x55;
    image[511] = 0xAA;
    image
}

const GPT_ENTRIES: usize = 4;

/// 64-block disk image with a protective MBR and a GPT holding four entry
/// slots. `Some((first_lba, last_lba))` fills a slot, `None` leaves it unused.
pub fn gpt_image(slots: &[Option<(u64, u64)>]) -> Vec<u8> {
    let mut image = vec![0u8; 64 * 512];

    image[446 + 4] = 0xEE;
    image[446 + 8..446 + 12].copy_from_slice(&1u32.to_le_bytes());
    image[446 + 12..446 + 16].copy_from_slice(&63u32.to_le_bytes());
    image[510] = 0x55;
    image[511] = 0xAA;

    // Entry array in LBA 2
    for (i, slot) in slots.iter().enumerate().take(GPT_ENTRIES) {
        let Some((first, last)) = slot else {
            continue;
        };
        let entry = 1024 + i * 128;
        // Linux filesystem data type GUID, unique GUID derived from the slot
        image[entry..entry + 16].copy_from_slice(&[
            0xAF, 0x3D, 0xC6, 0x0F, 0x83, 0x84, 0x72, 0x47, 0x8E, 0x79, 0x3D, 0x69, 0xD8, 0x47,
            0x7D, 0xE4,
        ]);
        image[entry + 16] = i as u8 + 1;
        image[entry + 32..entry + 40].copy_from_slice(&first.to_le_bytes());
        image[entry + 40..entry + 48].copy_from_slice(&last.to_le_bytes());
        for (j, c) in "data".encode_utf16().enumerate() {
            image[entry + 56 + j * 2..entry + 58 + j * 2].copy_from_slice(&c.to_le_bytes());
        }
    }
    let table_crc = CRC32.checksum(&image[1024..1024 + GPT_ENTRIES * 128]);

    let hdr = 512;
    image[hdr..hdr + 8].copy_from_slice(b"EFI PART");
    image[hdr + 8..hdr + 12].copy_from_slice(&0x0001_0000u32.to_le_bytes());
    image[hdr + 12..hdr + 16].copy_from_slice(&92u32.to_le_bytes());
    image[hdr + 24..hdr + 32].copy_from_slice(&1u64.to_le_bytes());
    image[hdr + 32..hdr + 40].copy_from_slice(&63u64.to_le_bytes());
    image[hdr + 40..hdr + 48].copy_from_slice(&34u64.to_le_bytes());
    image[hdr + 48..hdr + 56].copy_from_slice(&62u64.to_le_bytes());
    image[hdr + 56] = 0x42;
    image[hdr + 72..hdr + 80].copy_from_slice(&2u64.to_le_bytes());
    image[hdr + 80..hdr + 84].copy_from_slice(&(GPT_ENTRIES as u32).to_le_bytes());
    image[hdr + 84..hdr + 88].copy_from_slice(&128u32.to_le_bytes());
    image[hdr + 88..hdr + 92].copy_from_slice(&table_crc.to_le_bytes());
    let header_crc = CRC32.checksum(&image[hdr..hdr + 92]);
    image[hdr + 16..hdr + 20].copy_from_slice(&header_crc.to_le_bytes());

    image
}

/// Rewrites the header CRC of a [`gpt_image`] after its header was edited.
pub fn reseal_gpt_header(image: &mut [u8]) {
    let hdr = 512;
    let size = u32::from_le_bytes(image[hdr + 12..hdr + 16].try_into().unwrap()) as usize;
    image[hdr + 16..hdr + 20].fill(0);
    let header_crc = CRC32.checksum(&image[hdr..hdr + size]);
    image[hdr + 16..hdr + 20].copy_from_slice(&header_crc.to_le_bytes());
}
