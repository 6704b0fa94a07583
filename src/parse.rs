use log::{error, info, warn};

use crate::{
    DfuError, EntityKind, FsKind, FsTarget, MediumConfig, MmcDevice, MmcHost, RawArea,
};

/// Parses an unsigned number the way `strtoul(s, NULL, 0)` does.
///
/// A `0x` prefix selects base 16 and a leading `0` base 8, anything else is
/// decimal. Parsing stops at the first character that is not a digit of the
/// base, so a malformed numeral yields 0.
pub fn parse_number(s: &str) -> u64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();

    let (radix, digits) = match bytes {
        [b'0', b'x' | b'X', next, ..] if next.is_ascii_hexdigit() => (16, &s[2..]),
        [b'0', ..] => (8, s),
        _ => (10, s),
    };

    digits
        .chars()
        .map_while(|c| c.to_digit(radix))
        .fold(0u64, |acc, d| acc.wrapping_mul(radix as u64).wrapping_add(d as u64))
}

impl MediumConfig {
    /// Builds the configuration of an entity on MMC device `dev_num` from
    /// its descriptor:
    ///
    /// ```text
    /// raw  <lba_start> <lba_size> [mmcpart <hw_partition>]
    /// part <dev> <partition>
    /// fat  <dev> <partition>
    /// ext4 <dev> <partition>
    /// ```
    ///
    /// The device is looked up and initialized before the type is checked.
    pub fn from_descriptor<H: MmcHost + ?Sized>(
        host: &mut H,
        dev_num: u32,
        descriptor: &str,
    ) -> Result<Self, DfuError> {
        let mut args = descriptor.split_whitespace();
        let (Some(entity_type), Some(second), Some(third)) = (args.next(), args.next(), args.next())
        else {
            error!("Invalid number of arguments in '{}'", descriptor);
            return Err(DfuError::InvalidArgument);
        };

        let second_arg = parse_number(second);
        let third_arg = parse_number(third);

        let Some(mmc) = host.find_device(dev_num) else {
            error!("Couldn't find MMC device no. {}", dev_num);
            return Err(DfuError::DeviceNotFound);
        };

        mmc.init().map_err(|e| {
            error!("Couldn't init MMC device: {}", e);
            DfuError::InitFailure
        })?;

        let kind = entity_type.parse::<EntityKind>().inspect_err(|_| {
            error!("Memory layout ({}) not supported!", entity_type);
        })?;

        let hw_partition = if kind == EntityKind::Raw {
            parse_mmcpart(&mut args)?
        } else {
            if args.next().is_some() {
                warn!("Only raw entities take extra arguments, ignoring them");
            }
            None
        };

        let config = match kind {
            EntityKind::Raw => {
                let lba_blk_size = mmc.read_bl_len();
                if lba_blk_size == 0 {
                    error!("MMC device no. {} reports no block length", dev_num);
                    return Err(DfuError::InvalidArgument);
                }
                MediumConfig::RawAddress(RawArea {
                    lba_start: second_arg,
                    lba_size: third_arg,
                    lba_blk_size,
                    hw_partition,
                })
            }
            EntityKind::Part => {
                let partinfo = to_u32(third_arg)
                    .and_then(|part| mmc.find_partition(part))
                    .inspect_err(|_| {
                        error!(
                            "Couldn't find part #{} on mmc device #{}",
                            third_arg, second_arg
                        );
                    })
                    .map_err(|_| DfuError::PartitionNotFound)?;
                if partinfo.blksz == 0 {
                    return Err(DfuError::InvalidArgument);
                }
                MediumConfig::RawAddress(RawArea {
                    lba_start: partinfo.start,
                    lba_size: partinfo.size,
                    lba_blk_size: partinfo.blksz,
                    hw_partition: None,
                })
            }
            EntityKind::Fat | EntityKind::Ext4 => MediumConfig::Filesystem(FsTarget {
                kind: if kind == EntityKind::Fat {
                    FsKind::Fat
                } else {
                    FsKind::Ext4
                },
                dev: to_u32(second_arg)?,
                part: to_u32(third_arg)?,
            }),
        };

        info!("MMC entity '{}': {:?}", descriptor, config);
        Ok(config)
    }
}

/// Reads the optional `mmcpart <num>` suffix.
fn parse_mmcpart<'a>(args: &mut impl Iterator<Item = &'a str>) -> Result<Option<u32>, DfuError> {
    match args.next() {
        Some("mmcpart") => match args.next() {
            Some(num) => to_u32(parse_number(num)).map(Some),
            None => {
                error!("mmcpart without a partition number");
                Err(DfuError::InvalidArgument)
            }
        },
        Some(other) => {
            warn!("Ignoring unknown entity argument '{}'", other);
            Ok(None)
        }
        None => Ok(None),
    }
}

fn to_u32(value: u64) -> Result<u32, DfuError> {
    u32::try_from(value).map_err(|_| DfuError::InvalidArgument)
}
