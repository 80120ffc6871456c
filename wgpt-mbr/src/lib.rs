#![doc = include_str!("../README.md")]

use bit_field::BitField as _;
use log::debug;
use num_traits::ToPrimitive as _;
use part::num_cast;
use types::WgptError;

/// Size of a Master Boot Record, regardless of the logical block size
pub const MBR_SIZE_BYTES: usize = 512;

/// MBR Boot Signature
pub const MBR_SIGNATURE: u16 = 0xaa55;

/// Partition Type marking the whole disk as managed by a GUID Partition Table
pub const PROTECTIVE_PART_TYPE: u8 = 0xee;

const MBR_BOOT_CODE_SIZE_BYTES: usize = 440;
const MBR_DISK_SIGNATURE_OFFSET_BYTES: usize = 440;
const MBR_RESERVED_OFFSET_BYTES: usize = 444;
const MBR_PART_ENTRY_OFFSET_BYTES: usize = 446;
const MBR_PART_ENTRY_SIZE_BYTES: usize = 16;
const MBR_PART_ENTRY_NUM: usize = 4;
const MBR_SIGNATURE_OFFSET_BYTES: usize = 510;

const HEADS_PER_CYLINDER: u64 = 255;
const SECTORS_PER_TRACK: u64 = 63;
const MAX_CYLINDER: u64 = (1 << 10) - 1;

fn lba_to_chs_bytes(lba: u64) -> [u8; 3] {
    let c = lba / (HEADS_PER_CYLINDER * SECTORS_PER_TRACK);
    if c > MAX_CYLINDER {
        return [0xff, 0xff, 0xff];
    }

    let h = num_cast!(u8, (lba / SECTORS_PER_TRACK) % HEADS_PER_CYLINDER);

    let mut s = num_cast!(u8, (lba % SECTORS_PER_TRACK) + 1);
    s.set_bits(6..8, num_cast!(u8, c >> 8));

    [h, s, num_cast!(u8, c & 0xff)]
}

/// An MBR Partition Record
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MasterBootRecordPartition {
    /// Boot Indicator, 0x80 if bootable
    pub boot_indicator: u8,

    /// CHS Address of the first sector
    pub starting_chs: [u8; 3],

    /// Partition Type
    pub os_type: u8,

    /// CHS Address of the last sector
    pub ending_chs: [u8; 3],

    /// First LBA of the partition
    pub starting_lba: u32,

    /// Partition size, in LBAs
    pub size_in_lba: u32,
}

impl MasterBootRecordPartition {
    /// Serializes the partition record to its on-disk representation
    #[must_use]
    pub fn to_bytes(&self) -> [u8; MBR_PART_ENTRY_SIZE_BYTES] {
        let mut entry = [0u8; MBR_PART_ENTRY_SIZE_BYTES];

        entry[0] = self.boot_indicator;
        entry[1..4].copy_from_slice(&self.starting_chs);
        entry[4] = self.os_type;
        entry[5..8].copy_from_slice(&self.ending_chs);
        entry[8..12].copy_from_slice(&self.starting_lba.to_le_bytes());
        entry[12..16].copy_from_slice(&self.size_in_lba.to_le_bytes());

        entry
    }

    /// Parses a partition record from its on-disk representation
    #[must_use]
    pub fn from_bytes(entry: &[u8; MBR_PART_ENTRY_SIZE_BYTES]) -> Self {
        let mut starting_chs = [0u8; 3];
        starting_chs.copy_from_slice(&entry[1..4]);

        let mut ending_chs = [0u8; 3];
        ending_chs.copy_from_slice(&entry[5..8]);

        Self {
            boot_indicator: entry[0],
            starting_chs,
            os_type: entry[4],
            ending_chs,
            starting_lba: u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]),
            size_in_lba: u32::from_le_bytes([entry[12], entry[13], entry[14], entry[15]]),
        }
    }
}

/// An MBR Partition Record Builder Structure
#[derive(Debug)]
pub struct MasterBootRecordPartitionBuilder {
    type_: u8,
    offset_lba: u64,
    size_lba: u64,
}

impl MasterBootRecordPartitionBuilder {
    /// Creates a new MBR Partition Builder of a specified type
    #[must_use]
    pub fn new(part_type: u8) -> Self {
        Self {
            type_: part_type,
            offset_lba: 0,
            size_lba: 0,
        }
    }

    /// Sets the partition offset in LBAs from the start of the device. Offsets
    /// that don't fit in 32 bits are saturated.
    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset_lba = offset;
        self
    }

    /// Sets the partition size in LBAs. Sizes that don't fit in 32 bits are
    /// saturated.
    #[must_use]
    pub fn size(mut self, size: u64) -> Self {
        self.size_lba = size;
        self
    }

    /// Creates a [`MasterBootRecordPartition`] from our builder
    #[must_use]
    pub fn build(self) -> MasterBootRecordPartition {
        let end_lba = self.offset_lba.saturating_add(self.size_lba).saturating_sub(1);

        let size_in_lba = self.size_lba.to_u32().unwrap_or(u32::MAX);
        if u64::from(size_in_lba) != self.size_lba {
            debug!(
                "Partition size of {} LBAs doesn't fit in 32 bits, saturating.",
                self.size_lba
            );
        }

        MasterBootRecordPartition {
            boot_indicator: 0,
            starting_chs: lba_to_chs_bytes(self.offset_lba),
            os_type: self.type_,
            ending_chs: lba_to_chs_bytes(end_lba),
            starting_lba: self.offset_lba.to_u32().unwrap_or(u32::MAX),
            size_in_lba,
        }
    }
}

/// A Master Boot Record
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MasterBootRecord {
    /// Bootstrap code. We never ship any, it's left zeroed.
    pub boot_code: [u8; MBR_BOOT_CODE_SIZE_BYTES],

    /// Disk Signature
    pub disk_signature: u32,

    /// Reserved
    pub reserved: u16,

    /// Partition Records
    pub partitions: [MasterBootRecordPartition; MBR_PART_ENTRY_NUM],

    /// Boot Signature, always [`MBR_SIGNATURE`]
    pub signature: u16,
}

impl MasterBootRecord {
    /// Creates an empty MBR: no boot code, null disk signature, no partition
    #[must_use]
    pub fn new() -> Self {
        Self {
            boot_code: [0; MBR_BOOT_CODE_SIZE_BYTES],
            disk_signature: 0,
            reserved: 0,
            partitions: [MasterBootRecordPartition::default(); MBR_PART_ENTRY_NUM],
            signature: MBR_SIGNATURE,
        }
    }

    /// Serializes the MBR to its 512 bytes on-disk representation
    #[must_use]
    pub fn to_bytes(&self) -> [u8; MBR_SIZE_BYTES] {
        let mut mbr = [0u8; MBR_SIZE_BYTES];

        mbr[..MBR_BOOT_CODE_SIZE_BYTES].copy_from_slice(&self.boot_code);
        mbr[MBR_DISK_SIGNATURE_OFFSET_BYTES..MBR_RESERVED_OFFSET_BYTES]
            .copy_from_slice(&self.disk_signature.to_le_bytes());
        mbr[MBR_RESERVED_OFFSET_BYTES..MBR_PART_ENTRY_OFFSET_BYTES]
            .copy_from_slice(&self.reserved.to_le_bytes());

        for (idx, part) in self.partitions.iter().enumerate() {
            let part_idx = MBR_PART_ENTRY_OFFSET_BYTES + MBR_PART_ENTRY_SIZE_BYTES * idx;
            mbr[part_idx..(part_idx + MBR_PART_ENTRY_SIZE_BYTES)].copy_from_slice(&part.to_bytes());
        }

        mbr[MBR_SIGNATURE_OFFSET_BYTES..].copy_from_slice(&self.signature.to_le_bytes());

        mbr
    }

    /// Parses an MBR from its on-disk representation
    ///
    /// # Errors
    ///
    /// Returns [`WgptError::InvalidStructure`] if the buffer is too short or
    /// if the boot signature is missing.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, WgptError> {
        let Some(mbr) = buf.get(..MBR_SIZE_BYTES) else {
            return Err(WgptError::InvalidStructure(format!(
                "MBR needs {MBR_SIZE_BYTES} bytes, got {}",
                buf.len()
            )));
        };

        let signature = u16::from_le_bytes([
            mbr[MBR_SIGNATURE_OFFSET_BYTES],
            mbr[MBR_SIGNATURE_OFFSET_BYTES + 1],
        ]);
        if signature != MBR_SIGNATURE {
            return Err(WgptError::InvalidStructure(format!(
                "Invalid MBR Signature {signature:#06x}"
            )));
        }

        let mut boot_code = [0u8; MBR_BOOT_CODE_SIZE_BYTES];
        boot_code.copy_from_slice(&mbr[..MBR_BOOT_CODE_SIZE_BYTES]);

        let mut partitions = [MasterBootRecordPartition::default(); MBR_PART_ENTRY_NUM];
        for (idx, part) in partitions.iter_mut().enumerate() {
            let part_idx = MBR_PART_ENTRY_OFFSET_BYTES + MBR_PART_ENTRY_SIZE_BYTES * idx;

            let mut entry = [0u8; MBR_PART_ENTRY_SIZE_BYTES];
            entry.copy_from_slice(&mbr[part_idx..(part_idx + MBR_PART_ENTRY_SIZE_BYTES)]);

            *part = MasterBootRecordPartition::from_bytes(&entry);
        }

        Ok(Self {
            boot_code,
            disk_signature: u32::from_le_bytes([
                mbr[MBR_DISK_SIGNATURE_OFFSET_BYTES],
                mbr[MBR_DISK_SIGNATURE_OFFSET_BYTES + 1],
                mbr[MBR_DISK_SIGNATURE_OFFSET_BYTES + 2],
                mbr[MBR_DISK_SIGNATURE_OFFSET_BYTES + 3],
            ]),
            reserved: u16::from_le_bytes([
                mbr[MBR_RESERVED_OFFSET_BYTES],
                mbr[MBR_RESERVED_OFFSET_BYTES + 1],
            ]),
            partitions,
            signature,
        })
    }
}

impl Default for MasterBootRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the protective MBR for a disk of `disk_size_in_lba` blocks.
///
/// The single protective record starts at LBA 1 and covers every remaining
/// block. Its size is saturated to `0xFFFFFFFF` if the disk has more blocks
/// than 32-bit LBAs can address.
#[must_use]
pub fn build_protective_mbr(disk_size_in_lba: u64) -> MasterBootRecord {
    let size_lba = disk_size_in_lba.saturating_sub(1);
    debug!("Setting up Protective MBR covering {size_lba} LBAs");

    MasterBootRecord {
        partitions: [
            MasterBootRecordPartitionBuilder::new(PROTECTIVE_PART_TYPE)
                .offset(1)
                .size(size_lba)
                .build(),
            MasterBootRecordPartition::default(),
            MasterBootRecordPartition::default(),
            MasterBootRecordPartition::default(),
        ],
        ..MasterBootRecord::new()
    }
}
