#![doc = include_str!("../README.md")]

use std::io::{Seek, Write};

use bit_field::BitField as _;
use log::{debug, info, trace};
use mbr::build_protective_mbr;
use part::{bytes_to_lba, num_cast, start_size_to_end};
use rand::RngCore;
use uuid::Uuid;

mod geometry;
mod header;

pub use geometry::{Geometry, MIN_BLOCK_SIZE};
pub use header::{
    GptHeader, GPT_HEADER_SIZE, GPT_PARTITION_ENTRY_SIZE, GPT_SIGNATURE_HEADER, GPT_VERSION_HEADER,
};
pub use part::ImageWriter;
pub use types::WgptError;

/// Generates a random GUID, following the RFC 4122 version 4 (random) and
/// variant 2 layout.
///
/// The 16 bytes are drawn from `rng`, and the version and variant bits are
/// then forced, whatever the random source returned.
pub fn generate_guid<R>(rng: &mut R) -> Uuid
where
    R: RngCore + ?Sized,
{
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);

    // time_hi_and_version
    bytes[6].set_bits(4..8, 0b0100);

    // clock_seq_hi_and_reserved
    bytes[8].set_bits(6..8, 0b10);

    Uuid::from_bytes(bytes)
}

/// Computes the IEEE 802.3 CRC32 (the zlib one) of `bytes`
#[must_use]
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// The GPT Partition Entry Array.
///
/// Entries are handed over already serialized. An empty array is valid: its
/// CRC32 is the CRC32 of an empty input, and nothing gets written to the
/// image.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PartitionEntryArray {
    entries: Vec<[u8; GPT_PARTITION_ENTRY_SIZE]>,
}

impl PartitionEntryArray {
    /// Creates an empty Partition Entry Array
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a serialized partition entry
    pub fn push(&mut self, entry: [u8; GPT_PARTITION_ENTRY_SIZE]) {
        self.entries.push(entry);
    }

    /// Returns the number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the array holds no entry
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the array
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.entries.concat()
    }

    /// Computes the CRC32 of the serialized array
    #[must_use]
    pub fn crc32(&self) -> u32 {
        crc32(&self.to_bytes())
    }

    /// Returns the number of LBAs needed to store the array, or `None` if
    /// `block_size` is zero
    #[must_use]
    pub fn size_in_lba(&self, block_size: u64) -> Option<u64> {
        bytes_to_lba(
            num_cast!(u64, self.entries.len() * GPT_PARTITION_ENTRY_SIZE),
            block_size,
        )
    }
}

/// Builds the primary and backup GPT headers.
///
/// Both headers share everything but `my_lba` and `alternate_lba`, which are
/// swapped, and their own header CRC32.
///
/// # Errors
///
/// Returns [`WgptError::InvalidGeometry`] if the partition entry array
/// doesn't fit between the primary header and the first usable LBA.
pub fn build_gpt_headers(
    geometry: &Geometry,
    guid: Uuid,
    entries: &PartitionEntryArray,
) -> Result<(GptHeader, GptHeader), WgptError> {
    let entries_lba = entries
        .size_in_lba(geometry.block_size())
        .ok_or(WgptError::InvalidGeometry("Null block size".to_owned()))?;

    debug!(
        "GPT Partition Entry Array: {} entries, {entries_lba} LBAs",
        entries.len()
    );

    // The array must end before the first usable LBA, with at least one
    // block to spare.
    if geometry.partition_entry_lba().saturating_add(entries_lba) >= geometry.first_usable_lba() {
        return Err(WgptError::InvalidGeometry(format!(
            "Partition Entry Array of {} entries ({entries_lba} LBAs) must leave room before LBA {}",
            entries.len(),
            geometry.first_usable_lba()
        )));
    }

    let parts_crc = entries.crc32();
    trace!("Partition Entry Array CRC32 {parts_crc:#010x}");

    let primary = GptHeader {
        signature: GPT_SIGNATURE_HEADER,
        revision: GPT_VERSION_HEADER,
        header_size: num_cast!(u32, GPT_HEADER_SIZE),
        header_crc32: 0,
        reserved: 0,
        my_lba: geometry.primary_header_lba(),
        alternate_lba: geometry.alternate_lba(),
        first_usable_lba: geometry.first_usable_lba(),
        last_usable_lba: geometry.last_usable_lba(),
        disk_guid: guid,
        partition_entry_lba: geometry.partition_entry_lba(),
        number_of_partition_entries: num_cast!(u32, entries.len()),
        size_of_partition_entry: num_cast!(u32, GPT_PARTITION_ENTRY_SIZE),
        partition_entry_array_crc32: parts_crc,
    }
    .with_crc32();
    trace!("Primary GPT Header CRC32 {:#010x}", primary.header_crc32);

    let backup = primary.to_alternate();
    trace!("Backup GPT Header CRC32 {:#010x}", backup.header_crc32);

    Ok((primary, backup))
}

/// GUID Partition Table Representation
#[derive(Debug)]
pub struct GuidPartitionTable {
    builder: GuidPartitionTableBuilder,
}

impl GuidPartitionTable {
    /// Returns the disk GUID
    #[must_use]
    pub fn guid(&self) -> Uuid {
        self.builder.guid
    }

    /// Writes the protective MBR and both GPT headers to an image.
    ///
    /// The records are written in order: protective MBR at LBA 0, primary
    /// header at LBA 1, partition entry array at LBA 2 if not empty, and
    /// backup header on the last LBA. The first failure aborts the whole
    /// process, and the image must then be considered unusable.
    ///
    /// Only the records themselves are written. The rest of each block is
    /// expected to be zeroed already, which is the case for a file freshly
    /// extended with [`std::fs::File::set_len`].
    ///
    /// # Errors
    ///
    /// Returns [`WgptError::InvalidGeometry`] if the image storage is smaller
    /// than the geometry, or if the partition entry array doesn't fit, before
    /// anything is written. Returns [`WgptError::Io`] if any write fails.
    pub fn write<W>(self, geometry: &Geometry, image: &mut ImageWriter<W>) -> Result<(), WgptError>
    where
        W: Seek + Write,
    {
        if image.capacity() < geometry.image_size() {
            return Err(WgptError::InvalidGeometry(format!(
                "Image of {} bytes can't hold {} bytes",
                image.capacity(),
                geometry.image_size()
            )));
        }

        let (primary_gpt, backup_gpt) =
            build_gpt_headers(geometry, self.builder.guid, &self.builder.entries)?;

        debug!("Setting up Protective MBR at LBA {}", geometry.mbr_lba());
        let pmbr = build_protective_mbr(geometry.size_in_lba());
        image.write_at(geometry.lba_offset(geometry.mbr_lba()), &pmbr.to_bytes())?;

        debug!("Primary GPT Header is located at LBA {}", primary_gpt.my_lba);
        image.write_at(
            geometry.lba_offset(primary_gpt.my_lba),
            &primary_gpt.to_bytes(),
        )?;

        if self.builder.entries.is_empty() {
            debug!("No partition entry, skipping the Partition Entry Array");
        } else {
            let array_lba = self
                .builder
                .entries
                .size_in_lba(geometry.block_size())
                .ok_or(WgptError::InvalidGeometry("Null block size".to_owned()))?;

            debug!(
                "GPT Partition Entry Array is located at LBAs {} to {}",
                primary_gpt.partition_entry_lba,
                start_size_to_end(primary_gpt.partition_entry_lba, array_lba)
            );
            image.write_at(
                geometry.lba_offset(primary_gpt.partition_entry_lba),
                &self.builder.entries.to_bytes(),
            )?;
        }

        debug!("Backup GPT Header is located at LBA {}", backup_gpt.my_lba);
        image.write_at(
            geometry.lba_offset(backup_gpt.my_lba),
            &backup_gpt.to_bytes(),
        )?;

        image.flush()?;

        info!(
            "GPT with disk GUID {} written, {} LBAs of {} bytes, usable LBAs {} to {}",
            primary_gpt.disk_guid,
            geometry.size_in_lba(),
            geometry.block_size(),
            primary_gpt.first_usable_lba,
            primary_gpt.last_usable_lba,
        );

        Ok(())
    }
}

/// A GUID Partition Table Builder Structure
#[derive(Debug)]
pub struct GuidPartitionTableBuilder {
    guid: Uuid,
    entries: PartitionEntryArray,
}

impl GuidPartitionTableBuilder {
    /// Creates a new GUID Partition Table Builder with the specified [`uuid::Uuid`]
    #[must_use]
    pub fn new_with_uuid(guid: Uuid) -> Self {
        Self {
            guid,
            entries: PartitionEntryArray::new(),
        }
    }

    /// Creates a new GUID Partition Table Builder with a disk GUID generated
    /// out of `rng`
    #[must_use]
    pub fn new_with_rng<R>(rng: &mut R) -> Self
    where
        R: RngCore + ?Sized,
    {
        Self::new_with_uuid(generate_guid(rng))
    }

    /// Create a new GUID Partition Table Builder with a random disk GUID
    /// according to the UUID v4 specification
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_rng(&mut rand::thread_rng())
    }

    /// Appends a serialized entry to the Partition Entry Array
    #[must_use]
    pub fn add_partition_entry(mut self, entry: [u8; GPT_PARTITION_ENTRY_SIZE]) -> Self {
        self.entries.push(entry);
        self
    }

    /// Creates a [`GuidPartitionTable`] from our builder
    #[must_use]
    pub fn build(self) -> GuidPartitionTable {
        GuidPartitionTable { builder: self }
    }
}

impl Default for GuidPartitionTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}
