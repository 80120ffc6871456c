use log::debug;
use part::{bytes_to_lba, lba_to_bytes};
use types::WgptError;

/// Smallest supported logical block size. The protective MBR is always 512
/// bytes long and must fit in LBA 0.
pub const MIN_BLOCK_SIZE: u64 = 512;

const MBR_LBA: u64 = 0;
const PRIMARY_GPT_HEADER_LBA: u64 = 1;
const PARTITION_ENTRY_LBA: u64 = 2;

// Room set aside for the partition entry array, right after the primary header
const PARTITION_ENTRY_ARRAY_RESERVED_BYTES: u64 = 16 * 1024;

/// Disk image geometry, in logical blocks
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Geometry {
    block_size: u64,
    size_in_lba: u64,
    first_usable_lba: u64,
    last_usable_lba: u64,
}

impl Geometry {
    /// Derives the image geometry from its size and logical block size, both
    /// in bytes.
    ///
    /// If `total_bytes` isn't a multiple of `block_size`, the image is rounded
    /// up to the next block, and the extra bytes are padding. The image is
    /// thus [`Geometry::image_size`] bytes long, which might be larger than
    /// `total_bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`WgptError::InvalidGeometry`] if the block size is smaller
    /// than [`MIN_BLOCK_SIZE`], or if the image can't hold the protective
    /// MBR, both GPT headers, the partition entry array reservation and at
    /// least one usable block.
    pub fn new(total_bytes: u64, block_size: u64) -> Result<Self, WgptError> {
        if block_size < MIN_BLOCK_SIZE {
            return Err(WgptError::InvalidGeometry(format!(
                "Block size of {block_size} bytes is below {MIN_BLOCK_SIZE} bytes"
            )));
        }

        let size_in_lba = bytes_to_lba(total_bytes, block_size).ok_or(
            WgptError::InvalidGeometry("Null block size".to_owned()),
        )?;

        debug!("Image has len of {total_bytes} bytes, {size_in_lba} blocks of {block_size} bytes");

        if lba_to_bytes(size_in_lba, block_size).is_none() {
            return Err(WgptError::InvalidGeometry(format!(
                "Image of {size_in_lba} blocks overflows"
            )));
        }

        let reserved_lba = bytes_to_lba(PARTITION_ENTRY_ARRAY_RESERVED_BYTES, block_size).ok_or(
            WgptError::InvalidGeometry("Null block size".to_owned()),
        )?;

        debug!("Partition Entry Array Reservation: {reserved_lba} LBAs");

        let first_usable_lba = reserved_lba + PARTITION_ENTRY_LBA;
        debug!("First Usable LBA: {first_usable_lba}");

        let last_usable_lba = size_in_lba.checked_sub(2).ok_or(WgptError::InvalidGeometry(
            format!("Image of {size_in_lba} blocks is too small"),
        ))?;
        debug!("Last Usable LBA: {last_usable_lba}");

        if first_usable_lba > last_usable_lba {
            return Err(WgptError::InvalidGeometry(format!(
                "Image of {size_in_lba} blocks is too small, needs at least {} blocks",
                first_usable_lba + 2
            )));
        }

        Ok(Self {
            block_size,
            size_in_lba,
            first_usable_lba,
            last_usable_lba,
        })
    }

    /// Returns the logical block size, in bytes
    #[must_use]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Returns the image size, in logical blocks
    #[must_use]
    pub fn size_in_lba(&self) -> u64 {
        self.size_in_lba
    }

    /// Returns the image size, in bytes, rounded up to a whole number of
    /// blocks
    #[must_use]
    pub fn image_size(&self) -> u64 {
        self.size_in_lba * self.block_size
    }

    /// Returns the LBA of the protective MBR
    #[must_use]
    pub fn mbr_lba(&self) -> u64 {
        MBR_LBA
    }

    /// Returns the LBA of the primary GPT header
    #[must_use]
    pub fn primary_header_lba(&self) -> u64 {
        PRIMARY_GPT_HEADER_LBA
    }

    /// Returns the LBA of the backup GPT header, the last LBA of the image
    #[must_use]
    pub fn alternate_lba(&self) -> u64 {
        self.size_in_lba - 1
    }

    /// Returns the first LBA of the partition entry array
    #[must_use]
    pub fn partition_entry_lba(&self) -> u64 {
        PARTITION_ENTRY_LBA
    }

    /// Returns the first LBA partitions can use
    #[must_use]
    pub fn first_usable_lba(&self) -> u64 {
        self.first_usable_lba
    }

    /// Returns the last LBA partitions can use
    #[must_use]
    pub fn last_usable_lba(&self) -> u64 {
        self.last_usable_lba
    }

    /// Returns the byte offset of a given LBA
    #[must_use]
    pub fn lba_offset(&self, lba: u64) -> u64 {
        lba * self.block_size
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;
    use types::WgptError;

    use crate::Geometry;

    #[test]
    fn test_geometry_35mib() {
        let geometry = Geometry::new(36_700_160, 512).unwrap();

        assert_eq!(geometry.size_in_lba(), 71_680);
        assert_eq!(geometry.image_size(), 36_700_160);
        assert_eq!(geometry.primary_header_lba(), 1);
        assert_eq!(geometry.alternate_lba(), 71_679);
        assert_eq!(geometry.partition_entry_lba(), 2);
        assert_eq!(geometry.first_usable_lba(), 34);
        assert_eq!(geometry.last_usable_lba(), 71_678);
        assert_eq!(geometry.lba_offset(geometry.alternate_lba()), 36_699_648);
    }

    #[test]
    fn test_geometry_4k_blocks() {
        let geometry = Geometry::new(1 << 20, 4096).unwrap();

        assert_eq!(geometry.size_in_lba(), 256);
        assert_eq!(geometry.first_usable_lba(), 6);
        assert_eq!(geometry.last_usable_lba(), 254);
        assert_eq!(geometry.alternate_lba(), 255);
    }

    #[test]
    fn test_geometry_partial_block() {
        let geometry = Geometry::new(36_700_160 + 1, 512).unwrap();

        assert_eq!(geometry.size_in_lba(), 71_681);
        assert_eq!(geometry.image_size(), 36_700_160 + 512);
        assert_eq!(geometry.alternate_lba(), 71_680);
    }

    #[test]
    fn test_geometry_null_block_size() {
        assert!(matches!(
            Geometry::new(36_700_160, 0).unwrap_err(),
            WgptError::InvalidGeometry(_)
        ));
    }

    #[test]
    fn test_geometry_small_block_size() {
        assert!(matches!(
            Geometry::new(36_700_160, 256).unwrap_err(),
            WgptError::InvalidGeometry(_)
        ));
    }

    #[test]
    fn test_geometry_smallest_image() {
        // MBR, primary header, 32 LBAs of partition entries, one usable LBA
        // and the backup header.
        let geometry = Geometry::new(36 * 512, 512).unwrap();
        assert_eq!(geometry.first_usable_lba(), geometry.last_usable_lba());
    }

    #[test]
    fn test_geometry_too_small() {
        for size in [0, 1, 512, 35 * 512] {
            assert!(
                matches!(
                    Geometry::new(size, 512).unwrap_err(),
                    WgptError::InvalidGeometry(_)
                ),
                "Image of {size} bytes accepted"
            );
        }
    }

    #[test]
    fn test_geometry_overflow() {
        assert!(matches!(
            Geometry::new(u64::MAX, 4096).unwrap_err(),
            WgptError::InvalidGeometry(_)
        ));
    }
}
