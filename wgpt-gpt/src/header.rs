use part::num_cast;
use types::WgptError;
use uuid::Uuid;

use crate::crc32;

/// GPT Header Signature, "EFI PART"
pub const GPT_SIGNATURE_HEADER: u64 = 0x5452_4150_2049_4645;

/// GPT Header Revision 1.0
pub const GPT_VERSION_HEADER: u32 = 0x0001_0000;

/// Size of the GPT Header, in bytes
pub const GPT_HEADER_SIZE: usize = 92;

/// Size of a single Partition Entry, in bytes
pub const GPT_PARTITION_ENTRY_SIZE: usize = 128;

const GPT_HEADER_CRC32_OFFSET: usize = 16;

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..(offset + 4)]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..(offset + 8)]);
    u64::from_le_bytes(bytes)
}

/// A GPT Header
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GptHeader {
    /// Signature, always [`GPT_SIGNATURE_HEADER`]
    pub signature: u64,

    /// Revision, always [`GPT_VERSION_HEADER`]
    pub revision: u32,

    /// Header size in bytes, always [`GPT_HEADER_SIZE`]
    pub header_size: u32,

    /// CRC32 of the header, computed with this field set to zero
    pub header_crc32: u32,

    /// Reserved, must be zero
    pub reserved: u32,

    /// LBA holding this header
    pub my_lba: u64,

    /// LBA holding the other header
    pub alternate_lba: u64,

    /// First LBA usable by partitions
    pub first_usable_lba: u64,

    /// Last LBA usable by partitions
    pub last_usable_lba: u64,

    /// Disk GUID
    pub disk_guid: Uuid,

    /// First LBA of the partition entry array
    pub partition_entry_lba: u64,

    /// Number of entries in the partition entry array
    pub number_of_partition_entries: u32,

    /// Size of a partition entry, in bytes
    pub size_of_partition_entry: u32,

    /// CRC32 of the partition entry array
    pub partition_entry_array_crc32: u32,
}

impl GptHeader {
    /// Serializes the header to its 92 bytes on-disk representation
    #[must_use]
    pub fn to_bytes(&self) -> [u8; GPT_HEADER_SIZE] {
        let mut hdr = [0u8; GPT_HEADER_SIZE];

        hdr[0..8].copy_from_slice(&self.signature.to_le_bytes());
        hdr[8..12].copy_from_slice(&self.revision.to_le_bytes());
        hdr[12..16].copy_from_slice(&self.header_size.to_le_bytes());
        hdr[16..20].copy_from_slice(&self.header_crc32.to_le_bytes());
        hdr[20..24].copy_from_slice(&self.reserved.to_le_bytes());
        hdr[24..32].copy_from_slice(&self.my_lba.to_le_bytes());
        hdr[32..40].copy_from_slice(&self.alternate_lba.to_le_bytes());
        hdr[40..48].copy_from_slice(&self.first_usable_lba.to_le_bytes());
        hdr[48..56].copy_from_slice(&self.last_usable_lba.to_le_bytes());
        hdr[56..72].copy_from_slice(&self.disk_guid.to_bytes_le());
        hdr[72..80].copy_from_slice(&self.partition_entry_lba.to_le_bytes());
        hdr[80..84].copy_from_slice(&self.number_of_partition_entries.to_le_bytes());
        hdr[84..88].copy_from_slice(&self.size_of_partition_entry.to_le_bytes());
        hdr[88..92].copy_from_slice(&self.partition_entry_array_crc32.to_le_bytes());

        hdr
    }

    /// Parses a header from its on-disk representation. The header CRC32 is
    /// kept as-is, use [`GptHeader::verify_crc32`] to check it.
    ///
    /// # Errors
    ///
    /// Returns [`WgptError::InvalidStructure`] if the buffer is too short, or
    /// if the signature or header size are wrong.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, WgptError> {
        let Some(hdr) = buf.get(..GPT_HEADER_SIZE) else {
            return Err(WgptError::InvalidStructure(format!(
                "GPT Header needs {GPT_HEADER_SIZE} bytes, got {}",
                buf.len()
            )));
        };

        let signature = read_u64(hdr, 0);
        if signature != GPT_SIGNATURE_HEADER {
            return Err(WgptError::InvalidStructure(format!(
                "Invalid GPT Signature {signature:#018x}"
            )));
        }

        let header_size = read_u32(hdr, 12);
        if header_size != num_cast!(u32, GPT_HEADER_SIZE) {
            return Err(WgptError::InvalidStructure(format!(
                "Unsupported GPT Header size {header_size}"
            )));
        }

        let mut guid = [0u8; 16];
        guid.copy_from_slice(&hdr[56..72]);

        Ok(Self {
            signature,
            revision: read_u32(hdr, 8),
            header_size,
            header_crc32: read_u32(hdr, GPT_HEADER_CRC32_OFFSET),
            reserved: read_u32(hdr, 20),
            my_lba: read_u64(hdr, 24),
            alternate_lba: read_u64(hdr, 32),
            first_usable_lba: read_u64(hdr, 40),
            last_usable_lba: read_u64(hdr, 48),
            disk_guid: Uuid::from_bytes_le(guid),
            partition_entry_lba: read_u64(hdr, 72),
            number_of_partition_entries: read_u32(hdr, 80),
            size_of_partition_entry: read_u32(hdr, 84),
            partition_entry_array_crc32: read_u32(hdr, 88),
        })
    }

    /// Computes the header CRC32, over the serialized header with its CRC32
    /// field zeroed.
    #[must_use]
    pub fn compute_crc32(&self) -> u32 {
        let mut hdr = self.to_bytes();
        hdr[GPT_HEADER_CRC32_OFFSET..(GPT_HEADER_CRC32_OFFSET + 4)].fill(0);

        crc32(&hdr)
    }

    /// Checks the stored header CRC32 against the header content
    #[must_use]
    pub fn verify_crc32(&self) -> bool {
        self.header_crc32 == self.compute_crc32()
    }

    /// Returns the header with its CRC32 field updated
    #[must_use]
    pub fn with_crc32(mut self) -> Self {
        self.header_crc32 = self.compute_crc32();
        self
    }

    /// Returns the mirrored header, with `my_lba` and `alternate_lba` swapped
    /// and the CRC32 recomputed.
    #[must_use]
    pub fn to_alternate(&self) -> Self {
        Self {
            my_lba: self.alternate_lba,
            alternate_lba: self.my_lba,
            ..*self
        }
        .with_crc32()
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;
    use uuid::{uuid, Uuid};

    use crate::{
        GptHeader, GPT_HEADER_SIZE, GPT_PARTITION_ENTRY_SIZE, GPT_SIGNATURE_HEADER,
        GPT_VERSION_HEADER,
    };

    const TEST_GUID: Uuid = uuid!("0b1d4f5e-8a3c-4d2b-9e6f-7a8b9c0d1e2f");

    fn test_header() -> GptHeader {
        GptHeader {
            signature: GPT_SIGNATURE_HEADER,
            revision: GPT_VERSION_HEADER,
            header_size: 92,
            header_crc32: 0,
            reserved: 0,
            my_lba: 1,
            alternate_lba: 71_679,
            first_usable_lba: 34,
            last_usable_lba: 71_678,
            disk_guid: TEST_GUID,
            partition_entry_lba: 2,
            number_of_partition_entries: 0,
            size_of_partition_entry: 128,
            partition_entry_array_crc32: 0,
        }
        .with_crc32()
    }

    #[test]
    fn test_header_layout() {
        let hdr = test_header().to_bytes();

        assert_eq!(hdr.len(), GPT_HEADER_SIZE);
        assert_eq!(&hdr[0..8], b"EFI PART");
        assert_eq!(hdr[8..12], [0x00, 0x00, 0x01, 0x00]);
        assert_eq!(hdr[12..16], [92, 0, 0, 0]);
        assert_eq!(hdr[24..32], 1_u64.to_le_bytes());
        assert_eq!(hdr[32..40], 71_679_u64.to_le_bytes());
        assert_eq!(hdr[40..48], 34_u64.to_le_bytes());
        assert_eq!(hdr[48..56], 71_678_u64.to_le_bytes());
        assert_eq!(
            hdr[56..72],
            [
                0x5e, 0x4f, 0x1d, 0x0b, 0x3c, 0x8a, 0x2b, 0x4d, 0x9e, 0x6f, 0x7a, 0x8b, 0x9c, 0x0d,
                0x1e, 0x2f
            ]
        );
        assert_eq!(hdr[72..80], 2_u64.to_le_bytes());
        assert_eq!(
            hdr[84..88],
            u32::try_from(GPT_PARTITION_ENTRY_SIZE).unwrap().to_le_bytes()
        );
    }

    #[test]
    fn test_header_crc32() {
        let hdr = test_header();
        assert!(hdr.verify_crc32());

        let mut bytes = hdr.to_bytes();
        bytes[16..20].fill(0);
        assert_eq!(hdr.header_crc32, crc32fast::hash(&bytes));
    }

    #[test]
    fn test_header_crc32_detects_change() {
        let mut hdr = test_header();
        hdr.last_usable_lba -= 1;

        assert!(!hdr.verify_crc32());
    }

    #[test]
    fn test_header_alternate() {
        let primary = test_header();
        let backup = primary.to_alternate();

        assert_eq!(backup.my_lba, primary.alternate_lba);
        assert_eq!(backup.alternate_lba, primary.my_lba);
        assert_ne!(backup.header_crc32, primary.header_crc32);
        assert!(backup.verify_crc32());
        assert_eq!(backup.to_alternate(), primary);
    }

    #[test]
    fn test_header_round_trip() {
        let hdr = test_header();

        assert_eq!(GptHeader::from_bytes(&hdr.to_bytes()).unwrap(), hdr);
    }

    #[test]
    fn test_header_parse_padded_block() {
        let hdr = test_header();

        let mut block = [0u8; 512];
        block[..GPT_HEADER_SIZE].copy_from_slice(&hdr.to_bytes());

        assert_eq!(GptHeader::from_bytes(&block).unwrap(), hdr);
    }

    #[test]
    fn test_header_parse_invalid() {
        let bytes = test_header().to_bytes();
        GptHeader::from_bytes(&bytes[..91]).unwrap_err();

        let mut bad_signature = bytes;
        bad_signature[0] = b'e';
        GptHeader::from_bytes(&bad_signature).unwrap_err();

        let mut bad_size = bytes;
        bad_size[12] = 128;
        GptHeader::from_bytes(&bad_size).unwrap_err();
    }

    #[test]
    fn test_header_parse_wrong_crc32() {
        let mut bytes = test_header().to_bytes();
        bytes[16] ^= 0xff;

        let hdr = GptHeader::from_bytes(&bytes).unwrap();
        assert!(!hdr.verify_crc32());
    }
}
