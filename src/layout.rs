//! Byte layout of the four classic ZIP records
//!
//! Every record is encoded field by field, little-endian, with no padding
//! between fields. Decoding checks the signature before anything else so a
//! wrong offset or a corrupt record fails with [`ZipError::BadSignature`]
//! instead of producing garbage values.

use crate::error::{Result, ZipError};

/// ZIP local file header signature
pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;

/// ZIP data descriptor signature (optional on the wire)
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;

/// ZIP central directory signature
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;

/// ZIP end of central directory signature
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;

pub const SIGNATURE_LEN: usize = 4;
pub const LOCAL_FILE_HEADER_LEN: usize = 30;
pub const DATA_DESCRIPTOR_LEN: usize = 12;
pub const SIGNED_DATA_DESCRIPTOR_LEN: usize = 16;
pub const CENTRAL_DIRECTORY_HEADER_LEN: usize = 46;
pub const END_OF_CENTRAL_DIRECTORY_LEN: usize = 22;

/// Longest archive comment the end record can describe
pub const MAX_COMMENT_LEN: usize = u16::MAX as usize;

/// Byte offset of the crc field inside a local file header. The crc and both
/// sizes are contiguous from here, which is what size patching rewrites.
pub const LOCAL_HEADER_CRC_OFFSET: u64 = 14;

/// Copy `$value` into `$arr` at `$cursor`, advancing the cursor.
macro_rules! array_push {
    ($arr:ident, $cursor:ident, $value:expr) => {{
        for byte in $value {
            $arr[$cursor] = byte;
            $cursor += 1;
        }
    }};
}

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn check_signature(bytes: &[u8], expected: u32, record: &'static str) -> Result<()> {
    let actual = le_u32(bytes, 0);
    if actual != expected {
        return Err(ZipError::BadSignature {
            record,
            expected,
            actual,
        });
    }
    Ok(())
}

/// General purpose bit flag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct GeneralPurposeFlag(pub u16);

impl GeneralPurposeFlag {
    pub const ENCRYPTED: u16 = 1 << 0;
    /// crc and sizes follow the payload in a data descriptor
    pub const DATA_DESCRIPTOR: u16 = 1 << 3;
    /// name and comment are UTF-8
    pub const UTF8: u16 = 1 << 11;

    pub fn contains(self, bit: u16) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u16, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    pub fn has_data_descriptor(self) -> bool {
        self.contains(Self::DATA_DESCRIPTOR)
    }

    pub fn is_utf8(self) -> bool {
        self.contains(Self::UTF8)
    }

    pub fn is_encrypted(self) -> bool {
        self.contains(Self::ENCRYPTED)
    }
}

/// Local file header (30 bytes, followed by name and extra field)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: GeneralPurposeFlag,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    pub fn encode(&self) -> [u8; LOCAL_FILE_HEADER_LEN] {
        let mut array = [0; LOCAL_FILE_HEADER_LEN];
        let mut cursor = 0;

        array_push!(array, cursor, LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes());
        array_push!(array, cursor, self.version_needed.to_le_bytes());
        array_push!(array, cursor, self.flags.0.to_le_bytes());
        array_push!(array, cursor, self.compression_method.to_le_bytes());
        array_push!(array, cursor, self.last_mod_time.to_le_bytes());
        array_push!(array, cursor, self.last_mod_date.to_le_bytes());
        array_push!(array, cursor, self.crc32.to_le_bytes());
        array_push!(array, cursor, self.compressed_size.to_le_bytes());
        array_push!(array, cursor, self.uncompressed_size.to_le_bytes());
        array_push!(array, cursor, self.file_name_length.to_le_bytes());
        array_push!(array, cursor, self.extra_field_length.to_le_bytes());

        array
    }

    pub fn decode(bytes: &[u8; LOCAL_FILE_HEADER_LEN]) -> Result<Self> {
        check_signature(bytes, LOCAL_FILE_HEADER_SIGNATURE, "local file header")?;

        Ok(Self {
            version_needed: le_u16(bytes, 4),
            flags: GeneralPurposeFlag(le_u16(bytes, 6)),
            compression_method: le_u16(bytes, 8),
            last_mod_time: le_u16(bytes, 10),
            last_mod_date: le_u16(bytes, 12),
            crc32: le_u32(bytes, 14),
            compressed_size: le_u32(bytes, 18),
            uncompressed_size: le_u32(bytes, 22),
            file_name_length: le_u16(bytes, 26),
            extra_field_length: le_u16(bytes, 28),
        })
    }

    /// Length of the header plus its variable name and extra field.
    pub fn total_len(&self) -> u64 {
        LOCAL_FILE_HEADER_LEN as u64
            + u64::from(self.file_name_length)
            + u64::from(self.extra_field_length)
    }
}

/// Data descriptor trailing a streamed payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

impl DataDescriptor {
    /// Signature-less form (12 bytes).
    pub fn encode(&self) -> [u8; DATA_DESCRIPTOR_LEN] {
        let mut array = [0; DATA_DESCRIPTOR_LEN];
        let mut cursor = 0;

        array_push!(array, cursor, self.crc32.to_le_bytes());
        array_push!(array, cursor, self.compressed_size.to_le_bytes());
        array_push!(array, cursor, self.uncompressed_size.to_le_bytes());

        array
    }

    /// Form with the leading `0x08074b50` signature (16 bytes).
    pub fn encode_signed(&self) -> [u8; SIGNED_DATA_DESCRIPTOR_LEN] {
        let mut array = [0; SIGNED_DATA_DESCRIPTOR_LEN];
        let mut cursor = 0;

        array_push!(array, cursor, DATA_DESCRIPTOR_SIGNATURE.to_le_bytes());
        array_push!(array, cursor, self.encode());

        array
    }

    /// Decodes either form from the front of `bytes`, returning the
    /// descriptor and the number of bytes it occupied.
    ///
    /// The first four bytes are compared against the signature; when they
    /// match and at least 16 bytes are present the signed form is assumed,
    /// otherwise the bytes are read as the unsigned form. A crc that happens
    /// to equal the signature is indistinguishable here; callers that know
    /// the expected compressed size should use [`DataDescriptor::decode_expecting`].
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < DATA_DESCRIPTOR_LEN {
            return Err(ZipError::ArchiveMalformed(format!(
                "data descriptor needs {} bytes, got {}",
                DATA_DESCRIPTOR_LEN,
                bytes.len()
            )));
        }

        if bytes.len() >= SIGNED_DATA_DESCRIPTOR_LEN
            && le_u32(bytes, 0) == DATA_DESCRIPTOR_SIGNATURE
        {
            return Ok((Self::decode_unsigned(&bytes[SIGNATURE_LEN..]), SIGNED_DATA_DESCRIPTOR_LEN));
        }

        Ok((Self::decode_unsigned(bytes), DATA_DESCRIPTOR_LEN))
    }

    /// Like [`DataDescriptor::decode`], but resolves the signed/unsigned
    /// ambiguity using the compressed size already known to the caller.
    pub fn decode_expecting(bytes: &[u8], compressed_size: u32) -> Result<(Self, usize)> {
        let (descriptor, used) = Self::decode(bytes)?;
        if used == SIGNED_DATA_DESCRIPTOR_LEN && descriptor.compressed_size != compressed_size {
            let unsigned = Self::decode_unsigned(bytes);
            if unsigned.compressed_size == compressed_size {
                return Ok((unsigned, DATA_DESCRIPTOR_LEN));
            }
        }
        Ok((descriptor, used))
    }

    fn decode_unsigned(bytes: &[u8]) -> Self {
        Self {
            crc32: le_u32(bytes, 0),
            compressed_size: le_u32(bytes, 4),
            uncompressed_size: le_u32(bytes, 8),
        }
    }
}

/// Central directory file header (46 bytes, followed by name, extra field and comment)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: GeneralPurposeFlag,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
    pub file_comment_length: u16,
    pub disk_number_start: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub local_header_offset: u32,
}

impl CentralDirectoryHeader {
    pub fn encode(&self) -> [u8; CENTRAL_DIRECTORY_HEADER_LEN] {
        let mut array = [0; CENTRAL_DIRECTORY_HEADER_LEN];
        let mut cursor = 0;

        array_push!(array, cursor, CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
        array_push!(array, cursor, self.version_made_by.to_le_bytes());
        array_push!(array, cursor, self.version_needed.to_le_bytes());
        array_push!(array, cursor, self.flags.0.to_le_bytes());
        array_push!(array, cursor, self.compression_method.to_le_bytes());
        array_push!(array, cursor, self.last_mod_time.to_le_bytes());
        array_push!(array, cursor, self.last_mod_date.to_le_bytes());
        array_push!(array, cursor, self.crc32.to_le_bytes());
        array_push!(array, cursor, self.compressed_size.to_le_bytes());
        array_push!(array, cursor, self.uncompressed_size.to_le_bytes());
        array_push!(array, cursor, self.file_name_length.to_le_bytes());
        array_push!(array, cursor, self.extra_field_length.to_le_bytes());
        array_push!(array, cursor, self.file_comment_length.to_le_bytes());
        array_push!(array, cursor, self.disk_number_start.to_le_bytes());
        array_push!(array, cursor, self.internal_attributes.to_le_bytes());
        array_push!(array, cursor, self.external_attributes.to_le_bytes());
        array_push!(array, cursor, self.local_header_offset.to_le_bytes());

        array
    }

    pub fn decode(bytes: &[u8; CENTRAL_DIRECTORY_HEADER_LEN]) -> Result<Self> {
        check_signature(bytes, CENTRAL_DIRECTORY_SIGNATURE, "central directory")?;

        Ok(Self {
            version_made_by: le_u16(bytes, 4),
            version_needed: le_u16(bytes, 6),
            flags: GeneralPurposeFlag(le_u16(bytes, 8)),
            compression_method: le_u16(bytes, 10),
            last_mod_time: le_u16(bytes, 12),
            last_mod_date: le_u16(bytes, 14),
            crc32: le_u32(bytes, 16),
            compressed_size: le_u32(bytes, 20),
            uncompressed_size: le_u32(bytes, 24),
            file_name_length: le_u16(bytes, 28),
            extra_field_length: le_u16(bytes, 30),
            file_comment_length: le_u16(bytes, 32),
            disk_number_start: le_u16(bytes, 34),
            internal_attributes: le_u16(bytes, 36),
            external_attributes: le_u32(bytes, 38),
            local_header_offset: le_u32(bytes, 42),
        })
    }

    /// Length of the variable name, extra field and comment that follow.
    pub fn variable_len(&self) -> usize {
        usize::from(self.file_name_length)
            + usize::from(self.extra_field_length)
            + usize::from(self.file_comment_length)
    }
}

/// End of central directory record (22 bytes, followed by the archive comment)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_this_disk: u16,
    pub total_entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub comment_length: u16,
}

impl EndOfCentralDirectory {
    /// Single-disk end record, the only kind this crate writes.
    pub fn new(entries: u16, directory_size: u32, directory_offset: u32, comment_length: u16) -> Self {
        Self {
            disk_number: 0,
            disk_with_central_directory: 0,
            entries_this_disk: entries,
            total_entries: entries,
            central_directory_size: directory_size,
            central_directory_offset: directory_offset,
            comment_length,
        }
    }

    pub fn encode(&self) -> [u8; END_OF_CENTRAL_DIRECTORY_LEN] {
        let mut array = [0; END_OF_CENTRAL_DIRECTORY_LEN];
        let mut cursor = 0;

        array_push!(array, cursor, END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
        array_push!(array, cursor, self.disk_number.to_le_bytes());
        array_push!(array, cursor, self.disk_with_central_directory.to_le_bytes());
        array_push!(array, cursor, self.entries_this_disk.to_le_bytes());
        array_push!(array, cursor, self.total_entries.to_le_bytes());
        array_push!(array, cursor, self.central_directory_size.to_le_bytes());
        array_push!(array, cursor, self.central_directory_offset.to_le_bytes());
        array_push!(array, cursor, self.comment_length.to_le_bytes());

        array
    }

    pub fn decode(bytes: &[u8; END_OF_CENTRAL_DIRECTORY_LEN]) -> Result<Self> {
        check_signature(bytes, END_OF_CENTRAL_DIRECTORY_SIGNATURE, "end of central directory")?;

        Ok(Self {
            disk_number: le_u16(bytes, 4),
            disk_with_central_directory: le_u16(bytes, 6),
            entries_this_disk: le_u16(bytes, 8),
            total_entries: le_u16(bytes, 10),
            central_directory_size: le_u32(bytes, 12),
            central_directory_offset: le_u32(bytes, 16),
            comment_length: le_u16(bytes, 20),
        })
    }

    pub fn is_single_disk(&self) -> bool {
        self.disk_number == 0
            && self.disk_with_central_directory == 0
            && self.entries_this_disk == self.total_entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_local() -> LocalFileHeader {
        LocalFileHeader {
            version_needed: 20,
            flags: GeneralPurposeFlag(GeneralPurposeFlag::DATA_DESCRIPTOR | GeneralPurposeFlag::UTF8),
            compression_method: 8,
            last_mod_time: 0x6b4a,
            last_mod_date: 0x5a93,
            crc32: 0xD8932AAC,
            compressed_size: 1234,
            uncompressed_size: 5678,
            file_name_length: 9,
            extra_field_length: 4,
        }
    }

    fn sample_central() -> CentralDirectoryHeader {
        CentralDirectoryHeader {
            version_made_by: 0x031e,
            version_needed: 20,
            flags: GeneralPurposeFlag(GeneralPurposeFlag::DATA_DESCRIPTOR),
            compression_method: 0,
            last_mod_time: 0x1234,
            last_mod_date: 0x4321,
            crc32: 0xdeadbeef,
            compressed_size: 77,
            uncompressed_size: 77,
            file_name_length: 3,
            extra_field_length: 0,
            file_comment_length: 5,
            disk_number_start: 0,
            internal_attributes: 1,
            external_attributes: 0o100644 << 16,
            local_header_offset: 0x7fff_0000,
        }
    }

    #[test]
    fn local_header_layout() {
        let bytes = sample_local().encode();
        assert_eq!(&bytes[0..4], &[0x50, 0x4b, 0x03, 0x04]);
        assert_eq!(&bytes[6..8], &[0x08, 0x08]);
        assert_eq!(&bytes[14..18], &0xD8932AACu32.to_le_bytes());
        assert_eq!(&bytes[26..28], &[9, 0]);
        assert_eq!(LocalFileHeader::decode(&bytes).unwrap(), sample_local());
        assert_eq!(sample_local().total_len(), 30 + 9 + 4);
    }

    #[test]
    fn central_header_layout() {
        let bytes = sample_central().encode();
        assert_eq!(&bytes[0..4], &[0x50, 0x4b, 0x01, 0x02]);
        assert_eq!(&bytes[42..46], &0x7fff_0000u32.to_le_bytes());
        assert_eq!(CentralDirectoryHeader::decode(&bytes).unwrap(), sample_central());
        assert_eq!(sample_central().variable_len(), 8);
    }

    #[test]
    fn end_record_layout() {
        let eocd = EndOfCentralDirectory::new(3, 150, 4096, 7);
        let bytes = eocd.encode();
        assert_eq!(&bytes[0..4], &[0x50, 0x4b, 0x05, 0x06]);
        assert_eq!(&bytes[8..12], &[3, 0, 3, 0]);
        let decoded = EndOfCentralDirectory::decode(&bytes).unwrap();
        assert_eq!(decoded, eocd);
        assert!(decoded.is_single_disk());
    }

    #[test]
    fn data_descriptor_both_forms() {
        let dd = DataDescriptor {
            crc32: 0xD8932AAC,
            compressed_size: 2,
            uncompressed_size: 2,
        };

        let unsigned = dd.encode();
        assert_eq!(DataDescriptor::decode(&unsigned).unwrap(), (dd, 12));

        let signed = dd.encode_signed();
        assert_eq!(&signed[0..4], &[0x50, 0x4b, 0x07, 0x08]);
        assert_eq!(DataDescriptor::decode(&signed).unwrap(), (dd, 16));
    }

    #[test]
    fn data_descriptor_crc_equal_to_signature() {
        // An unsigned descriptor whose crc collides with the signature,
        // followed by the next local header.
        let dd = DataDescriptor {
            crc32: DATA_DESCRIPTOR_SIGNATURE,
            compressed_size: 10,
            uncompressed_size: 20,
        };
        let mut bytes = dd.encode().to_vec();
        bytes.extend_from_slice(&LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes());

        let (guess, _) = DataDescriptor::decode(&bytes).unwrap();
        assert_ne!(guess, dd);
        assert_eq!(DataDescriptor::decode_expecting(&bytes, 10).unwrap(), (dd, 12));
    }

    #[test]
    fn short_data_descriptor_is_rejected() {
        assert!(matches!(
            DataDescriptor::decode(&[0u8; 8]),
            Err(ZipError::ArchiveMalformed(_))
        ));
    }

    #[test]
    fn flipped_signature_bytes_fail_every_record() {
        for i in 0..4 {
            let mut local = sample_local().encode();
            local[i] ^= 0xff;
            assert!(matches!(
                LocalFileHeader::decode(&local),
                Err(ZipError::BadSignature { expected: LOCAL_FILE_HEADER_SIGNATURE, .. })
            ));

            let mut central = sample_central().encode();
            central[i] ^= 0x01;
            assert!(matches!(
                CentralDirectoryHeader::decode(&central),
                Err(ZipError::BadSignature { expected: CENTRAL_DIRECTORY_SIGNATURE, .. })
            ));

            let mut end = EndOfCentralDirectory::new(1, 46, 0, 0).encode();
            end[i] = end[i].wrapping_add(1);
            assert!(matches!(
                EndOfCentralDirectory::decode(&end),
                Err(ZipError::BadSignature { expected: END_OF_CENTRAL_DIRECTORY_SIGNATURE, .. })
            ));
        }
    }

    #[test]
    fn flag_bits() {
        let mut flags = GeneralPurposeFlag::default();
        assert!(!flags.has_data_descriptor());
        flags.set(GeneralPurposeFlag::DATA_DESCRIPTOR, true);
        flags.set(GeneralPurposeFlag::UTF8, true);
        assert_eq!(flags.0, 0x0808);
        flags.set(GeneralPurposeFlag::DATA_DESCRIPTOR, false);
        assert!(flags.is_utf8());
        assert!(!flags.has_data_descriptor());
        assert!(!flags.is_encrypted());
    }
}
