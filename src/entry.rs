//! Per-entry metadata shared by the reader and the writer

use std::borrow::Cow;

use chrono::NaiveDateTime;

use crate::date::DosDateTime;
use crate::error::{Result, ZipError};
use crate::layout::{
    CentralDirectoryHeader, DataDescriptor, GeneralPurposeFlag, LocalFileHeader,
    CENTRAL_DIRECTORY_HEADER_LEN,
};

/// "Made by" version written for new entries: ZIP 2.0, MS-DOS host.
pub(crate) const VERSION_MADE_BY: u16 = 20;

/// Compression method to use for ZIP entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    /// No compression (stored)
    Stored,
    /// DEFLATE compression (most common)
    Deflate,
}

impl CompressionMethod {
    pub fn to_zip_method(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
        }
    }

    /// Any method other than 0 (stored) and 8 (deflate) is rejected.
    pub fn from_zip_method(method: u16) -> Result<Self> {
        match method {
            0 => Ok(CompressionMethod::Stored),
            8 => Ok(CompressionMethod::Deflate),
            other => Err(ZipError::UnsupportedCompressionMethod(other)),
        }
    }

    pub(crate) fn version_needed(self) -> u16 {
        match self {
            CompressionMethod::Stored => 10,
            CompressionMethod::Deflate => 20,
        }
    }
}

/// Entry in the ZIP central directory
///
/// Sizes, crc and offset are the classic 32-bit fields. The name is kept as
/// raw bytes; [`ZipEntry::name`] decodes it according to the UTF-8 flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub name: Vec<u8>,
    /// Raw method number; see [`ZipEntry::compression`]
    pub compression_method: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub modified: DosDateTime,
    /// Offset of the local header, relative to the start of the archive
    pub local_header_offset: u32,
    pub flags: GeneralPurposeFlag,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub external_attributes: u32,
    pub internal_attributes: u16,
    pub disk_number_start: u16,
    pub extra_field: Vec<u8>,
    pub comment: Vec<u8>,
}

impl ZipEntry {
    /// A fresh entry with zero sizes, as the writer opens it.
    pub fn new(name: &str, method: CompressionMethod, modified: DosDateTime) -> Self {
        let mut flags = GeneralPurposeFlag::default();
        flags.set(GeneralPurposeFlag::UTF8, !name.is_ascii());

        Self {
            name: name.as_bytes().to_vec(),
            compression_method: method.to_zip_method(),
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            modified,
            local_header_offset: 0,
            flags,
            version_made_by: VERSION_MADE_BY,
            version_needed: method.version_needed(),
            external_attributes: 0,
            internal_attributes: 0,
            disk_number_start: 0,
            extra_field: Vec::new(),
            comment: Vec::new(),
        }
    }

    /// Entry name, UTF-8 when flagged, otherwise one ISO-8859-1 char per byte.
    pub fn name(&self) -> Cow<'_, str> {
        // ASCII reads the same either way
        if self.flags.is_utf8() || self.name.is_ascii() {
            String::from_utf8_lossy(&self.name)
        } else {
            Cow::Owned(self.name.iter().map(|&b| char::from(b)).collect())
        }
    }

    pub fn compression(&self) -> Result<CompressionMethod> {
        CompressionMethod::from_zip_method(self.compression_method)
    }

    pub fn is_dir(&self) -> bool {
        self.name.last() == Some(&b'/')
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags.has_data_descriptor()
    }

    pub fn last_modified(&self) -> Option<NaiveDateTime> {
        self.modified.to_chrono()
    }

    pub fn data_descriptor(&self) -> DataDescriptor {
        DataDescriptor {
            crc32: self.crc32,
            compressed_size: self.compressed_size,
            uncompressed_size: self.uncompressed_size,
        }
    }

    /// Builds an entry from a decoded central record and the variable fields
    /// that followed it.
    pub fn from_central(
        header: &CentralDirectoryHeader,
        name: Vec<u8>,
        extra_field: Vec<u8>,
        comment: Vec<u8>,
    ) -> Self {
        Self {
            name,
            compression_method: header.compression_method,
            crc32: header.crc32,
            compressed_size: header.compressed_size,
            uncompressed_size: header.uncompressed_size,
            modified: DosDateTime::from_raw(header.last_mod_time, header.last_mod_date),
            local_header_offset: header.local_header_offset,
            flags: header.flags,
            version_made_by: header.version_made_by,
            version_needed: header.version_needed,
            external_attributes: header.external_attributes,
            internal_attributes: header.internal_attributes,
            disk_number_start: header.disk_number_start,
            extra_field,
            comment,
        }
    }

    /// Builds an entry from a local header met while reading front to back.
    /// Deferred entries carry zero crc and sizes until their descriptor is read.
    pub fn from_local(header: &LocalFileHeader, name: Vec<u8>, extra_field: Vec<u8>, offset: u32) -> Self {
        Self {
            name,
            compression_method: header.compression_method,
            crc32: header.crc32,
            compressed_size: header.compressed_size,
            uncompressed_size: header.uncompressed_size,
            modified: DosDateTime::from_raw(header.last_mod_time, header.last_mod_date),
            local_header_offset: offset,
            flags: header.flags,
            version_made_by: VERSION_MADE_BY,
            version_needed: header.version_needed,
            external_attributes: 0,
            internal_attributes: 0,
            disk_number_start: 0,
            extra_field,
            comment: Vec::new(),
        }
    }

    pub fn central_header(&self) -> Result<CentralDirectoryHeader> {
        Ok(CentralDirectoryHeader {
            version_made_by: self.version_made_by,
            version_needed: self.version_needed,
            flags: self.flags,
            compression_method: self.compression_method,
            last_mod_time: self.modified.time,
            last_mod_date: self.modified.date,
            crc32: self.crc32,
            compressed_size: self.compressed_size,
            uncompressed_size: self.uncompressed_size,
            file_name_length: field_len(&self.name, "file name")?,
            extra_field_length: field_len(&self.extra_field, "extra field")?,
            file_comment_length: field_len(&self.comment, "entry comment")?,
            disk_number_start: self.disk_number_start,
            internal_attributes: self.internal_attributes,
            external_attributes: self.external_attributes,
            local_header_offset: self.local_header_offset,
        })
    }

    /// Local header for this entry. With the data descriptor flag set the crc
    /// and sizes are written as zero and left to the trailing descriptor.
    pub fn local_header(&self) -> Result<LocalFileHeader> {
        let deferred = self.has_data_descriptor();
        let known = |value: u32| if deferred { 0 } else { value };

        Ok(LocalFileHeader {
            version_needed: self.version_needed,
            flags: self.flags,
            compression_method: self.compression_method,
            last_mod_time: self.modified.time,
            last_mod_date: self.modified.date,
            crc32: known(self.crc32),
            compressed_size: known(self.compressed_size),
            uncompressed_size: known(self.uncompressed_size),
            file_name_length: field_len(&self.name, "file name")?,
            extra_field_length: field_len(&self.extra_field, "extra field")?,
        })
    }

    /// Encoded length of this entry's central directory record.
    pub fn central_record_len(&self) -> usize {
        CENTRAL_DIRECTORY_HEADER_LEN + self.name.len() + self.extra_field.len() + self.comment.len()
    }

    /// Appends the full central directory record to `out`.
    pub(crate) fn encode_central(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.central_header()?.encode());
        out.extend_from_slice(&self.name);
        out.extend_from_slice(&self.extra_field);
        out.extend_from_slice(&self.comment);
        Ok(())
    }
}

fn field_len(field: &[u8], what: &'static str) -> Result<u16> {
    u16::try_from(field.len()).map_err(|_| ZipError::LimitExceeded(what))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ZipEntry {
        let mut entry = ZipEntry::new("dir/hello.txt", CompressionMethod::Deflate, DosDateTime::default());
        entry.crc32 = 0x1234_5678;
        entry.compressed_size = 40;
        entry.uncompressed_size = 100;
        entry.local_header_offset = 512;
        entry.external_attributes = 0o100644 << 16;
        entry.internal_attributes = 1;
        entry.extra_field = vec![0xca, 0xfe, 0, 0];
        entry.comment = b"note".to_vec();
        entry
    }

    #[test]
    fn central_round_trip() {
        let entry = sample();
        let header = entry.central_header().unwrap();
        let decoded = CentralDirectoryHeader::decode(&header.encode()).unwrap();
        let rebuilt = ZipEntry::from_central(
            &decoded,
            entry.name.clone(),
            entry.extra_field.clone(),
            entry.comment.clone(),
        );
        assert_eq!(rebuilt, entry);

        let mut bytes = Vec::new();
        entry.encode_central(&mut bytes).unwrap();
        assert_eq!(bytes.len(), entry.central_record_len());
    }

    #[test]
    fn deferred_local_header_zeroes_sizes() {
        let mut entry = sample();
        entry.flags.set(GeneralPurposeFlag::DATA_DESCRIPTOR, true);
        let header = entry.local_header().unwrap();
        assert_eq!((header.crc32, header.compressed_size, header.uncompressed_size), (0, 0, 0));
        assert_eq!(header.file_name_length, 13);
        assert_eq!(header.extra_field_length, 4);

        entry.flags.set(GeneralPurposeFlag::DATA_DESCRIPTOR, false);
        let header = entry.local_header().unwrap();
        assert_eq!(header.crc32, 0x1234_5678);
        assert_eq!(header.uncompressed_size, 100);
    }

    #[test]
    fn names_decode_by_flag() {
        let utf8 = ZipEntry::new("répertoire/é.txt", CompressionMethod::Stored, DosDateTime::default());
        assert!(utf8.flags.is_utf8());
        assert_eq!(utf8.name(), "répertoire/é.txt");

        let mut latin1 = utf8.clone();
        latin1.flags.set(GeneralPurposeFlag::UTF8, false);
        latin1.name = vec![b'd', 0xe9, b'j', 0xe0];
        assert_eq!(latin1.name(), "déjà");

        let ascii = ZipEntry::new("plain.txt", CompressionMethod::Stored, DosDateTime::default());
        assert!(!ascii.flags.is_utf8());
        assert_eq!(ascii.name(), "plain.txt");
    }

    #[test]
    fn unsupported_methods_are_rejected() {
        let mut entry = sample();
        assert_eq!(entry.compression().unwrap(), CompressionMethod::Deflate);
        entry.compression_method = 93;
        assert!(matches!(
            entry.compression(),
            Err(ZipError::UnsupportedCompressionMethod(93))
        ));
    }

    #[test]
    fn oversized_name_is_rejected() {
        let mut entry = sample();
        entry.name = vec![b'a'; 70_000];
        assert!(matches!(entry.local_header(), Err(ZipError::LimitExceeded("file name"))));
    }

    #[test]
    fn directories() {
        let dir = ZipEntry::new("folder/", CompressionMethod::Stored, DosDateTime::default());
        assert!(dir.is_dir());
        assert!(!sample().is_dir());
    }
}
