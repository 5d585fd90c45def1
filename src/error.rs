//! Error types for zip-codec

use std::io;

use thiserror::Error;

/// Result type for zip-codec operations
pub type Result<T> = std::result::Result<T, ZipError>;

/// Error types that can occur while encoding or decoding an archive
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ZipError {
    /// A record's magic number did not match (corruption or a wrong offset)
    #[error("bad {record} signature (expected {expected:#010x}, found {actual:#010x})")]
    BadSignature {
        record: &'static str,
        expected: u32,
        actual: u32,
    },
    /// End record missing, or structural counts/sizes inconsistent
    #[error("malformed archive: {0}")]
    ArchiveMalformed(String),
    /// Fewer valid central directory records than the end record declares
    #[error("central directory truncated: expected {expected} records, decoded {decoded}")]
    DirectoryTruncated { expected: u16, decoded: u16 },
    /// Compression method other than Stored or Deflate
    #[error("unsupported compression method: {0}")]
    UnsupportedCompressionMethod(u16),
    /// An entry was started while another one was still open
    #[error("an entry is already open")]
    EntryAlreadyOpen,
    /// Payload was written with no entry open
    #[error("no entry is open")]
    NoEntryOpen,
    /// The archive has already been finalized
    #[error("archive has been finalized")]
    ArchiveClosed,
    /// An earlier failure left partial output behind and the writer unusable
    #[error("writer is unusable after an earlier failure left partial output")]
    WriterFailed,
    /// More bytes written or read than the declared size permits
    #[error("payload overrun: limit is {limit} bytes, attempted {attempted}")]
    PayloadOverrun { limit: u64, attempted: u64 },
    /// A value that cannot be represented in classic ZIP fields
    #[error("{0} exceeds the classic ZIP limit")]
    LimitExceeded(&'static str),
    /// Entry not found in the archive
    #[error("entry not found: {0}")]
    EntryNotFound(String),
    /// Timestamp outside the MS-DOS range
    #[error("timestamp outside the MS-DOS range 1980-2107")]
    DateOutOfRange,
    /// Decompressed data disagrees with the directory
    #[error("checksum mismatch (expected crc {expected:#010x}, computed {actual:#010x})")]
    ChecksumMismatch { expected: u32, actual: u32 },
    /// I/O failure from the underlying source or sink
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl ZipError {
    /// Wraps this error so it can travel through a `std::io::Read` implementation.
    pub(crate) fn into_io(self) -> io::Error {
        match self {
            ZipError::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

impl From<io::Error> for ZipError {
    fn from(err: io::Error) -> Self {
        // Codec errors raised inside Read impls come back out unchanged
        match err.get_ref().map(|inner| inner.is::<ZipError>()) {
            Some(true) => match err.into_inner().map(|inner| inner.downcast::<ZipError>()) {
                Some(Ok(inner)) => *inner,
                _ => ZipError::ArchiveMalformed("unreadable wrapped error".to_string()),
            },
            _ => ZipError::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_codec_error_round_trips_through_io() {
        let io_err = ZipError::PayloadOverrun {
            limit: 2,
            attempted: 3,
        }
        .into_io();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);

        match ZipError::from(io_err) {
            ZipError::PayloadOverrun { limit, attempted } => {
                assert_eq!((limit, attempted), (2, 3));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn plain_io_error_stays_io() {
        let err = ZipError::from(io::Error::new(io::ErrorKind::UnexpectedEof, "short"));
        assert!(matches!(err, ZipError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }
}
