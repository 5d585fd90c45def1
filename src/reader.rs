//! Streaming ZIP reader - locates the central directory and streams entries on demand
//!
//! Only the decoded central directory is kept in memory. Entry payloads are
//! read straight from the source through a stream bounded to the entry's
//! compressed size, so archives of any size can be read with constant memory.

use crate::entry::{CompressionMethod, ZipEntry};
use crate::error::{Result, ZipError};
use crate::layout::{
    CentralDirectoryHeader, EndOfCentralDirectory, LocalFileHeader, CENTRAL_DIRECTORY_HEADER_LEN,
    END_OF_CENTRAL_DIRECTORY_LEN, END_OF_CENTRAL_DIRECTORY_SIGNATURE, LOCAL_FILE_HEADER_LEN,
    MAX_COMMENT_LEN,
};
use crc32fast::Hasher as Crc32;
use flate2::read::DeflateDecoder;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Take};
use std::path::Path;
use tracing::{debug, trace, warn};

/// Furthest from the end of the source an end record can start
const END_RECORD_SEARCH_WINDOW: u64 = (END_OF_CENTRAL_DIRECTORY_LEN + MAX_COMMENT_LEN) as u64;

/// Largest buffer reserved up front from an entry's declared size
const MAX_READ_RESERVATION: u32 = 1 << 20;

/// Where the central directory lives, as found from the end record
#[derive(Debug, Clone, Copy)]
struct DirectoryLocation {
    end_record_offset: u64,
    end_record: EndOfCentralDirectory,
    /// Bytes of unrelated data in front of the archive (self-extractor stubs)
    archive_offset: u64,
}

impl DirectoryLocation {
    fn directory_start(&self) -> u64 {
        self.archive_offset + u64::from(self.end_record.central_directory_offset)
    }
}

/// Streaming ZIP archive reader
///
/// Opening decodes the whole central directory up front; a corrupt directory
/// fails the open instead of yielding a partial entry list. After that the
/// reader can stream any entry, in any order, as often as needed.
pub struct ZipReader<R: Read + Seek> {
    source: R,
    entries: Vec<ZipEntry>,
    names: HashMap<Vec<u8>, Vec<usize>>,
    comment: Vec<u8>,
    archive_offset: u64,
}

impl ZipReader<BufReader<File>> {
    /// Open a ZIP file and read its central directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> ZipReader<R> {
    /// Read the central directory of an archive held by any seekable source
    pub fn from_reader(mut source: R) -> Result<Self> {
        let (location, entries, comment) = open_directory(&mut source)?;

        let mut names: HashMap<Vec<u8>, Vec<usize>> = HashMap::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            names.entry(entry.name.clone()).or_default().push(index);
        }

        debug!(
            entries = entries.len(),
            directory_offset = location.directory_start(),
            archive_offset = location.archive_offset,
            "opened zip archive"
        );

        Ok(ZipReader {
            source,
            entries,
            names,
            comment,
            archive_offset: location.archive_offset,
        })
    }

    /// Get list of all entries in the ZIP, in central directory order
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The archive comment from the end record
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// Number of bytes found in front of the archive proper
    pub fn archive_offset(&self) -> u64 {
        self.archive_offset
    }

    /// Find the first entry with this name
    pub fn find_entry(&self, name: &str) -> Option<&ZipEntry> {
        self.find_entries(name).next()
    }

    /// Every entry with this name, in directory order. ZIP allows duplicates.
    pub fn find_entries<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a ZipEntry> + 'a {
        self.names
            .get(name.as_bytes())
            .into_iter()
            .flatten()
            .map(move |&index| &self.entries[index])
    }

    /// Raw (still compressed) bytes of an entry
    ///
    /// Seeks to the local header, checks it against the directory entry and
    /// returns a stream of exactly `compressed_size` bytes. The directory is
    /// authoritative for sizes and crc since a streamed local header may
    /// carry zeros there.
    pub fn entry_stream(&mut self, entry: &ZipEntry) -> Result<EntryStream<'_, R>> {
        let header_offset = self.archive_offset + u64::from(entry.local_header_offset);
        self.source.seek(SeekFrom::Start(header_offset))?;

        let mut fixed = [0u8; LOCAL_FILE_HEADER_LEN];
        self.source.read_exact(&mut fixed)?;
        let local = LocalFileHeader::decode(&fixed)?;

        if usize::from(local.file_name_length) != entry.name.len() {
            return Err(ZipError::ArchiveMalformed(format!(
                "local header at {} has a {}-byte name, central directory says {} for {}",
                header_offset,
                local.file_name_length,
                entry.name.len(),
                entry.name()
            )));
        }

        let mut local_name = vec![0u8; entry.name.len()];
        self.source.read_exact(&mut local_name)?;
        if local_name != entry.name {
            warn!(
                central = %entry.name(),
                local = %String::from_utf8_lossy(&local_name),
                "local header name differs from central directory"
            );
        }

        self.source
            .seek(SeekFrom::Current(i64::from(local.extra_field_length)))?;

        trace!(
            name = %entry.name(),
            offset = header_offset,
            size = entry.compressed_size,
            "opened entry stream"
        );

        let limit = u64::from(entry.compressed_size);
        Ok(EntryStream {
            inner: (&mut self.source).take(limit),
            limit,
        })
    }

    /// Get a streaming reader for an entry (for large files)
    ///
    /// Returns a reader that decompresses on-the-fly and checks the crc and
    /// uncompressed size once the end of the entry is reached.
    pub fn read_entry_streaming(&mut self, entry: &ZipEntry) -> Result<Box<dyn Read + '_>> {
        let method = entry.compression()?;
        let (crc32, uncompressed_size) = (entry.crc32, entry.uncompressed_size);
        let stream = self.entry_stream(entry)?;

        let decoded: Box<dyn Read + '_> = match method {
            CompressionMethod::Stored => Box::new(stream),
            CompressionMethod::Deflate => Box::new(DeflateDecoder::new(stream)),
        };

        Ok(Box::new(CrcReader::new(decoded, crc32, uncompressed_size)))
    }

    /// Get a streaming reader for an entry by name
    pub fn read_entry_streaming_by_name(&mut self, name: &str) -> Result<Box<dyn Read + '_>> {
        let entry = self
            .find_entry(name)
            .ok_or_else(|| ZipError::EntryNotFound(name.to_string()))?
            .clone();

        self.read_entry_streaming(&entry)
    }

    /// Read an entry's decompressed data into a vector
    pub fn read_entry(&mut self, entry: &ZipEntry) -> Result<Vec<u8>> {
        let capacity = entry.uncompressed_size.min(MAX_READ_RESERVATION);
        let mut data = Vec::with_capacity(capacity as usize);
        self.read_entry_streaming(entry)?.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Read an entry by name
    pub fn read_entry_by_name(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .find_entry(name)
            .ok_or_else(|| ZipError::EntryNotFound(name.to_string()))?
            .clone();

        self.read_entry(&entry)
    }

    /// Close the reader and hand back the source
    pub fn into_inner(self) -> R {
        self.source
    }
}

/// The compressed bytes of one entry, bounded to its declared size
///
/// Reading through [`Read`] stops at the boundary with an ordinary
/// end-of-stream; [`EntryStream::read_payload`] refuses to cross it.
pub struct EntryStream<'a, R> {
    inner: Take<&'a mut R>,
    limit: u64,
}

impl<R: Read> EntryStream<'_, R> {
    /// Bytes left before the end of the entry
    pub fn remaining(&self) -> u64 {
        self.inner.limit()
    }

    /// Fill `buf` completely, failing with [`ZipError::PayloadOverrun`] if
    /// that would read past the entry's compressed size.
    pub fn read_payload(&mut self, buf: &mut [u8]) -> Result<()> {
        let remaining = self.remaining();
        if buf.len() as u64 > remaining {
            return Err(ZipError::PayloadOverrun {
                limit: self.limit,
                attempted: self.limit - remaining + buf.len() as u64,
            });
        }
        self.inner.read_exact(buf)?;
        Ok(())
    }
}

impl<R: Read> Read for EntryStream<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Verifies crc and size of decompressed data at end-of-stream
struct CrcReader<R> {
    inner: R,
    hasher: Crc32,
    expected_crc: u32,
    expected_size: u64,
    seen: u64,
    verified: bool,
}

impl<R: Read> CrcReader<R> {
    fn new(inner: R, expected_crc: u32, expected_size: u32) -> Self {
        Self {
            inner,
            hasher: Crc32::new(),
            expected_crc,
            expected_size: u64::from(expected_size),
            seen: 0,
            verified: false,
        }
    }

    fn verify(&mut self) -> io::Result<()> {
        if self.verified {
            return Ok(());
        }
        self.verified = true;

        if self.seen != self.expected_size {
            return Err(ZipError::ArchiveMalformed(format!(
                "entry decompressed to {} bytes, directory says {}",
                self.seen, self.expected_size
            ))
            .into_io());
        }

        let actual = self.hasher.clone().finalize();
        if actual != self.expected_crc {
            return Err(ZipError::ChecksumMismatch {
                expected: self.expected_crc,
                actual,
            }
            .into_io());
        }
        Ok(())
    }
}

impl<R: Read> Read for CrcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        if count == 0 && !buf.is_empty() {
            self.verify()?;
            return Ok(0);
        }

        self.seen += count as u64;
        if self.seen > self.expected_size {
            return Err(ZipError::PayloadOverrun {
                limit: self.expected_size,
                attempted: self.seen,
            }
            .into_io());
        }

        self.hasher.update(&buf[..count]);
        Ok(count)
    }
}

/// Find the end of central directory record and decode the directory it
/// points at
///
/// The record may be followed by a comment of up to 65535 bytes, so the last
/// 22 + 65535 bytes are searched. Candidates whose comment ends exactly at the
/// end of the source are tried first, earliest first, since an archive
/// comment may itself contain a complete end record. Candidates whose comment
/// merely fits come after, nearest the end first. A candidate
/// that does not lead to a decodable directory is skipped; if none does, the
/// error from the first one tried is returned.
fn open_directory<R: Read + Seek>(source: &mut R) -> Result<(DirectoryLocation, Vec<ZipEntry>, Vec<u8>)> {
    let mut first_error = None;

    for (offset, end_record) in end_record_candidates(source)? {
        let attempt = resolve_location(offset, end_record).and_then(|location| {
            let entries = read_central_directory(source, &location)?;
            let comment = read_archive_comment(source, &location)?;
            Ok((location, entries, comment))
        });

        match attempt {
            Ok(found) => return Ok(found),
            Err(ZipError::Io(err)) => return Err(ZipError::Io(err)),
            Err(err) => {
                debug!(offset, error = %err, "end record candidate rejected");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    Err(first_error.unwrap_or_else(|| {
        ZipError::ArchiveMalformed("end of central directory not found".to_string())
    }))
}

/// Every end record signature in the search window whose comment fits, in
/// the order they should be tried
fn end_record_candidates<R: Read + Seek>(source: &mut R) -> Result<Vec<(u64, EndOfCentralDirectory)>> {
    let source_len = source.seek(SeekFrom::End(0))?;
    if source_len < END_OF_CENTRAL_DIRECTORY_LEN as u64 {
        return Err(ZipError::ArchiveMalformed(format!(
            "{} bytes is too short for a zip archive",
            source_len
        )));
    }

    let search_start = source_len.saturating_sub(END_RECORD_SEARCH_WINDOW);
    source.seek(SeekFrom::Start(search_start))?;

    let mut window = Vec::with_capacity((source_len - search_start) as usize);
    source
        .by_ref()
        .take(source_len - search_start)
        .read_to_end(&mut window)?;

    let signature = END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes();
    let last_candidate = window.len().saturating_sub(END_OF_CENTRAL_DIRECTORY_LEN);

    let mut exact = Vec::new();
    let mut fitting = Vec::new();
    for pos in 0..=last_candidate {
        if window[pos..pos + 4] != signature {
            continue;
        }

        let mut fixed = [0u8; END_OF_CENTRAL_DIRECTORY_LEN];
        fixed.copy_from_slice(&window[pos..pos + END_OF_CENTRAL_DIRECTORY_LEN]);
        let end_record = EndOfCentralDirectory::decode(&fixed)?;
        let offset = search_start + pos as u64;

        let comment_end = pos + END_OF_CENTRAL_DIRECTORY_LEN + usize::from(end_record.comment_length);
        if comment_end == window.len() {
            exact.push((offset, end_record));
        } else if comment_end < window.len() {
            fitting.push((offset, end_record));
        } else {
            trace!(offset, "skipping end record candidate whose comment overruns the source");
        }
    }

    if exact.is_empty() && !fitting.is_empty() {
        warn!("no end record reaches the end of the source, trailing data ignored");
    }
    exact.extend(fitting.into_iter().rev());
    Ok(exact)
}

fn resolve_location(end_record_offset: u64, end_record: EndOfCentralDirectory) -> Result<DirectoryLocation> {
    if !end_record.is_single_disk() {
        return Err(ZipError::ArchiveMalformed(format!(
            "multi-disk archives are not supported (disk {}, directory on disk {}, {} of {} entries here)",
            end_record.disk_number,
            end_record.disk_with_central_directory,
            end_record.entries_this_disk,
            end_record.total_entries
        )));
    }

    let directory_end = u64::from(end_record.central_directory_offset)
        + u64::from(end_record.central_directory_size);
    if directory_end > end_record_offset {
        return Err(ZipError::ArchiveMalformed(format!(
            "central directory ends at {} but the end record starts at {}",
            directory_end, end_record_offset
        )));
    }

    let archive_offset = end_record_offset - directory_end;
    if archive_offset > 0 {
        warn!(archive_offset, "archive is preceded by unrelated data, rebasing offsets");
    }

    trace!(?end_record, end_record_offset, "located end of central directory");

    Ok(DirectoryLocation {
        end_record_offset,
        end_record,
        archive_offset,
    })
}

fn read_archive_comment<R: Read + Seek>(source: &mut R, location: &DirectoryLocation) -> Result<Vec<u8>> {
    let comment_start = location.end_record_offset + END_OF_CENTRAL_DIRECTORY_LEN as u64;
    source.seek(SeekFrom::Start(comment_start))?;

    let mut comment = vec![0u8; usize::from(location.end_record.comment_length)];
    source.read_exact(&mut comment)?;
    Ok(comment)
}

/// Read the central directory described by the end record
fn read_central_directory<R: Read + Seek>(
    source: &mut R,
    location: &DirectoryLocation,
) -> Result<Vec<ZipEntry>> {
    let expected = location.end_record.total_entries;
    source.seek(SeekFrom::Start(location.directory_start()))?;

    let mut entries = Vec::with_capacity(usize::from(expected));
    let mut consumed = 0u64;

    for decoded in 0..expected {
        let truncated = ZipError::DirectoryTruncated { expected, decoded };

        let mut fixed = [0u8; CENTRAL_DIRECTORY_HEADER_LEN];
        if let Err(err) = source.read_exact(&mut fixed) {
            return Err(eof_as(err, truncated));
        }

        let header = match CentralDirectoryHeader::decode(&fixed) {
            Ok(header) => header,
            Err(ZipError::BadSignature { actual, .. }) => {
                debug!(
                    decoded,
                    expected,
                    found = %format!("{:#010x}", actual),
                    "central directory ended early"
                );
                return Err(truncated);
            }
            Err(err) => return Err(err),
        };

        let mut variable = vec![0u8; header.variable_len()];
        if let Err(err) = source.read_exact(&mut variable) {
            return Err(eof_as(err, truncated));
        }

        let comment = variable.split_off(
            usize::from(header.file_name_length) + usize::from(header.extra_field_length),
        );
        let extra_field = variable.split_off(usize::from(header.file_name_length));
        let entry = ZipEntry::from_central(&header, variable, extra_field, comment);

        trace!(
            name = %entry.name(),
            method = entry.compression_method,
            compressed = entry.compressed_size,
            uncompressed = entry.uncompressed_size,
            "decoded central directory record"
        );

        consumed += entry.central_record_len() as u64;
        entries.push(entry);
    }

    let declared = u64::from(location.end_record.central_directory_size);
    if consumed != declared {
        return Err(ZipError::ArchiveMalformed(format!(
            "central directory records take {} bytes, end record declares {}",
            consumed, declared
        )));
    }

    Ok(entries)
}

fn eof_as(err: io::Error, replacement: ZipError) -> ZipError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        replacement
    } else {
        err.into()
    }
}
