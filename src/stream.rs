//! Forward-only reader for non-seekable sources
//!
//! Walks local headers from the front of the stream and never looks at the
//! central directory, so it works on pipes and sockets. Entries written with
//! a data descriptor have their sizes recovered on the way: a deflate payload
//! ends where the decoder reports end of stream, a stored payload ends at the
//! first signed descriptor whose sizes and crc match the bytes seen so far.

use crate::entry::{CompressionMethod, ZipEntry};
use crate::error::{Result, ZipError};
use crate::layout::{
    DataDescriptor, LocalFileHeader, CENTRAL_DIRECTORY_SIGNATURE, DATA_DESCRIPTOR_LEN,
    DATA_DESCRIPTOR_SIGNATURE, END_OF_CENTRAL_DIRECTORY_SIGNATURE, LOCAL_FILE_HEADER_LEN,
    LOCAL_FILE_HEADER_SIGNATURE, SIGNATURE_LEN, SIGNED_DATA_DESCRIPTOR_LEN,
};
use crc32fast::Hasher as Crc32;
use flate2::bufread;
use flate2::read::DeflateDecoder;
use std::io::{self, BufRead, BufReader, Read, Write};
use tracing::{debug, trace, warn};

/// Bytes of stored payload handed to the caller at a time while scanning
const STORED_SCAN_CHUNK: usize = 8 * 1024;

/// Sequential ZIP reader over any `Read`
///
/// ```no_run
/// use std::io;
/// use zip_codec::ZipStreamReader;
///
/// let mut archive = ZipStreamReader::new(io::stdin().lock());
/// while archive.next_entry()?.is_some() {
///     let entry = archive.read_data(&mut io::sink())?;
///     println!("{} {} bytes", entry.name(), entry.uncompressed_size);
/// }
/// # Ok::<(), zip_codec::ZipError>(())
/// ```
pub struct ZipStreamReader<R: Read> {
    source: CountingReader<BufReader<R>>,
    /// Header read, payload not yet consumed
    pending: Option<ZipEntry>,
    finished: bool,
}

impl<R: Read> ZipStreamReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source: CountingReader {
                inner: BufReader::new(source),
                consumed: 0,
            },
            pending: None,
            finished: false,
        }
    }

    /// Advance to the next local header
    ///
    /// Any payload of the previous entry that was not read is skipped (and
    /// still checked). Returns `None` once the central directory is reached.
    /// For entries with a data descriptor the returned crc and sizes are zero;
    /// [`ZipStreamReader::read_data`] returns the completed entry.
    pub fn next_entry(&mut self) -> Result<Option<ZipEntry>> {
        if let Some(mut skipped) = self.pending.take() {
            trace!(name = %skipped.name(), "skipping unread entry data");
            if skipped.compression().is_err() && !skipped.has_data_descriptor() {
                self.skip_raw(&skipped)?;
            } else {
                self.consume_data(&mut skipped, &mut io::sink())?;
            }
        }
        if self.finished {
            return Ok(None);
        }

        let offset = self.source.consumed;
        let mut fixed = [0u8; LOCAL_FILE_HEADER_LEN];
        let read = read_up_to(&mut self.source, &mut fixed[..SIGNATURE_LEN])?;
        if read == 0 {
            warn!(offset, "stream ended without a central directory");
            self.finished = true;
            return Ok(None);
        }
        if read < SIGNATURE_LEN {
            return Err(ZipError::ArchiveMalformed(format!(
                "stream ended inside a record signature at {}",
                offset
            )));
        }

        let signature = u32::from_le_bytes([fixed[0], fixed[1], fixed[2], fixed[3]]);
        if signature == CENTRAL_DIRECTORY_SIGNATURE || signature == END_OF_CENTRAL_DIRECTORY_SIGNATURE {
            debug!(offset, "reached central directory");
            self.finished = true;
            return Ok(None);
        }
        if signature != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(ZipError::BadSignature {
                record: "local file header",
                expected: LOCAL_FILE_HEADER_SIGNATURE,
                actual: signature,
            });
        }

        self.source.read_exact(&mut fixed[SIGNATURE_LEN..])?;
        let header = LocalFileHeader::decode(&fixed)?;

        let mut name = vec![0u8; usize::from(header.file_name_length)];
        self.source.read_exact(&mut name)?;
        let mut extra_field = vec![0u8; usize::from(header.extra_field_length)];
        self.source.read_exact(&mut extra_field)?;

        let local_offset =
            u32::try_from(offset).map_err(|_| ZipError::LimitExceeded("local header offset"))?;
        let entry = ZipEntry::from_local(&header, name, extra_field, local_offset);

        trace!(
            name = %entry.name(),
            offset,
            deferred = entry.has_data_descriptor(),
            "read local file header"
        );

        self.pending = Some(entry.clone());
        Ok(Some(entry))
    }

    /// Decompress the current entry's payload into `out`
    ///
    /// The crc and uncompressed size are verified. Returns the entry with
    /// crc and sizes filled in from the data descriptor when it had one.
    /// An unsupported method is rejected without consuming anything, so the
    /// next [`ZipStreamReader::next_entry`] can still step over the entry
    /// when its size is known.
    pub fn read_data<W: Write>(&mut self, out: &mut W) -> Result<ZipEntry> {
        let mut entry = self.pending.take().ok_or(ZipError::NoEntryOpen)?;
        if let Err(err) = entry.compression() {
            self.pending = Some(entry);
            return Err(err);
        }
        self.consume_data(&mut entry, out)?;
        Ok(entry)
    }

    /// Hand back the source, positioned wherever reading stopped
    pub fn into_inner(self) -> BufReader<R> {
        self.source.inner
    }

    /// Step over a known-size payload without decoding it
    fn skip_raw(&mut self, entry: &ZipEntry) -> Result<()> {
        let mut payload = (&mut self.source).take(u64::from(entry.compressed_size));
        io::copy(&mut payload, &mut io::sink())?;
        if payload.limit() != 0 {
            return Err(ZipError::ArchiveMalformed(format!(
                "stream ended {} bytes before the end of {}",
                payload.limit(),
                entry.name()
            )));
        }
        debug!(name = %entry.name(), method = entry.compression_method, "skipped undecodable entry");
        Ok(())
    }

    fn consume_data<W: Write>(&mut self, entry: &mut ZipEntry, out: &mut W) -> Result<()> {
        let method = entry.compression()?;
        let mut sink = HashingWriter::new(out);

        if entry.has_data_descriptor() {
            let descriptor = match method {
                CompressionMethod::Deflate => {
                    let start = self.source.consumed;
                    io::copy(&mut bufread::DeflateDecoder::new(&mut self.source), &mut sink)?;
                    let compressed = self.source.consumed - start;
                    self.read_descriptor(compressed)?
                }
                CompressionMethod::Stored => self.scan_stored(&mut sink)?,
            };
            entry.crc32 = descriptor.crc32;
            entry.compressed_size = descriptor.compressed_size;
            entry.uncompressed_size = descriptor.uncompressed_size;
        } else {
            let mut payload = (&mut self.source).take(u64::from(entry.compressed_size));
            match method {
                CompressionMethod::Stored => io::copy(&mut payload, &mut sink)?,
                CompressionMethod::Deflate => io::copy(&mut DeflateDecoder::new(&mut payload), &mut sink)?,
            };
            // Trailing bytes the decoder did not need still belong to this entry
            io::copy(&mut payload, &mut io::sink())?;
            if payload.limit() != 0 {
                return Err(ZipError::ArchiveMalformed(format!(
                    "stream ended {} bytes before the end of {}",
                    payload.limit(),
                    entry.name()
                )));
            }
        }

        if sink.count != u64::from(entry.uncompressed_size) {
            return Err(ZipError::ArchiveMalformed(format!(
                "{} decompressed to {} bytes, header says {}",
                entry.name(),
                sink.count,
                entry.uncompressed_size
            )));
        }
        let actual = sink.hasher.finalize();
        if actual != entry.crc32 {
            return Err(ZipError::ChecksumMismatch {
                expected: entry.crc32,
                actual,
            });
        }

        debug!(
            name = %entry.name(),
            compressed = entry.compressed_size,
            uncompressed = entry.uncompressed_size,
            "read entry data"
        );
        Ok(())
    }

    /// Read the descriptor following a payload of known compressed length
    ///
    /// Reads the unsigned form first and only takes four more bytes when
    /// the signed form is the one that fits, so nothing past the descriptor
    /// is consumed.
    fn read_descriptor(&mut self, compressed: u64) -> Result<DataDescriptor> {
        let compressed = u32::try_from(compressed).map_err(|_| ZipError::PayloadOverrun {
            limit: u64::from(u32::MAX),
            attempted: compressed,
        })?;

        let mut bytes = [0u8; SIGNED_DATA_DESCRIPTOR_LEN];
        self.source.read_exact(&mut bytes[..DATA_DESCRIPTOR_LEN])?;
        let (mut descriptor, _) = DataDescriptor::decode(&bytes[..DATA_DESCRIPTOR_LEN])?;

        let signed = bytes[..SIGNATURE_LEN] == DATA_DESCRIPTOR_SIGNATURE.to_le_bytes();
        if signed && descriptor.compressed_size != compressed {
            self.source
                .read_exact(&mut bytes[DATA_DESCRIPTOR_LEN..])?;
            descriptor = DataDescriptor::decode(&bytes)?.0;
        }

        if descriptor.compressed_size != compressed {
            return Err(ZipError::ArchiveMalformed(format!(
                "data descriptor claims {} compressed bytes, payload had {}",
                descriptor.compressed_size, compressed
            )));
        }
        Ok(descriptor)
    }

    /// Find the end of a stored payload of unknown length
    ///
    /// Slides a 16-byte window over the stream; the payload ends where the
    /// window holds a signed descriptor agreeing with everything before it.
    fn scan_stored<W: Write>(&mut self, sink: &mut HashingWriter<'_, W>) -> Result<DataDescriptor> {
        let mut window = [0u8; SIGNED_DATA_DESCRIPTOR_LEN];
        self.source.read_exact(&mut window)?;
        let mut chunk = Vec::with_capacity(STORED_SCAN_CHUNK);
        let mut seen = sink.count;

        loop {
            if window[..SIGNATURE_LEN] == DATA_DESCRIPTOR_SIGNATURE.to_le_bytes() {
                let (candidate, _) = DataDescriptor::decode(&window)?;
                if u64::from(candidate.compressed_size) == seen
                    && candidate.uncompressed_size == candidate.compressed_size
                {
                    let mut hasher = sink.hasher.clone();
                    hasher.update(&chunk);
                    if hasher.finalize() == candidate.crc32 {
                        sink.write_all(&chunk)?;
                        return Ok(candidate);
                    }
                }
            }

            chunk.push(window[0]);
            seen += 1;
            if chunk.len() == STORED_SCAN_CHUNK {
                sink.write_all(&chunk)?;
                chunk.clear();
            }

            let mut next = [0u8; 1];
            if read_up_to(&mut self.source, &mut next)? == 0 {
                return Err(ZipError::ArchiveMalformed(
                    "stored entry has no matching data descriptor".to_string(),
                ));
            }
            window.copy_within(1.., 0);
            window[SIGNED_DATA_DESCRIPTOR_LEN - 1] = next[0];
        }
    }
}

/// Tracks how many bytes the consumer has taken out of the buffer
struct CountingReader<B> {
    inner: B,
    consumed: u64,
}

impl<B: BufRead> Read for CountingReader<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.consumed += count as u64;
        Ok(count)
    }
}

impl<B: BufRead> BufRead for CountingReader<B> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt);
        self.consumed += amt as u64;
    }
}

struct HashingWriter<'a, W> {
    inner: &'a mut W,
    hasher: Crc32,
    count: u64,
}

impl<'a, W: Write> HashingWriter<'a, W> {
    fn new(inner: &'a mut W) -> Self {
        Self {
            inner,
            hasher: Crc32::new(),
            count: 0,
        }
    }
}

impl<W: Write> Write for HashingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.hasher.update(&buf[..count]);
        self.count += count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Like `read_exact`, but a clean end of stream returns the bytes read so far
fn read_up_to<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(count) => filled += count,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
