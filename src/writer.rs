//! Streaming ZIP writer that compresses data on-the-fly without temp files
//!
//! Entries are written one at a time: [`StreamingZipWriter::start_entry`]
//! emits the local header, [`StreamingZipWriter::write_data`] pushes payload
//! through the compressor and [`StreamingZipWriter::end_entry`] settles the
//! crc and sizes.
//!
//! By default those go into a data descriptor after the payload, which works
//! for any `Write` sink (sockets, pipes, `Vec<u8>`). A writer built with
//! [`StreamingZipWriter::with_patching`] instead seeks back and fills in the
//! local header, producing archives without descriptors.

use crate::date::DosDateTime;
use crate::entry::{CompressionMethod, ZipEntry};
use crate::error::{Result, ZipError};
use crate::layout::{
    EndOfCentralDirectory, GeneralPurposeFlag, LOCAL_HEADER_CRC_OFFSET, MAX_COMMENT_LEN,
};
use crate::reader::ZipReader;
use crc32fast::Hasher as Crc32;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, trace};

/// Largest payload a classic (non-ZIP64) entry can describe
const MAX_ENTRY_SIZE: u64 = u32::MAX as u64;

/// Rewrites bytes at an absolute sink position, then returns to where it was.
type Patcher<W> = fn(&mut W, u64, &[u8]) -> io::Result<()>;

/// Archive-wide writer configuration
#[derive(Debug, Clone)]
pub struct WriterOptions {
    method: CompressionMethod,
    compression_level: u32,
    descriptor_signature: bool,
    store_incompressible: bool,
    flush_threshold: Option<usize>,
    last_modified: Option<DosDateTime>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            method: CompressionMethod::Deflate,
            compression_level: 6,
            descriptor_signature: true,
            store_incompressible: false,
            flush_threshold: None,
            last_modified: None,
        }
    }
}

impl WriterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compression method for entries that don't choose their own
    pub fn method(mut self, method: CompressionMethod) -> Self {
        self.method = method;
        self
    }

    /// DEFLATE level, 0-9
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    /// Whether data descriptors carry the optional `PK\x07\x08` signature.
    /// On by default; most readers expect it.
    pub fn descriptor_signature(mut self, enabled: bool) -> Self {
        self.descriptor_signature = enabled;
        self
    }

    /// For [`StreamingZipWriter::write_entry`]: keep the data stored when
    /// deflating would not make it smaller.
    pub fn store_incompressible(mut self, enabled: bool) -> Self {
        self.store_incompressible = enabled;
        self
    }

    /// Compressed bytes held per entry before they are pushed to the sink.
    /// Without this the threshold adapts to the entry's expected size.
    pub fn flush_threshold(mut self, bytes: usize) -> Self {
        self.flush_threshold = Some(bytes.max(1));
        self
    }

    /// Modification time for entries that don't set one (default: now)
    pub fn last_modified(mut self, modified: DosDateTime) -> Self {
        self.last_modified = Some(modified);
        self
    }
}

/// Per-entry settings
#[derive(Debug, Clone)]
pub struct EntryOptions {
    name: String,
    method: Option<CompressionMethod>,
    last_modified: Option<DosDateTime>,
    external_attributes: u32,
    internal_attributes: u16,
    extra_field: Vec<u8>,
    comment: Vec<u8>,
    expected_size: Option<u64>,
}

impl EntryOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: None,
            last_modified: None,
            external_attributes: 0,
            internal_attributes: 0,
            extra_field: Vec::new(),
            comment: Vec::new(),
            expected_size: None,
        }
    }

    pub fn method(mut self, method: CompressionMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn last_modified(mut self, modified: DosDateTime) -> Self {
        self.last_modified = Some(modified);
        self
    }

    /// Host-specific attributes, stored verbatim in the central record
    pub fn external_attributes(mut self, attributes: u32) -> Self {
        self.external_attributes = attributes;
        self
    }

    pub fn internal_attributes(mut self, attributes: u16) -> Self {
        self.internal_attributes = attributes;
        self
    }

    /// Raw extra field, written to both the local header and the central record
    pub fn extra_field(mut self, extra: impl Into<Vec<u8>>) -> Self {
        self.extra_field = extra.into();
        self
    }

    pub fn comment(mut self, comment: impl Into<Vec<u8>>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Uncompressed size the caller intends to write.
    ///
    /// Sizes the compression buffer, and writing more than this fails with
    /// [`ZipError::PayloadOverrun`].
    pub fn expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Building,
    Failed,
    Finished,
}

/// Sink position and open-entry state taken before an operation
#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    position: u64,
    entry_open: bool,
}

/// Streaming ZIP writer that compresses data on-the-fly
pub struct StreamingZipWriter<W: Write> {
    output: OffsetWriter<W>,
    entries: Vec<ZipEntry>,
    current_entry: Option<CurrentEntry>,
    options: WriterOptions,
    /// Set only for sinks that can seek back and patch headers
    patcher: Option<Patcher<W>>,
    /// Sink position where the archive starts
    sink_base: u64,
    state: WriterState,
}

/// Entry being written to ZIP
struct CurrentEntry {
    entry: ZipEntry,
    encoder: Box<dyn CompressorWrite>,
    counter: CrcCounter,
    size_limit: u64,
    /// crc and sizes go to a trailing data descriptor instead of a patched header
    streaming: bool,
}

trait CompressorWrite: Write {
    fn finish_compression(self: Box<Self>) -> Result<CompressedBuffer>;
    fn get_buffer_mut(&mut self) -> &mut CompressedBuffer;
}

struct DeflateCompressor {
    encoder: DeflateEncoder<CompressedBuffer>,
}

impl Write for DeflateCompressor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

impl CompressorWrite for DeflateCompressor {
    fn finish_compression(self: Box<Self>) -> Result<CompressedBuffer> {
        Ok(self.encoder.finish()?)
    }

    fn get_buffer_mut(&mut self) -> &mut CompressedBuffer {
        self.encoder.get_mut()
    }
}

/// Identity "compressor" for stored entries
struct StoredCompressor {
    buffer: CompressedBuffer,
}

impl Write for StoredCompressor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CompressorWrite for StoredCompressor {
    fn finish_compression(self: Box<Self>) -> Result<CompressedBuffer> {
        Ok(self.buffer)
    }

    fn get_buffer_mut(&mut self) -> &mut CompressedBuffer {
        &mut self.buffer
    }
}

fn new_compressor(
    method: CompressionMethod,
    level: u32,
    buffer: CompressedBuffer,
) -> Box<dyn CompressorWrite> {
    match method {
        CompressionMethod::Deflate => Box::new(DeflateCompressor {
            encoder: DeflateEncoder::new(buffer, Compression::new(level)),
        }),
        CompressionMethod::Stored => Box::new(StoredCompressor { buffer }),
    }
}

/// Metadata tracker for CRC and byte counts
struct CrcCounter {
    crc: Crc32,
    uncompressed_count: u64,
    compressed_count: u64,
}

impl CrcCounter {
    fn new() -> Self {
        Self {
            crc: Crc32::new(),
            uncompressed_count: 0,
            compressed_count: 0,
        }
    }

    fn update_uncompressed(&mut self, data: &[u8]) {
        self.crc.update(data);
        self.uncompressed_count += data.len() as u64;
    }

    fn add_compressed(&mut self, count: u64) {
        self.compressed_count += count;
    }

    fn finalize(&self) -> u32 {
        self.crc.clone().finalize()
    }
}

/// Buffered writer for compressed data with adaptive sizing
///
/// Automatically adjusts buffer capacity and flush threshold based on data size hints
/// to optimize memory usage and performance for different file sizes.
struct CompressedBuffer {
    buffer: Vec<u8>,
    flush_threshold: usize,
}

impl CompressedBuffer {
    /// Create buffer with adaptive sizing based on expected data size
    ///
    /// - Tiny files (<10KB): 8KB initial, 256KB threshold
    /// - Small files (<100KB): 32KB initial, 512KB threshold
    /// - Medium files (<1MB): 128KB initial, 2MB threshold
    /// - Large files (<10MB): 256KB initial, 4MB threshold
    /// - Unknown or larger: 512KB initial, 8MB threshold
    fn with_size_hint(size_hint: Option<u64>) -> Self {
        let (initial_capacity, flush_threshold) = match size_hint {
            Some(size) if size < 10_000 => (8 * 1024, 256 * 1024),
            Some(size) if size < 100_000 => (32 * 1024, 512 * 1024),
            Some(size) if size < 1_000_000 => (128 * 1024, 2 * 1024 * 1024),
            Some(size) if size < 10_000_000 => (256 * 1024, 4 * 1024 * 1024),
            _ => (512 * 1024, 8 * 1024 * 1024),
        };

        Self {
            buffer: Vec::with_capacity(initial_capacity),
            flush_threshold,
        }
    }

    fn with_threshold(flush_threshold: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(flush_threshold.min(512 * 1024)),
            flush_threshold,
        }
    }

    fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    fn should_flush(&self) -> bool {
        self.buffer.len() >= self.flush_threshold
    }
}

impl Write for CompressedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Counts bytes written so local header offsets are known without seeking
struct OffsetWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> OffsetWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    fn position(&self) -> u64 {
        self.written
    }

    fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for OffsetWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.written += count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn patch_in_place<W: Write + Seek>(sink: &mut W, at: u64, bytes: &[u8]) -> io::Result<()> {
    let resume = sink.stream_position()?;
    sink.seek(SeekFrom::Start(at))?;
    sink.write_all(bytes)?;
    sink.seek(SeekFrom::Start(resume))?;
    Ok(())
}

impl StreamingZipWriter<File> {
    /// Create a new ZIP writer with default compression level (6) using DEFLATE
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_compression(path, 6)
    }

    /// Create a new ZIP writer with custom compression level (0-9) using DEFLATE
    pub fn with_compression<P: AsRef<Path>>(path: P, compression_level: u32) -> Result<Self> {
        Self::with_method(path, CompressionMethod::Deflate, compression_level)
    }

    /// Create a new ZIP writer with specified compression method and level
    pub fn with_method<P: AsRef<Path>>(
        path: P,
        method: CompressionMethod,
        compression_level: u32,
    ) -> Result<Self> {
        let output = File::create(path)?;
        Self::from_writer_with_method(output, method, compression_level)
    }
}

impl<W: Write> StreamingZipWriter<W> {
    /// Create a new ZIP writer from an arbitrary writer with default options
    pub fn from_writer(writer: W) -> Result<Self> {
        Self::from_writer_with_options(writer, WriterOptions::default())
    }

    /// Create a new ZIP writer from an arbitrary writer with specified compression method and level
    pub fn from_writer_with_method(
        writer: W,
        method: CompressionMethod,
        compression_level: u32,
    ) -> Result<Self> {
        Self::from_writer_with_options(
            writer,
            WriterOptions::default()
                .method(method)
                .compression_level(compression_level),
        )
    }

    /// Create a streaming-mode writer: sizes follow each entry in a data descriptor
    pub fn from_writer_with_options(writer: W, options: WriterOptions) -> Result<Self> {
        Ok(Self {
            output: OffsetWriter::new(writer),
            entries: Vec::new(),
            current_entry: None,
            options,
            patcher: None,
            sink_base: 0,
            state: WriterState::Building,
        })
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Entries closed so far, in archive order
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Whether entries are completed with data descriptors (as opposed to patching)
    pub fn is_streaming(&self) -> bool {
        self.patcher.is_none()
    }

    /// Start a new entry (file) in the ZIP
    pub fn start_entry(&mut self, name: &str) -> Result<()> {
        self.start_entry_with(EntryOptions::new(name))
    }

    /// Start a new entry with explicit options
    ///
    /// The local header is written immediately. Fails with
    /// [`ZipError::EntryAlreadyOpen`] while a previous entry is still open.
    pub fn start_entry_with(&mut self, options: EntryOptions) -> Result<()> {
        self.ensure_writable()?;
        if self.current_entry.is_some() {
            return Err(ZipError::EntryAlreadyOpen);
        }

        let before = self.checkpoint();
        let result = self.open_entry(options);
        self.track(before, result)
    }

    /// Write uncompressed data to current entry (will be compressed on-the-fly)
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let before = self.checkpoint();
        let result = self.write_payload(data);
        self.track(before, result)
    }

    /// Close the current entry, settling its crc and sizes
    pub fn end_entry(&mut self) -> Result<()> {
        self.ensure_writable()?;
        if self.current_entry.is_none() {
            return Err(ZipError::NoEntryOpen);
        }

        let before = self.checkpoint();
        let result = self.finish_current_entry();
        self.track(before, result)
    }

    /// Write a complete entry whose data is already in memory
    ///
    /// The data is compressed up front, so the local header carries the final
    /// crc and sizes and no data descriptor is needed.
    pub fn write_entry(&mut self, options: EntryOptions, data: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        if self.current_entry.is_some() {
            return Err(ZipError::EntryAlreadyOpen);
        }

        let before = self.checkpoint();
        let result = self.write_whole_entry(options, data);
        self.track(before, result)
    }

    /// Copy an entry from another archive without recompressing it
    ///
    /// Metadata comes from the source's central directory; the new local
    /// header carries the final crc and sizes.
    pub fn copy_raw_entry<R: Read + Seek>(
        &mut self,
        source: &mut ZipReader<R>,
        entry: &ZipEntry,
    ) -> Result<()> {
        self.ensure_writable()?;
        if self.current_entry.is_some() {
            return Err(ZipError::EntryAlreadyOpen);
        }

        let before = self.checkpoint();
        let result = self.copy_raw(source, entry);
        self.track(before, result)
    }

    /// Finish the ZIP file: close any open entry, then write the central
    /// directory and end record
    pub fn finish(&mut self) -> Result<()> {
        self.finish_with_comment(b"")
    }

    /// Like [`StreamingZipWriter::finish`], with an archive comment
    pub fn finish_with_comment(&mut self, comment: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        if comment.len() > MAX_COMMENT_LEN {
            return Err(ZipError::LimitExceeded("archive comment"));
        }

        let before = self.checkpoint();
        let result = self.write_directory(comment);
        let result = self.track(before, result);
        if result.is_ok() {
            self.state = WriterState::Finished;
        }
        result
    }

    /// Hand back the sink
    pub fn into_inner(self) -> W {
        self.output.into_inner()
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.state {
            WriterState::Building => Ok(()),
            WriterState::Finished => Err(ZipError::ArchiveClosed),
            WriterState::Failed => Err(ZipError::WriterFailed),
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            position: self.output.position(),
            entry_open: self.current_entry.is_some(),
        }
    }

    /// A sink failure, or any failure after bytes reached the sink or an open
    /// entry was dropped, leaves a half-written archive behind; refuse all
    /// further work.
    fn track<T>(&mut self, before: Checkpoint, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            let wrote = self.output.position() != before.position;
            let dropped_entry = before.entry_open && self.current_entry.is_none();
            if matches!(err, ZipError::Io(_)) || wrote || dropped_entry {
                debug!(error = %err, wrote, dropped_entry, "writer is no longer usable");
                self.state = WriterState::Failed;
                self.current_entry = None;
            }
        }
        result
    }

    fn next_header_offset(&self) -> Result<u32> {
        u32::try_from(self.output.position())
            .map_err(|_| ZipError::LimitExceeded("local header offset"))
    }

    fn new_entry(&self, options: &EntryOptions) -> Result<ZipEntry> {
        if self.entries.len() >= usize::from(u16::MAX) {
            return Err(ZipError::LimitExceeded("entry count"));
        }

        let method = options.method.unwrap_or(self.options.method);
        let modified = options
            .last_modified
            .or(self.options.last_modified)
            .unwrap_or_else(DosDateTime::now);

        let mut entry = ZipEntry::new(&options.name, method, modified);
        entry.local_header_offset = self.next_header_offset()?;
        entry.external_attributes = options.external_attributes;
        entry.internal_attributes = options.internal_attributes;
        entry.extra_field = options.extra_field.clone();
        entry.comment = options.comment.clone();

        // Reject names/extra/comments that don't fit before anything is written
        entry.central_header()?;
        Ok(entry)
    }

    fn write_local_header(&mut self, entry: &ZipEntry) -> Result<()> {
        let header = entry.local_header()?;
        self.output.write_all(&header.encode())?;
        self.output.write_all(&entry.name)?;
        self.output.write_all(&entry.extra_field)?;
        trace!(name = %entry.name(), ?header, "wrote local file header");
        Ok(())
    }

    fn open_entry(&mut self, options: EntryOptions) -> Result<()> {
        let mut entry = self.new_entry(&options)?;
        let method = entry.compression()?;
        let streaming = self.patcher.is_none();
        entry
            .flags
            .set(GeneralPurposeFlag::DATA_DESCRIPTOR, streaming);

        self.write_local_header(&entry)?;

        let buffer = match self.options.flush_threshold {
            Some(threshold) => CompressedBuffer::with_threshold(threshold),
            None => CompressedBuffer::with_size_hint(options.expected_size),
        };

        debug!(
            name = %entry.name(),
            offset = entry.local_header_offset,
            streaming,
            "started entry"
        );

        self.current_entry = Some(CurrentEntry {
            entry,
            encoder: new_compressor(method, self.options.compression_level, buffer),
            counter: CrcCounter::new(),
            size_limit: options.expected_size.unwrap_or(MAX_ENTRY_SIZE).min(MAX_ENTRY_SIZE),
            streaming,
        });

        Ok(())
    }

    fn write_payload(&mut self, data: &[u8]) -> Result<()> {
        let entry = self
            .current_entry
            .as_mut()
            .ok_or(ZipError::NoEntryOpen)?;

        let attempted = entry.counter.uncompressed_count + data.len() as u64;
        if attempted > entry.size_limit {
            return Err(ZipError::PayloadOverrun {
                limit: entry.size_limit,
                attempted,
            });
        }

        // Update CRC and size with uncompressed data
        entry.counter.update_uncompressed(data);
        entry.encoder.write_all(data)?;

        // Keep memory bounded by draining the compressed buffer to the sink
        let buffer = entry.encoder.get_buffer_mut();
        if buffer.should_flush() {
            let compressed_data = buffer.take();
            self.output.write_all(&compressed_data)?;
            entry.counter.add_compressed(compressed_data.len() as u64);
        }

        Ok(())
    }

    /// Finish current entry and write its data descriptor or patch its header
    fn finish_current_entry(&mut self) -> Result<()> {
        let Some(current) = self.current_entry.take() else {
            return Ok(());
        };
        let CurrentEntry {
            mut entry,
            encoder,
            mut counter,
            streaming,
            ..
        } = current;

        // Finish compression and flush whatever is still buffered
        let mut buffer = encoder.finish_compression()?;
        let remaining_data = buffer.take();
        if !remaining_data.is_empty() {
            self.output.write_all(&remaining_data)?;
            counter.add_compressed(remaining_data.len() as u64);
        }

        entry.crc32 = counter.finalize();
        entry.compressed_size = classic_size(counter.compressed_count)?;
        entry.uncompressed_size = classic_size(counter.uncompressed_count)?;
        let descriptor = entry.data_descriptor();

        match self.patcher {
            Some(patch_at) if !streaming => {
                let at = self.sink_base + u64::from(entry.local_header_offset) + LOCAL_HEADER_CRC_OFFSET;
                patch_at(self.output.get_mut(), at, &descriptor.encode())?;
            }
            _ if self.options.descriptor_signature => {
                self.output.write_all(&descriptor.encode_signed())?;
            }
            _ => {
                self.output.write_all(&descriptor.encode())?;
            }
        }

        debug!(
            name = %entry.name(),
            crc32 = entry.crc32,
            compressed = entry.compressed_size,
            uncompressed = entry.uncompressed_size,
            "finished entry"
        );

        self.entries.push(entry);
        Ok(())
    }

    fn write_whole_entry(&mut self, options: EntryOptions, data: &[u8]) -> Result<()> {
        let limit = options.expected_size.unwrap_or(MAX_ENTRY_SIZE).min(MAX_ENTRY_SIZE);
        if data.len() as u64 > limit {
            return Err(ZipError::PayloadOverrun {
                limit,
                attempted: data.len() as u64,
            });
        }

        let mut entry = self.new_entry(&options)?;
        let mut method = entry.compression()?;
        let mut payload = compress_all(method, self.options.compression_level, data)?;

        if method == CompressionMethod::Deflate
            && self.options.store_incompressible
            && payload.len() >= data.len()
        {
            trace!(name = %entry.name(), "deflate did not help, storing instead");
            method = CompressionMethod::Stored;
            payload = Cow::Borrowed(data);
        }

        entry.compression_method = method.to_zip_method();
        entry.version_needed = method.version_needed();
        entry.crc32 = crc32fast::hash(data);
        entry.compressed_size = classic_size(payload.len() as u64)?;
        entry.uncompressed_size = classic_size(data.len() as u64)?;

        self.write_local_header(&entry)?;
        self.output.write_all(&payload)?;

        debug!(
            name = %entry.name(),
            compressed = entry.compressed_size,
            uncompressed = entry.uncompressed_size,
            "wrote whole entry"
        );

        self.entries.push(entry);
        Ok(())
    }

    fn copy_raw<R: Read + Seek>(&mut self, source: &mut ZipReader<R>, entry: &ZipEntry) -> Result<()> {
        let mut copied = entry.clone();
        copied.local_header_offset = self.next_header_offset()?;
        copied
            .flags
            .set(GeneralPurposeFlag::DATA_DESCRIPTOR, false);
        if self.entries.len() >= usize::from(u16::MAX) {
            return Err(ZipError::LimitExceeded("entry count"));
        }

        // Open the source first so a bad source entry leaves the sink untouched
        let mut stream = source.entry_stream(entry)?;
        self.write_local_header(&copied)?;

        let copied_len = io::copy(&mut stream, &mut self.output)?;
        if copied_len != u64::from(entry.compressed_size) {
            return Err(ZipError::ArchiveMalformed(format!(
                "source entry {} ended after {} of {} bytes",
                entry.name(),
                copied_len,
                entry.compressed_size
            )));
        }

        debug!(name = %copied.name(), bytes = copied_len, "copied raw entry");
        self.entries.push(copied);
        Ok(())
    }

    fn write_directory(&mut self, comment: &[u8]) -> Result<()> {
        self.finish_current_entry()?;

        let entry_count = u16::try_from(self.entries.len())
            .map_err(|_| ZipError::LimitExceeded("entry count"))?;
        let directory_offset = u32::try_from(self.output.position())
            .map_err(|_| ZipError::LimitExceeded("central directory offset"))?;

        let mut record = Vec::new();
        for entry in &self.entries {
            record.clear();
            entry.encode_central(&mut record)?;
            self.output.write_all(&record)?;
        }

        let directory_size = u32::try_from(self.output.position() - u64::from(directory_offset))
            .map_err(|_| ZipError::LimitExceeded("central directory size"))?;

        // Length was checked against MAX_COMMENT_LEN by the caller
        let end_record = EndOfCentralDirectory::new(
            entry_count,
            directory_size,
            directory_offset,
            comment.len() as u16,
        );
        self.output.write_all(&end_record.encode())?;
        self.output.write_all(comment)?;
        self.output.flush()?;

        debug!(
            entries = entry_count,
            directory_offset,
            directory_size,
            "finished zip archive"
        );
        Ok(())
    }
}

impl<W: Write + Seek> StreamingZipWriter<W> {
    /// Create a writer that seeks back to patch each local header
    ///
    /// Entries carry their crc and sizes in the local header and have no data
    /// descriptor, which the most conservative readers prefer. The archive
    /// starts at the sink's current position.
    pub fn with_patching(mut writer: W, options: WriterOptions) -> Result<Self> {
        let sink_base = writer.stream_position()?;
        Ok(Self {
            output: OffsetWriter::new(writer),
            entries: Vec::new(),
            current_entry: None,
            options,
            patcher: Some(patch_in_place::<W>),
            sink_base,
            state: WriterState::Building,
        })
    }
}

fn classic_size(size: u64) -> Result<u32> {
    u32::try_from(size).map_err(|_| ZipError::PayloadOverrun {
        limit: MAX_ENTRY_SIZE,
        attempted: size,
    })
}

fn compress_all(method: CompressionMethod, level: u32, data: &[u8]) -> Result<Cow<'_, [u8]>> {
    match method {
        CompressionMethod::Stored => Ok(Cow::Borrowed(data)),
        CompressionMethod::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level));
            encoder.write_all(data)?;
            Ok(Cow::Owned(encoder.finish()?))
        }
    }
}
