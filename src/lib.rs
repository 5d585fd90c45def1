//! # zip-codec: Streaming ZIP Container Codec
//!
//! `zip-codec` reads and writes classic ZIP archives (no ZIP64) with a small,
//! constant memory footprint. Entries are stored or DEFLATE-compressed.
//!
//! ## Features
//!
//! - **Random-access read**: [`ZipReader`] decodes the central directory once, then
//!   streams any entry, verifying its CRC-32 on the way
//! - **Forward-only read**: [`ZipStreamReader`] walks a non-seekable source front to back
//! - **Streaming write**: [`StreamingZipWriter`] compresses on-the-fly into any `Write`,
//!   completing entries with data descriptors, or patches headers in place on seekable sinks
//! - **Raw copy**: move entries between archives without recompressing them
//!
//! ## Quick Start
//!
//! ### Reading a ZIP file
//!
//! ```no_run
//! use zip_codec::ZipReader;
//!
//! let mut reader = ZipReader::open("archive.zip")?;
//!
//! // List all entries
//! for entry in reader.entries() {
//!     println!("{}: {} bytes", entry.name(), entry.uncompressed_size);
//! }
//!
//! // Read a specific file
//! let data = reader.read_entry_by_name("file.txt")?;
//! # Ok::<(), zip_codec::ZipError>(())
//! ```
//!
//! ### Writing a ZIP file
//!
//! ```no_run
//! use zip_codec::StreamingZipWriter;
//!
//! let mut writer = StreamingZipWriter::new("output.zip")?;
//!
//! writer.start_entry("file1.txt")?;
//! writer.write_data(b"Hello, World!")?;
//!
//! // Starting the next entry requires closing the previous one
//! writer.end_entry()?;
//! writer.start_entry("file2.txt")?;
//! writer.write_data(b"Another file")?;
//!
//! // finish() closes the open entry before writing the central directory
//! writer.finish()?;
//! # Ok::<(), zip_codec::ZipError>(())
//! ```
//!
//! ### Writing in memory, without data descriptors
//!
//! ```
//! use std::io::Cursor;
//! use zip_codec::{EntryOptions, StreamingZipWriter, WriterOptions, ZipReader};
//!
//! let mut writer = StreamingZipWriter::with_patching(Cursor::new(Vec::new()), WriterOptions::default())?;
//! writer.start_entry_with(EntryOptions::new("data.txt").comment("generated"))?;
//! writer.write_data(b"In-memory ZIP content")?;
//! writer.finish_with_comment(b"built in memory")?;
//!
//! let mut reader = ZipReader::from_reader(writer.into_inner())?;
//! assert_eq!(reader.comment(), b"built in memory");
//! assert_eq!(reader.read_entry_by_name("data.txt")?, b"In-memory ZIP content");
//! # Ok::<(), zip_codec::ZipError>(())
//! ```

pub mod date;
pub mod entry;
pub mod error;
pub mod layout;
pub mod reader;
pub mod stream;
pub mod writer;

pub use date::DosDateTime;
pub use entry::{CompressionMethod, ZipEntry};
pub use error::{Result, ZipError};
pub use reader::{EntryStream, ZipReader};
pub use stream::ZipStreamReader;
pub use writer::{EntryOptions, StreamingZipWriter, WriterOptions};
