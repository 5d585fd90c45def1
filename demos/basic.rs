//! Basic usage example for zip-codec

use std::io;
use zip_codec::{EntryOptions, StreamingZipWriter, ZipReader, ZipStreamReader};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== zip-codec Basic Example ===\n");

    // Create a ZIP file
    println!("Creating test.zip...");
    let mut writer = StreamingZipWriter::new("test.zip")?;

    writer.start_entry("hello.txt")?;
    writer.write_data(b"Hello, zip-codec!")?;
    writer.end_entry()?;

    writer.start_entry("folder/nested.txt")?;
    writer.write_data(b"This is a nested file.")?;
    writer.end_entry()?;

    // Whole entries skip the data descriptor
    writer.write_entry(EntryOptions::new("data.txt"), b"Line 1\nLine 2\nLine 3\n")?;

    writer.finish_with_comment(b"basic example")?;
    println!("✓ Created test.zip\n");

    // Read the ZIP file
    println!("Reading test.zip...");
    let mut reader = ZipReader::open("test.zip")?;

    println!("Entries in ZIP:");
    for entry in reader.entries() {
        println!(
            "  - {} ({} bytes, crc {:08x}, {})",
            entry.name(),
            entry.uncompressed_size,
            entry.crc32,
            if entry.has_data_descriptor() { "streamed" } else { "sized" }
        );
    }
    println!("Comment: {}\n", String::from_utf8_lossy(reader.comment()));

    // Read specific file
    println!("Reading hello.txt:");
    let data = reader.read_entry_by_name("hello.txt")?;
    println!("  Content: {}", String::from_utf8_lossy(&data));
    println!();

    println!("Reading data.txt:");
    let data = reader.read_entry_by_name("data.txt")?;
    println!("  Content:\n{}", String::from_utf8_lossy(&data));

    // Walk the same file front to back, as a pipe reader would
    println!("Forward-only pass:");
    let mut stream = ZipStreamReader::new(std::fs::File::open("test.zip")?);
    while stream.next_entry()?.is_some() {
        let entry = stream.read_data(&mut io::sink())?;
        println!("  - {} ({} bytes)", entry.name(), entry.uncompressed_size);
    }

    println!("✓ All done!");

    Ok(())
}
