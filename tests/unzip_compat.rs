use std::path::Path;
use std::process::Command;
use tempfile::tempdir;
use zip_codec::{CompressionMethod, EntryOptions, StreamingZipWriter, WriterOptions};

// These tests write archives with the library and then call `unzip -t` to verify compatibility.
// If `unzip` is not present on the system, the tests are skipped.

fn unzip_available() -> bool {
    if Command::new("unzip").arg("-v").output().is_err() {
        eprintln!("skipping test: `unzip` not found");
        return false;
    }
    true
}

fn assert_unzip_accepts(zip_path: &Path) {
    let output = Command::new("unzip")
        .arg("-t")
        .arg(zip_path)
        .output()
        .expect("failed to run unzip");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        output.status.success(),
        "unzip reported failure: {} {}",
        stdout,
        stderr
    );
}

#[test]
fn unzip_compatibility_streaming() {
    if !unzip_available() {
        return;
    }

    let dir = tempdir().unwrap();
    let zip_path = dir.path().join("compat.zip");

    {
        let mut writer = StreamingZipWriter::new(&zip_path).unwrap();
        writer.start_entry("hello.txt").unwrap();
        writer.write_data(b"hello from test").unwrap();
        writer.end_entry().unwrap();

        writer.start_entry("big.bin").unwrap();
        // write a moderate amount of data to ensure non-trivial archive
        for _ in 0..1024 {
            writer.write_data(&[0u8; 1024]).unwrap();
        }
        writer.end_entry().unwrap();

        writer
            .start_entry_with(EntryOptions::new("stored.txt").method(CompressionMethod::Stored))
            .unwrap();
        writer.write_data(b"kept as is").unwrap();
        writer.finish_with_comment(b"written by zip-codec").unwrap();
    }

    assert_unzip_accepts(&zip_path);
}

#[test]
fn unzip_compatibility_patched() {
    if !unzip_available() {
        return;
    }

    let dir = tempdir().unwrap();
    let zip_path = dir.path().join("patched.zip");

    {
        let file = std::fs::File::create(&zip_path).unwrap();
        let mut writer = StreamingZipWriter::with_patching(file, WriterOptions::default()).unwrap();
        writer.start_entry("nested/dir/file.txt").unwrap();
        writer.write_data(&b"patched header ".repeat(500)).unwrap();
        writer.end_entry().unwrap();
        writer
            .write_entry(EntryOptions::new("whole.txt"), b"written in one go")
            .unwrap();
        writer.finish().unwrap();
    }

    assert_unzip_accepts(&zip_path);
}
