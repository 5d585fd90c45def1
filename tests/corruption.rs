use std::io::Cursor;
use zip_codec::layout::{
    CentralDirectoryHeader, DataDescriptor, EndOfCentralDirectory, LocalFileHeader,
    CENTRAL_DIRECTORY_HEADER_LEN, END_OF_CENTRAL_DIRECTORY_LEN, LOCAL_FILE_HEADER_LEN,
};
use zip_codec::{CompressionMethod, DosDateTime, StreamingZipWriter, WriterOptions, ZipError, ZipReader};

fn archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let options = WriterOptions::new()
        .method(CompressionMethod::Stored)
        .last_modified(DosDateTime::default());
    let mut writer = StreamingZipWriter::from_writer_with_options(Vec::new(), options).unwrap();
    for (name, data) in entries {
        writer.start_entry(name).unwrap();
        writer.write_data(data).unwrap();
        writer.end_entry().unwrap();
    }
    writer.finish().unwrap();
    writer.into_inner()
}

fn end_record(bytes: &[u8]) -> (usize, EndOfCentralDirectory) {
    let at = bytes.len() - END_OF_CENTRAL_DIRECTORY_LEN;
    let mut fixed = [0u8; END_OF_CENTRAL_DIRECTORY_LEN];
    fixed.copy_from_slice(&bytes[at..]);
    (at, EndOfCentralDirectory::decode(&fixed).unwrap())
}

fn open(bytes: Vec<u8>) -> zip_codec::Result<ZipReader<Cursor<Vec<u8>>>> {
    ZipReader::from_reader(Cursor::new(bytes))
}

#[test]
fn every_signature_byte_is_checked() {
    let local = LocalFileHeader::default().encode();
    let central = CentralDirectoryHeader::default().encode();
    let end = EndOfCentralDirectory::default().encode();
    let descriptor = DataDescriptor::default().encode_signed();

    for byte in 0..4 {
        let mut bad = local;
        bad[byte] ^= 0x40;
        assert!(matches!(
            LocalFileHeader::decode(&bad),
            Err(ZipError::BadSignature { record: "local file header", .. })
        ));

        let mut bad = central;
        bad[byte] ^= 0x40;
        assert!(matches!(
            CentralDirectoryHeader::decode(&bad),
            Err(ZipError::BadSignature { record: "central directory", .. })
        ));

        let mut bad = end;
        bad[byte] ^= 0x40;
        assert!(matches!(
            EndOfCentralDirectory::decode(&bad),
            Err(ZipError::BadSignature { .. })
        ));

        // A damaged descriptor signature just reads as the unsigned form
        let mut bad = descriptor;
        bad[byte] ^= 0x40;
        assert_eq!(DataDescriptor::decode(&bad).unwrap().1, 12);
    }
}

#[test]
fn damaged_local_header_fails_the_read_not_the_open() {
    let mut bytes = archive(&[("a.txt", b"alpha"), ("b.txt", b"beta")]);
    bytes[1] ^= 0xff;

    let mut reader = open(bytes).unwrap();
    assert!(matches!(
        reader.read_entry_by_name("a.txt"),
        Err(ZipError::BadSignature { record: "local file header", .. })
    ));
    assert_eq!(reader.read_entry_by_name("b.txt").unwrap(), b"beta");
}

#[test]
fn end_record_claiming_extra_entries() {
    let mut bytes = archive(&[("a.txt", b"alpha"), ("b.txt", b"beta")]);
    let (at, mut end) = end_record(&bytes);
    end.entries_this_disk += 1;
    end.total_entries += 1;
    bytes[at..].copy_from_slice(&end.encode());

    assert!(matches!(
        open(bytes),
        Err(ZipError::DirectoryTruncated { expected: 3, decoded: 2 })
    ));
}

#[test]
fn damaged_central_record_truncates_directory() {
    let mut bytes = archive(&[("a.txt", b"alpha"), ("b.txt", b"beta")]);
    let (_, end) = end_record(&bytes);
    let second = end.central_directory_offset as usize + CENTRAL_DIRECTORY_HEADER_LEN + "a.txt".len();
    bytes[second] ^= 0xff;

    assert!(matches!(
        open(bytes),
        Err(ZipError::DirectoryTruncated { expected: 2, decoded: 1 })
    ));
}

#[test]
fn directory_overlapping_end_record_is_malformed() {
    let mut bytes = archive(&[("a.txt", b"alpha")]);
    let (at, mut end) = end_record(&bytes);
    end.central_directory_offset += 1;
    bytes[at..].copy_from_slice(&end.encode());

    assert!(matches!(open(bytes), Err(ZipError::ArchiveMalformed(_))));
}

#[test]
fn missing_end_record() {
    let mut bytes = archive(&[("a.txt", b"alpha")]);
    let at = bytes.len() - END_OF_CENTRAL_DIRECTORY_LEN;
    bytes[at] = b'X';

    assert!(matches!(open(bytes), Err(ZipError::ArchiveMalformed(_))));
    assert!(matches!(open(vec![0u8; 10]), Err(ZipError::ArchiveMalformed(_))));
}

#[test]
fn corrupted_payload_fails_checksum() {
    let mut bytes = archive(&[("a.txt", b"alpha")]);
    bytes[LOCAL_FILE_HEADER_LEN + "a.txt".len()] ^= 0x01;

    let mut reader = open(bytes).unwrap();
    assert!(matches!(
        reader.read_entry_by_name("a.txt"),
        Err(ZipError::ChecksumMismatch { .. })
    ));
}

#[test]
fn unsupported_method_is_rejected_on_read() {
    let mut bytes = archive(&[("a.txt", b"alpha")]);
    let (_, end) = end_record(&bytes);
    // compression method lives at offset 10 of the central record
    let method_at = end.central_directory_offset as usize + 10;
    bytes[method_at..method_at + 2].copy_from_slice(&12u16.to_le_bytes());

    let mut reader = open(bytes).unwrap();
    let entry = reader.entries()[0].clone();
    assert_eq!(entry.compression_method, 12);
    assert!(matches!(
        reader.read_entry(&entry),
        Err(ZipError::UnsupportedCompressionMethod(12))
    ));
    // The raw bytes are still reachable
    assert_eq!(reader.entry_stream(&entry).unwrap().remaining(), 5);
}

#[test]
fn local_name_length_must_match_directory() {
    let mut bytes = archive(&[("a.txt", b"alpha")]);
    // file name length lives at offset 26 of the local header
    bytes[26..28].copy_from_slice(&4u16.to_le_bytes());

    let mut reader = open(bytes).unwrap();
    assert!(matches!(
        reader.read_entry_by_name("a.txt"),
        Err(ZipError::ArchiveMalformed(_))
    ));
}

#[test]
fn truncated_source() {
    let bytes = archive(&[("a.txt", b"alpha")]);
    let (_, end) = end_record(&bytes);
    // Keep the end record, drop everything before the central directory ends
    let tail = bytes[end.central_directory_offset as usize + 10..].to_vec();
    assert!(open(tail).is_err());
}

#[test]
fn inflated_uncompressed_size_is_caught_on_read() {
    let mut bytes = archive(&[("a.txt", b"alpha")]);
    let (_, end) = end_record(&bytes);
    // uncompressed size lives at offset 24 of the central record
    let size_at = end.central_directory_offset as usize + 24;
    bytes[size_at..size_at + 4].copy_from_slice(&u32::MAX.to_le_bytes());

    let mut reader = open(bytes).unwrap();
    assert_eq!(reader.entries()[0].uncompressed_size, u32::MAX);
    assert!(matches!(
        reader.read_entry_by_name("a.txt"),
        Err(ZipError::ArchiveMalformed(_))
    ));
}
