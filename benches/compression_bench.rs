use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Cursor;
use tempfile::NamedTempFile;
use zip_codec::{CompressionMethod, EntryOptions, StreamingZipWriter, WriterOptions};

fn generate_compressible_data(size: usize) -> Vec<u8> {
    // Pattern that compresses well
    let pattern = b"The quick brown fox jumps over the lazy dog. ";
    let mut data = Vec::with_capacity(size);
    while data.len() < size {
        data.extend_from_slice(pattern);
    }
    data.truncate(size);
    data
}

fn generate_random_data(size: usize) -> Vec<u8> {
    // Pseudo-random data that doesn't compress well
    let mut data = Vec::with_capacity(size);
    let mut state = 0x12345678u32;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

fn bench_compression_levels(c: &mut Criterion) {
    let sizes = vec![
        1024,             // 1KB
        10 * 1024,        // 10KB
        100 * 1024,       // 100KB
        1024 * 1024,      // 1MB
        10 * 1024 * 1024, // 10MB
    ];

    for size in sizes {
        let mut group = c.benchmark_group(format!("write_compressible_{}", format_size(size)));
        group.throughput(Throughput::Bytes(size as u64));

        let data = generate_compressible_data(size);

        for level in [1, 6, 9] {
            group.bench_with_input(
                BenchmarkId::new(format!("deflate_level_{}", level), size),
                &data,
                |b, data| {
                    b.iter(|| {
                        let temp = NamedTempFile::new().unwrap();
                        let mut writer = StreamingZipWriter::with_compression(temp.path(), level).unwrap();
                        writer.start_entry("test.bin").unwrap();
                        writer.write_data(black_box(data)).unwrap();
                        writer.finish().unwrap();
                    });
                },
            );
        }

        group.bench_with_input(BenchmarkId::new("stored", size), &data, |b, data| {
            b.iter(|| {
                let temp = NamedTempFile::new().unwrap();
                let mut writer =
                    StreamingZipWriter::with_method(temp.path(), CompressionMethod::Stored, 0).unwrap();
                writer.start_entry("test.bin").unwrap();
                writer.write_data(black_box(data)).unwrap();
                writer.finish().unwrap();
            });
        });

        group.finish();
    }
}

fn bench_write_modes(c: &mut Criterion) {
    let size = 1024 * 1024; // 1MB
    let data = generate_random_data(size);

    let mut group = c.benchmark_group("write_mode_comparison");
    group.throughput(Throughput::Bytes(size as u64));

    group.bench_function("data_descriptor", |b| {
        b.iter(|| {
            let mut writer = StreamingZipWriter::from_writer(Vec::with_capacity(size)).unwrap();
            writer.start_entry("random.bin").unwrap();
            for chunk in data.chunks(64 * 1024) {
                writer.write_data(black_box(chunk)).unwrap();
            }
            writer.finish().unwrap();
            black_box(writer.into_inner());
        });
    });

    group.bench_function("patched_header", |b| {
        b.iter(|| {
            let sink = Cursor::new(Vec::with_capacity(size));
            let mut writer = StreamingZipWriter::with_patching(sink, WriterOptions::default()).unwrap();
            writer.start_entry("random.bin").unwrap();
            for chunk in data.chunks(64 * 1024) {
                writer.write_data(black_box(chunk)).unwrap();
            }
            writer.finish().unwrap();
            black_box(writer.into_inner());
        });
    });

    group.bench_function("whole_entry_store_fallback", |b| {
        b.iter(|| {
            let options = WriterOptions::default().store_incompressible(true);
            let mut writer =
                StreamingZipWriter::from_writer_with_options(Vec::with_capacity(size), options).unwrap();
            writer
                .write_entry(EntryOptions::new("random.bin"), black_box(&data))
                .unwrap();
            writer.finish().unwrap();
            black_box(writer.into_inner());
        });
    });

    group.finish();
}

fn bench_multiple_entries(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_multiple_entries");

    let entry_count = 100;
    let entry_size = 10 * 1024; // 10KB per entry
    group.throughput(Throughput::Bytes((entry_count * entry_size) as u64));

    let data = generate_compressible_data(entry_size);

    group.bench_function("deflate_100_entries", |b| {
        b.iter(|| {
            let temp = NamedTempFile::new().unwrap();
            let mut writer = StreamingZipWriter::with_compression(temp.path(), 6).unwrap();
            for i in 0..entry_count {
                writer
                    .start_entry_with(EntryOptions::new(format!("file_{}.txt", i)).expected_size(entry_size as u64))
                    .unwrap();
                writer.write_data(black_box(&data)).unwrap();
                writer.end_entry().unwrap();
            }
            writer.finish().unwrap();
        });
    });

    group.finish();
}

fn format_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{}KB", bytes / 1024)
    } else {
        format!("{}MB", bytes / (1024 * 1024))
    }
}

criterion_group!(
    benches,
    bench_compression_levels,
    bench_write_modes,
    bench_multiple_entries
);
criterion_main!(benches);
