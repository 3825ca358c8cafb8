use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sarc::{append_records, ContainerIndex, ContainerOptions, StoredFileRecord};
use sarc::codec::CodecId;
use std::io::Cursor;

fn records(count: usize, size: usize) -> Vec<StoredFileRecord> {
    (0..count)
        .map(|i| StoredFileRecord::new("bench", format!("file_{i}.bin"), vec![(i % 251) as u8; size]))
        .collect()
}

fn build(records: &[StoredFileRecord], codec: CodecId) -> Cursor<Vec<u8>> {
    let opts = ContainerOptions { codec, ..Default::default() };
    let mut store = Cursor::new(Vec::new());
    let mut index = ContainerIndex::new();
    append_records(&mut store, records, &mut index, &opts).unwrap();
    store
}

fn bench_append(c: &mut Criterion) {
    let recs = records(16, 64 * 1024);

    c.bench_function("append_16x64k_zstd", |b| b.iter(|| build(black_box(&recs), CodecId::Zstd)));
    c.bench_function("append_16x64k_lz4", |b| b.iter(|| build(black_box(&recs), CodecId::Lz4)));
}

fn bench_scan(c: &mut Criterion) {
    let mut store = build(&records(1000, 4 * 1024), CodecId::Lz4);

    c.bench_function("scan_1000_blocks", |b| {
        b.iter(|| ContainerIndex::scan(black_box(&mut store)).unwrap())
    });
}

criterion_group!(benches, bench_append, bench_scan);
criterion_main!(benches);
