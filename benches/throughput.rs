use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use orpheus::checksum::{fingerprint_sector, sector_crc};
use orpheus::queue::{HandoffQueue, SlotState};
use orpheus::sector::SECTOR_SIZE;

fn bench_checksums(c: &mut Criterion) {
    let sector = vec![0x5au8; SECTOR_SIZE];
    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(SECTOR_SIZE as u64));
    group.bench_function("sector_crc", |b| {
        b.iter(|| black_box(sector_crc(black_box(&sector))))
    });
    group.bench_function("fingerprint_sector", |b| {
        b.iter(|| black_box(fingerprint_sector(black_box(&sector))))
    });
    group.finish();
}

fn bench_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    group.throughput(Throughput::Bytes(16 * SECTOR_SIZE as u64));
    group.bench_function("publish_consume_cluster", |b| {
        let queue = HandoffQueue::new(4, 16);
        b.iter(|| {
            let slot = queue.acquire_for_write().unwrap();
            slot.publish(black_box(0), 16, SlotState::Full);
            let slot = queue.acquire_for_read();
            black_box(slot.payload().len());
            slot.release();
        })
    });
    group.finish();
}

criterion_group!(benches, bench_checksums, bench_handoff);
criterion_main!(benches);
