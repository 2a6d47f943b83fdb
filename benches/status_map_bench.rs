use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ddrescue_rs::domain::Domain;
use ddrescue_rs::status_map::StatusMap;
use ddrescue_rs::{Block, Status};

fn fresh_map(size: i64) -> StatusMap {
    StatusMap::new(size, Domain::everything(), None, 512, false, true, "bench".into()).unwrap()
}

fn bench_change_chunk_status(c: &mut Criterion) {
    c.bench_function("change_chunk_status_scatter_1gb", |b| {
        b.iter(|| {
            let mut map = fresh_map(1 << 30);
            for i in 0..1000i64 {
                let pos = (i * 1_000_003) % (1 << 30);
                let _ = map.change_chunk_status(black_box(&Block::new(pos, 512)), Status::Finished);
            }
            map
        });
    });
}

fn bench_find_chunk(c: &mut Criterion) {
    let mut map = fresh_map(1 << 30);
    for i in 0..2000i64 {
        let pos = (i * 65_537) % (1 << 30);
        let _ = map.change_chunk_status(&Block::new(pos, 512), Status::Finished);
    }
    c.bench_function("find_chunk_over_fragmented_map", |b| {
        b.iter(|| map.find_chunk(black_box(Block::new(0, i64::MAX)), Status::NonTried, 512));
    });
}

criterion_group!(benches, bench_change_chunk_status, bench_find_chunk);
criterion_main!(benches);
