use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use methseg_core::{ChunkListing, PartitionPlan, ShardLayout, merge_shards};
use tokio::runtime::Builder;

const CHROMOSOMES: usize = 25;
const SHARD_BYTES: usize = 1 << 20;

fn listing_text() -> String {
    let mut text = String::from("| Chromosome | Number of chunks |\n");
    for i in 1..=CHROMOSOMES {
        text.push_str(&format!("| chr{i} | {} |\n", i * 13));
    }
    text
}

fn bench_listing(c: &mut Criterion) {
    let text = listing_text();
    let mut group = c.benchmark_group("listing");
    group.throughput(Throughput::Elements(CHROMOSOMES as u64));
    group.bench_function(format!("rows/{CHROMOSOMES}"), |b| {
        b.iter(|| black_box(ChunkListing::parse(black_box(&text))));
    });
    group.finish();
}

fn bench_partition(c: &mut Criterion) {
    c.bench_function("partition/plan", |b| {
        b.iter(|| {
            let plan = PartitionPlan::new(black_box(57), black_box(200_000), black_box(16));
            black_box(plan.map(|p| p.ranges().count()))
        });
    });
}

fn bench_merge(c: &mut Criterion) {
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();
    let dir = tempfile::tempdir().unwrap();

    for workers in [4_usize, 16] {
        let layout = ShardLayout::new(dir.path().join("bench").to_string_lossy(), "chr1");
        let shard = vec![b'x'; SHARD_BYTES / workers];
        for worker in 0..workers {
            std::fs::write(layout.shard_path(worker), &shard).unwrap();
        }

        let mut group = c.benchmark_group("merge");
        group.throughput(Throughput::Bytes((shard.len() * workers) as u64));
        group.bench_function(format!("shards/{workers}"), |b| {
            b.to_async(&rt)
                .iter(|| async { black_box(merge_shards(&layout, workers).await.unwrap()) });
        });
        group.finish();
    }
}

criterion_group!(benches, bench_listing, bench_partition, bench_merge);
criterion_main!(benches);
