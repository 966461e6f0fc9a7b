//! Benchmark for admission-time node selection

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use k8s_openapi::api::core::v1::Node;
use local_pv_provisioner::admission::{volume_name, CapacityAware, NodeSelector, RoundRobin};
use local_pv_provisioner::resources::NodeExt;

fn nodes(count: usize) -> Vec<Node> {
    (0..count)
        .map(|i| {
            let mut node = Node::default();
            node.metadata.name = Some(format!("node-{:04}", i));
            node.set_advertised_capacity(((i * 7919) % 1000) as u64 * (1 << 30));
            node
        })
        .collect()
}

fn bench_round_robin(c: &mut Criterion) {
    let mut group = c.benchmark_group("node_selection");
    group.throughput(Throughput::Elements(1));

    for count in [3usize, 100, 1000] {
        let candidates = nodes(count);
        let strategy = RoundRobin::new(candidates.iter().filter_map(|n| n.metadata.name.clone()).collect());
        group.bench_with_input(BenchmarkId::new("round_robin", count), &candidates, |b, candidates| {
            b.iter(|| {
                let _ = strategy.pick(black_box(candidates));
            });
        });
    }

    group.finish();
}

fn bench_capacity_aware(c: &mut Criterion) {
    let mut group = c.benchmark_group("node_selection");
    group.throughput(Throughput::Elements(1));

    for count in [3usize, 100, 1000] {
        let candidates = nodes(count);
        group.bench_with_input(BenchmarkId::new("capacity", count), &candidates, |b, candidates| {
            b.iter(|| {
                let _ = CapacityAware.pick(black_box(candidates));
            });
        });
    }

    group.finish();
}

fn bench_volume_name(c: &mut Criterion) {
    c.bench_function("volume_name", |b| {
        b.iter(|| volume_name(black_box("apps_data-abcd1234"), black_box("worker-1"), black_box("local")));
    });
}

criterion_group!(benches, bench_round_robin, bench_capacity_aware, bench_volume_name);
criterion_main!(benches);
