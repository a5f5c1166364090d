//! Load balancing benchmarks
//!
//! Measures `LoadBalancer::select_provider` across each strategy, at
//! registry sizes of 5, 50, and 500 providers advertising the same model.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use router_core::balancer::{BalancerStrategy, LoadBalancer};
use router_core::discovery::ProviderDiscovery;
use std::sync::Arc;

fn setup(size: usize) -> (Arc<ProviderDiscovery>, LoadBalancer, Vec<String>) {
    let discovery = Arc::new(ProviderDiscovery::new());
    let mut names = Vec::with_capacity(size);
    for i in 0..size {
        let name = format!("provider-{i}");
        discovery.register_models(&name, vec!["gpt-bench".to_string()]);
        discovery.record_request_result(&name, true, 50.0 + (i % 10) as f64);
        names.push(name);
    }
    let balancer = LoadBalancer::new(discovery.clone());
    (discovery, balancer, names)
}

fn bench_strategy(c: &mut Criterion, name: &str, strategy: BalancerStrategy) {
    let mut group = c.benchmark_group(format!("load_balancing/{name}"));
    for size in [5, 50, 500] {
        let (_discovery, balancer, _names) = setup(size);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let _ = balancer.select_provider(black_box("gpt-bench"), strategy, None);
            });
        });
    }
    group.finish();
}

fn bench_round_robin(c: &mut Criterion) {
    bench_strategy(c, "round_robin", BalancerStrategy::RoundRobin);
}

fn bench_least_connections(c: &mut Criterion) {
    bench_strategy(c, "least_connections", BalancerStrategy::LeastConnections);
}

fn bench_weighted_random(c: &mut Criterion) {
    bench_strategy(c, "weighted_random", BalancerStrategy::WeightedRandom);
}

fn bench_least_latency(c: &mut Criterion) {
    bench_strategy(c, "least_latency", BalancerStrategy::LeastLatency);
}

fn bench_adaptive(c: &mut Criterion) {
    bench_strategy(c, "adaptive", BalancerStrategy::Adaptive);
}

criterion_group!(
    benches,
    bench_round_robin,
    bench_least_connections,
    bench_weighted_random,
    bench_least_latency,
    bench_adaptive
);
criterion_main!(benches);
