//! Route lookup cost on the proxy's per-connection path.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::net::SocketAddr;

use lokl::domain::models::{normalize_host, RouteEntry};
use lokl::services::ServiceRegistry;

fn registry_with(routes: usize, runtime: &tokio::runtime::Runtime) -> ServiceRegistry {
    let registry = ServiceRegistry::new();
    runtime.block_on(async {
        for i in 0..routes {
            let backend = SocketAddr::from(([127, 0, 0, 1], 3000 + u16::try_from(i).unwrap()));
            registry
                .register(RouteEntry::new(&format!("svc{i}.shop.test"), format!("svc{i}"), backend))
                .await;
        }
    });
    registry
}

fn benchmark_resolve(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("resolve");

    for routes in [1usize, 16, 256] {
        let registry = registry_with(routes, &runtime);
        let hit = format!("svc{}.shop.test", routes / 2);

        group.bench_with_input(BenchmarkId::new("hit", routes), &hit, |b, host| {
            b.to_async(&runtime)
                .iter(|| async { black_box(registry.resolve(black_box(host)).await) });
        });
        group.bench_with_input(BenchmarkId::new("miss", routes), &routes, |b, _| {
            b.to_async(&runtime)
                .iter(|| async { black_box(registry.resolve(black_box("ghost.shop.test")).await) });
        });
    }

    group.finish();
}

fn benchmark_normalize(c: &mut Criterion) {
    c.bench_function("normalize_host", |b| {
        b.iter(|| normalize_host(black_box("API.Shop.Test.:8443")));
    });
}

criterion_group!(benches, benchmark_resolve, benchmark_normalize);
criterion_main!(benches);
