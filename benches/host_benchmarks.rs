use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scripthost_core::config::{HostConfig, ResourceConfig};
use scripthost_core::reload::{collapse, FileChange};
use scripthost_core::resources::ResourceManager;
use scripthost_core::test_utils::FixedMemoryProbe;
use std::sync::Arc;
use std::time::Duration;

fn benchmark_config_validation(c: &mut Criterion) {
    let config = HostConfig::default();
    c.bench_function("config_validation", |b| b.iter(|| black_box(&config).validate()));
}

fn benchmark_pooled_resource_hit(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let manager = ResourceManager::with_memory_probe(
        ResourceConfig::default(),
        Arc::new(FixedMemoryProbe::from_mb(64)),
    );
    runtime
        .block_on(manager.acquire_resource(
            "bench",
            || async { Ok::<_, String>(vec![0u8; 1024]) },
            Duration::from_secs(1),
        ))
        .expect("seed resource");

    c.bench_function("pooled_resource_hit", |b| {
        b.iter(|| {
            runtime.block_on(manager.acquire_resource(
                black_box("bench"),
                || async { Ok::<_, String>(Vec::new()) },
                Duration::from_secs(1),
            ))
        })
    });
}

fn benchmark_change_collapse(c: &mut Criterion) {
    let changes: Vec<FileChange> = (0..500)
        .map(|i| FileChange::modified(format!("scripts/file{}.py", i % 50)))
        .collect();
    c.bench_function("change_collapse_500", |b| {
        b.iter(|| collapse(black_box(changes.clone())))
    });
}

criterion_group!(
    benches,
    benchmark_config_validation,
    benchmark_pooled_resource_hit,
    benchmark_change_collapse
);
criterion_main!(benches);
