//! # Conflict Benchmarks
//!
//! Performance benchmarks for registration and conflict detection.
//!
//! Run with: `cargo bench -p stagehand-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use stagehand_core::{
    BundleRegistry, InMemoryEngine, InMemoryPackageReader, PackageContents, activator_fn,
};
use std::hint::black_box;
use std::sync::Arc;

const CLASSES_PER_BUNDLE: usize = 50;

/// Package whose classes overlap with its neighbours, half of them differing.
fn package(i: usize) -> PackageContents {
    (0..CLASSES_PER_BUNDLE).fold(
        PackageContents::new().with_descriptor(&format!("org.bench.b{}", i % 16), "1.0.0", "noop"),
        |contents, class| {
            let body = format!("{}", (i + class) % 2);
            contents.with_class_bytes(format!("pkg/C{}.class", class + i % 8), body.as_bytes())
        },
    )
}

fn populated(size: usize) -> BundleRegistry {
    let reader = Arc::new(InMemoryPackageReader::new());
    let engine = Arc::new(InMemoryEngine::new(reader.clone()));
    engine.register_activator("noop", activator_fn(|_| Ok(())));
    for i in 0..size {
        reader.insert(format!("mem://bench/{i}"), package(i));
    }
    let registry = BundleRegistry::new(engine, reader).expect("attach");
    for i in 0..size {
        registry.register(format!("mem://bench/{i}")).expect("register");
    }
    registry
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");

    for size in [10, 100, 500].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| black_box(populated(size)));
        });
    }

    group.finish();
}

fn bench_conflicts_single(c: &mut Criterion) {
    let mut group = c.benchmark_group("conflicts_single");

    for size in [10, 100, 500].iter() {
        let registry = populated(*size);
        let subject = registry.list_active().get(0).expect("first record");

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(subject.conflicts()));
        });
    }

    group.finish();
}

fn bench_conflict_report(c: &mut Criterion) {
    let mut group = c.benchmark_group("conflict_report");

    for size in [10, 100, 250].iter() {
        let registry = populated(*size);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(registry.conflict_report()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_registration,
    bench_conflicts_single,
    bench_conflict_report,
);

criterion_main!(benches);
