use std::net::{IpAddr, Ipv4Addr};

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use domain::admission::engine::{AdmissionEngine, EvalMode};
use domain::admission::entity::AdmissionRequest;
use domain::admission::flags::FeatureFlags;
use domain::source::entity::{HealthStatus, Source, SourceStatus};
use domain::source::snapshot::SourceSnapshot;

fn make_source(id: usize) -> Source {
    let octet = u8::try_from(id % 250).unwrap();
    Source {
        id: format!("src-{id:05}"),
        tenant_id: "tenant-bench".to_string(),
        source_type: "netflow".to_string(),
        status: SourceStatus::Enabled,
        health_status: HealthStatus::Healthy,
        allowed_ips: vec![
            format!("10.{octet}.0.0/16"),
            format!("192.168.{octet}.0/24"),
            "2001:db8::/32".to_string(),
        ],
        max_eps: 1_000_000,
        block_on_exceed: true,
        description: None,
        created_at_ms: 0,
        updated_at_ms: 0,
    }
}

fn snapshot_with_sources(n: usize) -> SourceSnapshot {
    SourceSnapshot::new((0..n).map(make_source).collect(), 1)
}

fn enforcing() -> FeatureFlags {
    FeatureFlags {
        http_enabled: true,
        udp_enabled: true,
        log_only: false,
        fail_open: false,
    }
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission_evaluate");
    let flags = enforcing();

    for &n in &[10, 1_000, 10_000] {
        let snapshot = snapshot_with_sources(n);
        let engine = AdmissionEngine::new();
        let source_id = format!("src-{:05}", n / 2);
        let octet = u8::try_from((n / 2) % 250).unwrap();
        let request = AdmissionRequest {
            source_id: &source_id,
            client_ip: IpAddr::V4(Ipv4Addr::new(10, octet, 3, 4)),
            record_count: 1,
        };

        group.bench_with_input(BenchmarkId::new("commit", n), &n, |b, _| {
            b.iter(|| {
                engine.evaluate(
                    black_box(&snapshot),
                    &flags,
                    black_box(&request),
                    EvalMode::Commit,
                )
            });
        });
        group.bench_with_input(BenchmarkId::new("dry_run", n), &n, |b, _| {
            b.iter(|| {
                engine.evaluate(
                    black_box(&snapshot),
                    &flags,
                    black_box(&request),
                    EvalMode::DryRun,
                )
            });
        });
    }

    group.finish();
}

fn bench_resolve_by_ip(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission_resolve_by_ip");

    for &n in &[10, 1_000, 10_000] {
        let snapshot = snapshot_with_sources(n);
        let miss = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| snapshot.resolve_by_ip(black_box(miss)).is_some());
        });
    }

    group.finish();
}

fn bench_snapshot_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission_snapshot_build");

    for &n in &[100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || (0..n).map(make_source).collect::<Vec<_>>(),
                |sources| SourceSnapshot::new(black_box(sources), 2),
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_evaluate,
    bench_resolve_by_ip,
    bench_snapshot_build
);
criterion_main!(benches);
