//! End-to-end scheduler benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rondo::{Application, Config};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn run_counting_app(services: usize, tasks_per_service: usize, threads: usize) -> usize {
    let app = Application::new(Config::default()).unwrap();
    let completed = Arc::new(AtomicUsize::new(0));
    let total = services * tasks_per_service;

    for _ in 0..services {
        let service = app.create_service(|_| ());
        for _ in 0..tasks_per_service {
            let completed = completed.clone();
            service.post(move |ctx| {
                if completed.fetch_add(1, Ordering::AcqRel) + 1 == total {
                    ctx.app().stop(0);
                }
            });
        }
    }

    app.run(threads);
    completed.load(Ordering::Acquire)
}

fn post_throughput(c: &mut Criterion) {
    c.bench_function("post_drain_1_service_10k_tasks", |b| {
        b.iter(|| black_box(run_counting_app(1, 10_000, 2)));
    });
}

fn fan_out_throughput(c: &mut Criterion) {
    c.bench_function("post_drain_8_services_1k_tasks", |b| {
        b.iter(|| black_box(run_counting_app(8, 1_000, 0)));
    });
}

criterion_group!(benches, post_throughput, fan_out_throughput);
criterion_main!(benches);
