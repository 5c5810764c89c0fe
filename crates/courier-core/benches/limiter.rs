use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::time::{Duration, Instant};

use courier_core::FixedWindowLimiter;

/// Benchmark the admission decision shared by every dispatcher worker.
fn bench_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("fixed_window_limiter");

    // Grant path — counter below the cap
    group.bench_function("try_admit_granted", |b| {
        let now = Instant::now();
        b.iter_batched(
            || FixedWindowLimiter::new(u32::MAX, Duration::from_secs(1)),
            |limiter| black_box(limiter.try_admit_at(now)),
            BatchSize::SmallInput,
        );
    });

    // Denial path — cap already reached, no state mutation
    group.bench_function("try_admit_denied", |b| {
        let now = Instant::now();
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(3600));
        limiter.try_admit_at(now);
        b.iter(|| black_box(limiter.try_admit_at(black_box(now))));
    });

    group.finish();
}

criterion_group!(benches, bench_admission);
criterion_main!(benches);
