//! Delay benchmark — measure the duration arithmetic on the per-cycle hot
//! path and the short-delay cost of the spin tail.
//!
//! The arithmetic must stay well under a microsecond so the update step is
//! negligible against any realistic interval; the sub-millisecond delays are
//! dominated by the spin budget at `Maximum` precision.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use metron_loop::{Extent, PrecisionOption, delay};

fn bench_extent_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("extent_ops");
    let interval = Extent::from_millis_f64(13.3333);
    let sample = Extent::from_millis_f64(13.4012);

    group.bench_function("drift_correction_step", |b| {
        b.iter(|| {
            let drift = (sample - interval) % interval;
            let next = interval - (sample - drift);
            std::hint::black_box(next)
        })
    });

    group.bench_function("seconds_round_trip", |b| {
        b.iter(|| std::hint::black_box(Extent::from_secs_f64(0.0133333).as_secs_f64()))
    });

    group.finish();
}

fn bench_delay(c: &mut Criterion) {
    let mut group = c.benchmark_group("delay");
    group.sample_size(20);

    for &micros in &[100u64, 500] {
        let dur = Extent::from_millis_f64(micros as f64 / 1000.0);
        group.bench_with_input(
            BenchmarkId::new("spin_tail_us", micros),
            &dur,
            |b, &dur| b.iter(|| delay(dur, PrecisionOption::Maximum, None).expect("delay")),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_extent_ops, bench_delay);
criterion_main!(benches);
