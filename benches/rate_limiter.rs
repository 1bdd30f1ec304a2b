use std::sync::Arc;
use std::time::Duration;

use admission_guard::core::{default_rules, DdosDetectionConfig, RateLimiter, RuleEngine};
use admission_guard::utils::ManualClock;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn limiter(clock: Arc<ManualClock>) -> RateLimiter {
    RateLimiter::with_clock(
        RuleEngine::with_rules(default_rules()),
        DdosDetectionConfig {
            threshold: u64::MAX,
            ..Default::default()
        },
        clock,
    )
}

fn rate_limiter_benchmark(c: &mut Criterion) {
    let limiter = limiter(Arc::new(ManualClock::new(1_700_000_000_000)));
    for _ in 0..500 {
        limiter.record_request("busy", "api_calls");
    }

    c.bench_function("check_limit", |b| {
        b.iter(|| black_box(limiter.check_limit(black_box("busy"), "api_calls")))
    });

    let identities: Vec<String> = (0..1_000).map(|i| format!("user-{}", i)).collect();
    c.bench_function("record_request_1000_identities", |b| {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let limiter = self::limiter(clock.clone());
        let mut next = 0;
        b.iter(|| {
            clock.advance(Duration::from_millis(1));
            limiter.record_request(&identities[next % identities.len()], "data_retrieval");
            next += 1;
        })
    });
}

criterion_group!(benches, rate_limiter_benchmark);
criterion_main!(benches);
