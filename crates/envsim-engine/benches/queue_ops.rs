//! Criterion micro-benchmarks for event queue insertion and due-event scans.

use std::hint::black_box;

use chrono::TimeDelta;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use envsim_engine::{EventQueue, SimulatorEvent};
use envsim_test_utils::{record, t0, ProbeModality};

/// Events spread over `n` minutes with a rotating priority.
fn make_events(n: usize) -> Vec<SimulatorEvent> {
    (0..n)
        .map(|i| {
            let minute = ((i * 7919) % n) as i64;
            SimulatorEvent::new(
                ProbeModality::NAME,
                t0() + TimeDelta::minutes(minute),
                record("bench"),
            )
            .with_priority((i % 5) as i32 * 10)
        })
        .collect()
}

fn bench_add_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_add");
    for n in [100usize, 1_000, 10_000] {
        let events = make_events(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &events, |b, events| {
            b.iter(|| {
                let mut queue = EventQueue::new();
                for event in events.iter().cloned() {
                    queue.add_event(event).unwrap();
                }
                black_box(queue.len());
            });
        });
    }
    group.finish();
}

fn bench_due_scan(c: &mut Criterion) {
    let mut queue = EventQueue::new();
    queue.add_events(make_events(10_000)).unwrap();
    let midpoint = t0() + TimeDelta::minutes(5_000);

    c.bench_function("queue_due_10k_half", |b| {
        b.iter(|| black_box(queue.get_due_events(black_box(midpoint)).len()));
    });
    c.bench_function("queue_peek_next_10k", |b| {
        b.iter(|| black_box(queue.peek_next().map(|e| e.scheduled_time)));
    });
}

criterion_group!(benches, bench_add_events, bench_due_scan);
criterion_main!(benches);
