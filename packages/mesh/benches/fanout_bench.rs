// packages/mesh/benches/fanout_bench.rs
//! Subscription lookup cost as the table grows

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sentra_lab_mesh::host::{Subscription, SubscriptionTable};
use sentra_lab_mesh::{TopicId, TopicPattern};

fn table_with(agent_types: usize) -> SubscriptionTable {
    let mut table = SubscriptionTable::new();
    for i in 0..agent_types {
        let agent_type = format!("agent-{}", i);
        let pattern = match i % 3 {
            0 => TopicPattern::default_subscription(),
            1 => TopicPattern::Type(format!("topic-{}", i % 17)),
            _ => TopicPattern::Exact(TopicId::new("alerts", format!("region-{}", i % 5))),
        };
        table.subscribe(Subscription::new(agent_type, pattern));
    }
    table
}

fn bench_subscribers_for(c: &mut Criterion) {
    let mut group = c.benchmark_group("subscribers_for");
    let topic = TopicId::default_topic();

    for size in [10usize, 100, 1_000, 10_000] {
        let table = table_with(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &table, |b, table| {
            b.iter(|| black_box(table.subscribers_for(black_box(&topic)).len()))
        });
    }
    group.finish();
}

fn bench_subscribe_idempotent(c: &mut Criterion) {
    let mut table = table_with(1_000);
    let existing = Subscription::default_for("agent-0");

    c.bench_function("subscribe_existing", |b| {
        b.iter(|| black_box(table.subscribe(existing.clone())))
    });
}

criterion_group!(benches, bench_subscribers_for, bench_subscribe_idempotent);
criterion_main!(benches);
