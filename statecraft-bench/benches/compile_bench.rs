//! Definition compiler benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};
use statecraft_core::alias::{normalize, SchemaKind};
use statecraft_core::Definition;

/// A linear chain of `n` states with one event per hop plus a global reset.
fn chain_definition(n: usize) -> Value {
    let mut events = serde_json::Map::new();
    for i in 0..n - 1 {
        events.insert(
            format!("next_{}", i),
            json!({ "transition": { format!("state_{}", i): format!("state_{}", i + 1) } }),
        );
    }
    events.insert(
        "reset".to_string(),
        json!({ "transition": { "from": "$all", "to": "$initial", "before": "log" } }),
    );

    json!({
        "states": {
            "initialState": "state_0",
            "knownStates": (0..n).map(|i| format!("state_{}", i)).collect::<Vec<_>>()
        },
        "events": events
    })
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("definition_compile");

    let simple = json!({
        "events": { "go": { "transition": { "initialized": "done" } } }
    });
    group.bench_function("simple", |b| {
        b.iter(|| black_box(Definition::from_json(&simple).unwrap()))
    });

    for size in [10usize, 50, 200] {
        let payload = chain_definition(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("chain", size), &payload, |b, payload| {
            b.iter(|| black_box(Definition::from_json(payload).unwrap()))
        });
    }

    group.finish();
}

fn bench_guarded_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("definition_compile_guarded");

    let states: Vec<String> = (0..20).map(|i| format!("s{}", i)).collect();
    let payload = json!({
        "states": { "initialState": "s0", "knownStates": states },
        "events": {
            "route": { "transitions": (0..20).map(|i| json!({
                "from": "$all",
                "to": format!("s{}", i),
                "if": format!("score >= {} && !blocked", i * 5)
            })).collect::<Vec<_>>() }
        }
    });

    group.bench_function("all_macro_20x20", |b| {
        b.iter(|| black_box(Definition::from_json(&payload).unwrap()))
    });

    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("alias_normalize");

    let transition = json!({
        "fromStates": ["a", "b"], "toState": "c", "before": "x",
        "enter": ["y", "z"], "exit": "w", "guard": "ready"
    });

    group.bench_function("transition", |b| {
        b.iter(|| {
            let mut payload = transition.clone();
            black_box(normalize(&mut payload, SchemaKind::Transition).unwrap())
        })
    });

    group.finish();
}

fn bench_lookups(c: &mut Criterion) {
    let mut group = c.benchmark_group("definition_lookup");

    let definition = Definition::from_json(&chain_definition(200)).unwrap();

    group.bench_function("transitions_for", |b| {
        b.iter(|| black_box(definition.transitions_for("next_100", Some("state_100"))))
    });

    group.bench_function("events_from", |b| {
        b.iter(|| black_box(definition.events_from("state_150")))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_compile,
    bench_guarded_compile,
    bench_normalize,
    bench_lookups
);
criterion_main!(benches);
