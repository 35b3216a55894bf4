//! Machine send/pipeline benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::{json, Value};
use statecraft_core::{Machine, MachineOptions, MapTarget};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn toggle_machine(target: MapTarget) -> Machine {
    let definition = json!({
        "states": { "initialState": "off" },
        "events": {
            "toggle": { "transitions": [
                { "off": "on", "before": "count", "didEnter": "count" },
                { "on": "off", "after": "count" }
            ] }
        }
    });
    Machine::from_json(&definition, Arc::new(target), MachineOptions::default()).unwrap()
}

fn counting_target() -> MapTarget {
    MapTarget::new().with_sync_callback("count", |_| Ok(Value::Null))
}

fn bench_send(c: &mut Criterion) {
    let mut group = c.benchmark_group("machine_send");
    let rt = Runtime::new().unwrap();

    let machine = toggle_machine(counting_target());
    group.throughput(Throughput::Elements(1));
    group.bench_function("toggle", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(machine.send("toggle", vec![]).unwrap().wait().await.unwrap())
        })
    });

    let guarded = Machine::from_json(
        &json!({
            "states": { "initialState": "idle" },
            "events": {
                "route": { "transitions": [
                    { "from": "$all", "to": "fast", "if": "load < 10" },
                    { "from": "$all", "to": "slow", "if": "load >= 10 && load < 100" },
                    { "from": "$all", "to": "idle" }
                ] }
            }
        }),
        Arc::new(MapTarget::new().with_property("load", json!(50))),
        MachineOptions::default(),
    )
    .unwrap();
    group.bench_function("guarded_route", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(guarded.send("route", vec![]).unwrap().wait().await.unwrap())
        })
    });

    group.finish();
}

fn bench_independent_machines(c: &mut Criterion) {
    let mut group = c.benchmark_group("machine_parallel");
    group.sample_size(20);
    let rt = Runtime::new().unwrap();

    for count in [10usize, 100] {
        let machines: Vec<Machine> = (0..count)
            .map(|_| toggle_machine(counting_target()))
            .collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("toggle_{}", count), |b| {
            b.to_async(&rt).iter(|| async {
                let handles = machines
                    .iter()
                    .map(|m| m.send("toggle", vec![]).unwrap().wait());
                black_box(futures::future::join_all(handles).await)
            })
        });
    }

    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("machine_query");

    let machine = toggle_machine(counting_target());
    group.bench_function("in_state", |b| b.iter(|| black_box(machine.in_state("off"))));
    group.bench_function("can_enter_state", |b| {
        b.iter(|| black_box(machine.can_enter_state("on").unwrap()))
    });
    group.bench_function("state_accessors", |b| {
        b.iter(|| black_box(machine.state_accessors()))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_send,
    bench_independent_machines,
    bench_queries
);
criterion_main!(benches);
