use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::hint::black_box;

use pantry::{define_store, ActionFn, Memo, OptionsStore, Registry, Signal, Store};

fn counter(registry: &Registry) -> Store {
    define_store(
        "counter",
        OptionsStore::new()
            .state(|| json!({ "count": 0, "meta": { "label": "bench", "step": 1 } }))
            .getter("double_count", |store| {
                json!(store.get_as::<i64>("count").unwrap_or(0) * 2)
            })
            .action(
                "increment",
                ActionFn::sync(|store, _args| {
                    let next = store.get_as::<i64>("count")? + 1;
                    store.set("count", json!(next))?;
                    Ok(json!(next))
                }),
            ),
    )
    .and_then(|use_counter| use_counter.use_store_in(registry))
    .unwrap()
}

fn signal_write_benchmark(c: &mut Criterion) {
    let signal: Signal<i32> = Signal::new(0);

    c.bench_function("signal_write", |b| {
        let mut i = 0;
        b.iter(|| {
            signal.set(black_box(i));
            i += 1;
        });
    });
}

fn memo_computation_benchmark(c: &mut Criterion) {
    let a: Signal<i32> = Signal::new(5);
    let b: Signal<i32> = Signal::new(10);

    let sum = Memo::new({
        let a = a.clone();
        let b = b.clone();
        move || a.get() + b.get()
    });

    c.bench_function("memo_computation", |bench| {
        bench.iter(|| {
            black_box(sum.get());
        });
    });
}

fn store_creation_benchmark(c: &mut Criterion) {
    c.bench_function("store_creation", |b| {
        b.iter(|| {
            let registry = Registry::new();
            black_box(counter(&registry))
        });
    });
}

fn store_patch_benchmark(c: &mut Criterion) {
    let registry = Registry::new();
    let store = counter(&registry);

    c.bench_function("store_patch", |b| {
        let mut i = 0;
        b.iter(|| {
            store
                .patch(json!({ "count": black_box(i), "meta": { "step": 2 } }))
                .unwrap();
            i += 1;
        });
    });
}

fn getter_read_benchmark(c: &mut Criterion) {
    let registry = Registry::new();
    let store = counter(&registry);

    c.bench_function("getter_read", |b| {
        b.iter(|| {
            black_box(store.get("double_count"));
        });
    });
}

fn action_subscribers_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("action_subscribers");

    for subscriber_count in [1, 10, 100].iter() {
        let registry = Registry::new();
        let store = counter(&registry);

        for _ in 0..*subscriber_count {
            store.on_action(|ctx| {
                ctx.after(|_| {
                    // Empty subscriber
                });
            });
        }

        group.bench_with_input(
            BenchmarkId::from_parameter(subscriber_count),
            subscriber_count,
            |b, _| {
                b.iter(|| {
                    black_box(store.call("increment", vec![]).unwrap());
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    signal_write_benchmark,
    memo_computation_benchmark,
    store_creation_benchmark,
    store_patch_benchmark,
    getter_read_benchmark,
    action_subscribers_benchmark,
);
criterion_main!(benches);
