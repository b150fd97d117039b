//! Performance benchmarks for fitsync-engine

use fitsync_engine::{
    reconcile, CollectionKind, Mutation, ReconcilePlan, RecordStore, Schema, UpsertResult,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

const OWNER: &str = "owner-1";

fn nutrition_insert(i: u64) -> Mutation {
    Mutation::insert(
        format!("n_{}", i),
        CollectionKind::NutritionEntries,
        OWNER,
        json!({"name": format!("Meal {}", i), "calories": 500, "protein": 30, "carbs": 50, "fats": 20}),
    )
}

fn populated_store(size: u64) -> RecordStore {
    let mut store = RecordStore::with_owner(Schema::fitness(), OWNER);
    for i in 0..size {
        let _ = store.apply(nutrition_insert(i), 1000);
    }
    store
}

/// One workout with `size` exercises.
fn workout_store(size: u64) -> RecordStore {
    let mut store = RecordStore::with_owner(Schema::fitness(), OWNER);
    let _ = store.apply(
        Mutation::insert(
            "w_0",
            CollectionKind::Workouts,
            OWNER,
            json!({"name": "Push", "date": "2026-10-17"}),
        ),
        1000,
    );
    for i in 0..size {
        let _ = store.apply(
            Mutation::insert(
                format!("e_{}", i),
                CollectionKind::Exercises,
                OWNER,
                json!({"workoutId": "w_0", "name": format!("Exercise {}", i)}),
            ),
            1000,
        );
    }
    store
}

fn bench_store_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_operations");

    group.bench_function("apply_insert", |b| {
        let mut store = RecordStore::with_owner(Schema::fitness(), OWNER);
        let mut id = 0u64;

        b.iter(|| {
            id += 1;
            store.apply(black_box(nutrition_insert(id)), black_box(1000))
        })
    });

    group.bench_function("get_record", |b| {
        let store = populated_store(1000);
        b.iter(|| store.get(black_box(CollectionKind::NutritionEntries), black_box("n_500")))
    });

    group.bench_function("summary", |b| {
        let store = populated_store(1000);
        b.iter(|| store.summary())
    });

    for size in [10u64, 50].iter() {
        group.bench_with_input(BenchmarkId::new("reorder", size), size, |b, &size| {
            let mut store = workout_store(size);
            let mut ids: Vec<String> = (0..size).map(|i| format!("e_{}", i)).collect();
            b.iter(|| {
                ids.reverse();
                store.apply(
                    Mutation::reorder(CollectionKind::Exercises, "w_0", ids.clone()),
                    2000,
                )
            })
        });

        group.bench_with_input(BenchmarkId::new("cascade_delete", size), size, |b, &size| {
            b.iter_batched(
                || workout_store(size),
                |mut store| store.apply(Mutation::tombstone("w_0", CollectionKind::Workouts), 2000),
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_reconciliation(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconciliation");

    for size in [10u64, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("plan_build", size), size, |b, &size| {
            let store = populated_store(size);
            b.iter(|| ReconcilePlan::build(black_box(&store), CollectionKind::NutritionEntries))
        });

        group.bench_with_input(BenchmarkId::new("commit", size), size, |b, &size| {
            b.iter_batched(
                || {
                    let store = populated_store(size);
                    let plan = ReconcilePlan::build(&store, CollectionKind::NutritionEntries);
                    let results: Vec<UpsertResult> = plan
                        .upserts
                        .iter()
                        .map(|task| UpsertResult {
                            id: task.id.clone(),
                            revision: task.revision,
                            result: Ok(()),
                            calls: 1,
                        })
                        .collect();
                    (store, results)
                },
                |(mut store, results)| {
                    reconcile::commit(&mut store, CollectionKind::NutritionEntries, vec![], results)
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for size in [100u64, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("export", size), size, |b, &size| {
            let store = populated_store(size);
            b.iter(|| {
                store
                    .export_collection(CollectionKind::NutritionEntries)
                    .and_then(|s| s.to_json())
            })
        });

        group.bench_with_input(BenchmarkId::new("import", size), size, |b, &size| {
            let store = populated_store(size);
            let snapshot = store
                .export_collection(CollectionKind::NutritionEntries)
                .unwrap();
            b.iter(|| {
                let mut target = RecordStore::with_owner(Schema::fitness(), OWNER);
                target.import_collection(black_box(snapshot.clone()))
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_store_operations,
    bench_reconciliation,
    bench_snapshot
);
criterion_main!(benches);
