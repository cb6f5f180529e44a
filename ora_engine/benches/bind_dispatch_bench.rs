use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ora_engine::engine::core::{bind_all, release_from, BindOptions};
use ora_engine::provider::RawHandle;
use ora_engine::testing::MockProvider;
use ora_engine::{Param, StmtCfg};

fn options(cfg: &StmtCfg) -> BindOptions<'_> {
    BindOptions {
        assoc_array: false,
        identity: None,
        cfg,
    }
}

fn benchmark_bind_scalars(c: &mut Criterion) {
    let mock = MockProvider::new();
    let stmt = RawHandle::new(1).expect("non-zero handle");
    let cfg = StmtCfg::default();
    let mut binds = Vec::new();
    c.bench_function("bind_8_scalars", |b| {
        b.iter(|| {
            let params = [
                Param::from(1i64),
                Param::from(2.5f64),
                Param::from("name"),
                Param::from(true),
                Param::from(None::<i32>),
                Param::from(Some(7u16)),
                Param::from(vec![1u8, 2, 3]),
                Param::Null,
            ];
            black_box(bind_all(&mock, stmt, &mut binds, &params, &options(&cfg)).unwrap())
        });
    });
    release_from(&mut binds, 0);
}

fn benchmark_bind_batches(c: &mut Criterion) {
    let mock = MockProvider::new();
    let stmt = RawHandle::new(1).expect("non-zero handle");
    let cfg = StmtCfg::default();
    let mut group = c.benchmark_group("bind_batch");
    for rows in [100usize, 1_000, 10_000] {
        let ids: Vec<i64> = (0..rows as i64).collect();
        let names: Vec<Option<String>> = (0..rows)
            .map(|i| (i % 10 != 0).then(|| format!("user_{}", i)))
            .collect();
        let mut binds = Vec::new();
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| {
                let params = [Param::from(ids.clone()), Param::from(names.clone())];
                black_box(bind_all(&mock, stmt, &mut binds, &params, &options(&cfg)).unwrap())
            });
        });
        release_from(&mut binds, 0);
    }
    group.finish();
}

criterion_group!(benches, benchmark_bind_scalars, benchmark_bind_batches);
criterion_main!(benches);
