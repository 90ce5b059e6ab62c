use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use protoret_retriever::{Matcher, PrototypeDb, Similarity};

fn random_unit_vec(dim: usize, seed: u64) -> Vec<f32> {
    let mut v = Vec::with_capacity(dim);
    let mut state = seed;
    for _ in 0..dim {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        v.push(((state >> 33) as f32) / (u32::MAX as f32) - 0.5);
    }
    let norm: f64 = v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt();
    if norm > 0.0 {
        let s = (1.0 / norm) as f32;
        for x in &mut v {
            *x *= s;
        }
    }
    v
}

fn gallery(rows: usize, dim: usize) -> PrototypeDb {
    let rows: Vec<Vec<f32>> = (0..rows as u64).map(|i| random_unit_vec(dim, i + 1)).collect();
    PrototypeDb::from_rows(&rows).unwrap()
}

fn bench_cosine(c: &mut Criterion) {
    let dim = 512;
    let queries: Vec<Vec<f32>> = (0..32).map(|i| random_unit_vec(dim, 10_000 + i)).collect();
    let matcher = Matcher::new(Similarity::Cosine);

    let mut group = c.benchmark_group("match_cosine_512d_32q");
    for rows in [1_000, 10_000] {
        let db = gallery(rows, dim);
        group.bench_with_input(BenchmarkId::from_parameter(rows), &db, |b, db| {
            b.iter(|| {
                let _ = black_box(matcher.match_queries(black_box(&queries), db));
            });
        });
    }
    group.finish();
}

fn bench_dot(c: &mut Criterion) {
    let dim = 512;
    let db = gallery(10_000, dim);
    let queries: Vec<Vec<f32>> = (0..32).map(|i| random_unit_vec(dim, 20_000 + i)).collect();
    let matcher = Matcher::new(Similarity::Dot);

    c.bench_function("match_dot_512d_32q_10000rows", |b| {
        b.iter(|| {
            let _ = black_box(matcher.match_queries(black_box(&queries), &db));
        });
    });
}

criterion_group!(benches, bench_cosine, bench_dot);
criterion_main!(benches);
