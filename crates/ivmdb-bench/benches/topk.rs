//! Top-K operator benchmarks.
//!
//! Inserts and deletes inside and outside a window, and window moves over a
//! loaded candidate set.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use ivmdb_bench::fixtures::post;
use ivmdb_bench::{generate_posts, loaded, top_posts, Scale};
use ivmdb_core::{generate_n_keys_between, LiveQuery};
use ivmdb_proto::ChangeMessage;

fn apply(live: &mut LiveQuery, change: ChangeMessage) -> usize {
    match live.apply("posts", change) {
        Ok(batch) => batch.len(),
        Err(e) => panic!("change rejected: {e}"),
    }
}

fn bench_changes(c: &mut Criterion) {
    let mut group = c.benchmark_group("topk/change");

    for scale in [Scale::Small, Scale::Medium, Scale::Large] {
        let posts = generate_posts(scale.count(), 100);
        let query = top_posts(10, 20);
        let new_id = posts.len() as i64;

        // Likes are below 1000, so this lands at the head and shifts the window.
        group.bench_function(BenchmarkId::new("insert_top", scale.name()), |b| {
            b.iter_batched(
                || loaded(&query, &[], &posts),
                |mut live| black_box(apply(&mut live, ChangeMessage::insert(new_id, post(new_id, None, 5_000)))),
                BatchSize::LargeInput,
            );
        });

        // Sorts after every existing row: no visible change.
        group.bench_function(BenchmarkId::new("insert_tail", scale.name()), |b| {
            b.iter_batched(
                || loaded(&query, &[], &posts),
                |mut live| black_box(apply(&mut live, ChangeMessage::insert(new_id, post(new_id, None, -1)))),
                BatchSize::LargeInput,
            );
        });

        group.bench_function(BenchmarkId::new("delete", scale.name()), |b| {
            b.iter_batched(
                || loaded(&query, &[], &posts),
                |mut live| black_box(apply(&mut live, ChangeMessage::delete(0))),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_window_moves(c: &mut Criterion) {
    let mut group = c.benchmark_group("topk/window");

    let posts = generate_posts(Scale::Medium.count(), 100);
    let query = top_posts(0, 50);

    for offset in [1i64, 50, 1_000] {
        group.bench_with_input(BenchmarkId::new("offset", offset), &offset, |b, &offset| {
            b.iter_batched(
                || loaded(&query, &[], &posts),
                |mut live| match live.set_window(offset, Some(50)) {
                    Ok(batch) => black_box(batch.len()),
                    Err(e) => panic!("window rejected: {e}"),
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_fractional_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("topk/fractional");

    for n in [10usize, 100, 1_000] {
        group.bench_with_input(BenchmarkId::new("keys_between", n), &n, |b, &n| {
            b.iter(|| black_box(generate_n_keys_between(Some("a0"), Some("a1"), n)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_changes, bench_window_moves, bench_fractional_keys);
criterion_main!(benches);
