//! Join operator benchmarks.
//!
//! Measures the initial load of a users/posts join and the cost of single
//! changes against an already loaded join, per join type.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use ivmdb_bench::fixtures::{post, user};
use ivmdb_bench::{generate_posts, generate_users, loaded, users_posts, Scale};
use ivmdb_core::LiveQuery;
use ivmdb_proto::{ChangeMessage, JoinType};

const JOIN_TYPES: [JoinType; 4] = [JoinType::Inner, JoinType::Left, JoinType::Right, JoinType::Full];

fn bench_initial_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("join/initial_load");
    group.sample_size(20);

    for scale in [Scale::Small, Scale::Medium] {
        let users = generate_users(scale.count());
        let posts = generate_posts(scale.count() * scale.posts_per_user(), scale.count());

        for join_type in JOIN_TYPES {
            group.bench_with_input(
                BenchmarkId::new(join_type.to_string(), scale.name()),
                &join_type,
                |b, &join_type| {
                    let query = users_posts(join_type);
                    b.iter(|| black_box(loaded(&query, &users, &posts).len()));
                },
            );
        }
    }

    group.finish();
}

fn apply(live: &mut LiveQuery, collection: &str, change: ChangeMessage) -> usize {
    match live.apply(collection, change) {
        Ok(batch) => batch.len(),
        Err(e) => panic!("change rejected: {e}"),
    }
}

fn bench_single_change(c: &mut Criterion) {
    let mut group = c.benchmark_group("join/single_change");

    let scale = Scale::Medium;
    let users = generate_users(scale.count());
    let posts = generate_posts(scale.count() * scale.posts_per_user(), scale.count());
    let next_post = posts.len() as i64;

    for join_type in JOIN_TYPES {
        let query = users_posts(join_type);

        // A new post for an existing author replaces padding or extends matches.
        group.bench_function(BenchmarkId::new("insert_post", join_type.to_string()), |b| {
            b.iter_batched(
                || loaded(&query, &users, &posts),
                |mut live| {
                    black_box(apply(
                        &mut live,
                        "posts",
                        ChangeMessage::insert(next_post, post(next_post, Some(7), 1)),
                    ))
                },
                BatchSize::LargeInput,
            );
        });

        // Moving a post between authors retracts and re-adds matches.
        group.bench_function(BenchmarkId::new("reassign_post", join_type.to_string()), |b| {
            b.iter_batched(
                || loaded(&query, &users, &posts),
                |mut live| {
                    black_box(apply(
                        &mut live,
                        "posts",
                        ChangeMessage::update(0, post(0, Some(11), 5)),
                    ))
                },
                BatchSize::LargeInput,
            );
        });

        // Deleting a user touches every post it authored.
        group.bench_function(BenchmarkId::new("delete_user", join_type.to_string()), |b| {
            b.iter_batched(
                || loaded(&query, &users, &posts),
                |mut live| black_box(apply(&mut live, "users", ChangeMessage::delete(3))),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

/// Insert `count` new users, each with one post, in one transaction.
fn insert_pairs(live: &mut LiveQuery, count: i64) -> usize {
    const FIRST_ID: i64 = 10_000;

    let run = |live: &mut LiveQuery| -> ivmdb_core::Result<usize> {
        live.begin()?;
        for id in FIRST_ID..FIRST_ID + count {
            live.apply("users", ChangeMessage::insert(id, user(id, "new", 30)))?;
            live.apply("posts", ChangeMessage::insert(id, post(id, Some(id), 0)))?;
        }
        Ok(live.commit()?.len())
    };
    match run(live) {
        Ok(n) => n,
        Err(e) => panic!("transaction rejected: {e}"),
    }
}

fn bench_transaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("join/transaction");

    let users = generate_users(Scale::Small.count());
    let posts = generate_posts(Scale::Small.count() * 3, Scale::Small.count());
    let query = users_posts(JoinType::Full);

    for size in [10i64, 100, 1_000] {
        group.bench_with_input(BenchmarkId::new("users_and_posts", size), &size, |b, &size| {
            b.iter_batched(
                || loaded(&query, &users, &posts),
                |mut live| black_box(insert_pairs(&mut live, size)),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_initial_load, bench_single_change, bench_transaction);
criterion_main!(benches);
