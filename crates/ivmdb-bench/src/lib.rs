//! ivmdb Benchmark Suite
//!
//! Criterion benchmarks for the incremental operators.
//!
//! # Benchmark Categories
//!
//! - **Join**: initial load and single-row changes per join type
//! - **Top-K**: inserts into a window and window moves
//!
//! Run with `cargo bench -p ivmdb-bench`.

pub mod fixtures;

pub use fixtures::{generate_posts, generate_users, top_posts, users_posts, Scale};

use ivmdb_core::LiveQuery;
use ivmdb_proto::{ChangeMessage, QueryIr};

/// Build a live query and load `users` and `posts` in one transaction.
///
/// Users are skipped for queries that do not read them.
pub fn loaded(query: &QueryIr, users: &[ChangeMessage], posts: &[ChangeMessage]) -> LiveQuery {
    match load(query, users, posts) {
        Ok(live) => live,
        Err(e) => panic!("benchmark setup failed: {e}"),
    }
}

fn load(
    query: &QueryIr,
    users: &[ChangeMessage],
    posts: &[ChangeMessage],
) -> ivmdb_core::Result<LiveQuery> {
    let mut live = LiveQuery::with_defaults(query)?;
    let reads_users = live.collections().any(|c| c == "users");

    live.begin()?;
    if reads_users {
        live.apply_all("users", users.iter().cloned())?;
    }
    live.apply_all("posts", posts.iter().cloned())?;
    live.commit()?;
    Ok(live)
}
