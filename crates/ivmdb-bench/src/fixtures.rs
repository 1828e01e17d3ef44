//! Test data generation for benchmarks.
//!
//! Every generator is seeded so runs are reproducible.

use ivmdb_proto::{ChangeMessage, Expr, JoinClause, JoinType, OrderByClause, QueryIr, Source, Value};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Scale factor for benchmark data generation.
#[derive(Clone, Copy, Debug, Default)]
pub enum Scale {
    /// 100 users
    Small,
    /// 2,000 users
    #[default]
    Medium,
    /// 20,000 users
    Large,
}

impl Scale {
    /// Number of users at this scale.
    pub fn count(&self) -> usize {
        match self {
            Scale::Small => 100,
            Scale::Medium => 2_000,
            Scale::Large => 20_000,
        }
    }

    /// Posts generated per user.
    pub fn posts_per_user(&self) -> usize {
        match self {
            Scale::Small => 3,
            Scale::Medium | Scale::Large => 5,
        }
    }

    /// Name used in benchmark ids.
    pub fn name(&self) -> &'static str {
        match self {
            Scale::Small => "small",
            Scale::Medium => "medium",
            Scale::Large => "large",
        }
    }
}

/// Generate a random string of specified length.
fn random_string(rng: &mut StdRng, len: usize) -> String {
    (0..len).map(|_| rng.sample(Alphanumeric) as char).collect()
}

/// A user row.
pub fn user(id: i64, name: &str, age: i64) -> Value {
    Value::object([
        ("id", Value::Int(id)),
        ("name", Value::from(name)),
        ("age", Value::Int(age)),
    ])
}

/// A post row; `author_id` may be null.
pub fn post(id: i64, author_id: Option<i64>, likes: i64) -> Value {
    Value::object([
        ("id", Value::Int(id)),
        ("author_id", Value::from(author_id)),
        ("likes", Value::Int(likes)),
    ])
}

/// Insert records for `count` users with ids `0..count`.
pub fn generate_users(count: usize) -> Vec<ChangeMessage> {
    const SEED: u64 = 12345;
    let mut rng = StdRng::seed_from_u64(SEED);

    (0..count as i64)
        .map(|id| {
            let name = random_string(&mut rng, 12);
            let age = rng.gen_range(18..80);
            ChangeMessage::insert(id, user(id, &name, age))
        })
        .collect()
}

/// Insert records for posts spread over `users` authors.
///
/// Roughly one post in twenty has no author, so outer joins see padding.
pub fn generate_posts(count: usize, users: usize) -> Vec<ChangeMessage> {
    const SEED: u64 = 54321;
    let mut rng = StdRng::seed_from_u64(SEED);

    (0..count as i64)
        .map(|id| {
            let author = if rng.gen_ratio(1, 20) || users == 0 {
                None
            } else {
                Some(rng.gen_range(0..users as i64))
            };
            let likes = rng.gen_range(0..1_000);
            ChangeMessage::insert(id, post(id, author, likes))
        })
        .collect()
}

/// `users u <join_type> JOIN posts p ON u.id = p.author_id`.
pub fn users_posts(join_type: JoinType) -> QueryIr {
    QueryIr::from_collection("users", "u").with_join(JoinClause::new(
        join_type,
        Source::collection("posts", "p"),
        Expr::col("u", "id"),
        Expr::col("p", "author_id"),
    ))
}

/// Posts ordered by likes descending, windowed.
pub fn top_posts(offset: i64, limit: i64) -> QueryIr {
    QueryIr::from_collection("posts", "p")
        .with_order_by(OrderByClause::desc(Expr::col("p", "likes")))
        .with_offset(offset)
        .with_limit(limit)
}
