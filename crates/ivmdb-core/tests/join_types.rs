//! Integration tests for joins through live queries.

use ivmdb_core::proto::{
    ChangeMessage, ChangeType, Expr, JoinClause, JoinType, QueryIr, Source, Value,
};
use ivmdb_core::LiveQuery;

fn user(id: i64, name: &str) -> ChangeMessage {
    ChangeMessage::insert(
        id,
        Value::object([("id", Value::Int(id)), ("name", Value::from(name))]),
    )
}

fn post(id: i64, author_id: Option<i64>, likes: i64) -> ChangeMessage {
    ChangeMessage::insert(
        id,
        Value::object([
            ("id", Value::Int(id)),
            ("author_id", Value::from(author_id)),
            ("likes", Value::Int(likes)),
        ]),
    )
}

fn users_posts(join_type: JoinType) -> QueryIr {
    QueryIr::from_collection("users", "u").with_join(JoinClause::new(
        join_type,
        Source::collection("posts", "p"),
        Expr::col("u", "id"),
        Expr::col("p", "author_id"),
    ))
}

/// Users 1..=3; posts 10 and 11 by user 1, post 12 by a missing user 4.
fn blog(join_type: JoinType) -> LiveQuery {
    let mut live = LiveQuery::with_defaults(&users_posts(join_type)).unwrap();
    live.begin().unwrap();
    for (id, name) in [(1, "ada"), (2, "bob"), (3, "cy")] {
        live.apply("users", user(id, name)).unwrap();
    }
    live.apply("posts", post(10, Some(1), 3)).unwrap();
    live.apply("posts", post(11, Some(1), 8)).unwrap();
    live.apply("posts", post(12, Some(4), 1)).unwrap();
    live.commit().unwrap();
    live
}

fn key(left: Option<i64>, right: Option<i64>) -> Value {
    Value::Array(vec![Value::from(left), Value::from(right)])
}

#[test]
fn test_result_sizes_per_join_type() {
    assert_eq!(blog(JoinType::Inner).len(), 2);
    assert_eq!(blog(JoinType::Left).len(), 4);
    assert_eq!(blog(JoinType::Right).len(), 3);
    assert_eq!(blog(JoinType::Full).len(), 5);
}

#[test]
fn test_composite_keys_mark_padded_side() {
    let live = blog(JoinType::Full);
    assert!(live.get(&key(Some(1), Some(10))).is_some());
    assert!(live.get(&key(Some(2), None)).is_some());
    assert!(live.get(&key(None, Some(12))).is_some());

    let padded = live.get(&key(Some(2), None)).unwrap();
    assert!(padded.get("u").is_some());
    assert!(padded.get("p").is_none());
}

#[test]
fn test_incremental_changes_on_both_sides() {
    let mut live = blog(JoinType::Left);

    // User 2 gets a post: its padded row is replaced by the match.
    let batch = live.apply("posts", post(13, Some(2), 0)).unwrap();
    let mut kinds: Vec<_> = batch.iter().map(|c| (c.key.clone(), c.change_type)).collect();
    kinds.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        kinds,
        vec![
            (key(Some(2), None), ChangeType::Delete),
            (key(Some(2), Some(13)), ChangeType::Insert),
        ]
    );

    // Deleting user 1 removes both of its matches.
    live.apply("users", ChangeMessage::delete(1)).unwrap();
    assert_eq!(live.len(), 2);

    // Removing the last post of user 2 brings the padded row back.
    live.apply("posts", ChangeMessage::delete(13)).unwrap();
    assert!(live.get(&key(Some(2), None)).is_some());
}

#[test]
fn test_null_key_to_match_transition() {
    let mut live = LiveQuery::with_defaults(&users_posts(JoinType::Left)).unwrap();
    live.apply("users", user(1, "ada")).unwrap();
    live.apply("posts", post(10, None, 0)).unwrap();
    assert!(live.get(&key(Some(1), None)).is_some());
    assert_eq!(live.len(), 1);

    let mut fix = post(10, Some(1), 0);
    fix.change_type = ChangeType::Update;
    let batch = live.apply("posts", fix).unwrap();

    assert_eq!(batch.len(), 2);
    assert!(batch
        .iter()
        .any(|c| c.key == key(Some(1), None) && c.change_type == ChangeType::Delete));
    assert!(batch
        .iter()
        .any(|c| c.key == key(Some(1), Some(10)) && c.change_type == ChangeType::Insert));
    assert_eq!(live.len(), 1);
}

#[test]
fn test_null_keys_never_match_each_other() {
    let query = QueryIr::from_collection("a", "a").with_join(JoinClause::full(
        Source::collection("b", "b"),
        Expr::col("a", "k"),
        Expr::col("b", "k"),
    ));
    let mut live = LiveQuery::with_defaults(&query).unwrap();
    live.apply("a", ChangeMessage::insert(1, Value::object([("k", Value::Null)])))
        .unwrap();
    live.apply("b", ChangeMessage::insert(1, Value::object([("k", Value::Null)])))
        .unwrap();
    assert_eq!(live.len(), 2);
}

#[test]
fn test_transaction_across_sources_has_no_transient_padding() {
    let mut live = LiveQuery::with_defaults(&users_posts(JoinType::Left)).unwrap();
    live.begin().unwrap();
    live.apply("users", user(1, "ada")).unwrap();
    live.apply("posts", post(10, Some(1), 0)).unwrap();
    let batch = live.commit().unwrap();

    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].key, key(Some(1), Some(10)));
    assert_eq!(batch[0].change_type, ChangeType::Insert);
}

#[test]
fn test_self_join() {
    let query = QueryIr::from_collection("employees", "e")
        .with_join(JoinClause::left(
            Source::collection("employees", "m"),
            Expr::col("e", "manager_id"),
            Expr::col("m", "id"),
        ))
        .with_select([
            ("name", Expr::col("e", "name")),
            ("manager", Expr::col("m", "name")),
        ]);
    let mut live = LiveQuery::with_defaults(&query).unwrap();
    let employee = |id: i64, name: &str, manager: Option<i64>| {
        ChangeMessage::insert(
            id,
            Value::object([
                ("id", Value::Int(id)),
                ("name", Value::from(name)),
                ("manager_id", Value::from(manager)),
            ]),
        )
    };
    live.apply_all(
        "employees",
        [employee(1, "boss", None), employee(2, "dev", Some(1))],
    )
    .unwrap();

    assert_eq!(
        live.get(&key(Some(2), Some(1))),
        Some(&Value::object([
            ("manager", Value::from("boss")),
            ("name", Value::from("dev")),
        ]))
    );
    assert_eq!(
        live.get(&key(Some(1), None)),
        Some(&Value::object([("manager", Value::Null), ("name", Value::from("boss"))]))
    );
}

#[test]
fn test_chained_joins_isolate_updates() {
    let query = users_posts(JoinType::Inner).with_join(JoinClause::inner(
        Source::collection("comments", "c"),
        Expr::col("c", "post_id"),
        Expr::col("p", "id"),
    ));
    let mut live = LiveQuery::with_defaults(&query).unwrap();
    let comment = |id: i64, post_id: i64| {
        ChangeMessage::insert(
            id,
            Value::object([("id", Value::Int(id)), ("post_id", Value::Int(post_id))]),
        )
    };

    live.apply_all("users", [user(1, "ada"), user(2, "bob")]).unwrap();
    live.apply_all("posts", [post(10, Some(1), 0), post(20, Some(2), 0)])
        .unwrap();
    live.apply_all("comments", [comment(100, 10), comment(200, 20)])
        .unwrap();
    assert_eq!(live.len(), 2);

    // A change to post 10 touches only the chain through it.
    let mut edit = post(10, Some(1), 99);
    edit.change_type = ChangeType::Update;
    let batch = live.apply("posts", edit).unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].change_type, ChangeType::Update);
    let likes = batch[0]
        .value
        .get("p")
        .and_then(|p| p.get("likes"))
        .cloned();
    assert_eq!(likes, Some(Value::Int(99)));
}
