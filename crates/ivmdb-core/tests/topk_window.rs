//! Integration tests for ordered, windowed live queries.

use std::collections::{BTreeMap, HashMap};

use ivmdb_core::proto::{ChangeMessage, ChangeType, Expr, OrderByClause, QueryIr, Value};
use ivmdb_core::{LiveQuery, ResultRow};
use proptest::prelude::*;

fn item(name: &str) -> ChangeMessage {
    ChangeMessage::insert(name, Value::object([("name", name)]))
}

fn by_name(offset: i64, limit: i64) -> QueryIr {
    QueryIr::from_collection("items", "i")
        .with_order_by(OrderByClause::asc(Expr::col("i", "name")))
        .with_offset(offset)
        .with_limit(limit)
}

fn names(rows: &[ResultRow]) -> Vec<String> {
    rows.iter()
        .map(|row| row.key.as_str().unwrap_or_default().to_string())
        .collect()
}

fn indexes(rows: &[ResultRow]) -> HashMap<String, String> {
    rows.iter()
        .map(|row| {
            (
                row.key.as_str().unwrap_or_default().to_string(),
                row.order.clone().unwrap_or_default(),
            )
        })
        .collect()
}

#[test]
fn test_window_moves_emit_only_boundary_changes() {
    let mut live = LiveQuery::with_defaults(&by_name(1, 3)).unwrap();
    live.apply_all("items", ["a", "b", "c", "d", "e"].map(item))
        .unwrap();
    assert_eq!(names(&live.results()), vec!["b", "c", "d"]);
    let before = indexes(&live.results());

    // f sorts after the window and changes nothing visible.
    assert!(live.apply("items", item("f")).unwrap().is_empty());

    let batch = live.set_window(3, Some(3)).unwrap();
    assert_eq!(names(&live.results()), vec!["d", "e", "f"]);

    let mut changed: Vec<_> = batch
        .iter()
        .map(|c| (c.key.as_str().unwrap_or_default().to_string(), c.change_type))
        .collect();
    changed.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        changed,
        vec![
            ("b".to_string(), ChangeType::Delete),
            ("c".to_string(), ChangeType::Delete),
            ("e".to_string(), ChangeType::Insert),
            ("f".to_string(), ChangeType::Insert),
        ]
    );
    assert_eq!(indexes(&live.results())["d"], before["d"]);
}

#[test]
fn test_insert_between_neighbors_keeps_their_indexes() {
    let mut live = LiveQuery::with_defaults(
        &QueryIr::from_collection("items", "i")
            .with_order_by(OrderByClause::asc(Expr::col("i", "name"))),
    )
    .unwrap();
    live.apply_all("items", ["a", "c"].map(item)).unwrap();
    let before = indexes(&live.results());

    let batch = live.apply("items", item("b")).unwrap();
    assert_eq!(batch.len(), 1);
    let after = indexes(&live.results());
    assert_eq!(after["a"], before["a"]);
    assert_eq!(after["c"], before["c"]);
    assert!(after["a"] < after["b"] && after["b"] < after["c"]);
}

#[test]
fn test_descending_order_with_nulls() {
    let query = QueryIr::from_collection("items", "i")
        .with_order_by(OrderByClause::desc(Expr::col("i", "score")))
        .with_limit(3);
    let mut live = LiveQuery::with_defaults(&query).unwrap();
    let scored = |key: &str, score: Option<i64>| {
        ChangeMessage::insert(key, Value::object([("score", Value::from(score))]))
    };
    live.apply_all(
        "items",
        [
            scored("x", Some(1)),
            scored("y", None),
            scored("z", Some(5)),
            scored("w", Some(3)),
        ],
    )
    .unwrap();
    // Nulls sort first by default, whatever the direction.
    assert_eq!(names(&live.results()), vec!["y", "z", "w"]);
}

#[test]
fn test_unbounded_limit() {
    let mut live = LiveQuery::with_defaults(&by_name(0, 1)).unwrap();
    live.apply_all("items", ["a", "b", "c"].map(item)).unwrap();
    live.set_window(1, None).unwrap();
    assert_eq!(names(&live.results()), vec!["b", "c"]);
}

#[derive(Debug, Clone)]
enum Op {
    Insert(u8),
    Delete(u8),
    Window(i64, i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..20).prop_map(Op::Insert),
        2 => (0u8..20).prop_map(Op::Delete),
        1 => (0i64..6, 0i64..6).prop_map(|(o, l)| Op::Window(o, l)),
    ]
}

fn key_name(k: u8) -> String {
    format!("k{k:02}")
}

proptest! {
    #[test]
    fn prop_window_matches_recompute(ops in prop::collection::vec(op(), 1..60)) {
        let mut live = LiveQuery::with_defaults(&by_name(1, 3)).unwrap();
        let mut present: BTreeMap<String, ()> = BTreeMap::new();
        let (mut offset, mut limit) = (1i64, 3i64);
        let mut seen_indexes: HashMap<String, String> = HashMap::new();

        for op in ops {
            match op {
                Op::Insert(k) => {
                    let name = key_name(k);
                    live.apply("items", item(&name)).unwrap();
                    present.insert(name, ());
                }
                Op::Delete(k) => {
                    let name = key_name(k);
                    live.apply("items", ChangeMessage::delete(name.as_str())).unwrap();
                    if present.remove(&name).is_some() {
                        seen_indexes.remove(&name);
                    }
                }
                Op::Window(o, l) => {
                    live.set_window(o, Some(l)).unwrap();
                    offset = o;
                    limit = l;
                }
            }

            let expected: Vec<String> = present
                .keys()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect();
            let rows = live.results();
            prop_assert_eq!(names(&rows), expected);

            // Visible indexes agree with the sort order and never change
            // while a row stays in the candidate set.
            let current = indexes(&rows);
            prop_assert!(rows.windows(2).all(|w| w[0].order < w[1].order));
            for (name, index) in &current {
                if let Some(previous) = seen_indexes.insert(name.clone(), index.clone()) {
                    prop_assert_eq!(&previous, index);
                }
            }
        }
    }
}
