//! Live queries.
//!
//! A [`LiveQuery`] owns a compiled graph and keeps its materialized result up
//! to date as base-row changes arrive. Changes are translated into multiset
//! deltas against a per-collection snapshot of the base rows, queued per
//! collection, and pushed through the graph on commit. Every commit that
//! changes the result yields one [`ChangeBatch`], which is returned to the
//! caller and published to subscribers.

mod subscription;

use std::collections::{BTreeMap, HashMap};

use ivmdb_proto::{ChangeMessage, ChangeType, Expr, QueryIr, Value};
use serde::Serialize;

pub use subscription::{ChangeBatch, SubscriptionEntry, SubscriptionHub};

use crate::config::EngineConfig;
use crate::dataflow::{Entry, RowKey};
use crate::error::{Error, Result};
use crate::multiset::MultiSet;
use crate::query::{compile_query, CompiledQuery};
use crate::topk::{Window, WindowUpdate};

/// One row of a live result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    /// Result key. Join results use `[left key, right key]` with null for a
    /// padded side.
    pub key: Value,
    /// The projected row.
    pub value: Value,
    /// Fractional index, for ordered queries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct ViewRow {
    value: Value,
    order: Option<String>,
}

/// An incrementally maintained query result.
pub struct LiveQuery {
    compiled: CompiledQuery,
    config: EngineConfig,
    /// Base rows seen so far, per collection, by key.
    snapshot: HashMap<String, HashMap<Value, Value>>,
    /// Deltas not yet pushed through the graph, per collection.
    pending: BTreeMap<String, MultiSet<Entry>>,
    in_transaction: bool,
    view: BTreeMap<Value, ViewRow>,
    hub: SubscriptionHub,
}

impl LiveQuery {
    /// Compile a query into a live result.
    pub fn new(query: &QueryIr, config: EngineConfig) -> Result<Self> {
        let compiled = compile_query(query, &config.optimizer)?;
        Ok(Self {
            compiled,
            config,
            snapshot: HashMap::new(),
            pending: BTreeMap::new(),
            in_transaction: false,
            view: BTreeMap::new(),
            hub: SubscriptionHub::new(),
        })
    }

    /// Compile with the default configuration.
    pub fn with_defaults(query: &QueryIr) -> Result<Self> {
        Self::new(query, EngineConfig::default())
    }

    /// The query as optimized and compiled.
    pub fn optimized_query(&self) -> &QueryIr {
        &self.compiled.optimized_query
    }

    /// Root-level single-source filters, keyed by alias. A loader can use
    /// them to fetch only rows that can match.
    pub fn source_filters(&self) -> &HashMap<String, Expr> {
        &self.compiled.source_where_clauses
    }

    /// Collections the query reads.
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.compiled.inputs.keys().map(String::as_str)
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Open a transaction. Changes applied until [`commit`](Self::commit)
    /// reach the graph as one delta per collection.
    pub fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(Error::TransactionOpen);
        }
        self.in_transaction = true;
        Ok(())
    }

    /// Close the transaction and propagate its changes.
    pub fn commit(&mut self) -> Result<ChangeBatch> {
        if !self.in_transaction {
            return Err(Error::NoTransaction);
        }
        self.in_transaction = false;
        self.flush()
    }

    /// Apply one base-row change.
    ///
    /// Outside a transaction with autocommit enabled the change is propagated
    /// immediately and the resulting batch returned; otherwise it is queued
    /// and an empty batch returned.
    pub fn apply(&mut self, collection: &str, change: ChangeMessage) -> Result<ChangeBatch> {
        change.validate()?;
        if !self.compiled.inputs.contains_key(collection) {
            return Err(Error::UnknownCollection {
                name: collection.to_string(),
            });
        }

        let delta = self.to_delta(collection, change);
        if !delta.is_empty() {
            self.pending
                .entry(collection.to_string())
                .or_default()
                .extend(delta);
        }

        if self.in_transaction || !self.config.autocommit {
            return Ok(Vec::new());
        }
        self.flush()
    }

    /// Apply several changes to one collection as a single transaction.
    ///
    /// Every change is validated before any is applied, so a rejected batch
    /// leaves the snapshot and queued deltas untouched.
    pub fn apply_all(
        &mut self,
        collection: &str,
        changes: impl IntoIterator<Item = ChangeMessage>,
    ) -> Result<ChangeBatch> {
        if !self.compiled.inputs.contains_key(collection) {
            return Err(Error::UnknownCollection {
                name: collection.to_string(),
            });
        }
        let changes: Vec<ChangeMessage> = changes.into_iter().collect();
        for change in &changes {
            change.validate()?;
        }

        let nested = self.in_transaction;
        if !nested {
            self.begin()?;
        }
        for change in changes {
            self.apply(collection, change)?;
        }
        if nested {
            Ok(Vec::new())
        } else {
            self.commit()
        }
    }

    /// Translate a change into a delta, keeping the snapshot current.
    fn to_delta(&mut self, collection: &str, change: ChangeMessage) -> MultiSet<Entry> {
        let rows = self.snapshot.entry(collection.to_string()).or_default();
        let mut delta = MultiSet::new();
        let key = change.key;

        match change.change_type {
            ChangeType::Insert | ChangeType::Update => {
                let previous = rows.insert(key.clone(), change.value.clone());
                if let (Some(known), Some(claimed)) = (&previous, &change.previous_value) {
                    if known != claimed {
                        tracing::warn!(
                            collection,
                            key = %key,
                            "previous value disagrees with snapshot, using snapshot"
                        );
                    }
                }
                match previous {
                    Some(old) if old == change.value => {}
                    Some(old) => {
                        delta.push(Entry::new(RowKey::from(key.clone()), old), -1);
                        delta.push(Entry::new(RowKey::from(key), change.value), 1);
                    }
                    None => {
                        if change.change_type == ChangeType::Update {
                            tracing::debug!(collection, key = %key, "update of unknown key inserted");
                        }
                        delta.push(Entry::new(RowKey::from(key), change.value), 1);
                    }
                }
            }
            ChangeType::Delete => match rows.remove(&key) {
                Some(old) => delta.push(Entry::new(RowKey::from(key), old), -1),
                None => {
                    tracing::warn!(collection, key = %key, "delete of unknown key ignored");
                }
            },
        }
        delta
    }

    /// Push every queued delta through the graph and fold the output into the
    /// view. Also applies a pending window change.
    pub fn flush(&mut self) -> Result<ChangeBatch> {
        let pending = std::mem::take(&mut self.pending);
        for (collection, delta) in pending {
            let delta = delta.consolidate();
            if delta.is_empty() {
                continue;
            }
            let inputs = self.compiled.inputs_for(&collection).to_vec();
            for input in inputs {
                self.compiled.graph.send(input, delta.clone())?;
            }
        }

        if !self.compiled.graph.has_pending_work() {
            return Ok(Vec::new());
        }
        self.compiled.graph.run()?;

        let output = self.compiled.output.drain_consolidated();
        let batch = self.fold_output(output);
        tracing::trace!(changes = batch.len(), rows = self.view.len(), "live query flushed");
        self.hub.publish(&batch);
        Ok(batch)
    }

    fn fold_output(&mut self, output: MultiSet<Entry>) -> ChangeBatch {
        let mut removed: BTreeMap<Value, ViewRow> = BTreeMap::new();
        let mut added: BTreeMap<Value, ViewRow> = BTreeMap::new();

        let (retractions, insertions): (Vec<_>, Vec<_>) =
            output.into_iter().partition(|(_, m)| *m < 0);
        for (entry, _) in retractions {
            let key = entry.key.to_value();
            if let Some(row) = self.view.remove(&key) {
                removed.insert(key, row);
            }
        }
        for (entry, _) in insertions {
            let key = entry.key.to_value();
            let row = ViewRow {
                value: entry.value,
                order: entry.order,
            };
            self.view.insert(key.clone(), row.clone());
            added.insert(key, row);
        }

        let mut batch = Vec::with_capacity(removed.len() + added.len());
        for (key, old) in &removed {
            match added.remove(key) {
                Some(new) => batch.push(ChangeMessage {
                    change_type: ChangeType::Update,
                    key: key.clone(),
                    value: new.value,
                    previous_value: Some(old.value.clone()),
                }),
                None => batch.push(ChangeMessage {
                    change_type: ChangeType::Delete,
                    key: key.clone(),
                    value: old.value.clone(),
                    previous_value: None,
                }),
            }
        }
        batch.extend(
            added
                .into_iter()
                .map(|(key, row)| ChangeMessage::insert(key, row.value)),
        );
        batch
    }

    /// The current result, by fractional index when ordered and by key
    /// otherwise.
    pub fn results(&self) -> Vec<ResultRow> {
        let mut rows: Vec<ResultRow> = self
            .view
            .iter()
            .map(|(key, row)| ResultRow {
                key: key.clone(),
                value: row.value.clone(),
                order: row.order.clone(),
            })
            .collect();
        rows.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.key.cmp(&b.key)));
        rows
    }

    /// Result values only, in result order.
    pub fn values(&self) -> Vec<Value> {
        self.results().into_iter().map(|row| row.value).collect()
    }

    /// One result row by key.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.view.get(key).map(|row| &row.value)
    }

    /// Number of result rows.
    pub fn len(&self) -> usize {
        self.view.len()
    }

    /// Check if the result is empty.
    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    /// Current window of an ordered query.
    pub fn window(&self) -> Option<Window> {
        self.compiled.window.as_ref().map(|handle| handle.current())
    }

    /// Move the window of an ordered query. Outside a transaction the change
    /// is propagated immediately; inside one it is applied on commit.
    pub fn set_window(&mut self, offset: i64, limit: Option<i64>) -> Result<ChangeBatch> {
        let handle = self
            .compiled
            .window
            .as_ref()
            .ok_or(Error::WindowRequiresOrderBy)?;
        handle.set(WindowUpdate::new(offset, limit));
        tracing::debug!(offset, limit = ?limit, "window retarget requested");
        if self.in_transaction {
            return Ok(Vec::new());
        }
        self.flush()
    }

    /// Register a subscriber to committed change batches.
    pub fn subscribe(&self) -> u64 {
        self.hub.subscribe()
    }

    /// Remove a subscriber.
    pub fn unsubscribe(&self, id: u64) -> Result<()> {
        self.hub.unsubscribe(id)
    }

    /// Take the batches published to a subscriber since its last drain.
    pub fn drain_events(&self, id: u64) -> Result<Vec<ChangeBatch>> {
        self.hub.drain_events(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivmdb_proto::{JoinClause, OrderByClause, Source};

    fn user(id: i64, name: &str, age: i64) -> ChangeMessage {
        ChangeMessage::insert(id, Value::object([
            ("id", Value::Int(id)),
            ("name", Value::from(name)),
            ("age", Value::Int(age)),
        ]))
    }

    fn adults() -> QueryIr {
        QueryIr::from_collection("users", "u")
            .with_where(Expr::gte(Expr::col("u", "age"), Expr::val(18)))
    }

    #[test]
    fn test_autocommit_emits_batches() {
        let mut live = LiveQuery::with_defaults(&adults()).unwrap();
        let batch = live.apply("users", user(1, "ada", 36)).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].change_type, ChangeType::Insert);

        let batch = live.apply("users", user(2, "kid", 9)).unwrap();
        assert!(batch.is_empty());
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn test_update_and_delete_events() {
        let mut live = LiveQuery::with_defaults(&adults()).unwrap();
        live.apply("users", user(1, "ada", 36)).unwrap();

        let mut changed = user(1, "ada", 37);
        changed.change_type = ChangeType::Update;
        let batch = live.apply("users", changed).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].change_type, ChangeType::Update);
        assert!(batch[0].previous_value.is_some());

        let batch = live.apply("users", ChangeMessage::delete(1)).unwrap();
        assert_eq!(batch[0].change_type, ChangeType::Delete);
        assert!(live.is_empty());
    }

    #[test]
    fn test_transaction_coalesces_changes() {
        let mut live = LiveQuery::with_defaults(&adults()).unwrap();
        live.begin().unwrap();
        assert!(matches!(live.begin(), Err(Error::TransactionOpen)));
        live.apply("users", user(1, "ada", 36)).unwrap();
        live.apply("users", ChangeMessage::delete(1)).unwrap();
        live.apply("users", user(2, "bob", 40)).unwrap();
        let batch = live.commit().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].key, Value::Int(2));
        assert!(matches!(live.commit(), Err(Error::NoTransaction)));
    }

    #[test]
    fn test_noop_and_unknown_changes() {
        let mut live = LiveQuery::with_defaults(&adults()).unwrap();
        live.apply("users", user(1, "ada", 36)).unwrap();
        assert!(live.apply("users", user(1, "ada", 36)).unwrap().is_empty());
        assert!(live.apply("users", ChangeMessage::delete(99)).unwrap().is_empty());
        assert!(matches!(
            live.apply("posts", user(1, "ada", 36)),
            Err(Error::UnknownCollection { name }) if name == "posts"
        ));
    }

    #[test]
    fn test_manual_flush_without_autocommit() {
        let config = EngineConfig::new().with_autocommit(false);
        let mut live = LiveQuery::new(&adults(), config).unwrap();
        assert!(live.apply("users", user(1, "ada", 36)).unwrap().is_empty());
        assert!(live.is_empty());
        assert_eq!(live.flush().unwrap().len(), 1);
        assert_eq!(live.get(&Value::Int(1)).and_then(|v| v.get("name")), Some(&Value::from("ada")));
    }

    #[test]
    fn test_ordered_results_and_window() {
        let query = QueryIr::from_collection("users", "u")
            .with_order_by(OrderByClause::asc(Expr::col("u", "name")))
            .with_limit(2);
        let mut live = LiveQuery::with_defaults(&query).unwrap();
        live.apply_all(
            "users",
            [user(1, "c", 1), user(2, "a", 1), user(3, "b", 1)],
        )
        .unwrap();
        let names: Vec<_> = live
            .values()
            .iter()
            .map(|v| v.get("name").cloned().unwrap_or_default())
            .collect();
        assert_eq!(names, vec![Value::from("a"), Value::from("b")]);

        let batch = live.set_window(1, Some(2)).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(live.window(), Some(Window::new(1, Some(2))));
        let names: Vec<_> = live
            .values()
            .iter()
            .map(|v| v.get("name").cloned().unwrap_or_default())
            .collect();
        assert_eq!(names, vec![Value::from("b"), Value::from("c")]);
    }

    #[test]
    fn test_set_window_requires_order_by() {
        let mut live = LiveQuery::with_defaults(&adults()).unwrap();
        assert!(matches!(live.set_window(0, Some(1)), Err(Error::WindowRequiresOrderBy)));
    }

    #[test]
    fn test_subscribers_receive_batches() {
        let mut live = LiveQuery::with_defaults(&adults()).unwrap();
        let id = live.subscribe();
        live.apply("users", user(1, "ada", 36)).unwrap();
        live.apply("users", user(2, "kid", 3)).unwrap();
        let batches = live.drain_events(id).unwrap();
        assert_eq!(batches.len(), 1);
        live.unsubscribe(id).unwrap();
    }

    #[test]
    fn test_source_filters_exposed() {
        let query = adults().with_join(JoinClause::left(
            Source::collection("posts", "p"),
            Expr::col("u", "id"),
            Expr::col("p", "author_id"),
        ));
        let live = LiveQuery::with_defaults(&query).unwrap();
        assert!(live.source_filters().contains_key("u"));
        let mut collections: Vec<_> = live.collections().collect();
        collections.sort();
        assert_eq!(collections, vec!["posts", "users"]);
    }
}
