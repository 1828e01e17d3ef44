//! Scenario files and the runner that replays them.
//!
//! A scenario is a query plus a list of transactions:
//!
//! ```json
//! {
//!   "query": { "from": {"type": "collectionRef", "collection": "users", "alias": "u"} },
//!   "transactions": [
//!     [{"collection": "users", "type": "insert", "key": 1, "value": {"id": 1}}]
//!   ],
//!   "window": {"offset": 0, "limit": 10}
//! }
//! ```

use std::path::Path;

use ivmdb_core::{ChangeBatch, EngineConfig, LiveQuery, ResultRow};
use ivmdb_proto::{ChangeMessage, ChangeType, QueryIr, Value};
use serde::Deserialize;

use crate::error::{CliError, Result};

/// A replayable live-query scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub query: QueryIr,
    #[serde(default)]
    pub transactions: Vec<Vec<ScenarioChange>>,
    /// Window applied after the last transaction.
    #[serde(default)]
    pub window: Option<WindowSpec>,
}

/// One change in a scenario transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioChange {
    pub collection: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub key: Value,
    #[serde(default)]
    pub value: Value,
    #[serde(default, rename = "previousValue")]
    pub previous_value: Option<Value>,
}

impl ScenarioChange {
    fn to_message(&self) -> ChangeMessage {
        ChangeMessage {
            change_type: self.change_type,
            key: self.key.clone(),
            value: self.value.clone(),
            previous_value: self.previous_value.clone(),
        }
    }
}

/// A window move: `limit` null or absent means unbounded.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WindowSpec {
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// The state of the live result after one step of a scenario.
#[derive(Debug, Clone)]
pub struct Step {
    /// Label shown to the user, e.g. `transaction 1` or `window`.
    pub label: String,
    pub changes: ChangeBatch,
    pub results: Vec<ResultRow>,
}

impl Scenario {
    /// Load a scenario from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| CliError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Replay every transaction, returning one step per transaction plus
    /// one for the window move when present.
    pub fn run(&self, config: EngineConfig) -> Result<Vec<Step>> {
        let mut live = LiveQuery::new(&self.query, config)?;
        let mut steps = Vec::with_capacity(self.transactions.len() + 1);

        for (index, transaction) in self.transactions.iter().enumerate() {
            let number = index + 1;
            let changes = replay(&mut live, transaction)
                .map_err(|source| CliError::Transaction {
                    transaction: number,
                    source,
                })?;
            tracing::info!(
                transaction = number,
                changes = changes.len(),
                rows = live.len(),
                "transaction applied"
            );
            steps.push(Step {
                label: format!("transaction {number}"),
                changes,
                results: live.results(),
            });
        }

        if let Some(window) = self.window {
            let changes = live.set_window(window.offset, window.limit)?;
            tracing::info!(
                offset = window.offset,
                limit = ?window.limit,
                changes = changes.len(),
                "window moved"
            );
            steps.push(Step {
                label: "window".to_string(),
                changes,
                results: live.results(),
            });
        }

        Ok(steps)
    }
}

fn replay(
    live: &mut LiveQuery,
    transaction: &[ScenarioChange],
) -> ivmdb_core::Result<ChangeBatch> {
    live.begin()?;
    for change in transaction {
        if let Err(err) = live.apply(&change.collection, change.to_message()) {
            // Leave the query usable for the error report.
            let _ = live.commit();
            return Err(err);
        }
    }
    live.commit()
}
