//! Change records delivered by the storage layer.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::value::Value;

/// Kind of change applied to a base row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// A new row.
    Insert,
    /// A replaced row.
    Update,
    /// A removed row.
    Delete,
}

/// A single base-row mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMessage {
    /// Kind of change.
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// Row key within its collection.
    pub key: Value,
    /// New row value (the removed row for deletes).
    #[serde(default)]
    pub value: Value,
    /// Row value before an update, when the writer knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<Value>,
}

impl ChangeMessage {
    /// Create an insert.
    pub fn insert(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        Self {
            change_type: ChangeType::Insert,
            key: key.into(),
            value: value.into(),
            previous_value: None,
        }
    }

    /// Create an update.
    pub fn update(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        Self {
            change_type: ChangeType::Update,
            key: key.into(),
            value: value.into(),
            previous_value: None,
        }
    }

    /// Create a delete.
    pub fn delete(key: impl Into<Value>) -> Self {
        Self {
            change_type: ChangeType::Delete,
            key: key.into(),
            value: Value::Null,
            previous_value: None,
        }
    }

    /// Attach the previous row value.
    pub fn with_previous_value(mut self, previous: impl Into<Value>) -> Self {
        self.previous_value = Some(previous.into());
        self
    }

    /// Check the record is well formed.
    ///
    /// Keys must be non-null and inserts and updates must carry a row.
    pub fn validate(&self) -> Result<(), Error> {
        if self.key.is_null() {
            return Err(Error::InvalidChange("row key is null".into()));
        }
        if self.change_type != ChangeType::Delete && self.value.is_null() {
            return Err(Error::InvalidChange(format!(
                "{:?} of key {} carries no value",
                self.change_type, self.key
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_constructors() {
        let insert = ChangeMessage::insert(1, Value::object([("id", 1)]));
        assert_eq!(insert.change_type, ChangeType::Insert);
        assert!(insert.validate().is_ok());

        let update = ChangeMessage::update(1, Value::object([("id", 2)]))
            .with_previous_value(Value::object([("id", 1)]));
        assert!(update.previous_value.is_some());

        assert!(ChangeMessage::delete(1).validate().is_ok());
    }

    #[test]
    fn test_invalid_changes() {
        assert!(ChangeMessage::delete(Value::Null).validate().is_err());
        assert!(ChangeMessage::insert(1, Value::Null).validate().is_err());
    }

    #[test]
    fn test_change_json_shape() {
        let json = r#"{"type": "update", "key": 7, "value": {"x": 1}, "previousValue": {"x": 0}}"#;
        let change: ChangeMessage = serde_json::from_str(json).unwrap();
        assert_eq!(change.change_type, ChangeType::Update);
        assert_eq!(change.key, Value::Int(7));
        assert_eq!(change.previous_value, Some(Value::object([("x", 0)])));
    }
}
