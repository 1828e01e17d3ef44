//! Output formatters for scenario steps and optimizer reports.

use std::collections::{BTreeMap, HashMap};

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use ivmdb_core::ResultRow;
use ivmdb_proto::{ChangeMessage, Expr, QueryIr, Value};
use serde_json::json;

use crate::error::Result;
use crate::scenario::Step;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables
    Text,
    /// One JSON document per step
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter {
    /// Format the live result after one scenario step.
    fn format_step(&self, step: &Step) -> Result<String>;

    /// Format an optimized query and the filters it pushed to collections.
    fn format_optimized(
        &self,
        query: &QueryIr,
        source_filters: &HashMap<String, Expr>,
    ) -> Result<String>;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_step(&self, step: &Step) -> Result<String> {
        let mut output = format!(
            "{}: {} change(s)\n",
            step.label,
            step.changes.len()
        );
        for change in &step.changes {
            output.push_str(&format!("  {}\n", describe_change(change)));
        }
        output.push_str(&format_rows_as_table(&step.results));
        Ok(output)
    }

    fn format_optimized(
        &self,
        query: &QueryIr,
        source_filters: &HashMap<String, Expr>,
    ) -> Result<String> {
        let mut output = String::from("optimized query:\n");
        output.push_str(&serde_json::to_string_pretty(query)?);

        let filters = sorted(source_filters);
        if filters.is_empty() {
            output.push_str("\n\nno source filters");
        } else {
            let mut table = Table::new();
            table.set_header(vec!["alias", "filter"]);
            for (alias, expr) in filters {
                table.add_row(vec![Cell::new(alias), Cell::new(serde_json::to_string(expr)?)]);
            }
            output.push_str(&format!("\n\nsource filters:\n{table}"));
        }
        Ok(output)
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_step(&self, step: &Step) -> Result<String> {
        let document = json!({
            "step": step.label,
            "changes": step.changes,
            "results": step.results,
        });
        Ok(serde_json::to_string(&document)?)
    }

    fn format_optimized(
        &self,
        query: &QueryIr,
        source_filters: &HashMap<String, Expr>,
    ) -> Result<String> {
        let document = json!({
            "optimizedQuery": query,
            "sourceFilters": sorted(source_filters),
        });
        Ok(serde_json::to_string_pretty(&document)?)
    }
}

fn sorted(filters: &HashMap<String, Expr>) -> BTreeMap<&str, &Expr> {
    filters
        .iter()
        .map(|(alias, expr)| (alias.as_str(), expr))
        .collect()
}

fn describe_change(change: &ChangeMessage) -> String {
    let kind = match change.change_type {
        ivmdb_proto::ChangeType::Insert => "+",
        ivmdb_proto::ChangeType::Update => "~",
        ivmdb_proto::ChangeType::Delete => "-",
    };
    format!("{kind} {}", format_value(&change.key))
}

/// Format result rows as a table.
fn format_rows_as_table(rows: &[ResultRow]) -> String {
    let ordered = rows.iter().any(|row| row.order.is_some());

    let mut table = Table::new();
    let mut headers = vec![Cell::new("key")];
    if ordered {
        headers.push(Cell::new("order"));
    }
    headers.push(Cell::new("value"));
    table.set_header(headers);

    for row in rows {
        let mut cells = vec![Cell::new(format_value(&row.key))];
        if ordered {
            cells.push(Cell::new(row.order.as_deref().unwrap_or_default()));
        }
        cells.push(Cell::new(format_value(&row.value)));
        table.add_row(cells);
    }

    format!("{}\n{} row(s)", table, rows.len())
}

/// Format a Value as a display string.
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}
