//! Query collaborator
//!
//! The shell never talks to a database directly. Anything that can turn SQL
//! text into a [`RawResult`] can back it; [`HttpQuery`] speaks to a SoliDB
//! server's SQL endpoint.

pub mod http;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::ShellResult;

pub use http::HttpQuery;

#[async_trait(?Send)]
pub trait Query {
    /// Run one SQL statement
    async fn execute(&mut self, sql: &str) -> ShellResult<RawResult>;

    /// Short label for the connection, used in the prompt
    fn describe(&self) -> String;

    /// Database and table names offered by the line editor
    async fn names(&mut self) -> ShellResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Broad value class of a column, used to decide on hex rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldKind {
    #[default]
    Text,
    /// Blob columns from backends that type them
    Binary,
    Number,
    Boolean,
    Json,
}

impl FieldKind {
    /// Columns whose cells may carry raw bytes
    pub fn is_opaque(self) -> bool {
        matches!(self, FieldKind::Text | FieldKind::Binary)
    }

    fn of(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => None,
            JsonValue::String(_) => Some(FieldKind::Text),
            JsonValue::Number(_) => Some(FieldKind::Number),
            JsonValue::Bool(_) => Some(FieldKind::Boolean),
            JsonValue::Array(_) | JsonValue::Object(_) => Some(FieldKind::Json),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField {
    pub name: String,
    pub kind: FieldKind,
}

impl RawField {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Unprocessed query output, before transforms and rendering
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub fields: Vec<RawField>,
    /// `None` for statements that return no rows
    pub rows: Option<Vec<Vec<JsonValue>>>,
    pub affected_rows: u64,
}

impl RawResult {
    pub fn affected(affected_rows: u64) -> Self {
        Self {
            fields: Vec::new(),
            rows: None,
            affected_rows,
        }
    }

    pub fn rows(fields: Vec<RawField>, rows: Vec<Vec<JsonValue>>) -> Self {
        Self {
            fields,
            rows: Some(rows),
            affected_rows: 0,
        }
    }

    /// Tabulate a list of documents
    ///
    /// Columns appear in the order they are first seen. Documents that are not
    /// objects land in a single `value` column.
    pub fn from_documents(documents: Vec<JsonValue>) -> Self {
        let mut names: Vec<String> = Vec::new();
        for doc in &documents {
            match doc {
                JsonValue::Object(obj) => {
                    for key in obj.keys() {
                        if !names.iter().any(|n| n == key) {
                            names.push(key.clone());
                        }
                    }
                }
                _ => {
                    if !names.iter().any(|n| n == "value") {
                        names.push("value".to_string());
                    }
                }
            }
        }

        let rows: Vec<Vec<JsonValue>> = documents
            .into_iter()
            .map(|doc| match doc {
                JsonValue::Object(mut obj) => names
                    .iter()
                    .map(|name| obj.remove(name).unwrap_or(JsonValue::Null))
                    .collect(),
                other => names
                    .iter()
                    .map(|name| {
                        if name == "value" {
                            other.clone()
                        } else {
                            JsonValue::Null
                        }
                    })
                    .collect(),
            })
            .collect();

        let fields = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let kind = rows
                    .iter()
                    .find_map(|row| FieldKind::of(&row[i]))
                    .unwrap_or_default();
                RawField { name, kind }
            })
            .collect();

        Self::rows(fields, rows)
    }

    pub fn num_rows(&self) -> usize {
        self.rows.as_ref().map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_documents_collects_columns() {
        let raw = RawResult::from_documents(vec![
            json!({"name": "Alice", "age": 30}),
            json!({"name": "Bob", "dept": "eng"}),
        ]);

        let names: Vec<&str> = raw.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "age", "dept"]);
        assert_eq!(raw.fields[0].kind, FieldKind::Text);
        assert_eq!(raw.fields[1].kind, FieldKind::Number);

        let rows = raw.rows.unwrap();
        assert_eq!(rows[1], vec![json!("Bob"), JsonValue::Null, json!("eng")]);
    }

    #[test]
    fn test_from_documents_keeps_server_key_order() {
        let documents: Vec<JsonValue> =
            serde_json::from_str(r#"[{"zeta": 1, "alpha": 2, "mid": 3}]"#).unwrap();
        let raw = RawResult::from_documents(documents);

        let names: Vec<&str> = raw.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_from_documents_scalars() {
        let raw = RawResult::from_documents(vec![json!(1), json!(2)]);
        assert_eq!(raw.fields, vec![RawField::new("value", FieldKind::Number)]);
        assert_eq!(raw.num_rows(), 2);
    }

    #[test]
    fn test_affected_has_no_rows() {
        let raw = RawResult::affected(3);
        assert!(raw.rows.is_none());
        assert_eq!(raw.num_rows(), 0);
        assert_eq!(raw.affected_rows, 3);
    }
}
