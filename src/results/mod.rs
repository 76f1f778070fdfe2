//! Tabular results
//!
//! A [`ResultSet`] is built once from a [`RawResult`]: per-column transforms
//! are applied, every cell is rendered to text and column widths are fixed.
//! After that the only change allowed is dropping rows (see [`ResultSet::grep`]).

pub mod display;
pub mod hex;

use std::time::Duration;

use colored::Colorize;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};

use crate::command::TransformRef;
use crate::error::{ShellError, ShellResult};
use crate::query::{FieldKind, RawResult};
use crate::session::{parse_use_database, Session};

pub use display::display;

/// Key marking a script value as a results table
pub const RESULTS_MARKER: &str = "_results";

pub const NULL_TOKEN: &str = "NULL";

/// Resolves the transforms named in bang clauses
pub trait CellTransform {
    fn apply_transform(
        &mut self,
        transform: &TransformRef,
        value: &JsonValue,
    ) -> ShellResult<JsonValue>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    pub name: String,
    pub display_width: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrepOptions {
    /// Match the pattern literally
    pub fixed: bool,
    /// Keep the rows that do not match
    pub inverse: bool,
    /// Highlight matches
    pub color: bool,
}

impl Default for GrepOptions {
    fn default() -> Self {
        Self {
            fixed: false,
            inverse: false,
            color: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    sql: String,
    elapsed: Duration,
    affected_rows: u64,
    fields: Vec<FieldMeta>,
    rows: Option<Vec<Vec<String>>>,
    database_changed: Option<String>,
}

impl ResultSet {
    /// Results of a statement that returned rows
    pub fn new(sql: impl Into<String>, names: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self::from_parts(sql.into(), Duration::ZERO, 0, names, Some(rows), None)
    }

    /// Results of a statement that only affected rows
    pub fn affected(sql: impl Into<String>, affected_rows: u64, elapsed: Duration) -> Self {
        Self::from_parts(sql.into(), elapsed, affected_rows, Vec::new(), None, None)
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Build display-ready results from raw query output
    ///
    /// Fails with [`ShellError::RowLimitExceeded`] when there are more rows
    /// than the session allows. Transform failures keep the raw value.
    pub fn build<T: CellTransform + ?Sized>(
        sql: &str,
        raw: RawResult,
        elapsed: Duration,
        session: &Session,
        transformer: &mut T,
    ) -> ShellResult<Self> {
        let database_changed = parse_use_database(sql);
        let names: Vec<String> = raw.fields.iter().map(|f| f.name.clone()).collect();

        // an empty row set reads like a statement that only affected rows
        let Some(raw_rows) = raw.rows.filter(|rows| !rows.is_empty()) else {
            return Ok(Self::from_parts(
                sql.to_string(),
                elapsed,
                raw.affected_rows,
                names,
                None,
                database_changed,
            ));
        };

        if raw_rows.len() > session.max_rows {
            return Err(ShellError::RowLimitExceeded {
                actual: raw_rows.len(),
                max: session.max_rows,
            });
        }

        let transforms: Vec<Option<&TransformRef>> = raw
            .fields
            .iter()
            .map(|f| session.transform_for(&f.name))
            .collect();

        let mut rows = Vec::with_capacity(raw_rows.len());
        for raw_row in raw_rows {
            let cells = raw_row
                .into_iter()
                .chain(std::iter::repeat(JsonValue::Null))
                .take(raw.fields.len());

            let mut row = Vec::with_capacity(raw.fields.len());
            for ((field, transform), value) in raw.fields.iter().zip(&transforms).zip(cells) {
                let value = match transform {
                    Some(transform) => match transformer.apply_transform(transform, &value) {
                        Ok(transformed) => transformed,
                        Err(e) => {
                            tracing::warn!(column = %field.name, %transform, "transform failed: {}", e);
                            value
                        }
                    },
                    None => value,
                };
                row.push(render_cell(&value, field.kind, session.hexstr_limit()));
            }
            rows.push(row);
        }

        Ok(Self::from_parts(
            sql.to_string(),
            elapsed,
            raw.affected_rows,
            names,
            Some(rows),
            database_changed,
        ))
    }

    fn from_parts(
        sql: String,
        elapsed: Duration,
        affected_rows: u64,
        names: Vec<String>,
        rows: Option<Vec<Vec<String>>>,
        database_changed: Option<String>,
    ) -> Self {
        let fields = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let longest_cell = rows
                    .iter()
                    .flatten()
                    .filter_map(|row| row.get(i))
                    .map(|cell| cell_width(cell))
                    .max()
                    .unwrap_or(0);
                FieldMeta {
                    display_width: longest_cell.max(name.chars().count()),
                    name,
                }
            })
            .collect();

        Self {
            sql,
            elapsed,
            affected_rows,
            fields,
            rows,
            database_changed,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    pub fn rows(&self) -> Option<&[Vec<String>]> {
        self.rows.as_deref()
    }

    pub fn has_rows(&self) -> bool {
        self.rows.is_some()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.as_ref().map_or(0, Vec::len)
    }

    /// Database selected by the statement that produced these results
    pub fn database_changed(&self) -> Option<&str> {
        self.database_changed.as_deref()
    }

    /// Row `index` keyed by field name
    pub fn row_hash(&self, index: usize) -> Option<Map<String, JsonValue>> {
        let row = self.rows.as_ref()?.get(index)?;
        Some(
            self.fields
                .iter()
                .zip(row)
                .map(|(field, cell)| (field.name.clone(), JsonValue::String(cell.clone())))
                .collect(),
        )
    }

    pub fn iter_hashes(&self) -> impl Iterator<Item = Map<String, JsonValue>> + '_ {
        (0..self.num_rows()).filter_map(move |i| self.row_hash(i))
    }

    /// Drop the rows for which `keep` returns false
    pub fn retain_rows<F: FnMut(&[String]) -> bool>(&mut self, mut keep: F) {
        if let Some(rows) = self.rows.as_mut() {
            rows.retain(|row| keep(row));
        }
    }

    /// Keep only rows with a cell matching `pattern`
    ///
    /// Returns whether any row is left.
    pub fn grep(&mut self, pattern: &str, options: GrepOptions) -> ShellResult<bool> {
        let source = if options.fixed {
            regex::escape(pattern)
        } else {
            pattern.to_string()
        };
        let re = Regex::new(&source)
            .map_err(|e| ShellError::evaluation(format!("invalid grep pattern: {}", e)))?;

        self.retain_rows(|row| row.iter().any(|cell| re.is_match(cell)) != options.inverse);

        if options.color && !options.inverse {
            if let Some(rows) = self.rows.as_mut() {
                for cell in rows.iter_mut().flatten() {
                    if re.is_match(cell) {
                        *cell = re
                            .replace_all(cell, |caps: &regex::Captures| {
                                caps[0].red().bold().to_string()
                            })
                            .into_owned();
                    }
                }
            }
        }

        Ok(self.num_rows() > 0)
    }

    /// Script-facing form: a marked object with `fields` and `rows` arrays
    pub fn to_json(&self) -> JsonValue {
        let mut obj = Map::new();
        obj.insert(RESULTS_MARKER.to_string(), JsonValue::Bool(true));
        obj.insert("sql".to_string(), JsonValue::String(self.sql.clone()));
        obj.insert(
            "elapsed".to_string(),
            serde_json::Number::from_f64(self.elapsed.as_secs_f64())
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
        );
        obj.insert(
            "affected_rows".to_string(),
            JsonValue::Number(self.affected_rows.into()),
        );
        obj.insert(
            "fields".to_string(),
            JsonValue::Array(
                self.fields
                    .iter()
                    .map(|f| JsonValue::String(f.name.clone()))
                    .collect(),
            ),
        );
        if let Some(rows) = &self.rows {
            obj.insert(
                "rows".to_string(),
                JsonValue::Array(
                    rows.iter()
                        .map(|row| {
                            JsonValue::Array(row.iter().cloned().map(JsonValue::String).collect())
                        })
                        .collect(),
                ),
            );
        }
        if let Some(db) = &self.database_changed {
            obj.insert("database_changed".to_string(), JsonValue::String(db.clone()));
        }
        JsonValue::Object(obj)
    }

    /// Rebuild results from their script-facing form; `None` if not marked
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.get(RESULTS_MARKER).and_then(JsonValue::as_bool) != Some(true) {
            return None;
        }

        let names: Vec<String> = obj
            .get("fields")
            .map(list_items)
            .unwrap_or_default()
            .into_iter()
            .map(render_plain)
            .collect();

        let rows = obj.get("rows").map(|rows| {
            list_items(rows)
                .into_iter()
                .map(|row| list_items(row).into_iter().map(render_plain).collect())
                .collect()
        });

        let elapsed = obj
            .get("elapsed")
            .and_then(JsonValue::as_f64)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_default();

        Some(Self::from_parts(
            obj.get("sql")
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string(),
            elapsed,
            obj.get("affected_rows")
                .and_then(JsonValue::as_u64)
                .unwrap_or(0),
            names,
            rows,
            obj.get("database_changed")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
        ))
    }
}

/// Width a cell needs: its longest line, in characters
pub fn cell_width(cell: &str) -> usize {
    cell.lines().map(|l| l.chars().count()).max().unwrap_or(0)
}

fn render_cell(value: &JsonValue, kind: FieldKind, hexstr_limit: Option<usize>) -> String {
    match value {
        JsonValue::String(s) if kind.is_opaque() && hex::looks_binary(s) => {
            hex::to_hexstr(s.as_bytes(), hexstr_limit)
        }
        other => render_plain(other),
    }
}

fn render_plain(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => NULL_TOKEN.to_string(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Array items; an empty script table arrives as an empty object
fn list_items(value: &JsonValue) -> Vec<&JsonValue> {
    match value {
        JsonValue::Array(items) => items.iter().collect(),
        _ => Vec::new(),
    }
}
