//! Script evaluation
//!
//! Statements marked with a leading `.` (or fed by a pipe) are handed to an
//! [`Evaluator`]. A script that returns text has generated more input for the
//! shell; anything else is a value to show or pass along.

pub mod conversion;
pub mod helpers;
pub mod lua;
pub mod recipes;

use std::io::Write;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot};

use crate::command::{BangMap, LastResult};
use crate::error::ShellResult;
use crate::query::RawResult;
use crate::results::{CellTransform, ResultSet};
use crate::session::Session;

pub use lua::LuaEvaluator;

/// Value produced by one evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Nil,
    /// More shell input to tokenize and run
    Text(String),
    Results(ResultSet),
    Other(JsonValue),
}

impl EvalValue {
    /// Worth echoing as `=> value`
    pub fn is_truthy(&self) -> bool {
        match self {
            EvalValue::Nil => false,
            EvalValue::Other(JsonValue::Null) | EvalValue::Other(JsonValue::Bool(false)) => false,
            _ => true,
        }
    }

    /// Readable form used after `=>`
    pub fn inspect(&self) -> String {
        match self {
            EvalValue::Nil => "nil".to_string(),
            EvalValue::Text(text) => format!("{:?}", text),
            EvalValue::Results(results) => format!(
                "<results: {} fields, {} rows>",
                results.fields().len(),
                results.num_rows()
            ),
            EvalValue::Other(JsonValue::String(s)) => format!("{:?}", s),
            EvalValue::Other(value) => value.to_string(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            EvalValue::Nil => JsonValue::Null,
            EvalValue::Text(text) => JsonValue::String(text.clone()),
            EvalValue::Results(results) => results.to_json(),
            EvalValue::Other(value) => value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutcome {
    pub value: EvalValue,
    /// Column transforms requested while evaluating (recipe bangs)
    pub bangs: BangMap,
}

impl EvalOutcome {
    pub fn new(value: EvalValue) -> Self {
        Self {
            value,
            bangs: BangMap::new(),
        }
    }

    pub fn with_bangs(mut self, bangs: BangMap) -> Self {
        self.bangs = bangs;
        self
    }
}

/// SQL a running script wants executed by the dispatcher's backend
#[derive(Debug)]
pub struct ScriptQuery {
    pub sql: String,
    pub reply: oneshot::Sender<ShellResult<RawResult>>,
}

pub type ScriptQueries = mpsc::UnboundedSender<ScriptQuery>;

#[async_trait(?Send)]
pub trait Evaluator: CellTransform {
    /// Evaluate `code` with `last` visible to it
    ///
    /// Printed output is written to `sink`. Scripts may change session
    /// settings such as the hex limit.
    async fn evaluate(
        &mut self,
        code: &str,
        last: Option<&LastResult>,
        session: &mut Session,
        sink: &mut dyn Write,
    ) -> ShellResult<EvalOutcome>;

    /// Names offered by the line editor's completion
    fn completions(&self) -> Vec<String> {
        Vec::new()
    }

    /// Channel for queries issued from inside a script
    ///
    /// Requests are only served while [`Evaluator::evaluate`] is running.
    fn attach_queries(&mut self, _queries: ScriptQueries) {}
}
