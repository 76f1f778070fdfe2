//! Common test utilities for dispatcher and evaluator tests
//!
//! Provides:
//! - `SharedBuffer`, an output sink the test can read back
//! - `MockQuery`, a query backend with canned responses that records calls
//! - `ScriptedEvaluator`, an evaluator answering from a script table

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rsql::command::{BangMap, LastResult, TransformRef};
use rsql::query::{FieldKind, RawField};
use rsql::results::CellTransform;
use rsql::{
    Dispatcher, EvalOutcome, EvalValue, Evaluator, Interrupt, Query, RawResult, Session,
    ShellError, ShellResult,
};
use serde_json::{json, Value as JsonValue};

#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub enum Response {
    Result(RawResult),
    Fail(String),
    /// Never completes
    Hang,
}

#[derive(Clone, Default)]
pub struct MockQuery {
    responses: Arc<Mutex<HashMap<String, Arc<Response>>>>,
    pub executed: Arc<Mutex<Vec<String>>>,
}

impl MockQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, sql: &str, response: Response) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(sql.to_string(), Arc::new(response));
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait(?Send)]
impl Query for MockQuery {
    async fn execute(&mut self, sql: &str) -> ShellResult<RawResult> {
        self.executed.lock().unwrap().push(sql.to_string());
        let response = self.responses.lock().unwrap().get(sql).cloned();
        match response.as_deref() {
            Some(Response::Result(raw)) => Ok(raw.clone()),
            Some(Response::Fail(message)) => Err(ShellError::QueryFailed(message.clone())),
            Some(Response::Hang) => std::future::pending().await,
            None => Ok(RawResult::affected(0)),
        }
    }

    fn describe(&self) -> String {
        "test@mock".to_string()
    }
}

pub enum Script {
    Value(EvalValue),
    WithBangs(EvalValue, BangMap),
    Fail(String),
    /// Return the piped-in results unchanged
    EchoLast,
}

#[derive(Default)]
pub struct ScriptedEvaluator {
    scripts: HashMap<String, Script>,
    /// Code of every evaluation, with whether a last result was visible
    pub calls: Vec<(String, bool)>,
}

impl ScriptedEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, code: &str, script: Script) -> Self {
        self.scripts.insert(code.to_string(), script);
        self
    }

    pub fn text(self, code: &str, text: &str) -> Self {
        self.script(code, Script::Value(EvalValue::Text(text.to_string())))
    }
}

#[async_trait(?Send)]
impl Evaluator for ScriptedEvaluator {
    async fn evaluate(
        &mut self,
        code: &str,
        last: Option<&LastResult>,
        _session: &mut Session,
        sink: &mut dyn Write,
    ) -> ShellResult<EvalOutcome> {
        self.calls.push((code.to_string(), last.is_some()));
        match self.scripts.get(code) {
            Some(Script::Value(value)) => Ok(EvalOutcome::new(value.clone())),
            Some(Script::WithBangs(value, bangs)) => {
                Ok(EvalOutcome::new(value.clone()).with_bangs(bangs.clone()))
            }
            Some(Script::Fail(message)) => Err(ShellError::evaluation(message.clone())),
            Some(Script::EchoLast) => {
                writeln!(sink, "echoing")?;
                let value = match last.and_then(LastResult::as_results) {
                    Some(results) => EvalValue::Results(results.clone()),
                    None => EvalValue::Nil,
                };
                Ok(EvalOutcome::new(value))
            }
            None => Err(ShellError::evaluation(format!("no script for {}", code))),
        }
    }
}

impl CellTransform for ScriptedEvaluator {
    fn apply_transform(
        &mut self,
        transform: &TransformRef,
        value: &JsonValue,
    ) -> ShellResult<JsonValue> {
        let text = value.as_str().unwrap_or_default();
        match transform.as_str() {
            "upper" => Ok(json!(text.to_uppercase())),
            "shout" => Ok(json!(format!("{}!", text))),
            other => Err(ShellError::evaluation(format!("unknown transform {}", other))),
        }
    }
}

pub fn bangs(pairs: &[(&str, &str)]) -> BangMap {
    pairs
        .iter()
        .map(|(col, transform)| (col.to_string(), TransformRef::new(*transform)))
        .collect()
}

/// Text-column rows
pub fn rows(names: &[&str], values: &[&[&str]]) -> RawResult {
    RawResult::rows(
        names
            .iter()
            .map(|n| RawField::new(*n, FieldKind::Text))
            .collect(),
        values
            .iter()
            .map(|row| row.iter().map(|v| json!(v)).collect())
            .collect(),
    )
}

pub struct Harness<E: Evaluator> {
    pub dispatcher: Dispatcher<E, MockQuery>,
    pub query: MockQuery,
    pub out: SharedBuffer,
    pub err: SharedBuffer,
}

pub fn harness<E: Evaluator>(session: Session, evaluator: E, query: MockQuery) -> Harness<E> {
    harness_with_interrupt(session, evaluator, query, Interrupt::new())
}

pub fn harness_with_interrupt<E: Evaluator>(
    session: Session,
    evaluator: E,
    query: MockQuery,
    interrupt: Interrupt,
) -> Harness<E> {
    let out = SharedBuffer::default();
    let err = SharedBuffer::default();
    let dispatcher = Dispatcher::new(session, evaluator, query.clone(), interrupt)
        .with_output(Box::new(out.clone()), Box::new(err.clone()));
    Harness {
        dispatcher,
        query,
        out,
        err,
    }
}
