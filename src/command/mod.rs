//! Statements, the tokenizer that produces them and the dispatcher that runs them
//!
//! A line of input such as
//!
//! ```text
//! select * from users ! created_at => relative_time | .grep(results, "alice")
//! ```
//!
//! becomes a queue of [`Statement`]s. Each one carries its text, the column
//! transforms ("bangs") that apply to its results, whether it is SQL or Lua,
//! and how its results are shown.

pub mod dispatcher;
pub mod tokenizer;

use std::collections::BTreeMap;
use std::fmt;

use crate::results::ResultSet;
use crate::scripting::EvalValue;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use tokenizer::tokenize;

/// Symbolic name of a per-column transform, resolved by the evaluator
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransformRef(String);

impl TransformRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `col => nil` switches a transform off for that column
    pub fn is_nil(&self) -> bool {
        self.0 == "nil"
    }
}

impl fmt::Display for TransformRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Column name to transform mapping attached to one statement
pub type BangMap = BTreeMap<String, TransformRef>;

/// How a statement's text is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Declarator {
    /// No declarator: the content is literal SQL
    #[default]
    None,
    /// Evaluated by the script engine
    Script,
}

/// Where a statement's result goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Displayer {
    #[default]
    Column,
    Line,
    Batch,
    /// Handed to the next statement instead of being shown
    Pipe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub content: String,
    pub bangs: BangMap,
    pub declarator: Declarator,
    pub displayer: Displayer,
}

impl Statement {
    pub fn is_script(&self) -> bool {
        self.declarator == Declarator::Script
    }

    pub fn is_piped(&self) -> bool {
        self.displayer == Displayer::Pipe
    }

    fn with_bangs(self, bangs: BangMap) -> Self {
        Self { bangs, ..self }
    }
}

/// Outcome of a script statement whose value is not SQL text
#[derive(Debug, Clone, PartialEq)]
pub struct EvalResult {
    pub value: EvalValue,
    pub captured_output: Option<String>,
}

/// The single result slot threaded between piped statements
#[derive(Debug, Clone, PartialEq)]
pub enum LastResult {
    Results(ResultSet),
    Eval(EvalResult),
}

impl LastResult {
    pub fn as_results(&self) -> Option<&ResultSet> {
        match self {
            LastResult::Results(results) => Some(results),
            LastResult::Eval(EvalResult {
                value: EvalValue::Results(results),
                ..
            }) => Some(results),
            LastResult::Eval(_) => None,
        }
    }
}
