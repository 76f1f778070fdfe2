//! Splits raw input into statements
//!
//! Three characters are reserved: `;` ends a statement, `|` pipes a
//! statement's result into the next one and `!` introduces a bang clause
//! (`! col => transform, other => transform`). Any of them can be escaped
//! with a backslash.

use std::collections::VecDeque;
use std::mem;

use super::{BangMap, Declarator, Displayer, Statement, TransformRef};

const STATEMENT_SEPARATOR: char = ';';
const PIPE: char = '|';
const BANG: char = '!';
const ESCAPE: char = '\\';
const SCRIPT_MARKER: char = '.';
const LINE_DISPLAY_MARKER: &str = "\\G";
const BANG_ASSIGN: &str = "=>";

/// Tokenize `input` into a queue of statements
///
/// Statements without an explicit `\G` or trailing pipe use `default_displayer`.
pub fn tokenize(input: &str, default_displayer: Displayer) -> VecDeque<Statement> {
    let mut tokenizer = Tokenizer::new(default_displayer);
    for (segment, separator) in split_segments(input) {
        tokenizer.feed(segment, separator);
    }
    tokenizer.finish()
}

fn is_separator(c: char) -> bool {
    matches!(c, STATEMENT_SEPARATOR | PIPE | BANG)
}

/// Break input into runs of non-separator text, each paired with the separator
/// that ended it. A separator with no text before it is dropped.
fn split_segments(input: &str) -> Vec<(&str, Option<char>)> {
    let mut segments = Vec::new();
    let mut start = 0;

    for (idx, c) in input.char_indices() {
        if !is_separator(c) {
            continue;
        }
        if idx > start {
            segments.push((&input[start..idx], Some(c)));
        }
        start = idx + c.len_utf8();
    }

    if start < input.len() {
        segments.push((&input[start..], None));
    }

    segments
}

struct Tokenizer {
    default_displayer: Displayer,
    statements: VecDeque<Statement>,
    /// Literal text waiting to be prefixed onto the next segment
    escaped: String,
    bangs: BangMap,
    /// Text seen before a `!`, held until the bang clause is parsed
    before_bang: Option<String>,
    /// Between the two pipes of a block parameter list (`{ |x| ... }`)
    in_block_params: bool,
    next_is_script: bool,
}

impl Tokenizer {
    fn new(default_displayer: Displayer) -> Self {
        Self {
            default_displayer,
            statements: VecDeque::new(),
            escaped: String::new(),
            bangs: BangMap::new(),
            before_bang: None,
            in_block_params: false,
            next_is_script: false,
        }
    }

    fn feed(&mut self, segment: &str, separator: Option<char>) {
        if let Some(sep) = separator {
            if let Some(unescaped) = segment.strip_suffix(ESCAPE) {
                self.escaped.push_str(unescaped);
                self.escaped.push(sep);
                return;
            }
        }

        let mut current = if self.escaped.is_empty() {
            segment.to_string()
        } else {
            let mut prefixed = mem::take(&mut self.escaped);
            prefixed.push_str(segment);
            prefixed
        };

        if let Some(pending) = self.before_bang.take() {
            match parse_bang_clause(&current) {
                Some(parsed) => {
                    tracing::debug!(?parsed, "parsed bang clause");
                    self.bangs.extend(parsed);
                    current = pending;
                }
                None => {
                    // not a mapping (probably `!=` or similar); the text joins the next segment
                    self.escaped = format!("{}{}{}", pending, BANG, current);
                    return;
                }
            }
        }

        match separator {
            Some(BANG) => {
                self.before_bang = Some(current);
                return;
            }
            Some(PIPE) => {
                if self.in_block_params {
                    self.in_block_params = false;
                    self.escape_pipe(current);
                    return;
                }
                if opens_block(segment) {
                    self.in_block_params = true;
                    self.escape_pipe(current);
                    return;
                }
            }
            _ => {}
        }

        let bangs = mem::take(&mut self.bangs);
        self.add_statement(&current, bangs, self.next_is_script, separator);
        self.next_is_script = separator == Some(PIPE);
    }

    fn escape_pipe(&mut self, mut current: String) {
        current.push(PIPE);
        self.escaped = current;
    }

    fn finish(mut self) -> VecDeque<Statement> {
        let mut rest = mem::take(&mut self.escaped);
        if let Some(pending) = self.before_bang.take() {
            // a trailing `!` with nothing after it
            rest = format!("{}{}{}", pending, BANG, rest);
        }
        let bangs = mem::take(&mut self.bangs);
        self.add_statement(&rest, bangs, self.next_is_script, None);
        self.statements
    }

    fn add_statement(
        &mut self,
        content: &str,
        bangs: BangMap,
        script_carry: bool,
        separator: Option<char>,
    ) -> bool {
        let mut content = content.trim();

        let declarator = if let Some(rest) = content.strip_prefix(SCRIPT_MARKER) {
            content = rest.trim_start();
            Declarator::Script
        } else if script_carry {
            Declarator::Script
        } else {
            Declarator::None
        };

        let displayer = if let Some(rest) = content.strip_suffix(LINE_DISPLAY_MARKER) {
            content = rest.trim_end();
            Displayer::Line
        } else if separator == Some(PIPE) {
            Displayer::Pipe
        } else {
            self.default_displayer
        };

        if content.is_empty() {
            return false;
        }

        self.statements.push_back(Statement {
            content: content.to_string(),
            bangs,
            declarator,
            displayer,
        });
        true
    }
}

/// Parse `a => b, c => d`. Returns `None` unless every entry is a clean pair.
fn parse_bang_clause(text: &str) -> Option<BangMap> {
    let mut bangs = BangMap::new();

    for entry in text.split(',') {
        let mut parts = entry.split(BANG_ASSIGN);
        let column = parts.next()?.trim();
        let transform = parts.next()?.trim();

        if parts.next().is_some()
            || column.is_empty()
            || transform.is_empty()
            || transform.contains(char::is_whitespace)
        {
            return None;
        }

        bangs.insert(column.to_string(), TransformRef::new(transform));
    }

    Some(bangs)
}

/// Whether a segment ends with something that takes a `|params|` list
fn opens_block(segment: &str) -> bool {
    let trimmed = segment.trim_end();
    if trimmed.ends_with('{') {
        return true;
    }
    match trimmed.strip_suffix("do") {
        Some(before) => !before
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric() || c == '_'),
        None => false,
    }
}
