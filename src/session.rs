//! Per-process shell state shared by the dispatcher, the displayers and scripts

use std::collections::VecDeque;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::command::{BangMap, Displayer, TransformRef};
use crate::results::hex::HEXSTR_LIMIT;

pub const DEFAULT_FIELD_SEPARATOR: &str = " ";
pub const DEFAULT_MAX_ROWS: usize = 1000;
const HISTORY_LIMIT: usize = 100;

static USE_DATABASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*use\s+[`"]?([^\s`";]+)"#).expect("valid use-database pattern")
});

/// Database named by a `use <db>` statement
pub fn parse_use_database(sql: &str) -> Option<String> {
    USE_DATABASE
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Debug, Clone)]
pub struct Session {
    pub field_separator: String,
    pub max_rows: usize,
    database: Option<String>,
    bangs: BangMap,
    hexstr_limit: Option<usize>,
    default_displayer: Displayer,
    history: VecDeque<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            field_separator: DEFAULT_FIELD_SEPARATOR.to_string(),
            max_rows: DEFAULT_MAX_ROWS,
            database: None,
            bangs: BangMap::new(),
            hexstr_limit: Some(HEXSTR_LIMIT),
            default_displayer: Displayer::Column,
            history: VecDeque::new(),
        }
    }
}

impl Session {
    pub fn new(database: Option<String>) -> Self {
        Self {
            database,
            ..Self::default()
        }
    }

    pub fn with_field_separator(mut self, separator: impl Into<String>) -> Self {
        self.field_separator = separator.into();
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_default_displayer(mut self, displayer: Displayer) -> Self {
        self.default_displayer = displayer;
        self
    }

    pub fn default_displayer(&self) -> Displayer {
        self.default_displayer
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn set_database(&mut self, database: impl Into<String>) {
        self.database = Some(database.into());
    }

    /// Replace the active bang map with the one of the statement about to run
    pub fn install_bangs(&mut self, bangs: BangMap) {
        self.bangs = bangs;
    }

    pub fn bangs(&self) -> &BangMap {
        &self.bangs
    }

    /// Transform to apply to a column, if one is installed and not disabled
    pub fn transform_for(&self, column: &str) -> Option<&TransformRef> {
        self.bangs.get(column).filter(|t| !t.is_nil())
    }

    /// `None` means no truncation
    pub fn hexstr_limit(&self) -> Option<usize> {
        self.hexstr_limit
    }

    pub fn set_hexstr_limit(&mut self, limit: Option<usize>) {
        self.hexstr_limit = limit;
    }

    pub fn reset_hexstr_limit(&mut self) {
        self.hexstr_limit = Some(HEXSTR_LIMIT);
    }

    pub fn record_query(&mut self, sql: &str) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(sql.to_string());
    }

    /// The most recent `count` queries (all of them when `None`), oldest first
    pub fn history(&self, count: Option<usize>) -> Vec<String> {
        let skip = count.map_or(0, |n| self.history.len().saturating_sub(n));
        self.history.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_use_database() {
        assert_eq!(parse_use_database("use accounts"), Some("accounts".to_string()));
        assert_eq!(parse_use_database("  USE `sales`;"), Some("sales".to_string()));
        assert_eq!(parse_use_database("select because from t"), None);
        assert_eq!(parse_use_database("use"), None);
    }

    #[test]
    fn test_transform_for_skips_nil() {
        let mut session = Session::default();
        let mut bangs = BangMap::new();
        bangs.insert("a".to_string(), TransformRef::new("upper"));
        bangs.insert("b".to_string(), TransformRef::new("nil"));
        session.install_bangs(bangs);

        assert_eq!(session.transform_for("a"), Some(&TransformRef::new("upper")));
        assert_eq!(session.transform_for("b"), None);
        assert_eq!(session.transform_for("c"), None);
    }

    #[test]
    fn test_history() {
        let mut session = Session::default();
        for i in 1..=4 {
            session.record_query(&format!("ignored{}", i));
        }
        assert_eq!(session.history(None).len(), 4);
        assert_eq!(session.history(Some(1)), vec!["ignored4".to_string()]);
        assert_eq!(session.history(Some(15)).len(), 4);

        for i in 0..HISTORY_LIMIT {
            session.record_query(&format!("q{}", i));
        }
        assert_eq!(session.history(None).len(), HISTORY_LIMIT);
        assert_eq!(session.history(None)[0], "q0");
    }
}
