//! Line editor completion and hints

use std::borrow::Cow;

use colored::Colorize;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};

const SQL_KEYWORDS: &[&str] = &[
    "select", "from", "where", "group", "order", "by", "limit", "offset", "insert", "into",
    "values", "update", "set", "delete", "create", "drop", "table", "index", "show", "tables",
    "databases", "describe", "explain", "use", "join", "left", "inner", "on", "and", "or", "not",
    "null", "like", "between", "distinct", "count", "exit", "quit",
];

const SCRIPT_PREFIX: char = '.';

pub struct ShellHelper {
    recipes: Vec<String>,
    names: Vec<String>,
}

impl ShellHelper {
    pub fn new() -> Self {
        Self {
            recipes: Vec::new(),
            names: Vec::new(),
        }
    }

    /// Replace the database and table names offered for completion
    pub fn set_names(&mut self, mut names: Vec<String>) {
        names.sort();
        names.dedup();
        self.names = names;
    }

    /// Replace the recipe names offered for completion
    pub fn set_recipes(&mut self, mut recipes: Vec<String>) {
        recipes.sort();
        self.recipes = recipes;
    }

    /// Completions for `word`
    ///
    /// A leading `.` restricts the candidates to recipes and is kept on each one.
    pub fn candidates(&self, word: &str) -> Vec<String> {
        if let Some(rest) = word.strip_prefix(SCRIPT_PREFIX) {
            return self
                .recipes
                .iter()
                .filter(|name| name.starts_with(rest))
                .map(|name| format!("{}{}", SCRIPT_PREFIX, name))
                .collect();
        }

        let lowered = word.to_ascii_lowercase();
        let upper = !word.is_empty() && word.chars().all(|c| !c.is_ascii_lowercase());

        let keywords = SQL_KEYWORDS
            .iter()
            .filter(|kw| kw.starts_with(&lowered))
            .map(|kw| {
                if upper {
                    kw.to_ascii_uppercase()
                } else {
                    kw.to_string()
                }
            });
        let recipes = self
            .recipes
            .iter()
            .filter(|name| name.starts_with(word))
            .cloned();
        let names = self
            .names
            .iter()
            .filter(|name| !word.is_empty() && name.starts_with(word))
            .cloned();

        keywords.chain(recipes).chain(names).collect()
    }
}

impl Default for ShellHelper {
    fn default() -> Self {
        Self::new()
    }
}

fn word_start(line: &str) -> usize {
    line.rfind(|c: char| c.is_whitespace() || c == '(' || c == ',' || c == ';' || c == '|')
        .map(|i| i + 1)
        .unwrap_or(0)
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> Result<(usize, Vec<Pair>), ReadlineError> {
        let start = word_start(&line[..pos]);
        let matches = self
            .candidates(&line[start..pos])
            .into_iter()
            .map(|c| Pair {
                display: c.clone(),
                replacement: c,
            })
            .collect();
        Ok((start, matches))
    }
}

impl Hinter for ShellHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<String> {
        if pos < line.len() {
            return None;
        }
        let word = &line[word_start(line)..];
        if word.is_empty() || word == "." {
            return None;
        }
        self.candidates(word)
            .into_iter()
            .find(|c| c.len() > word.len())
            .map(|c| c[word.len()..].to_string())
    }
}

impl Highlighter for ShellHelper {
    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Cow::Owned(hint.truecolor(100, 100, 100).to_string())
    }
}

impl Validator for ShellHelper {}

impl Helper for ShellHelper {}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper() -> ShellHelper {
        let mut helper = ShellHelper::new();
        helper.set_recipes(vec!["version".to_string(), "list".to_string(), "sizes".to_string()]);
        helper
    }

    #[test]
    fn test_recipe_completion_keeps_prefix() {
        let helper = helper();
        assert_eq!(helper.candidates("v"), vec!["values".to_string(), "version".to_string()]);
        assert_eq!(helper.candidates(".v"), vec![".version".to_string()]);
        assert_eq!(helper.candidates(".").len(), 3);
    }

    #[test]
    fn test_keywords_follow_case() {
        let helper = helper();
        assert_eq!(helper.candidates("SEL"), vec!["SELECT".to_string()]);
        assert_eq!(helper.candidates("sel"), vec!["select".to_string()]);
    }

    #[test]
    fn test_database_and_table_names() {
        let mut helper = helper();
        helper.set_names(vec!["users".to_string(), "shop".to_string(), "users".to_string()]);

        assert_eq!(helper.candidates("us"), vec!["use".to_string(), "users".to_string()]);
        assert_eq!(helper.candidates("sh"), vec!["show".to_string(), "shop".to_string()]);
        assert!(helper.candidates(".s").iter().all(|c| c != ".shop"));
    }

    #[test]
    fn test_word_start() {
        assert_eq!(word_start("select * from us"), 14);
        assert_eq!(word_start(".sizes(1,"), 9);
        assert_eq!(word_start("sel"), 0);
    }
}
