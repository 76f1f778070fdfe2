//! Configuration handling
//!
//! Settings come from `~/.rsql.toml` (or the file given with `--config`),
//! then from the environment, then from command line flags.
//!
//! ## Environment Variables
//!
//! - `RSQL_SERVER` - Server URL
//! - `RSQL_DATABASE` - Database selected at startup
//! - `RSQL_API_KEY` - API key sent with every query
//!
//! These can also be set in a `.env` file in the working directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ShellError, ShellResult};
use crate::session::{DEFAULT_FIELD_SEPARATOR, DEFAULT_MAX_ROWS};

pub const CONFIG_FILE_NAME: &str = ".rsql.toml";
pub const RC_FILE_NAME: &str = ".rsqlrc";
pub const HISTORY_FILE_NAME: &str = ".rsql_history";

pub const ENV_SERVER: &str = "RSQL_SERVER";
pub const ENV_DATABASE: &str = "RSQL_DATABASE";
pub const ENV_API_KEY: &str = "RSQL_API_KEY";

pub const DEFAULT_SERVER: &str = "http://localhost:6745";
pub const DEFAULT_DATABASE: &str = "_system";
pub const INTERACTIVE_MAX_ROWS: usize = 200;
const BATCH_SEPARATOR: &str = "\t";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: String,
    pub database: String,
    pub api_key: Option<String>,
    pub max_rows: Option<usize>,
    pub field_separator: Option<String>,
    /// `0` shows binary values in full
    pub hexstr_limit: Option<usize>,
    pub rc_file: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            api_key: None,
            max_rows: None,
            field_separator: None,
            hexstr_limit: None,
            rc_file: None,
            history_file: None,
        }
    }
}

/// Path of `name` in the user's home directory
pub fn home_file(name: &str) -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(name))
}

/// Accept `\t` (and `tab`) for a tab separator
pub fn parse_separator(raw: &str) -> String {
    match raw {
        "\\t" | "tab" => "\t".to_string(),
        other => other.replace("\\t", "\t"),
    }
}

impl Config {
    /// Load configuration, applying `.env` and environment overrides
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> ShellResult<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match home_file(CONFIG_FILE_NAME).filter(|p| p.exists()) {
                Some(default_path) => Self::from_file(&default_path)?,
                None => Self::default(),
            },
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ShellResult<Self> {
        if !path.exists() {
            return Err(ShellError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ShellResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Override settings from variables found through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(server) = lookup(ENV_SERVER).filter(|v| !v.is_empty()) {
            self.server = server;
        }
        if let Some(database) = lookup(ENV_DATABASE).filter(|v| !v.is_empty()) {
            self.database = database;
        }
        if let Some(api_key) = lookup(ENV_API_KEY).filter(|v| !v.is_empty()) {
            self.api_key = Some(api_key);
        }
    }

    pub fn max_rows_for(&self, batch: bool) -> usize {
        self.max_rows.unwrap_or(if batch {
            DEFAULT_MAX_ROWS
        } else {
            INTERACTIVE_MAX_ROWS
        })
    }

    pub fn separator_for(&self, batch: bool) -> String {
        match &self.field_separator {
            Some(separator) => parse_separator(separator),
            None if batch => BATCH_SEPARATOR.to_string(),
            None => DEFAULT_FIELD_SEPARATOR.to_string(),
        }
    }

    /// `None` when binary values should not be truncated
    pub fn hexstr_limit(&self) -> Option<Option<usize>> {
        self.hexstr_limit
            .map(|limit| if limit == 0 { None } else { Some(limit) })
    }

    pub fn rc_path(&self) -> Option<PathBuf> {
        self.rc_file.clone().or_else(|| home_file(RC_FILE_NAME))
    }

    pub fn history_path(&self) -> Option<PathBuf> {
        self.history_file
            .clone()
            .or_else(|| home_file(HISTORY_FILE_NAME))
    }
}
