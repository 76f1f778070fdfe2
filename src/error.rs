use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("refusing to process {actual} rows (max: {max})")]
    RowLimitExceeded { actual: usize, max: usize },

    #[error("{0}")]
    QueryFailed(String),

    #[error("{message}")]
    EvaluationFailed {
        message: String,
        traceback: Option<String>,
    },

    #[error("Cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type ShellResult<T> = Result<T, ShellError>;

impl ShellError {
    /// Failures that end the whole dispatch loop instead of a single statement
    pub fn is_fatal(&self) -> bool {
        matches!(self, ShellError::Cancelled)
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        ShellError::EvaluationFailed {
            message: message.into(),
            traceback: None,
        }
    }
}

impl From<mlua::Error> for ShellError {
    fn from(err: mlua::Error) -> Self {
        crate::scripting::lua::lua_error_to_shell(&err)
    }
}

impl From<reqwest::Error> for ShellError {
    fn from(err: reqwest::Error) -> Self {
        ShellError::QueryFailed(format!("Connection error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ShellError::RowLimitExceeded {
            actual: 1500,
            max: 1000,
        };
        assert_eq!(err.to_string(), "refusing to process 1500 rows (max: 1000)");

        let err = ShellError::QueryFailed("Table 'x' doesn't exist".to_string());
        assert_eq!(err.to_string(), "Table 'x' doesn't exist");

        let err = ShellError::evaluation("attempt to call a nil value");
        assert_eq!(err.to_string(), "attempt to call a nil value");

        let err = ShellError::Config("bad separator".to_string());
        assert_eq!(err.to_string(), "Configuration error: bad separator");
    }

    #[test]
    fn test_only_cancellation_is_fatal() {
        assert!(ShellError::Cancelled.is_fatal());
        assert!(!ShellError::QueryFailed("nope".to_string()).is_fatal());
        assert!(!ShellError::RowLimitExceeded { actual: 2, max: 1 }.is_fatal());
        assert!(!ShellError::evaluation("boom").is_fatal());
    }
}
