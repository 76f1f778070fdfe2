pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod query;
pub mod results;
pub mod scripting;
pub mod session;

pub use command::{tokenize, DispatchOutcome, Dispatcher, Displayer, LastResult, Statement};
pub use config::Config;
pub use error::{ShellError, ShellResult};
pub use interrupt::Interrupt;
pub use query::{HttpQuery, Query, RawResult};
pub use results::ResultSet;
pub use scripting::{EvalOutcome, EvalValue, Evaluator, LuaEvaluator, ScriptQuery};
pub use session::Session;
