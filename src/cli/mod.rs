//! Command line entry: argument parsing, startup and batch mode

pub mod helper;
pub mod repl;

use std::collections::VecDeque;
use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};

use clap::Parser;
use colored::Colorize;

use crate::command::{Declarator, DispatchOutcome, Dispatcher, Displayer, Statement};
use crate::config::{parse_separator, Config};
use crate::error::ShellError;
use crate::interrupt::Interrupt;
use crate::query::{HttpQuery, Query};
use crate::scripting::{Evaluator, LuaEvaluator};
use crate::session::Session;

#[derive(Parser, Debug)]
#[command(name = "rsql", version)]
#[command(about = "Interactive SQL shell for SoliDB with Lua scripting", long_about = None)]
pub struct Args {
    /// Server URL
    #[arg(short, long)]
    pub server: Option<String>,

    /// Database name
    #[arg(short, long)]
    pub database: Option<String>,

    /// API key for authentication
    #[arg(short = 'k', long)]
    pub api_key: Option<String>,

    /// Configuration file (default: ~/.rsql.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Lua file loaded at startup (default: ~/.rsqlrc)
    #[arg(long)]
    pub rc: Option<PathBuf>,

    /// Refuse results with more rows than this
    #[arg(long)]
    pub max_rows: Option<usize>,

    /// Field separator; '\t' means a tab
    #[arg(long)]
    pub sep: Option<String>,

    /// Values-only output, even on a terminal
    #[arg(long)]
    pub batch: bool,

    /// Run this input and exit
    #[arg(short = 'e', num_args = 1.., value_name = "INPUT")]
    pub execute: Vec<String>,
}

impl Args {
    /// Fold command line flags over the loaded configuration
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(server) = &self.server {
            config.server = server.clone();
        }
        if let Some(database) = &self.database {
            config.database = database.clone();
        }
        if let Some(api_key) = &self.api_key {
            config.api_key = Some(api_key.clone());
        }
        if let Some(max_rows) = self.max_rows {
            config.max_rows = Some(max_rows);
        }
        if let Some(sep) = &self.sep {
            config.field_separator = Some(parse_separator(sep));
        }
        if let Some(rc) = &self.rc {
            config.rc_file = Some(rc.clone());
        }
    }
}

/// Join stdin lines into one input, separating them with `;`
pub fn join_batch_lines<R: BufRead>(reader: R) -> io::Result<String> {
    let mut statements = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            statements.push(line.to_string());
        }
    }
    Ok(statements.join(";"))
}

pub fn build_session(config: &Config, batch: bool) -> Session {
    let displayer = if batch {
        Displayer::Batch
    } else {
        Displayer::Column
    };
    let mut session = Session::new(Some(config.database.clone()))
        .with_field_separator(config.separator_for(batch))
        .with_max_rows(config.max_rows_for(batch))
        .with_default_displayer(displayer);
    if let Some(limit) = config.hexstr_limit() {
        session.set_hexstr_limit(limit);
    }
    session
}

/// Load an rc file through the dispatcher so it can adjust the session
async fn load_rc<E: Evaluator, Q: Query>(
    dispatcher: &mut Dispatcher<E, Q>,
    path: &Path,
) -> Result<(), ShellError> {
    let statement = Statement {
        content: format!("load '{}'", path.display()),
        bangs: Default::default(),
        declarator: Declarator::Script,
        displayer: Displayer::Column,
    };
    dispatcher.run(VecDeque::from([statement])).await?;
    Ok(())
}

/// Run the shell; returns the process exit code
pub async fn run(args: Args) -> anyhow::Result<i32> {
    let mut config = Config::load(args.config.as_deref())?;
    args.apply_to(&mut config);

    let batch = args.batch || !args.execute.is_empty() || !io::stdin().is_terminal();
    tracing::debug!(server = %config.server, database = %config.database, batch, "starting");

    let interrupt = Interrupt::new();
    let trigger = interrupt.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            trigger.fire();
        }
    });

    let query = HttpQuery::new(&config.server, &config.database, config.api_key.clone());
    let evaluator = LuaEvaluator::new(interrupt.clone())?.with_connection_label(query.describe());
    let mut dispatcher = Dispatcher::new(
        build_session(&config, batch),
        evaluator,
        query,
        interrupt,
    );

    if let Some(rc) = config.rc_path().filter(|p| p.exists()) {
        load_rc(&mut dispatcher, &rc).await?;
    }

    match dispatcher.evaluator_mut().init_statements() {
        Ok(statements) => {
            for sql in statements {
                if dispatcher.run_input(&sql).await?.is_done() {
                    return Ok(0);
                }
            }
        }
        Err(e) => eprintln!("{} {}", "Error:".red().bold(), e),
    }

    if !batch {
        repl::run(&mut dispatcher, config.history_path()).await?;
        return Ok(0);
    }

    let input = if args.execute.is_empty() {
        join_batch_lines(io::stdin().lock())?
    } else {
        args.execute.join(" ")
    };

    match dispatcher.run_input(&input).await {
        Ok(DispatchOutcome::Done) | Ok(DispatchOutcome::Continue(_)) => Ok(0),
        Err(ShellError::Cancelled) => {
            eprintln!("Cancelled while working on a command");
            Ok(1)
        }
        Err(e) => Err(e.into()),
    }
}
