//! Interactive prompt

use std::path::PathBuf;

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};

use super::helper::ShellHelper;
use crate::command::{DispatchOutcome, Dispatcher};
use crate::error::ShellError;
use crate::query::Query;
use crate::scripting::Evaluator;

const PROMPT: &str = "rsql> ";
const HISTORY_SIZE: usize = 100;

/// Read and run lines until `exit`, Ctrl-D or a cancelled statement
pub async fn run<E: Evaluator, Q: Query>(
    dispatcher: &mut Dispatcher<E, Q>,
    history_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = Config::builder()
        .max_history_size(HISTORY_SIZE)?
        .history_ignore_dups(true)?
        .auto_add_history(false)
        .build();

    let mut rl: Editor<ShellHelper, DefaultHistory> = Editor::with_config(config)?;
    rl.set_helper(Some(ShellHelper::new()));
    if let Some(path) = &history_file {
        let _ = rl.load_history(path);
    }

    let mut named_for: Option<String> = None;
    loop {
        let label = dispatcher.query().describe();
        if named_for.as_deref() != Some(label.as_str()) {
            refresh_names(dispatcher, &mut rl).await;
            named_for = Some(label.clone());
        }
        if let Some(helper) = rl.helper_mut() {
            helper.set_recipes(dispatcher.evaluator().completions());
        }
        println!("{}", format!("[{}]", label).dimmed());

        match rl.readline(PROMPT) {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input);

                dispatcher.interrupt().reset();
                match dispatcher.run_input(input).await {
                    Ok(DispatchOutcome::Done) => break,
                    Ok(DispatchOutcome::Continue(_)) => {}
                    Err(ShellError::Cancelled) => {
                        eprintln!("{}", "Cancelled while working on a command".red());
                        break;
                    }
                    Err(e) => eprintln!("{} {}", "Error:".red().bold(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("{}", "Type exit to quit".dimmed());
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("{} {:?}", "Error:".red(), err);
                break;
            }
        }
    }

    if let Some(path) = &history_file {
        if let Err(e) = rl.save_history(path) {
            tracing::warn!(path = %path.display(), "could not save history: {}", e);
        }
    }
    Ok(())
}

/// Ask the backend for database and table names after a connection change
async fn refresh_names<E: Evaluator, Q: Query>(
    dispatcher: &mut Dispatcher<E, Q>,
    rl: &mut Editor<ShellHelper, DefaultHistory>,
) {
    match dispatcher.query_mut().names().await {
        Ok(names) => {
            tracing::debug!(count = names.len(), "completion names loaded");
            if let Some(helper) = rl.helper_mut() {
                helper.set_names(names);
            }
        }
        Err(e) => tracing::debug!("no completion names: {}", e),
    }
}
