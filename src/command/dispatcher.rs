//! Runs a queue of statements
//!
//! Each statement is either SQL for the [`Query`] backend or a script for the
//! [`Evaluator`]. A script that returns text is tokenized again and its
//! statements run before the rest of the queue. A piped statement hands its
//! result to the next one instead of displaying it.
//!
//! While a script runs, the SQL it issues through its query channel is served
//! by the same backend.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::debug;

use super::{tokenize, BangMap, Displayer, EvalResult, LastResult, Statement};
use crate::error::{ShellError, ShellResult};
use crate::interrupt::Interrupt;
use crate::query::Query;
use crate::results::{display, ResultSet};
use crate::scripting::{EvalOutcome, EvalValue, Evaluator, ScriptQuery};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// `exit` or `quit` was reached
    Done,
    /// The queue ran dry; carries a result left in the pipe, if any
    Continue(Option<LastResult>),
}

impl DispatchOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, DispatchOutcome::Done)
    }
}

enum Step {
    Done,
    Expanded,
    Result(Option<LastResult>),
}

pub struct Dispatcher<E, Q> {
    session: Session,
    evaluator: E,
    query: Q,
    interrupt: Interrupt,
    script_queries: mpsc::UnboundedReceiver<ScriptQuery>,
    out: Box<dyn Write>,
    err: Box<dyn Write>,
}

impl<E: Evaluator, Q: Query> Dispatcher<E, Q> {
    pub fn new(session: Session, mut evaluator: E, query: Q, interrupt: Interrupt) -> Self {
        let (queries, script_queries) = mpsc::unbounded_channel();
        evaluator.attach_queries(queries);

        Self {
            session,
            evaluator,
            query,
            interrupt,
            script_queries,
            out: Box::new(io::stdout()),
            err: Box::new(io::stderr()),
        }
    }

    /// Send results and errors somewhere other than stdout and stderr
    pub fn with_output(mut self, out: Box<dyn Write>, err: Box<dyn Write>) -> Self {
        self.out = out;
        self.err = err;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn evaluator_mut(&mut self) -> &mut E {
        &mut self.evaluator
    }

    pub fn query(&self) -> &Q {
        &self.query
    }

    pub fn query_mut(&mut self) -> &mut Q {
        &mut self.query
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Tokenize and run one line of input
    pub async fn run_input(&mut self, input: &str) -> ShellResult<DispatchOutcome> {
        let queue = tokenize(input, self.session.default_displayer());
        self.run(queue).await
    }

    pub async fn run(&mut self, mut queue: VecDeque<Statement>) -> ShellResult<DispatchOutcome> {
        let mut last_result: Option<LastResult> = None;

        while let Some(statement) = queue.pop_front() {
            debug!(
                content = %statement.content,
                declarator = ?statement.declarator,
                displayer = ?statement.displayer,
                "dispatching statement"
            );
            self.session.install_bangs(statement.bangs.clone());

            let step = if statement.is_script() {
                self.run_script(&statement, last_result.as_ref(), &mut queue)
                    .await?
            } else {
                self.run_sql(&statement).await?
            };

            match step {
                Step::Done => {
                    self.out.flush()?;
                    return Ok(DispatchOutcome::Done);
                }
                Step::Expanded => continue,
                Step::Result(candidate) => {
                    if statement.is_piped() {
                        last_result = candidate;
                    } else {
                        last_result = None;
                        if let Some(result) = candidate {
                            self.present(&result, statement.displayer)?;
                        }
                    }
                }
            }
        }

        self.out.flush()?;
        Ok(DispatchOutcome::Continue(last_result))
    }

    async fn run_script(
        &mut self,
        statement: &Statement,
        last: Option<&LastResult>,
        queue: &mut VecDeque<Statement>,
    ) -> ShellResult<Step> {
        let mut capture: Vec<u8> = Vec::new();
        let sink: &mut dyn Write = if statement.is_piped() {
            &mut capture
        } else {
            &mut *self.out
        };

        let mut served = Vec::new();
        let evaluated = {
            let evaluation = self.interrupt.guard(self.evaluator.evaluate(
                &statement.content,
                last,
                &mut self.session,
                sink,
            ));
            tokio::pin!(evaluation);

            loop {
                tokio::select! {
                    result = &mut evaluation => break result,
                    Some(request) = self.script_queries.recv() => {
                        debug!(sql = %request.sql, "serving script query");
                        let result = self.interrupt.guard(self.query.execute(&request.sql)).await;
                        served.push(request.sql);
                        let _ = request.reply.send(result);
                    }
                }
            }
        };
        for sql in &served {
            self.session.record_query(sql);
        }

        let EvalOutcome { value, bangs } = match evaluated {
            Ok(outcome) => outcome,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                self.report(&e);
                return Ok(Step::Result(None));
            }
        };

        if let EvalValue::Text(text) = value {
            let mut combined = bangs;
            combined.extend(statement.bangs.clone());
            self.expand(queue, &text, statement.displayer, combined);
            return Ok(Step::Expanded);
        }

        let captured_output = statement
            .is_piped()
            .then(|| String::from_utf8_lossy(&capture).into_owned());

        Ok(Step::Result(Some(LastResult::Eval(EvalResult {
            value,
            captured_output,
        }))))
    }

    /// Put the statements generated by a script at the front of the queue
    fn expand(
        &self,
        queue: &mut VecDeque<Statement>,
        text: &str,
        displayer: Displayer,
        bangs: BangMap,
    ) {
        let mut spliced = tokenize(text, displayer);
        debug!(count = spliced.len(), "expanding script output");

        if !bangs.is_empty() {
            if let Some(last) = spliced.pop_back() {
                let last = if last.bangs.is_empty() {
                    last.with_bangs(bangs)
                } else {
                    last
                };
                spliced.push_back(last);
            }
        }

        while let Some(statement) = spliced.pop_back() {
            queue.push_front(statement);
        }
    }

    async fn run_sql(&mut self, statement: &Statement) -> ShellResult<Step> {
        let sql = statement.content.as_str();
        if is_exit(sql) {
            return Ok(Step::Done);
        }

        match self.execute_sql(sql).await {
            Ok(results) => Ok(Step::Result(Some(LastResult::Results(results)))),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.report(&e);
                Ok(Step::Result(None))
            }
        }
    }

    async fn execute_sql(&mut self, sql: &str) -> ShellResult<ResultSet> {
        self.session.record_query(sql);

        let started = Instant::now();
        let raw = self.interrupt.guard(self.query.execute(sql)).await?;
        let elapsed = started.elapsed();
        debug!(rows = raw.num_rows(), ?elapsed, "query finished");

        let results = ResultSet::build(sql, raw, elapsed, &self.session, &mut self.evaluator)?;
        if let Some(database) = results.database_changed() {
            self.session.set_database(database);
        }
        Ok(results)
    }

    fn present(&mut self, result: &LastResult, displayer: Displayer) -> ShellResult<()> {
        if let Some(results) = result.as_results() {
            display(
                results,
                displayer,
                &self.session.field_separator,
                &mut *self.out,
            )?;
            return Ok(());
        }

        if let LastResult::Eval(EvalResult {
            value,
            captured_output,
        }) = result
        {
            if let Some(output) = captured_output.as_deref().filter(|s| !s.is_empty()) {
                write!(self.out, "{}", output)?;
                if !output.ends_with('\n') {
                    writeln!(self.out)?;
                }
            }
            if value.is_truthy() {
                writeln!(self.out, "=> {}", value.inspect())?;
            }
        }
        Ok(())
    }

    fn report(&mut self, err: &ShellError) {
        if let ShellError::EvaluationFailed {
            traceback: Some(traceback),
            ..
        } = err
        {
            debug!(%traceback, "evaluation traceback");
        }
        let _ = writeln!(self.err, "{}", err);
        let _ = self.err.flush();
    }
}

fn is_exit(sql: &str) -> bool {
    let word = sql.trim();
    word.eq_ignore_ascii_case("exit") || word.eq_ignore_ascii_case("quit")
}
