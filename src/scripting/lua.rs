//! Lua-backed [`Evaluator`]
//!
//! One Lua state lives for the whole process so that functions and recipes
//! defined in the rc file or typed at the prompt stay available. The session
//! is lent to the state as app data for the duration of each evaluation,
//! which is how helpers such as `set_hexstr_limit` and `history` reach it.
//! `query(sql)` goes back to the dispatcher through the attached channel and
//! only works while an evaluation is running.

use std::io::Write;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use mlua::{HookTriggers, Lua, Table, Value as LuaValue, Variadic, VmState};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use tokio::sync::oneshot;
use tracing::debug;

use super::conversion::{
    display_value, json_to_lua, last_result_to_lua, lua_to_eval_value, lua_to_json,
    lua_to_results, results_to_lua,
};
use super::helpers;
use super::recipes::{Builtin, Recipe, RecipeBody, RecipeBook};
use super::{EvalOutcome, EvalValue, Evaluator, ScriptQueries, ScriptQuery};
use crate::command::{BangMap, LastResult, TransformRef};
use crate::error::{ShellError, ShellResult};
use crate::interrupt::Interrupt;
use crate::results::hex::{to_hexstr, HEXSTR_LIMIT};
use crate::results::{CellTransform, GrepOptions, ResultSet};
use crate::session::{Session, DEFAULT_FIELD_SEPARATOR, DEFAULT_MAX_ROWS};

const SANDBOXED_GLOBALS: [&str; 8] = [
    "os", "io", "debug", "package", "dofile", "load", "loadfile", "require",
];

const EVAL_CHUNK_NAME: &str = "=(eval)";
const HOOK_INSTRUCTION_COUNT: u32 = 10_000;

static CHUNK_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(eval\):\d+:\s*").expect("valid chunk prefix pattern"));

static LOAD_DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^load\s+['"](.+)['"]\s*;?$"#).expect("valid load directive pattern")
});

/// Map a Lua failure to the shell's error, keeping the traceback apart
pub fn lua_error_to_shell(err: &mlua::Error) -> ShellError {
    match err {
        mlua::Error::CallbackError { traceback, cause } => match lua_error_to_shell(cause) {
            ShellError::EvaluationFailed {
                message,
                traceback: None,
            } => ShellError::EvaluationFailed {
                message,
                traceback: Some(traceback.clone()),
            },
            other => other,
        },
        mlua::Error::ExternalError(inner) => ShellError::evaluation(inner.to_string()),
        other => {
            let text = match other {
                mlua::Error::RuntimeError(message) => message.clone(),
                mlua::Error::SyntaxError { message, .. } => message.clone(),
                _ => other.to_string(),
            };
            let (message, traceback) = match text.split_once("\nstack traceback:") {
                Some((message, rest)) => (message, Some(format!("stack traceback:{}", rest))),
                None => (text.as_str(), None),
            };
            ShellError::EvaluationFailed {
                message: CHUNK_PREFIX.replace_all(message.trim(), "").into_owned(),
                traceback,
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct ScriptState {
    last_cmd: Option<String>,
    loaded_files: Vec<PathBuf>,
    connection: String,
}

/// State reachable from inside Lua callbacks
#[derive(Clone, Default)]
struct Shared {
    output: Arc<Mutex<Vec<String>>>,
    recipes: Arc<Mutex<RecipeBook>>,
    requested_bangs: Arc<Mutex<BangMap>>,
    state: Arc<Mutex<ScriptState>>,
    queries: Arc<Mutex<Option<ScriptQueries>>>,
}

impl Shared {
    fn print(&self, line: impl Into<String>) {
        lock(&self.output).push(line.into());
    }
}

pub struct LuaEvaluator {
    lua: Lua,
    shared: Shared,
    interrupt: Interrupt,
}

impl LuaEvaluator {
    pub fn new(interrupt: Interrupt) -> ShellResult<Self> {
        let lua = Lua::new();
        let shared = Shared::default();

        let globals = lua.globals();
        for name in SANDBOXED_GLOBALS {
            globals.set(name, LuaValue::Nil)?;
        }

        install_interrupt_hook(&lua, &interrupt);
        install_print(&lua, &shared)?;
        helpers::register(&lua)?;
        install_result_helpers(&lua)?;
        install_session_accessors(&lua)?;
        install_query(&lua, &shared)?;
        install_recipes(&lua, &shared)?;

        Ok(Self {
            lua,
            shared,
            interrupt,
        })
    }

    /// Connection description printed by `version()`
    pub fn with_connection_label(self, label: impl Into<String>) -> Self {
        lock(&self.shared.state).connection = label.into();
        self
    }

    /// Run a Lua file in the shared state and remember it for `reload`
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ShellResult<()> {
        load_file(&self.lua, &self.shared, path.as_ref())
    }

    pub fn reload(&mut self) -> ShellResult<()> {
        reload(&self.lua, &self.shared)
    }

    pub fn loaded_files(&self) -> Vec<PathBuf> {
        lock(&self.shared.state).loaded_files.clone()
    }

    /// Last command text a script generated
    pub fn last_cmd(&self) -> Option<String> {
        lock(&self.shared.state).last_cmd.clone()
    }

    /// Statements produced by recipes registered with `register_init`
    pub fn init_statements(&mut self) -> ShellResult<Vec<String>> {
        let recipes = lock(&self.shared.recipes).init_recipes();
        let mut statements = Vec::with_capacity(recipes.len());
        for recipe in recipes {
            if let LuaValue::String(sql) = invoke(&self.lua, &self.shared, &recipe, Variadic::new())? {
                statements.push(sql.to_string_lossy());
            }
        }
        lock(&self.shared.requested_bangs).clear();
        Ok(statements)
    }

    fn set_results(&self, last: Option<&LastResult>) -> ShellResult<()> {
        let value = match last {
            Some(last) => last_result_to_lua(&self.lua, last)?,
            None => LuaValue::Nil,
        };
        self.lua.globals().set("results", value)?;
        Ok(())
    }

    async fn evaluate_in_session(&self, code: &str) -> ShellResult<EvalValue> {
        if code == "reload" {
            reload(&self.lua, &self.shared)?;
            return Ok(EvalValue::Nil);
        }
        if let Some(caps) = LOAD_DIRECTIVE.captures(code) {
            load_file(&self.lua, &self.shared, Path::new(&caps[1]))?;
            return Ok(EvalValue::Nil);
        }

        let value = self
            .lua
            .load(code)
            .set_name(EVAL_CHUNK_NAME)
            .eval_async::<LuaValue>()
            .await?;
        Ok(lua_to_eval_value(&value)?)
    }

    fn drain_output(&self, sink: &mut dyn Write) -> ShellResult<()> {
        let lines = mem::take(&mut *lock(&self.shared.output));
        for line in lines {
            writeln!(sink, "{}", line)?;
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl Evaluator for LuaEvaluator {
    async fn evaluate(
        &mut self,
        code: &str,
        last: Option<&LastResult>,
        session: &mut Session,
        sink: &mut dyn Write,
    ) -> ShellResult<EvalOutcome> {
        let code = code.trim();
        lock(&self.shared.requested_bangs).clear();
        self.set_results(last)?;

        self.lua.set_app_data(mem::take(session));
        let evaluated = self.evaluate_in_session(code).await;
        if let Some(restored) = self.lua.remove_app_data::<Session>() {
            *session = restored;
        }
        self.drain_output(sink)?;

        let value = match evaluated {
            Ok(value) => value,
            Err(_) if self.interrupt.is_fired() => return Err(ShellError::Cancelled),
            Err(e) => return Err(e),
        };

        if let EvalValue::Text(text) = &value {
            lock(&self.shared.state).last_cmd = Some(text.clone());
        }
        let bangs = mem::take(&mut *lock(&self.shared.requested_bangs));
        if !bangs.is_empty() {
            debug!(?bangs, "recipe requested transforms");
        }

        Ok(EvalOutcome::new(value).with_bangs(bangs))
    }

    fn completions(&self) -> Vec<String> {
        lock(&self.shared.recipes).names()
    }

    fn attach_queries(&mut self, queries: ScriptQueries) {
        *lock(&self.shared.queries) = Some(queries);
    }
}

impl CellTransform for LuaEvaluator {
    fn apply_transform(
        &mut self,
        transform: &TransformRef,
        value: &JsonValue,
    ) -> ShellResult<JsonValue> {
        let function = match self.lua.globals().get::<LuaValue>(transform.as_str())? {
            LuaValue::Function(function) => function,
            _ => {
                return Err(ShellError::evaluation(format!(
                    "undefined transform '{}'",
                    transform
                )))
            }
        };
        let transformed: LuaValue = function.call(json_to_lua(&self.lua, value)?)?;
        Ok(lua_to_json(&transformed)?)
    }
}

fn install_interrupt_hook(lua: &Lua, interrupt: &Interrupt) {
    let interrupt = interrupt.clone();
    let _ = lua.set_hook(
        HookTriggers::new().every_nth_instruction(HOOK_INSTRUCTION_COUNT),
        move |_, _| {
            if interrupt.is_fired() {
                Err(mlua::Error::runtime("interrupted"))
            } else {
                Ok(VmState::Continue)
            }
        },
    );
}

fn install_print(lua: &Lua, shared: &Shared) -> mlua::Result<()> {
    let shared = shared.clone();
    let print = lua.create_function(move |_, args: Variadic<LuaValue>| {
        let line = args.iter().map(display_value).collect::<Vec<_>>().join("\t");
        shared.print(line);
        Ok(())
    })?;
    lua.globals().set("print", print)
}

fn install_result_helpers(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();

    globals.set(
        "grep",
        lua.create_function(
            |lua, (results, pattern, options): (LuaValue, String, Variadic<String>)| {
                let mut results = lua_to_results(&results)?
                    .ok_or_else(|| mlua::Error::runtime("grep expects a results table"))?;

                let mut grep_options = GrepOptions::default();
                for option in options.iter() {
                    match option.as_str() {
                        "fixed" => grep_options.fixed = true,
                        "inverse" => grep_options.inverse = true,
                        "nocolor" => grep_options.color = false,
                        other => {
                            return Err(mlua::Error::runtime(format!(
                                "unknown grep option '{}'",
                                other
                            )))
                        }
                    }
                }

                results
                    .grep(&pattern, grep_options)
                    .map_err(mlua::Error::external)?;
                results_to_lua(lua, &results)
            },
        )?,
    )?;

    globals.set(
        "row_hash",
        lua.create_function(|lua, (results, index): (LuaValue, usize)| {
            let results = lua_to_results(&results)?
                .ok_or_else(|| mlua::Error::runtime("row_hash expects a results table"))?;
            match index.checked_sub(1).and_then(|i| results.row_hash(i)) {
                Some(row) => json_to_lua(lua, &JsonValue::Object(row)),
                None => Ok(LuaValue::Nil),
            }
        })?,
    )?;

    globals.set(
        "to_hexstr",
        lua.create_function(|lua, value: mlua::String| {
            let limit = lua
                .app_data_ref::<Session>()
                .map_or(Some(HEXSTR_LIMIT), |session| session.hexstr_limit());
            let bytes = value.as_bytes();
            Ok(to_hexstr(&bytes, limit))
        })?,
    )?;

    globals.set(
        "set_hexstr_limit",
        lua.create_function(|lua, limit: Option<usize>| {
            if let Some(mut session) = lua.app_data_mut::<Session>() {
                session.set_hexstr_limit(limit);
            }
            Ok(())
        })?,
    )?;

    globals.set(
        "reset_hexstr_limit",
        lua.create_function(|lua, ()| {
            if let Some(mut session) = lua.app_data_mut::<Session>() {
                session.reset_hexstr_limit();
            }
            Ok(())
        })?,
    )?;

    globals.set(
        "history",
        lua.create_function(|lua, count: Option<usize>| {
            Ok(lua
                .app_data_ref::<Session>()
                .map(|session| session.history(count))
                .unwrap_or_default())
        })?,
    )?;

    Ok(())
}

fn install_session_accessors(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();

    globals.set(
        "max_rows",
        lua.create_function(|lua, ()| {
            Ok(lua
                .app_data_ref::<Session>()
                .map_or(DEFAULT_MAX_ROWS, |session| session.max_rows))
        })?,
    )?;

    globals.set(
        "set_max_rows",
        lua.create_function(|lua, max_rows: usize| {
            if let Some(mut session) = lua.app_data_mut::<Session>() {
                session.max_rows = max_rows;
            }
            Ok(())
        })?,
    )?;

    globals.set(
        "field_separator",
        lua.create_function(|lua, ()| {
            Ok(lua.app_data_ref::<Session>().map_or_else(
                || DEFAULT_FIELD_SEPARATOR.to_string(),
                |session| session.field_separator.clone(),
            ))
        })?,
    )?;

    globals.set(
        "set_field_separator",
        lua.create_function(|lua, separator: String| {
            if let Some(mut session) = lua.app_data_mut::<Session>() {
                session.field_separator = separator;
            }
            Ok(())
        })?,
    )?;

    globals.set(
        "database",
        lua.create_function(|lua, ()| {
            Ok(lua
                .app_data_ref::<Session>()
                .and_then(|session| session.database().map(str::to_string)))
        })?,
    )?;

    Ok(())
}

/// Cells of a script query are returned as the backend sent them
struct Untransformed;

impl CellTransform for Untransformed {
    fn apply_transform(
        &mut self,
        _transform: &TransformRef,
        value: &JsonValue,
    ) -> ShellResult<JsonValue> {
        Ok(value.clone())
    }
}

fn install_query(lua: &Lua, shared: &Shared) -> mlua::Result<()> {
    let queries = shared.queries.clone();
    let query = lua.create_async_function(move |lua, sql: String| {
        let queries = lock(&queries).clone();
        async move {
            let unavailable = || mlua::Error::runtime("query is not available");
            let queries = queries.ok_or_else(unavailable)?;

            let (reply, response) = oneshot::channel();
            let started = Instant::now();
            queries
                .send(ScriptQuery {
                    sql: sql.clone(),
                    reply,
                })
                .map_err(|_| unavailable())?;
            let raw = response
                .await
                .map_err(|_| unavailable())?
                .map_err(|e| mlua::Error::runtime(e.to_string()))?;
            let elapsed = started.elapsed();

            let built = match lua.app_data_ref::<Session>() {
                Some(session) => ResultSet::build(&sql, raw, elapsed, &session, &mut Untransformed),
                None => ResultSet::build(&sql, raw, elapsed, &Session::default(), &mut Untransformed),
            };
            let results = built.map_err(|e| mlua::Error::runtime(e.to_string()))?;
            if let Some(database) = results.database_changed() {
                if let Some(mut session) = lua.app_data_mut::<Session>() {
                    session.set_database(database);
                }
            }
            results_to_lua(&lua, &results)
        }
    })?;
    lua.globals().set("query", query)
}

fn install_recipes(lua: &Lua, shared: &Shared) -> mlua::Result<()> {
    let globals = lua.globals();

    for init in [false, true] {
        let shared_ref = shared.clone();
        let register = lua.create_function(
            move |lua, (name, body, opts): (String, LuaValue, Option<Table>)| {
                let mut recipe = parse_registration(&name, body, opts)?;
                if init {
                    recipe = recipe.run_at_init();
                }
                lock(&shared_ref.recipes).register(recipe);
                define_recipe_global(lua, &shared_ref, &name)
            },
        )?;
        globals.set(if init { "register_init" } else { "register" }, register)?;
    }

    let shared_ref = shared.clone();
    globals.set(
        "recipe",
        lua.create_async_function(move |lua, (name, args): (String, Variadic<LuaValue>)| {
            let shared = shared_ref.clone();
            async move { call_recipe(&lua, &shared, &name, args).await }
        })?,
    )?;

    for builtin in Builtin::ALL {
        define_recipe_global(lua, shared, builtin.name())?;
    }

    Ok(())
}

fn parse_registration(name: &str, body: LuaValue, opts: Option<Table>) -> mlua::Result<Recipe> {
    let mut params = Vec::new();
    let mut bangs = BangMap::new();
    let mut description = String::new();

    if let Some(opts) = opts {
        params = opts.get::<Option<Vec<String>>>("args")?.unwrap_or_default();
        if let Some(table) = opts.get::<Option<Table>>("bangs")? {
            for pair in table.pairs::<String, String>() {
                let (column, transform) = pair?;
                bangs.insert(column, TransformRef::new(transform));
            }
        }
        description = opts.get::<Option<String>>("desc")?.unwrap_or_default();
    }

    let recipe = match body {
        LuaValue::String(template) => Recipe::sql(name, &template.to_string_lossy(), params),
        LuaValue::Function(function) => Recipe::function(name, function, &params),
        other => {
            return Err(mlua::Error::runtime(format!(
                "cannot register a {} as recipe '{}'",
                other.type_name(),
                name
            )))
        }
    };

    Ok(recipe.with_bangs(bangs).with_description(description))
}

fn define_recipe_global(lua: &Lua, shared: &Shared, name: &str) -> mlua::Result<()> {
    let shared = shared.clone();
    let recipe_name = name.to_string();
    let function = lua.create_async_function(move |lua, args: Variadic<LuaValue>| {
        let shared = shared.clone();
        let recipe_name = recipe_name.clone();
        async move { call_recipe(&lua, &shared, &recipe_name, args).await }
    })?;
    lua.globals().set(name, function)
}

/// Lua-bodied recipes run as coroutines here so they can `query`
async fn call_recipe(
    lua: &Lua,
    shared: &Shared,
    name: &str,
    args: Variadic<LuaValue>,
) -> mlua::Result<LuaValue> {
    let recipe = lock(&shared.recipes)
        .get(name)
        .cloned()
        .ok_or_else(|| mlua::Error::runtime(format!("unknown recipe '{}'", name)))?;
    match &recipe.body {
        RecipeBody::Lua(function) => {
            lock(&shared.requested_bangs).extend(recipe.bangs.clone());
            function.call_async::<LuaValue>(args).await
        }
        _ => invoke(lua, shared, &recipe, args),
    }
}

fn invoke(
    lua: &Lua,
    shared: &Shared,
    recipe: &Recipe,
    args: Variadic<LuaValue>,
) -> mlua::Result<LuaValue> {
    lock(&shared.requested_bangs).extend(recipe.bangs.clone());

    match &recipe.body {
        RecipeBody::Sql { .. } => {
            let args: Vec<String> = args.iter().map(display_value).collect();
            let sql = recipe
                .render(&args)
                .map_err(mlua::Error::external)?
                .unwrap_or_default();
            Ok(LuaValue::String(lua.create_string(&sql)?))
        }
        RecipeBody::Lua(function) => function.call::<LuaValue>(args),
        RecipeBody::Builtin(builtin) => run_builtin(lua, shared, *builtin),
    }
}

fn run_builtin(lua: &Lua, shared: &Shared, builtin: Builtin) -> mlua::Result<LuaValue> {
    match builtin {
        Builtin::Version => {
            let connection = lock(&shared.state).connection.clone();
            shared.print(format!(
                "rsql:v{} server:{}",
                env!("CARGO_PKG_VERSION"),
                connection
            ));
            Ok(LuaValue::Nil)
        }
        Builtin::List => {
            let listing = lock(&shared.recipes).listing();
            results_to_lua(lua, &listing)
        }
        Builtin::LastCmd => {
            if let Some(last_cmd) = lock(&shared.state).last_cmd.clone() {
                shared.print(last_cmd);
            }
            Ok(LuaValue::Nil)
        }
        Builtin::Reload => {
            reload(lua, shared).map_err(mlua::Error::external)?;
            Ok(LuaValue::Nil)
        }
    }
}

fn load_file(lua: &Lua, shared: &Shared, path: &Path) -> ShellResult<()> {
    let source = std::fs::read_to_string(path)?;
    lua.load(source.as_str())
        .set_name(format!("@{}", path.display()))
        .exec()?;

    let mut state = lock(&shared.state);
    if !state.loaded_files.iter().any(|loaded| loaded == path) {
        state.loaded_files.push(path.to_path_buf());
    }
    debug!(path = %path.display(), "loaded script file");
    Ok(())
}

fn reload(lua: &Lua, shared: &Shared) -> ShellResult<()> {
    let files = lock(&shared.state).loaded_files.clone();
    for file in &files {
        load_file(lua, shared, file)?;
    }
    let names: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
    shared.print(format!("loaded: {:?}", names));
    Ok(())
}
