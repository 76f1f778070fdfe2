use mlua::{Lua, Result as LuaResult, Table, Value as LuaValue};
use serde_json::Value as JsonValue;

use super::EvalValue;
use crate::command::{EvalResult, LastResult};
use crate::results::{ResultSet, RESULTS_MARKER};

/// Convert JSON value to Lua value
pub fn json_to_lua(lua: &Lua, json: &JsonValue) -> LuaResult<LuaValue> {
    match json {
        JsonValue::Null => Ok(LuaValue::Nil),
        JsonValue::Bool(b) => Ok(LuaValue::Boolean(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(LuaValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(LuaValue::Number(f))
            } else {
                Ok(LuaValue::Nil)
            }
        }
        JsonValue::String(s) => Ok(LuaValue::String(lua.create_string(s)?)),
        JsonValue::Array(arr) => {
            let table = lua.create_table()?;
            for (i, v) in arr.iter().enumerate() {
                table.set(i + 1, json_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        JsonValue::Object(obj) => {
            let table = lua.create_table()?;
            for (k, v) in obj {
                table.set(k.as_str(), json_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
    }
}

/// Convert Lua value to JSON value
///
/// Tables with keys `1..n` become arrays. Functions and userdata become null.
pub fn lua_to_json(value: &LuaValue) -> LuaResult<JsonValue> {
    match value {
        LuaValue::Nil => Ok(JsonValue::Null),
        LuaValue::Boolean(b) => Ok(JsonValue::Bool(*b)),
        LuaValue::Integer(i) => Ok(JsonValue::Number((*i).into())),
        LuaValue::Number(n) => Ok(serde_json::Number::from_f64(*n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)),
        LuaValue::String(s) => Ok(JsonValue::String(s.to_string_lossy())),
        LuaValue::Table(t) => table_to_json(t),
        _ => Ok(JsonValue::Null),
    }
}

fn table_to_json(table: &Table) -> LuaResult<JsonValue> {
    let mut is_array = true;
    let mut max_key = 0i64;
    let mut count = 0i64;
    for pair in table.clone().pairs::<LuaValue, LuaValue>() {
        let (k, _) = pair?;
        count += 1;
        match k {
            LuaValue::Integer(i) if i > 0 => max_key = max_key.max(i),
            _ => {
                is_array = false;
                break;
            }
        }
    }

    if is_array && max_key > 0 && max_key == count {
        let mut arr = Vec::with_capacity(max_key as usize);
        for i in 1..=max_key {
            let val: LuaValue = table.get(i)?;
            arr.push(lua_to_json(&val)?);
        }
        return Ok(JsonValue::Array(arr));
    }

    let mut map = serde_json::Map::new();
    for pair in table.clone().pairs::<LuaValue, LuaValue>() {
        let (k, v) = pair?;
        let key = match k {
            LuaValue::String(s) => s.to_string_lossy(),
            LuaValue::Integer(i) => i.to_string(),
            LuaValue::Number(n) => n.to_string(),
            _ => continue,
        };
        map.insert(key, lua_to_json(&v)?);
    }
    Ok(JsonValue::Object(map))
}

/// Text for `print`: strings as-is, tables as JSON
pub fn display_value(value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::String(s) => s.to_string_lossy(),
        LuaValue::Table(_) => match lua_to_json(value) {
            Ok(json) => json.to_string(),
            Err(_) => "[table]".to_string(),
        },
        other => format!("[{}]", other.type_name()),
    }
}

pub fn results_to_lua(lua: &Lua, results: &ResultSet) -> LuaResult<LuaValue> {
    json_to_lua(lua, &results.to_json())
}

/// Read a results table back; `None` for anything else
pub fn lua_to_results(value: &LuaValue) -> LuaResult<Option<ResultSet>> {
    match value {
        LuaValue::Table(t) if t.get::<bool>(RESULTS_MARKER).unwrap_or(false) => {
            Ok(ResultSet::from_json(&table_to_json(t)?))
        }
        _ => Ok(None),
    }
}

/// Shape of the `results` global
pub fn last_result_to_lua(lua: &Lua, last: &LastResult) -> LuaResult<LuaValue> {
    if let Some(results) = last.as_results() {
        return results_to_lua(lua, results);
    }

    match last {
        LastResult::Eval(EvalResult {
            value,
            captured_output,
        }) => {
            let table = lua.create_table()?;
            table.set("value", json_to_lua(lua, &value.to_json())?)?;
            if let Some(stdout) = captured_output {
                table.set("stdout", stdout.as_str())?;
            }
            Ok(LuaValue::Table(table))
        }
        LastResult::Results(results) => results_to_lua(lua, results),
    }
}

pub fn lua_to_eval_value(value: &LuaValue) -> LuaResult<EvalValue> {
    match value {
        LuaValue::Nil => Ok(EvalValue::Nil),
        LuaValue::String(s) => Ok(EvalValue::Text(s.to_string_lossy())),
        LuaValue::Table(_) => match lua_to_results(value)? {
            Some(results) => Ok(EvalValue::Results(results)),
            None => Ok(EvalValue::Other(lua_to_json(value)?)),
        },
        other => Ok(EvalValue::Other(lua_to_json(other)?)),
    }
}
