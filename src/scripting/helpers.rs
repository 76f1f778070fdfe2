//! Formatting helpers exposed to scripts and usable as column transforms

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use mlua::{Lua, Value as LuaValue};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::results::hex;
use crate::scripting::conversion::lua_to_json;

const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

static HUMAN_BYTES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([0-9]*\.?[0-9]+)\s*([KMGTP]?B?)\s*$").expect("valid byte size pattern")
});

/// `9832742324` → `"   9.16 GB"`
pub fn humanize_bytes(bytes: f64) -> String {
    let mut value = bytes;
    let mut unit = 0;
    while value.abs() >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:7.2} {}", value, UNITS[unit])
}

/// Inverse of [`humanize_bytes`], rounded to whole bytes
pub fn dehumanize_bytes(text: &str) -> Option<u64> {
    let caps = HUMAN_BYTES.captures(text)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2).map_or("", |m| m.as_str()).to_ascii_uppercase();
    let exponent = match unit.chars().next() {
        None | Some('B') => 0,
        Some(prefix) => UNITS.iter().position(|u| u.starts_with(prefix))?,
    };
    Some((value * 1024f64.powi(exponent as i32)).round() as u64)
}

/// `0.209384` → `" 20.9%"`
pub fn humanize_percentage(ratio: f64) -> String {
    format!("{:5.1}%", ratio * 100.0)
}

/// Parse the timestamp forms databases and scripts commonly produce
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S %z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Local
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc));
    }
    text.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// `" 29 days ago"` style distance between `then` and `now`
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(then).num_seconds();
    let secs = delta.unsigned_abs();

    let (amount, unit) = match secs {
        0..=59 => (secs, "second"),
        60..=3_599 => (secs / 60, "minute"),
        3_600..=86_399 => (secs / 3_600, "hour"),
        _ => (secs / 86_400, "day"),
    };
    let unit = if amount == 1 {
        unit.to_string()
    } else {
        format!("{}s", unit)
    };

    if delta < 0 {
        format!("in {:3} {}", amount, unit)
    } else {
        format!("{:3} {} ago", amount, unit)
    }
}

fn number_arg(value: &LuaValue) -> Option<f64> {
    match value {
        LuaValue::Integer(i) => Some(*i as f64),
        LuaValue::Number(n) => Some(*n),
        LuaValue::String(s) => s.to_str().ok()?.trim().parse().ok(),
        _ => None,
    }
}

fn text_arg(value: &LuaValue) -> Option<String> {
    match value {
        LuaValue::String(s) => Some(s.to_string_lossy()),
        LuaValue::Integer(i) => Some(i.to_string()),
        LuaValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Install the pure helpers as Lua globals
pub fn register(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();

    globals.set(
        "humanize_bytes",
        lua.create_function(|_, value: LuaValue| {
            Ok(number_arg(&value).map(humanize_bytes))
        })?,
    )?;

    globals.set(
        "dehumanize_bytes",
        lua.create_function(|_, value: LuaValue| {
            Ok(text_arg(&value).and_then(|text| dehumanize_bytes(&text)))
        })?,
    )?;

    globals.set(
        "humanize_percentage",
        lua.create_function(|_, value: LuaValue| {
            Ok(number_arg(&value).map(humanize_percentage))
        })?,
    )?;

    globals.set(
        "relative_time",
        lua.create_function(|_, value: LuaValue| {
            let text = text_arg(&value).unwrap_or_default();
            // unparseable values pass through untouched
            Ok(match parse_timestamp(&text) {
                Some(then) => relative_time(then, Utc::now()),
                None => text,
            })
        })?,
    )?;

    globals.set(
        "hexify",
        lua.create_function(|_, value: LuaValue| Ok(hex::hexify(&lua_to_json(&value)?)))?,
    )?;

    Ok(())
}
