//! Hex rendering for binary cell values

use serde_json::Value as JsonValue;

/// Bytes shown before the rest of a binary value is elided
pub const HEXSTR_LIMIT: usize = 32;

/// `0x`-prefixed hex of `bytes`, truncated after `limit` bytes when given
pub fn to_hexstr(bytes: &[u8], limit: Option<usize>) -> String {
    let shown = limit.map_or(bytes.len(), |limit| limit.min(bytes.len()));
    let mut out = format!("0x{}", hex::encode(&bytes[..shown]));

    let hidden = bytes.len() - shown;
    if hidden > 0 {
        out.push_str(&format!("... ({} bytes hidden)", hidden));
    }
    out
}

/// Whether text holds characters that are neither printable nor whitespace
pub fn looks_binary(text: &str) -> bool {
    text.chars().any(|c| c.is_control() && !c.is_whitespace())
}

/// Normalize a number or hex-like string to `0x...` form
pub fn hexify(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Number(n) => n.as_u64().map(|n| format!("0x{:x}", n)),
        JsonValue::String(s) => {
            let digits = s
                .strip_prefix("0x")
                .or_else(|| s.strip_prefix("0X"))
                .unwrap_or(s);
            Some(format!("0x{}", digits))
        }
        _ => None,
    }
}
