//! Command-line argument values.

use vbot_core::Value;

/// Parse one call argument.
///
/// Valid JSON becomes the matching value; anything else is taken as a
/// plain string, so `kitty` and `"kitty"` mean the same.
pub fn parse_arg(raw: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(raw)
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(raw))
}

/// Render a result for printing.
pub fn render(value: &Value) -> String {
    serde_json::to_string_pretty(&value.to_json()).unwrap_or_else(|_| format!("{value:?}"))
}
