//! Length parsing for dimension-like tokens.

use std::sync::OnceLock;

use regex::Regex;

/// Root font size used to resolve `rem`/`em` values.
pub const ROOT_FONT_SIZE_PX: f64 = 16.0;

fn length_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(-?\d+(?:\.\d+)?|-?\.\d+)\s*(px|rem|em|pt)?\s*$")
            .expect("static regex is valid")
    })
}

fn to_px(amount: f64, unit: &str) -> Option<f64> {
    match unit {
        "" | "px" => Some(amount),
        "rem" | "em" => Some(amount * ROOT_FONT_SIZE_PX),
        "pt" => Some(amount * 4.0 / 3.0),
        _ => None,
    }
}

/// Resolves a token value to pixels.
///
/// Accepts bare numbers, strings like `"16px"`, `"1.5rem"` or `"12pt"`, and
/// objects of the form `{"value": 16, "unit": "px"}`.
pub fn parse_px(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => {
            let lowered = s.to_lowercase();
            let caps = length_regex().captures(&lowered)?;
            let amount: f64 = caps.get(1)?.as_str().parse().ok()?;
            let unit = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            to_px(amount, unit)
        }
        serde_json::Value::Object(map) => {
            let amount = map.get("value")?.as_f64()?;
            let unit = map.get("unit").and_then(|u| u.as_str()).unwrap_or("px");
            to_px(amount, &unit.to_lowercase())
        }
        _ => None,
    }
}
