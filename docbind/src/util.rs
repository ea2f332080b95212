use regex::Regex;
use std::sync::OnceLock;

static ACRONYM_BOUNDARY: OnceLock<Regex> = OnceLock::new();
static WORD_BOUNDARY: OnceLock<Regex> = OnceLock::new();

/// Convert a CamelCase type name into an under_score collection name.
///
/// A separator goes before the last capital of an acronym run that is
/// followed by a lowercase letter ("HTTPServer" -> "http_server"), and
/// between a lowercase letter or digit and a following capital
/// ("Foo42Bar" -> "foo42_bar"). Already-converted names come back unchanged.
pub fn to_snake(name: &str) -> String {
    let acronym = ACRONYM_BOUNDARY
        .get_or_init(|| Regex::new(r"([A-Z]+)([A-Z][a-z])").expect("valid regex"));
    let word = WORD_BOUNDARY
        .get_or_init(|| Regex::new(r"([a-z\d])([A-Z])").expect("valid regex"));

    let split = acronym.replace_all(name, "${1}_${2}");
    let split = word.replace_all(&split, "${1}_${2}");
    split.to_lowercase()
}

/// Render a JSON value the way ids appear in error messages and logs.
pub(crate) fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
