// sage-core/src/infrastructure/secrets.rs
//
// Secrets use the textual form {{NAME}} inside configuration values and
// resolve against the process environment BEFORE the document is
// deserialized. Resolution happens on the raw text so every field,
// nested or not, is covered by one pass.

use regex::Regex;
use std::sync::OnceLock;

use crate::infrastructure::error::InfrastructureError;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Z][A-Z0-9_]*)\s*\}\}").expect("static regex"))
}

/// Replace every {{NAME}} placeholder with the value of the NAME
/// environment variable. The first missing variable aborts the load.
pub fn resolve_placeholders(raw: &str) -> Result<String, InfrastructureError> {
    let regex = placeholder_regex();

    let mut out = String::with_capacity(raw.len());
    let mut cursor = 0;

    for capture in regex.captures_iter(raw) {
        #[allow(clippy::unwrap_used)]
        let whole = capture.get(0).unwrap();
        let name = &capture[1];

        let value = std::env::var(name)
            .map_err(|_| InfrastructureError::SecretMissing(name.to_string()))?;

        out.push_str(&raw[cursor..whole.start()]);
        out.push_str(&value);
        cursor = whole.end();
    }
    out.push_str(&raw[cursor..]);

    Ok(out)
}

/// List the placeholder names a document references (diagnostics only,
/// no resolution).
pub fn placeholder_names(raw: &str) -> Vec<String> {
    placeholder_regex()
        .captures_iter(raw)
        .map(|c| c[1].to_string())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_from_environment() {
        std::env::set_var("SAGE_TEST_SECRET_A", "s3cret");
        let out = resolve_placeholders("password: {{SAGE_TEST_SECRET_A}}").unwrap();
        assert_eq!(out, "password: s3cret");
    }

    #[test]
    fn test_whitespace_inside_braces_is_tolerated() {
        std::env::set_var("SAGE_TEST_SECRET_B", "x");
        let out = resolve_placeholders("key: {{ SAGE_TEST_SECRET_B }}").unwrap();
        assert_eq!(out, "key: x");
    }

    #[test]
    fn test_missing_variable_fails() {
        let result = resolve_placeholders("key: {{SAGE_TEST_SECRET_DEFINITELY_UNSET}}");
        assert!(matches!(
            result,
            Err(InfrastructureError::SecretMissing(name)) if name == "SAGE_TEST_SECRET_DEFINITELY_UNSET"
        ));
    }

    #[test]
    fn test_text_without_placeholders_is_untouched() {
        let raw = "plain: value\nport: 5432\n";
        assert_eq!(resolve_placeholders(raw).unwrap(), raw);
    }

    #[test]
    fn test_placeholder_names_listed() {
        let names = placeholder_names("a: {{DB_USER}}\nb: {{DB_PASSWORD}}");
        assert_eq!(names, vec!["DB_USER", "DB_PASSWORD"]);
    }
}
