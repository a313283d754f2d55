use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

pub const REDACTED: &str = "***";

/// A secret-like key (optionally with a prefix such as `client` in
/// `clientSecret`), an `=`/`:` separator, then the value to hide.
static SECRET_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)((?:password|passwd|secret|token|apikey|api[_-]key|connection[_-]?string)[a-z0-9_-]*"?\s*[=:]\s*)("[^"]*"|'[^']*'|[^\s,&]+)"#,
    )
    .expect("secret redaction pattern must compile")
});

/// Mask values of secret-like keys in a log line.
///
/// Returns the input unchanged (borrowed) when nothing matched.
pub fn redact(line: &str) -> Cow<'_, str> {
    SECRET_ASSIGNMENT.replace_all(line, format!("${{1}}{REDACTED}").as_str())
}
