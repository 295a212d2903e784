use std::sync::LazyLock;

use regex::Regex;

static LANGUAGE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2}([-_][a-z]{2})?$").unwrap());

/// Whether a path segment looks like a locale (`fr`, `en-us`, `pt_BR`).
pub fn is_language_code(segment: &str) -> bool {
    LANGUAGE_CODE.is_match(&segment.to_lowercase())
}

/// Whether `url` points at a (possibly localized) site root rather than a
/// product page.
///
/// A URL is a homepage when its path has at most three non-empty segments
/// and every one of them is a language code. Query and fragment are ignored.
/// Unparseable URLs are not classified.
pub fn is_homepage(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    let segments: Vec<&str> = parsed.path().split('/').filter(|s| !s.is_empty()).collect();
    segments.len() <= 3 && segments.iter().all(|s| is_language_code(s))
}
