//! In-page sanitization.
//!
//! [`SANITIZE_SCRIPT`] runs inside the rendered document and returns the
//! stripped `<body>` markup (or `null` when there is no body);
//! [`normalize_markup`] finishes the job on the Rust side.

use std::sync::LazyLock;

use regex::Regex;

/// Selectors removed from the live DOM before serialization.
pub const REMOVED_SELECTORS: &[&str] = &[
    "script",
    "style",
    "img",
    "iframe",
    "noscript",
    "svg",
    "path",
    ".advertisement",
    ".popup",
    ".newsletter",
    ".social-media",
    ".search-bar",
];

/// Evaluated as a function body via CDP `Runtime.callFunctionOn`.
pub const SANITIZE_SCRIPT: &str = r#"() => {
    const body = document.querySelector("body");
    if (!body) {
        return null;
    }
    const selectors = [
        "script", "style", "img", "iframe", "noscript", "svg", "path",
        ".advertisement", ".popup", ".newsletter", ".social-media", ".search-bar"
    ];
    for (const selector of selectors) {
        for (const element of document.querySelectorAll(selector)) {
            if (element.parentNode) {
                element.parentNode.removeChild(element);
            }
        }
    }
    for (const element of document.querySelectorAll("*")) {
        element.removeAttribute("class");
        element.removeAttribute("style");
        element.removeAttribute("tabindex");
        for (const attr of Array.from(element.attributes)) {
            if (attr.name.startsWith("data-")) {
                element.removeAttribute(attr.name);
            }
        }
    }
    return body.innerHTML;
}"#;

/// Serializes the untouched document, or `null` when it has no body.
pub const DOCUMENT_SCRIPT: &str =
    r#"() => document.body ? document.documentElement.outerHTML : null"#;

static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Strip HTML comments and collapse whitespace runs to a single space.
pub fn normalize_markup(raw: &str) -> String {
    let without_comments = COMMENT.replace_all(raw, "");
    WHITESPACE
        .replace_all(&without_comments, " ")
        .trim()
        .to_string()
}
