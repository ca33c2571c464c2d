//! Endpoint extraction from JavaScript text.
//!
//! Heuristic regexes over quoted string literals, in the LinkFinder
//! tradition: absolute URLs, protocol-relative URLs, root- and dot-relative
//! paths, files with a known web extension, and extension-less REST paths.

use once_cell::sync::Lazy;
use regex::Regex;

const MAX_CANDIDATE_LEN: usize = 2048;

/// Body of the endpoint pattern, shared between the quoted scanner and the
/// anchored bare-string matcher.
const ENDPOINT_PATTERN: &str = concat!(
    // scheme:// or protocol-relative, followed by a dotted domain
    r"(?:[a-zA-Z]{1,10}://|//)[^\x22\x27\x60/\s]+\.[a-zA-Z]{2,}[^\x22\x27\x60\s]*",
    r"|",
    // root-, parent- or current-relative path
    r"(?:/|\.\./|\./)[^\x22\x27\x60><,;| *()%$^\\\[\]][^\x22\x27\x60><,;|()\s]+",
    r"|",
    // path to a file with a known web extension
    r"[a-zA-Z0-9_\-/]+/[a-zA-Z0-9_\-/.]+\.(?:php|asp|aspx|jsp|json|action|html|js|txt|xml)(?:[?#][^\x22\x27\x60\s]*)?",
    r"|",
    // extension-less REST-style path
    r"[a-zA-Z0-9_\-/]+/[a-zA-Z0-9_\-/{}]{3,}(?:[?#][^\x22\x27\x60\s]*)?",
);

static QUOTED_ENDPOINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        "[\\x22\\x27\\x60]({})[\\x22\\x27\\x60]",
        ENDPOINT_PATTERN
    ))
    .expect("quoted endpoint regex")
});

static BARE_ENDPOINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("^(?:{})$", ENDPOINT_PATTERN)).expect("bare endpoint regex")
});

static QUERY_PARAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]([A-Za-z_][A-Za-z0-9_\-]*)=").expect("query param regex"));

static TEMPLATE_PARAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("template param regex"));

static MIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:text|image|audio|video|font|application|multipart|message)/[a-z0-9.+\-]+$")
        .expect("mime regex")
});

/// What one pass over a script body yields.
#[derive(Debug, Default)]
pub struct JsFindings {
    /// URL-ish string literals, as written (relative forms unresolved).
    pub candidates: Vec<String>,
    /// Parameter names seen in `?name=` or `{name}` positions.
    pub parameter_names: Vec<String>,
}

/// Scans JavaScript source for endpoint-like string literals.
pub fn extract_from_js(source: &str) -> JsFindings {
    let mut findings = JsFindings::default();
    for capture in QUOTED_ENDPOINT_RE.captures_iter(source) {
        let Some(matched) = capture.get(1) else {
            continue;
        };
        let candidate = matched.as_str();
        if !accept_candidate(candidate) {
            continue;
        }
        if !findings.candidates.iter().any(|c| c == candidate) {
            findings.candidates.push(candidate.to_string());
        }
        collect_parameter_names(candidate, &mut findings.parameter_names);
    }
    findings
}

/// Whether a bare string (a JSON leaf, an attribute value) looks like an
/// endpoint on its own.
pub fn is_endpoint_like(s: &str) -> bool {
    accept_candidate(s) && BARE_ENDPOINT_RE.is_match(s)
}

/// Rejection filters applied to every regex hit.
fn accept_candidate(candidate: &str) -> bool {
    if candidate.len() > MAX_CANDIDATE_LEN {
        return false;
    }
    if MIME_RE.is_match(candidate) {
        return false;
    }
    // Single-word tokens with no path or extension structure are noise.
    if !candidate.contains('/') && !candidate.contains('.') {
        return false;
    }
    true
}

fn collect_parameter_names(candidate: &str, out: &mut Vec<String>) {
    for capture in QUERY_PARAM_RE.captures_iter(candidate) {
        let name = capture[1].to_string();
        if !out.contains(&name) {
            out.push(name);
        }
    }
    for capture in TEMPLATE_PARAM_RE.captures_iter(candidate) {
        let name = capture[1].to_string();
        if !out.contains(&name) {
            out.push(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_fetch_call_path() {
        let findings = extract_from_js(r#"fetch("/api/v1/users?id=42")"#);
        assert_eq!(findings.candidates, vec!["/api/v1/users?id=42"]);
        assert_eq!(findings.parameter_names, vec!["id"]);
    }

    #[test]
    fn test_extracts_absolute_url() {
        let findings = extract_from_js(r#"const u = 'https://api.example.com/v2/items';"#);
        assert_eq!(findings.candidates, vec!["https://api.example.com/v2/items"]);
    }

    #[test]
    fn test_extracts_protocol_relative() {
        let findings = extract_from_js(r#"load("//cdn.example.com/app.js")"#);
        assert_eq!(findings.candidates, vec!["//cdn.example.com/app.js"]);
    }

    #[test]
    fn test_extracts_backtick_template() {
        let findings = extract_from_js("const path = `/users/{userId}/posts`;");
        assert_eq!(findings.candidates, vec!["/users/{userId}/posts"]);
        assert_eq!(findings.parameter_names, vec!["userId"]);
    }

    #[test]
    fn test_extracts_rest_path_without_extension() {
        let findings = extract_from_js(r#"axios.get("api/v1/session/refresh")"#);
        assert_eq!(findings.candidates, vec!["api/v1/session/refresh"]);
    }

    #[test]
    fn test_rejects_mime_strings() {
        let findings = extract_from_js(r#"headers.set("Accept", "application/json")"#);
        assert!(findings.candidates.is_empty());
    }

    #[test]
    fn test_rejects_single_word_tokens() {
        let findings = extract_from_js(r#"mode = "standalone";"#);
        assert!(findings.candidates.is_empty());
    }

    #[test]
    fn test_rejects_overlong_candidates() {
        let long = format!("\"/{}\"", "a".repeat(3000));
        let findings = extract_from_js(&long);
        assert!(findings.candidates.is_empty());
    }

    #[test]
    fn test_dedups_repeated_candidates() {
        let findings = extract_from_js(r#"f("/a/b"); g("/a/b");"#);
        assert_eq!(findings.candidates.len(), 1);
    }

    #[test]
    fn test_is_endpoint_like_on_bare_strings() {
        assert!(is_endpoint_like("/api/users"));
        assert!(is_endpoint_like("https://example.com/x"));
        assert!(!is_endpoint_like("hello world"));
        assert!(!is_endpoint_like("application/json"));
        assert!(!is_endpoint_like("standalone"));
    }

    #[test]
    fn test_multiple_parameter_names() {
        let findings = extract_from_js(r#"fetch("/search?q=rust&page=2&utm=x")"#);
        assert_eq!(findings.parameter_names, vec!["q", "page", "utm"]);
    }
}
