//! Response parsing: one extractor per content type, selected by the
//! `Content-Type` header with a body-sniff fallback.

pub mod html;
pub mod js;
pub mod json;

use crate::model::{EndpointSource, FetchResult, Form};
use url::Url;

/// A URL found in a response, before canonicalisation.
#[derive(Debug, Clone)]
pub struct Discovered {
    pub url: String,
    pub source: EndpointSource,
}

/// Everything one extract pass produced.
#[derive(Debug, Default)]
pub struct Extraction {
    pub links: Vec<Discovered>,
    pub forms: Vec<Form>,
    /// JS-inferred parameter names, attached to the fetched document.
    pub parameter_names: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentKind {
    Html,
    Js,
    Json,
    Other,
}

/// Runs the extractor matching the response's content type. `base` is the
/// response's final URL, already canonical and in scope.
pub fn extract(result: &FetchResult, base: &Url) -> Extraction {
    let kind = classify(result.content_type.as_deref(), &result.body);
    match kind {
        ContentKind::Html => html::extract_from_html(&result.body, base),
        ContentKind::Json => json::extract_from_json(&result.body, base),
        ContentKind::Js => {
            let mut out = Extraction::default();
            let findings = js::extract_from_js(&result.body);
            for candidate in findings.candidates {
                if let Ok(resolved) = base.join(&candidate)
                    && (resolved.scheme() == "http" || resolved.scheme() == "https")
                {
                    let url = resolved.to_string();
                    if !out.links.iter().any(|l| l.url == url) {
                        out.links.push(Discovered {
                            url,
                            source: EndpointSource::ExtJs,
                        });
                    }
                }
            }
            out.parameter_names = findings.parameter_names;
            out
        }
        ContentKind::Other => Extraction::default(),
    }
}

fn classify(content_type: Option<&str>, body: &str) -> ContentKind {
    if let Some(ct) = content_type {
        let ct = ct.to_lowercase();
        if ct.contains("text/html") || ct.contains("application/xhtml") {
            return ContentKind::Html;
        }
        if ct.contains("javascript") || ct.contains("ecmascript") {
            return ContentKind::Js;
        }
        if ct.contains("json") {
            return ContentKind::Json;
        }
        if !ct.contains("text/plain") && !ct.is_empty() {
            return ContentKind::Other;
        }
    }
    sniff(body)
}

/// Looks at the first 512 bytes when the server did not say what it sent.
fn sniff(body: &str) -> ContentKind {
    let head: String = body.chars().take(512).collect();
    let head = head.trim_start().to_lowercase();
    if head.starts_with("<!doctype") || head.starts_with("<html") || head.starts_with('<') {
        ContentKind::Html
    } else if head.starts_with('{') || head.starts_with('[') {
        ContentKind::Json
    } else if head.is_empty() {
        ContentKind::Other
    } else {
        ContentKind::Js
    }
}
