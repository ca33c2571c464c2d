//! Endpoint extraction from JSON API responses.

use crate::extract::js::is_endpoint_like;
use crate::extract::{Discovered, Extraction};
use crate::model::EndpointSource;
use serde_json::Value;
use url::Url;

pub fn extract_from_json(body: &str, base: &Url) -> Extraction {
    let mut out = Extraction::default();
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        tracing::warn!(url = %base, "unparseable JSON response, skipping");
        return out;
    };
    walk(&value, base, &mut out);
    out
}

fn walk(value: &Value, base: &Url, out: &mut Extraction) {
    match value {
        Value::String(s) => push_candidate(out, base, s),
        Value::Array(items) => {
            for item in items {
                walk(item, base, out);
            }
        }
        Value::Object(map) => {
            // Keys sitting next to URL-like values are usually the inputs
            // the endpoint expects.
            let has_url_sibling = map
                .values()
                .any(|v| v.as_str().map(is_endpoint_like).unwrap_or(false));
            for (key, item) in map {
                let scalar = item.is_string() || item.is_number() || item.is_boolean();
                if has_url_sibling
                    && scalar
                    && !item.as_str().map(is_endpoint_like).unwrap_or(false)
                    && !out.parameter_names.contains(key)
                {
                    out.parameter_names.push(key.clone());
                }
                walk(item, base, out);
            }
        }
        _ => {}
    }
}

fn push_candidate(out: &mut Extraction, base: &Url, s: &str) {
    if !is_endpoint_like(s) {
        return;
    }
    let Ok(resolved) = base.join(s) else {
        return;
    };
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return;
    }
    let url = resolved.to_string();
    if !out.links.iter().any(|l| l.url == url) {
        out.links.push(Discovered {
            url,
            source: EndpointSource::Json,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(body: &str) -> Extraction {
        let base = Url::parse("http://h/api/index").unwrap();
        extract_from_json(body, &base)
    }

    #[test]
    fn test_extracts_url_leaves() {
        let out = extract(r#"{"self": "/api/v2/items", "next": "https://h/api/v2/items?page=2"}"#);
        let urls: Vec<&str> = out.links.iter().map(|l| l.url.as_str()).collect();
        assert!(urls.contains(&"http://h/api/v2/items"));
        assert!(urls.contains(&"https://h/api/v2/items?page=2"));
    }

    #[test]
    fn test_walks_nested_arrays() {
        let out = extract(r#"{"items": [{"href": "/a/b"}, {"href": "/c/d"}]}"#);
        assert_eq!(out.links.len(), 2);
    }

    #[test]
    fn test_keys_adjacent_to_urls_become_parameters() {
        let out = extract(r#"{"endpoint": "/api/search", "query": "rust", "limit": 10}"#);
        assert!(out.parameter_names.contains(&"query".to_string()));
        assert!(out.parameter_names.contains(&"limit".to_string()));
        assert!(!out.parameter_names.contains(&"endpoint".to_string()));
    }

    #[test]
    fn test_ignores_plain_strings() {
        let out = extract(r#"{"message": "hello world", "status": "ok"}"#);
        assert!(out.links.is_empty());
        assert!(out.parameter_names.is_empty());
    }

    #[test]
    fn test_malformed_json_recovers() {
        let out = extract("{not json");
        assert!(out.links.is_empty());
    }
}
