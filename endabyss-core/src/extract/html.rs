//! Endpoint, form, and parameter harvesting from HTML documents.

use crate::extract::js::extract_from_js;
use crate::extract::{Discovered, Extraction};
use crate::model::{EndpointSource, Form, FormField};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Attributes that carry URLs outside of anchors and forms.
const URL_ATTR_SELECTORS: &[(&str, &str)] = &[
    ("link[href]", "href"),
    ("script[src]", "src"),
    ("img[src]", "src"),
    ("iframe[src]", "src"),
    ("[data-url]", "data-url"),
    ("[data-href]", "data-href"),
];

pub fn extract_from_html(body: &str, base: &Url) -> Extraction {
    let document = Html::parse_document(body);
    let mut out = Extraction::default();
    harvest(&document, base, &mut out);

    // HTML comments often hide retired markup; re-parse each one.
    for node in document.tree.values() {
        if let scraper::Node::Comment(comment) = node {
            let text: &str = comment;
            let fragment = Html::parse_fragment(text);
            harvest(&fragment, base, &mut out);
        }
    }

    out
}

fn harvest(document: &Html, base: &Url, out: &mut Extraction) {
    let anchor_selector = Selector::parse("a[href]").unwrap();
    for element in document.select(&anchor_selector) {
        if let Some(href) = element.value().attr("href") {
            push_link(out, base, href, EndpointSource::HtmlA);
        }
    }

    for (selector, attr) in URL_ATTR_SELECTORS {
        let selector = Selector::parse(selector).unwrap();
        for element in document.select(&selector) {
            if let Some(value) = element.value().attr(attr) {
                push_link(out, base, value, EndpointSource::HtmlAttr);
            }
        }
    }

    let meta_selector = Selector::parse("meta").unwrap();
    for element in document.select(&meta_selector) {
        let http_equiv = element.value().attr("http-equiv").unwrap_or_default();
        if http_equiv.eq_ignore_ascii_case("refresh")
            && let Some(content) = element.value().attr("content")
            && let Some(target) = parse_meta_refresh(content)
        {
            push_link(out, base, target, EndpointSource::HtmlAttr);
        }
    }

    let form_selector = Selector::parse("form").unwrap();
    for element in document.select(&form_selector) {
        if let Some(form) = parse_form(element, base) {
            out.forms.push(form);
        }
    }

    // Inline script bodies and on* handlers go through the JS extractor.
    let script_selector = Selector::parse("script:not([src])").unwrap();
    for element in document.select(&script_selector) {
        let source: String = element.text().collect();
        merge_js_findings(out, base, &source);
    }

    let onclick_selector = Selector::parse("[onclick]").unwrap();
    for element in document.select(&onclick_selector) {
        if let Some(handler) = element.value().attr("onclick") {
            merge_js_findings(out, base, handler);
        }
    }
}

fn merge_js_findings(out: &mut Extraction, base: &Url, source: &str) {
    let findings = extract_from_js(source);
    for candidate in findings.candidates {
        push_link(out, base, &candidate, EndpointSource::InlineJs);
    }
    for name in findings.parameter_names {
        if !out.parameter_names.contains(&name) {
            out.parameter_names.push(name);
        }
    }
}

fn push_link(out: &mut Extraction, base: &Url, raw: &str, source: EndpointSource) {
    let raw = raw.trim();
    if raw.is_empty()
        || raw.starts_with('#')
        || raw.starts_with("javascript:")
        || raw.starts_with("mailto:")
        || raw.starts_with("tel:")
        || raw.starts_with("data:")
    {
        return;
    }
    let Ok(resolved) = base.join(raw) else {
        return;
    };
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return;
    }
    let url = resolved.to_string();
    if !out.links.iter().any(|l| l.url == url) {
        out.links.push(Discovered { url, source });
    }
}

/// Pulls the URL out of `content="5; url=/next"`.
fn parse_meta_refresh(content: &str) -> Option<&str> {
    let lower = content.to_lowercase();
    let idx = lower.find("url=")?;
    let target = content[idx + 4..].trim().trim_matches(['\'', '"']);
    if target.is_empty() { None } else { Some(target) }
}

fn parse_form(element: ElementRef, base: &Url) -> Option<Form> {
    let action = element.value().attr("action").unwrap_or_default().trim();
    let action_url = if action.is_empty() {
        base.clone()
    } else {
        base.join(action).ok()?
    };
    let method = element
        .value()
        .attr("method")
        .unwrap_or("GET")
        .to_uppercase();

    let field_selector = Selector::parse("input, textarea, select").unwrap();
    let mut fields = Vec::new();
    for input in element.select(&field_selector) {
        let Some(name) = input.value().attr("name") else {
            continue;
        };
        let tag = input.value().name();
        let input_type = match tag {
            "textarea" => "textarea".to_string(),
            "select" => "select".to_string(),
            _ => input.value().attr("type").unwrap_or("text").to_lowercase(),
        };
        // Buttons submit the form, they are not inputs to the server.
        if matches!(input_type.as_str(), "submit" | "button" | "reset" | "image") {
            continue;
        }
        let value = match tag {
            "select" => select_default(input),
            _ => input.value().attr("value").map(|v| v.to_string()),
        };
        fields.push(FormField {
            name: name.to_string(),
            value,
            input_type,
        });
    }

    Some(Form {
        action_url: action_url.to_string(),
        method,
        fields,
    })
}

fn select_default(select: ElementRef) -> Option<String> {
    let option_selector = Selector::parse("option").unwrap();
    let mut first = None;
    for option in select.select(&option_selector) {
        let value = option
            .value()
            .attr("value")
            .map(|v| v.to_string())
            .unwrap_or_else(|| option.text().collect::<String>().trim().to_string());
        if option.value().attr("selected").is_some() {
            return Some(value);
        }
        if first.is_none() {
            first = Some(value);
        }
    }
    first
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(body: &str) -> Extraction {
        let base = Url::parse("http://h/page").unwrap();
        extract_from_html(body, &base)
    }

    fn link_urls(out: &Extraction) -> Vec<&str> {
        out.links.iter().map(|l| l.url.as_str()).collect()
    }

    #[test]
    fn test_harvests_anchors_relative_and_absolute() {
        let out = extract(r#"<a href="/a">one</a><a href="http://h/b">two</a>"#);
        assert_eq!(link_urls(&out), vec!["http://h/a", "http://h/b"]);
        assert_eq!(out.links[0].source, EndpointSource::HtmlA);
    }

    #[test]
    fn test_skips_pseudo_links() {
        let out = extract(
            r##"<a href="javascript:void(0)">x</a><a href="mailto:a@b.c">y</a>
               <a href="#frag">z</a><a href="tel:+123">w</a>"##,
        );
        assert!(out.links.is_empty());
    }

    #[test]
    fn test_harvests_resource_attributes() {
        let out = extract(
            r#"<script src="/app.js"></script><img src="/logo.png">
               <iframe src="/embed"></iframe><link href="/style.css" rel="stylesheet">
               <div data-url="/ajax/load"></div><span data-href="/spa/route"></span>"#,
        );
        let urls = link_urls(&out);
        assert!(urls.contains(&"http://h/app.js"));
        assert!(urls.contains(&"http://h/logo.png"));
        assert!(urls.contains(&"http://h/embed"));
        assert!(urls.contains(&"http://h/style.css"));
        assert!(urls.contains(&"http://h/ajax/load"));
        assert!(urls.contains(&"http://h/spa/route"));
        assert!(out.links.iter().all(|l| l.source == EndpointSource::HtmlAttr));
    }

    #[test]
    fn test_meta_refresh() {
        let out = extract(r#"<meta http-equiv="refresh" content="0; url=/next">"#);
        assert_eq!(link_urls(&out), vec!["http://h/next"]);
    }

    #[test]
    fn test_form_fields_and_defaults() {
        let out = extract(
            r#"<form action="/login" method="post">
                 <input name="u">
                 <input name="p" type="password">
                 <input type="submit" value="Go">
               </form>"#,
        );
        assert_eq!(out.forms.len(), 1);
        let form = &out.forms[0];
        assert_eq!(form.action_url, "http://h/login");
        assert_eq!(form.method, "POST");
        let names: Vec<&str> = form.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["u", "p"]);
        assert_eq!(form.fields[1].input_type, "password");
    }

    #[test]
    fn test_form_without_action_targets_page() {
        let out = extract(r#"<form><input name="q"></form>"#);
        assert_eq!(out.forms[0].action_url, "http://h/page");
        assert_eq!(out.forms[0].method, "GET");
    }

    #[test]
    fn test_form_select_default_value() {
        let out = extract(
            r#"<form action="/f"><select name="lang">
                 <option value="en">English</option>
                 <option value="de" selected>German</option>
               </select></form>"#,
        );
        assert_eq!(out.forms[0].fields[0].value.as_deref(), Some("de"));
    }

    #[test]
    fn test_inline_script_goes_through_js_extractor() {
        let out = extract(r#"<script>fetch("/api/v1/users?id=42")</script>"#);
        assert_eq!(link_urls(&out), vec!["http://h/api/v1/users?id=42"]);
        assert_eq!(out.links[0].source, EndpointSource::InlineJs);
        assert_eq!(out.parameter_names, vec!["id"]);
    }

    #[test]
    fn test_onclick_handler() {
        let out = extract(r#"<button onclick="location.href='/dash/home'">go</button>"#);
        assert_eq!(link_urls(&out), vec!["http://h/dash/home"]);
    }

    #[test]
    fn test_html_comment_markup_is_harvested() {
        let out = extract(r#"<!-- <a href="/old-admin">retired</a> -->"#);
        assert_eq!(link_urls(&out), vec!["http://h/old-admin"]);
    }

    #[test]
    fn test_empty_body_yields_nothing() {
        let out = extract("");
        assert!(out.links.is_empty());
        assert!(out.forms.is_empty());
        assert!(out.parameter_names.is_empty());
    }
}
