use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Where an endpoint was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointSource {
    Seed,
    HtmlA,
    HtmlForm,
    HtmlAttr,
    InlineJs,
    ExtJs,
    Json,
    BrowserNet,
    Dirscan,
}

impl EndpointSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointSource::Seed => "seed",
            EndpointSource::HtmlA => "html_a",
            EndpointSource::HtmlForm => "html_form",
            EndpointSource::HtmlAttr => "html_attr",
            EndpointSource::InlineJs => "inline_js",
            EndpointSource::ExtJs => "ext_js",
            EndpointSource::Json => "json",
            EndpointSource::BrowserNet => "browser_net",
            EndpointSource::Dirscan => "dirscan",
        }
    }
}

/// A (method, URL) pair observed or inferred as a request target.
///
/// `url` never carries a query string; query parameters surface as a
/// separate [`ParameterSet`]. Identity for merging is `(method, url)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub method: String,
    pub sources: Vec<EndpointSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub depth: usize,
}

impl Endpoint {
    pub fn new(url: String, method: &str, source: EndpointSource, depth: usize) -> Self {
        Self {
            url,
            method: method.to_uppercase(),
            sources: vec![source],
            content_type: None,
            status: None,
            depth,
        }
    }

    pub fn key(&self) -> (String, String) {
        (self.method.clone(), self.url.clone())
    }
}

/// A single form input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub input_type: String,
}

/// An HTML form with its resolved action target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Form {
    pub action_url: String,
    pub method: String,
    pub fields: Vec<FormField>,
}

impl Form {
    /// Identity: method, action, and the sorted field-name set.
    pub fn key(&self) -> (String, String, Vec<String>) {
        let mut names: Vec<String> = self.fields.iter().map(|f| f.name.clone()).collect();
        names.sort();
        (self.method.clone(), self.action_url.clone(), names)
    }
}

/// Where a parameter set was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterSource {
    Query,
    Form,
    JsInferred,
}

impl ParameterSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterSource::Query => "query",
            ParameterSource::Form => "form",
            ParameterSource::JsInferred => "js_inferred",
        }
    }
}

/// Named inputs accepted by an endpoint, with example values where known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSet {
    pub url: String,
    pub method: String,
    pub parameters: BTreeMap<String, String>,
    pub source: ParameterSource,
}

impl ParameterSet {
    /// Identity: method, query-less URL, and the sorted parameter-name set.
    pub fn key(&self) -> (String, String, Vec<String>) {
        let names: Vec<String> = self.parameters.keys().cloned().collect();
        (self.method.clone(), self.url.clone(), names)
    }
}

/// One request handed to a fetch backend.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }
}

/// What a fetch backend produced for one request.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// URL after following redirects; canonical before extraction.
    pub final_url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub content_type: Option<String>,
    pub truncated: bool,
    pub elapsed: Duration,
    /// Network requests observed by the dynamic backend while rendering.
    pub observed_subrequests: Vec<FetchRequest>,
}

impl FetchResult {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A unit of work on the frontier.
#[derive(Debug, Clone)]
pub struct Task {
    pub url: String,
    pub method: String,
    pub depth: usize,
    pub referrer: Option<String>,
    pub source: EndpointSource,
}

/// Run counters surfaced in the final report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStats {
    pub fetched: u64,
    pub failed: u64,
    pub deduped: u64,
    pub elapsed_ms: u64,
}

/// Everything a scan produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub endpoints: Vec<Endpoint>,
    pub forms: Vec<Form>,
    pub parameters: Vec<ParameterSet>,
    pub stats: ScanStats,
    pub cancelled: bool,
}
