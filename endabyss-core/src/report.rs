//! Human and pipeline rendering of a scan report.

use crate::model::{EndpointSource, ScanReport};
use colored::Colorize;
use std::collections::BTreeMap;
use url::Url;

/// The single-purpose output modes used when piping into other tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeMode {
    /// One URL per line, query string attached when parameters are known.
    Url,
    /// One endpoint per line: URL and method.
    Endpoint,
    /// One parameterised URL per line.
    Param,
    /// The whole report as a single JSON document.
    Json,
}

pub fn render_pipe(report: &ScanReport, mode: PipeMode) -> String {
    match mode {
        PipeMode::Url => {
            let mut lines: Vec<String> = Vec::new();
            for endpoint in &report.endpoints {
                lines.push(endpoint.url.clone());
            }
            lines.join("\n")
        }
        PipeMode::Endpoint => report
            .endpoints
            .iter()
            .map(|e| format!("{} [{}]", e.url, e.method))
            .collect::<Vec<_>>()
            .join("\n"),
        PipeMode::Param => report
            .parameters
            .iter()
            .map(|set| {
                let query = set
                    .parameters
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join("&");
                format!("{}?{}", set.url, query)
            })
            .collect::<Vec<_>>()
            .join("\n"),
        PipeMode::Json => serde_json::to_string(report).unwrap_or_default(),
    }
}

/// Terminal report grouped by host, status codes colour-coded.
pub fn render_report(report: &ScanReport) -> String {
    let mut out = String::new();
    out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
    out.push_str("# Summary:\n");
    out.push_str(&format!("  Endpoints found: {}\n", report.endpoints.len()));
    out.push_str(&format!("  Forms found: {}\n", report.forms.len()));
    out.push_str(&format!("  Parameter sets: {}\n", report.parameters.len()));
    out.push_str(&format!(
        "  Fetched: {}  Failed: {}  Deduplicated: {}\n",
        report.stats.fetched, report.stats.failed, report.stats.deduped
    ));
    if report.cancelled {
        out.push_str(&format!("  {}\n", "Scan cancelled, results partial".yellow()));
    }
    out.push_str("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");

    let mut by_host: BTreeMap<String, Vec<&crate::model::Endpoint>> = BTreeMap::new();
    for endpoint in &report.endpoints {
        let host = Url::parse(&endpoint.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        by_host.entry(host).or_default().push(endpoint);
    }

    for (host, endpoints) in &by_host {
        out.push_str(&format!("## {}\n", host));
        out.push_str(&format!("  {} endpoints\n\n", endpoints.len()));
        for endpoint in endpoints {
            let path = Url::parse(&endpoint.url)
                .map(|u| {
                    let p = u.path().to_string();
                    if p.is_empty() { "/".to_string() } else { p }
                })
                .unwrap_or_else(|_| endpoint.url.clone());
            let status = match endpoint.status {
                Some(code) => colorize_status(code),
                None => "  -".dimmed().to_string(),
            };
            let mut line = format!("  {} {}", status, path);
            if endpoint.sources.contains(&EndpointSource::Dirscan) {
                line.push_str(&format!(" {}", "[dirscan]".cyan()));
            }
            if endpoint.method != "GET" {
                line.push_str(&format!(" [{}]", endpoint.method));
            }
            out.push_str(&line);
            out.push('\n');
        }
        out.push('\n');
    }

    if !report.forms.is_empty() {
        out.push_str("## Forms\n\n");
        for form in &report.forms {
            let names: Vec<&str> = form.fields.iter().map(|f| f.name.as_str()).collect();
            out.push_str(&format!(
                "  {} [{}] fields: {}\n",
                form.action_url,
                form.method,
                names.join(", ")
            ));
        }
        out.push('\n');
    }

    if !report.parameters.is_empty() {
        out.push_str("## Parameters\n\n");
        for set in &report.parameters {
            let query = set
                .parameters
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            out.push_str(&format!(
                "  {}?{} [{}] ({})\n",
                set.url,
                query,
                set.method,
                set.source.as_str()
            ));
        }
        out.push('\n');
    }

    out
}

/// Plain-text layout used when writing results to a file.
pub fn render_plain(report: &ScanReport) -> String {
    let mut out = String::new();
    out.push_str("EndAbyss - Endpoints and Parameters\n");
    out.push_str(&"=".repeat(50));
    out.push_str("\n\n");

    out.push_str("Endpoints:\n");
    for endpoint in &report.endpoints {
        let prefix = if endpoint.sources.contains(&EndpointSource::Dirscan) {
            "[DIRSCAN] "
        } else {
            ""
        };
        out.push_str(&format!("{}{}\n", prefix, endpoint.url));
    }
    out.push('\n');

    out.push_str("Forms:\n");
    for form in &report.forms {
        out.push_str(&format!("{} [{}]\n", form.action_url, form.method));
        for field in &form.fields {
            out.push_str(&format!(
                "  {}: {}\n",
                field.name,
                field.value.as_deref().unwrap_or("")
            ));
        }
    }
    out.push('\n');

    out.push_str("Parameters:\n");
    for set in &report.parameters {
        let query = set
            .parameters
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        out.push_str(&format!("{}?{} [{}]\n", set.url, query, set.method));
    }

    out
}

fn colorize_status(status: u16) -> String {
    let text = format!("{}", status);
    match status {
        200..=299 => text.green().to_string(),
        300..=399 => text.cyan().to_string(),
        400..=499 => text.yellow().to_string(),
        500..=599 => text.red().to_string(),
        _ => text,
    }
}
