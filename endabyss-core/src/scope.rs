//! URL canonicalisation and scope filtering.
//!
//! Every URL crossing a module boundary goes through [`canonicalize`] first;
//! the [`ScopeFilter`] then decides whether the crawl may visit it.

use crate::config::ScopeMode;
use crate::error::{Result, ScanError};
use percent_encoding::percent_decode_str;
use std::sync::atomic::{AtomicBool, Ordering};
use url::Url;

/// Multi-label public suffixes that change where the registered domain
/// starts. Covers the common ccTLD second levels; anything else is treated
/// as a single-label suffix.
const MULTI_LABEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "me.uk", "net.uk", "co.jp", "ne.jp", "or.jp", "ac.jp",
    "go.jp", "com.au", "net.au", "org.au", "edu.au", "gov.au", "co.nz", "net.nz", "org.nz",
    "com.br", "net.br", "org.br", "gov.br", "co.in", "net.in", "org.in", "co.za", "org.za",
    "com.cn", "net.cn", "org.cn", "gov.cn", "com.mx", "com.ar", "com.tr", "com.sg", "com.hk",
    "com.tw", "co.kr", "or.kr", "go.kr", "com.my", "com.ph", "com.vn", "com.sa", "co.il",
    "org.il",
];

/// Canonicalises a URL string per the engine's rules: lowercase scheme and
/// host, default ports stripped, percent-encoding normalised, dot segments
/// resolved, duplicate slashes collapsed, fragment dropped, and tracking
/// query keys removed. Query order is preserved; [`dedup_key`] sorts it.
pub fn canonicalize(raw: &str, denylist: &[String]) -> Result<Url> {
    let mut url =
        Url::parse(raw).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", raw, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ScanError::InvalidUrl(format!(
            "unsupported scheme in {}",
            raw
        )));
    }
    if url.host_str().is_none() {
        return Err(ScanError::InvalidUrl(format!("no host in {}", raw)));
    }

    let path = normalize_path(url.path());
    url.set_path(&path);
    url.set_fragment(None);

    if let Some(query) = url.query() {
        let kept = filter_query(query, denylist);
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&kept.join("&")));
        }
    }

    Ok(url)
}

/// Resolves `raw` against `base`, then canonicalises.
pub fn canonicalize_resolved(base: &Url, raw: &str, denylist: &[String]) -> Result<Url> {
    let joined = base
        .join(raw)
        .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", raw, e)))?;
    canonicalize(joined.as_str(), denylist)
}

/// The visited-set key: canonical URL with its query pairs sorted.
pub fn dedup_key(url: &Url) -> String {
    match url.query() {
        None => url.to_string(),
        Some(query) => {
            let mut pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
            pairs.sort_unstable();
            let mut base = url.clone();
            base.set_query(None);
            format!("{}?{}", base, pairs.join("&"))
        }
    }
}

/// The canonical URL with the query dropped; endpoint and parameter-set
/// records key on this form.
pub fn without_query(url: &Url) -> String {
    let mut stripped = url.clone();
    stripped.set_query(None);
    stripped.to_string()
}

/// Query pairs of a canonical URL as (name, example value).
pub fn query_pairs(url: &Url) -> Vec<(String, String)> {
    let Some(query) = url.query() else {
        return Vec::new();
    };
    query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode_lossy(k), decode_lossy(v)),
            None => (decode_lossy(pair), String::new()),
        })
        .collect()
}

fn decode_lossy(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Collapses duplicate slashes and re-encodes each segment with normalised
/// percent-escapes. Dot segments were already resolved at parse time; a
/// trailing slash is kept because directory prefixes are meaningful.
fn normalize_path(path: &str) -> String {
    let trailing = path.len() > 1 && path.ends_with('/');
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(normalize_escapes)
        .collect();
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = format!("/{}", segments.join("/"));
    if trailing {
        out.push('/');
    }
    out
}

/// Decodes percent-escapes of unreserved characters and uppercases the hex
/// digits of those that stay encoded.
fn normalize_escapes(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = String::with_capacity(segment.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = bytes.get(i + 1..i + 3).and_then(|h| std::str::from_utf8(h).ok());
            if let Some(hex) = hex
                && let Ok(value) = u8::from_str_radix(hex, 16)
            {
                if value.is_ascii_alphanumeric() || matches!(value, b'-' | b'.' | b'_' | b'~') {
                    out.push(value as char);
                } else {
                    out.push('%');
                    out.push_str(&hex.to_uppercase());
                }
                i += 3;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

/// Keeps the raw query pairs whose decoded key is not on the denylist.
/// A denylist entry ending in `*` matches keys by prefix.
fn filter_query(query: &str, denylist: &[String]) -> Vec<String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let key = pair.split_once('=').map(|(k, _)| k).unwrap_or(pair);
            let key = decode_lossy(key);
            !denylist.iter().any(|entry| match entry.strip_suffix('*') {
                Some(prefix) => key.starts_with(prefix),
                None => key == *entry,
            })
        })
        .map(|pair| pair.to_string())
        .collect()
}

/// The registered domain of a host, using the embedded multi-label suffix
/// table. Returns None for IP addresses and single-label hosts.
pub fn registered_domain(host: &str) -> Option<String> {
    if host.parse::<std::net::IpAddr>().is_ok() {
        return None;
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return None;
    }
    let last_two = labels[labels.len() - 2..].join(".");
    if MULTI_LABEL_SUFFIXES.contains(&last_two.as_str()) {
        if labels.len() < 3 {
            return None;
        }
        return Some(labels[labels.len() - 3..].join("."));
    }
    Some(last_two)
}

/// One seed's scope state: its origin, path prefix, and predicate mode.
#[derive(Debug, Clone)]
pub struct Target {
    pub host: String,
    pub port: Option<u16>,
    pub path_prefix: String,
    pub mode: ScopeMode,
    registered: Option<String>,
}

impl Target {
    pub fn from_seed(seed: &Url, mode: ScopeMode) -> Result<Self> {
        let host = seed
            .host_str()
            .ok_or_else(|| ScanError::InvalidUrl(format!("no host in {}", seed)))?
            .to_lowercase();
        let registered = registered_domain(&host);
        let mut path_prefix = seed.path().to_string();
        if !path_prefix.ends_with('/') {
            // Keep only the directory part so sibling paths stay in scope.
            path_prefix = match path_prefix.rfind('/') {
                Some(idx) => path_prefix[..=idx].to_string(),
                None => "/".to_string(),
            };
        }
        Ok(Self {
            host,
            port: seed.port(),
            path_prefix,
            mode,
            registered,
        })
    }

    fn accepts(&self, url: &Url, psl_warned: &AtomicBool) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        match self.mode {
            ScopeMode::RegisteredDomain => match (&self.registered, registered_domain(host)) {
                (Some(ours), Some(theirs)) => *ours == theirs,
                _ => {
                    if !psl_warned.swap(true, Ordering::Relaxed) {
                        tracing::warn!(
                            host,
                            "registered-domain comparison unavailable, falling back to same-host"
                        );
                    }
                    host == self.host
                }
            },
            ScopeMode::Host => host == self.host && url.port() == self.port,
            ScopeMode::Prefix => {
                host == self.host
                    && url.port() == self.port
                    && url.path().starts_with(&self.path_prefix)
            }
        }
    }
}

/// Decides crawl membership. A URL is in scope when any target accepts it.
#[derive(Debug)]
pub struct ScopeFilter {
    targets: Vec<Target>,
    denylist: Vec<String>,
    psl_warned: AtomicBool,
}

impl ScopeFilter {
    pub fn new(targets: Vec<Target>, denylist: Vec<String>) -> Self {
        Self {
            targets,
            denylist,
            psl_warned: AtomicBool::new(false),
        }
    }

    pub fn denylist(&self) -> &[String] {
        &self.denylist
    }

    pub fn canonicalize(&self, raw: &str) -> Result<Url> {
        canonicalize(raw, &self.denylist)
    }

    pub fn canonicalize_resolved(&self, base: &Url, raw: &str) -> Result<Url> {
        canonicalize_resolved(base, raw, &self.denylist)
    }

    pub fn in_scope(&self, url: &Url) -> bool {
        self.targets.iter().any(|t| t.accepts(url, &self.psl_warned))
    }
}
