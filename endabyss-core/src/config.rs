use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_STATIC_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DYNAMIC_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_REDIRECTS: usize = 5;
pub const DEFAULT_USER_AGENT: &str =
    "EndAbyss/0.2 (+https://github.com/endabyss/endabyss)";

/// Which fetch backend drives the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Static,
    Dynamic,
}

impl ScanMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "static" => Some(ScanMode::Static),
            "dynamic" => Some(ScanMode::Dynamic),
            _ => None,
        }
    }
}

/// How seed URLs bound the crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScopeMode {
    /// Any host sharing the seed's registered domain.
    RegisteredDomain,
    /// The seed's exact host (and port).
    Host,
    /// The seed's host plus its path prefix.
    Prefix,
}

impl ScopeMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "registered-domain" | "domain" => Some(ScopeMode::RegisteredDomain),
            "host" => Some(ScopeMode::Host),
            "prefix" => Some(ScopeMode::Prefix),
            _ => None,
        }
    }
}

/// Retry tuning for the politeness layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Full configuration for one scan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Seed URLs. Each seed carries its own scope state.
    pub targets: Vec<String>,
    pub scope_mode: ScopeMode,
    pub mode: ScanMode,
    pub max_depth: usize,
    pub concurrency: usize,
    /// Fixed pause before every request.
    pub delay: Duration,
    /// Optional uniform-random pause range; the larger of the two wins.
    pub random_delay: Option<(Duration, Duration)>,
    /// Requests per second across all workers. 0 disables the bucket.
    pub rate_limit: f64,
    pub retry: RetryConfig,
    /// Outbound proxies (HTTP/HTTPS/SOCKS5), rotated round-robin per attempt.
    pub proxies: Vec<String>,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub user_agent: String,
    pub max_body_bytes: usize,
    pub timeout: Option<Duration>,
    /// Optional whole-run deadline; reaching it cancels the scan.
    pub max_time: Option<Duration>,
    pub headless: bool,
    /// How long the dynamic backend waits for late network activity.
    pub wait_time: Duration,
    pub webdriver_url: Option<String>,
    pub dirscan: bool,
    pub wordlist: Option<PathBuf>,
    /// Query keys stripped during canonicalisation. Trailing `*` matches a prefix.
    pub tracking_denylist: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            scope_mode: ScopeMode::RegisteredDomain,
            mode: ScanMode::Static,
            max_depth: 5,
            concurrency: 10,
            delay: Duration::ZERO,
            random_delay: None,
            rate_limit: 0.0,
            retry: RetryConfig::default(),
            proxies: Vec::new(),
            headers: HashMap::new(),
            cookies: HashMap::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            timeout: None,
            max_time: None,
            headless: true,
            wait_time: Duration::from_secs(3),
            webdriver_url: None,
            dirscan: false,
            wordlist: None,
            tracking_denylist: default_tracking_denylist(),
        }
    }
}

pub fn default_tracking_denylist() -> Vec<String> {
    vec![
        "utm_*".to_string(),
        "fbclid".to_string(),
        "gclid".to_string(),
    ]
}

impl ScanConfig {
    pub fn request_timeout(&self) -> Duration {
        self.timeout.unwrap_or(match self.mode {
            ScanMode::Static => DEFAULT_STATIC_TIMEOUT,
            ScanMode::Dynamic => DEFAULT_DYNAMIC_TIMEOUT,
        })
    }

    /// Checks everything that must hold before workers start.
    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(ScanError::Config("no targets provided".to_string()));
        }
        for target in &self.targets {
            let url = Url::parse(target)
                .map_err(|e| ScanError::Config(format!("bad seed URL '{}': {}", target, e)))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ScanError::Config(format!(
                    "seed '{}' must use http or https",
                    target
                )));
            }
            if url.host_str().is_none() {
                return Err(ScanError::Config(format!("seed '{}' has no host", target)));
            }
        }
        if self.concurrency == 0 {
            return Err(ScanError::Config("concurrency must be at least 1".to_string()));
        }
        if let Some((min, max)) = self.random_delay
            && min > max
        {
            return Err(ScanError::Config(
                "random delay range must be min-max with min <= max".to_string(),
            ));
        }
        if let Some(ref path) = self.wordlist
            && !path.is_file()
        {
            return Err(ScanError::Config(format!(
                "wordlist {} is not readable",
                path.display()
            )));
        }
        for proxy in &self.proxies {
            reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| ScanError::Config(format!("bad proxy '{}': {}", proxy, e)))?;
        }
        Ok(())
    }
}

/// Parses a "min-max" delay range in seconds, e.g. "1-3" or "0.5-2.5".
pub fn parse_delay_range(s: &str) -> Result<(Duration, Duration)> {
    let (min, max) = s
        .split_once('-')
        .ok_or_else(|| ScanError::Config(format!("bad delay range '{}', expected min-max", s)))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<f64>()
            .map_err(|_| ScanError::Config(format!("bad delay range '{}'", s)))
    };
    let (min, max) = (parse(min)?, parse(max)?);
    if min < 0.0 || max < min {
        return Err(ScanError::Config(format!("bad delay range '{}'", s)));
    }
    Ok((Duration::from_secs_f64(min), Duration::from_secs_f64(max)))
}
