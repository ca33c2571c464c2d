//! Wordlist-driven existence probing of discovered directory prefixes.
//!
//! Probes ride the normal frontier as HEAD tasks, so they share the
//! politeness layer and the visited set with the crawl itself.

use crate::error::{Result, ScanError};
use crate::model::{EndpointSource, Task};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use url::Url;

const DEFAULT_WORDLIST: &str = include_str!("../wordlists/default.txt");

/// Status codes that mean "something is there". 401/403 count: the path
/// exists even if we may not read it.
pub fn probe_hit(status: u16) -> bool {
    matches!(status, 200..=299 | 300..=399 | 401 | 403)
}

pub struct DirScanner {
    words: Vec<String>,
    probed_prefixes: Mutex<HashSet<String>>,
}

impl DirScanner {
    pub fn new(words: Vec<String>) -> Self {
        Self {
            words,
            probed_prefixes: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_default_wordlist() -> Self {
        Self::new(parse_wordlist(DEFAULT_WORDLIST))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScanError::Wordlist(format!("failed to read {}: {}", path.display(), e))
        })?;
        Ok(Self::new(parse_wordlist(&content)))
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Probe tasks for every word under the directory prefix of `url`.
    /// Each prefix is expanded once per run; an empty wordlist is a no-op.
    pub fn expand(&self, url: &Url, depth: usize) -> Vec<Task> {
        if self.words.is_empty() {
            return Vec::new();
        }
        let Some(prefix) = directory_prefix(url) else {
            return Vec::new();
        };
        if !self.probed_prefixes.lock().unwrap().insert(prefix.clone()) {
            return Vec::new();
        }
        tracing::debug!(prefix = %prefix, words = self.words.len(), "expanding directory probes");
        self.words
            .iter()
            .map(|word| Task {
                url: format!("{}{}", prefix, word.trim_start_matches('/')),
                method: "HEAD".to_string(),
                depth,
                referrer: Some(url.to_string()),
                source: EndpointSource::Dirscan,
            })
            .collect()
    }
}

/// The canonical directory containing `url`: origin plus the path up to and
/// including the last slash, query dropped.
fn directory_prefix(url: &Url) -> Option<String> {
    let mut base = url.clone();
    base.set_query(None);
    base.set_fragment(None);
    let path = base.path();
    let dir = match path.rfind('/') {
        Some(idx) => path[..=idx].to_string(),
        None => "/".to_string(),
    };
    base.set_path(&dir);
    Some(base.to_string())
}

fn parse_wordlist(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_string())
        .collect()
}
