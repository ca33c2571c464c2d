use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "endabyss",
    version,
    about = "Red teaming and web bug bounty fast endpoint discovery tool"
)]
pub struct Args {
    /// Target URL or domain (repeatable)
    #[arg(short = 't', long = "target")]
    pub targets: Vec<String>,

    /// File containing one target per line
    #[arg(long = "targetfile", value_name = "FILE")]
    pub targetfile: Option<PathBuf>,

    /// Scan mode
    #[arg(short = 'm', long = "mode", default_value = "static", value_parser = ["static", "dynamic"])]
    pub mode: String,

    /// Scope predicate: registered-domain, host, or prefix
    #[arg(long = "scope", default_value = "registered-domain", value_parser = ["registered-domain", "host", "prefix"])]
    pub scope: String,

    /// Output file path (.json for machine-readable results)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Crawling depth
    #[arg(short = 'd', long = "depth", default_value_t = 5)]
    pub depth: usize,

    /// Number of concurrent workers
    #[arg(short = 'c', long = "concurrency", default_value_t = 10)]
    pub concurrency: usize,

    /// Enable directory scanning
    #[arg(long = "dirscan", alias = "ds")]
    pub dirscan: bool,

    /// Wordlist file for directory scanning
    #[arg(short = 'w', long = "wordlist", requires = "dirscan")]
    pub wordlist: Option<PathBuf>,

    /// Fixed delay between requests in seconds
    #[arg(long = "delay", default_value_t = 0.0)]
    pub delay: f64,

    /// Random delay range in seconds, e.g. 1-3
    #[arg(long = "random-delay", value_name = "MIN-MAX")]
    pub random_delay: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long = "timeout")]
    pub timeout: Option<f64>,

    /// Whole-run time limit in seconds
    #[arg(long = "max-time")]
    pub max_time: Option<f64>,

    /// Retries for transport failures and 5xx responses
    #[arg(long = "retry", default_value_t = 3)]
    pub retry: u32,

    /// Base backoff between retries in seconds
    #[arg(long = "retry-delay", default_value_t = 0.5)]
    pub retry_delay: f64,

    /// Custom User-Agent string
    #[arg(long = "user-agent")]
    pub user_agent: Option<String>,

    /// Proxy URL, HTTP/HTTPS/SOCKS5 (repeatable for rotation)
    #[arg(long = "proxy")]
    pub proxies: Vec<String>,

    /// Rate limit in requests per second (0 disables)
    #[arg(long = "rate-limit", default_value_t = 0.0)]
    pub rate_limit: f64,

    /// Extra request header, "Name: value" (repeatable)
    #[arg(long = "header", value_name = "NAME: VALUE")]
    pub headers: Vec<String>,

    /// Static cookie, "name=value" (repeatable)
    #[arg(long = "cookie", value_name = "NAME=VALUE")]
    pub cookies: Vec<String>,

    /// Show the browser window in dynamic mode
    #[arg(long = "no-headless")]
    pub no_headless: bool,

    /// Seconds the dynamic backend waits for late network activity
    #[arg(long = "wait-time", default_value_t = 3.0)]
    pub wait_time: f64,

    /// WebDriver endpoint for dynamic mode (autostarts chromedriver when unset)
    #[arg(long = "webdriver-url")]
    pub webdriver_url: Option<String>,

    /// Tracking query keys to strip (repeatable, * suffix for prefixes)
    #[arg(long = "strip-param")]
    pub strip_params: Vec<String>,

    /// Increase output verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress the banner and progress output
    #[arg(long = "silent")]
    pub silent: bool,

    /// Pipeline output: one endpoint URL per line
    #[arg(long = "pipeurl", group = "pipe")]
    pub pipeurl: bool,

    /// Pipeline output: endpoint URL and method per line
    #[arg(long = "pipeendpoint", group = "pipe")]
    pub pipeendpoint: bool,

    /// Pipeline output: parameterised URLs per line
    #[arg(long = "pipeparam", group = "pipe")]
    pub pipeparam: bool,

    /// Pipeline output: the whole result as one JSON document
    #[arg(long = "pipejson", group = "pipe")]
    pub pipejson: bool,
}
