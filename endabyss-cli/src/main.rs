mod arguments;

use arguments::Args;
use clap::Parser;
use endabyss_core::config::{ScanConfig, ScanMode, ScopeMode, parse_delay_range};
use endabyss_core::report::{PipeMode, render_pipe, render_plain, render_report};
use endabyss_core::{Crawler, ScanReport};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const EXIT_OK: i32 = 0;
const EXIT_USAGE: i32 = 1;
const EXIT_ALL_FAILED: i32 = 2;
const EXIT_SIGNAL: i32 = 130;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(&args);

    let targets = match collect_targets(&args) {
        Ok(targets) => targets,
        Err(message) => {
            eprintln!("✗ {}", message);
            std::process::exit(EXIT_USAGE);
        }
    };

    let config = match build_config(&args, targets) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("✗ {}", message);
            std::process::exit(EXIT_USAGE);
        }
    };

    let cancel = CancellationToken::new();
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n[!] Interrupt received, draining workers...");
                interrupted.store(true, Ordering::SeqCst);
                cancel.cancel();
            }
        });
    }

    let pipe_mode = pipe_mode(&args);
    let show_progress = !args.silent && pipe_mode.is_none();

    let progress_bar = if show_progress {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap(),
        );
        bar.set_message("Starting scan...");
        bar.enable_steady_tick(Duration::from_millis(120));
        Some(Arc::new(bar))
    } else {
        None
    };

    let mut crawler = match Crawler::new(config) {
        Ok(crawler) => crawler.with_cancellation(cancel),
        Err(e) => {
            eprintln!("✗ {}", e);
            std::process::exit(EXIT_USAGE);
        }
    };
    if let Some(ref bar) = progress_bar {
        let bar = bar.clone();
        crawler = crawler.with_progress_callback(Arc::new(move |count, url| {
            bar.set_message(format!("Fetched {} URLs, last: {}", count, url));
        }));
    }

    let report = match crawler.scan().await {
        Ok(report) => report,
        Err(e) => {
            if let Some(ref bar) = progress_bar {
                bar.finish_and_clear();
            }
            eprintln!("✗ Scan failed: {}", e);
            std::process::exit(EXIT_USAGE);
        }
    };

    if let Some(ref bar) = progress_bar {
        bar.finish_with_message(format!("Scan complete, {} URLs fetched", report.stats.fetched));
    }

    match pipe_mode {
        Some(mode) => println!("{}", render_pipe(&report, mode)),
        None if !args.silent => print!("{}", render_report(&report)),
        None => {}
    }

    if let Some(ref path) = args.output {
        match write_output(path, &report) {
            Ok(()) if !args.silent => println!("✓ Results saved to {}", path.display()),
            Ok(()) => {}
            Err(e) => eprintln!("✗ Failed to write {}: {}", path.display(), e),
        }
    }

    if interrupted.load(Ordering::SeqCst) {
        std::process::exit(EXIT_SIGNAL);
    }
    if report.stats.fetched == 0 {
        std::process::exit(EXIT_ALL_FAILED);
    }
    std::process::exit(EXIT_OK);
}

fn init_tracing(args: &Args) {
    let level = if args.silent {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(format!("endabyss_core={level},endabyss_cli={level}"))
        .with_writer(std::io::stderr)
        .init();
}

fn collect_targets(args: &Args) -> Result<Vec<String>, String> {
    let mut targets: Vec<String> = Vec::new();
    for raw in &args.targets {
        match parse_target_line(raw) {
            Some(url) => targets.push(url),
            None => return Err(format!("invalid target '{}'", raw)),
        }
    }
    if let Some(ref path) = args.targetfile {
        targets.extend(load_targets_from_file(path)?);
    }
    if targets.is_empty() {
        return Err("either --target or --targetfile must be provided".to_string());
    }
    Ok(targets)
}

fn load_targets_from_file(path: &PathBuf) -> Result<Vec<String>, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read target file {}: {}", path.display(), e))?;
    let targets: Vec<String> = content
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_target_line)
        .collect();
    if targets.is_empty() {
        return Err(format!("no valid targets in {}", path.display()));
    }
    Ok(targets)
}

/// Accepts full URLs and bare hosts; bare hosts get an http:// scheme.
fn parse_target_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Ok(url) = url::Url::parse(line) {
        if url.scheme() == "http" || url.scheme() == "https" {
            return Some(line.to_string());
        }
        return None;
    }
    let with_scheme = format!("http://{}", line);
    url::Url::parse(&with_scheme).ok().map(|_| with_scheme)
}

fn build_config(args: &Args, targets: Vec<String>) -> Result<ScanConfig, String> {
    let mut config = ScanConfig {
        targets,
        ..ScanConfig::default()
    };

    config.mode = ScanMode::from_str(&args.mode).ok_or("unknown mode")?;
    config.scope_mode = ScopeMode::from_str(&args.scope).ok_or("unknown scope")?;
    config.max_depth = args.depth;
    config.concurrency = args.concurrency;
    config.delay = Duration::from_secs_f64(args.delay.max(0.0));
    if let Some(ref range) = args.random_delay {
        config.random_delay = Some(parse_delay_range(range).map_err(|e| e.to_string())?);
    }
    config.rate_limit = args.rate_limit;
    config.retry.max_attempts = args.retry.max(1);
    config.retry.base_delay = Duration::from_secs_f64(args.retry_delay.max(0.0));
    config.proxies = args.proxies.clone();
    if let Some(ref agent) = args.user_agent {
        config.user_agent = agent.clone();
    }
    if let Some(timeout) = args.timeout {
        config.timeout = Some(Duration::from_secs_f64(timeout));
    }
    if let Some(max_time) = args.max_time {
        config.max_time = Some(Duration::from_secs_f64(max_time));
    }
    config.headless = !args.no_headless;
    config.wait_time = Duration::from_secs_f64(args.wait_time.max(0.0));
    config.webdriver_url = args.webdriver_url.clone();
    config.dirscan = args.dirscan;
    config.wordlist = args.wordlist.clone();
    if !args.strip_params.is_empty() {
        config.tracking_denylist = args.strip_params.clone();
    }

    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| format!("bad header '{}', expected 'Name: value'", header))?;
        config
            .headers
            .insert(name.trim().to_string(), value.trim().to_string());
    }
    for cookie in &args.cookies {
        let (name, value) = cookie
            .split_once('=')
            .ok_or_else(|| format!("bad cookie '{}', expected 'name=value'", cookie))?;
        config
            .cookies
            .insert(name.trim().to_string(), value.trim().to_string());
    }

    Ok(config)
}

fn pipe_mode(args: &Args) -> Option<PipeMode> {
    if args.pipeurl {
        Some(PipeMode::Url)
    } else if args.pipeendpoint {
        Some(PipeMode::Endpoint)
    } else if args.pipeparam {
        Some(PipeMode::Param)
    } else if args.pipejson {
        Some(PipeMode::Json)
    } else {
        None
    }
}

fn write_output(path: &Path, report: &ScanReport) -> std::io::Result<()> {
    let content = if path.extension().map(|e| e == "json").unwrap_or(false) {
        serde_json::to_string_pretty(report).unwrap_or_default()
    } else {
        render_plain(report)
    };
    std::fs::write(path, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_line_full_url() {
        assert_eq!(
            parse_target_line("https://example.com/app"),
            Some("https://example.com/app".to_string())
        );
    }

    #[test]
    fn test_parse_target_line_bare_host() {
        assert_eq!(
            parse_target_line("example.com"),
            Some("http://example.com".to_string())
        );
    }

    #[test]
    fn test_parse_target_line_rejects_other_schemes() {
        assert_eq!(parse_target_line("ftp://example.com"), None);
        assert_eq!(parse_target_line(""), None);
    }

    #[test]
    fn test_build_config_maps_flags() {
        let args = Args::parse_from([
            "endabyss",
            "-t",
            "http://example.com",
            "-d",
            "3",
            "-c",
            "20",
            "--rate-limit",
            "2.5",
            "--random-delay",
            "1-2",
            "--header",
            "X-Api-Key: secret",
            "--cookie",
            "session=abc",
        ]);
        let config = build_config(&args, vec!["http://example.com".to_string()]).unwrap();
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.concurrency, 20);
        assert_eq!(config.rate_limit, 2.5);
        assert_eq!(
            config.random_delay,
            Some((Duration::from_secs(1), Duration::from_secs(2)))
        );
        assert_eq!(config.headers["X-Api-Key"], "secret");
        assert_eq!(config.cookies["session"], "abc");
    }

    #[test]
    fn test_build_config_rejects_bad_header() {
        let args = Args::parse_from(["endabyss", "-t", "http://e.com", "--header", "nocolon"]);
        assert!(build_config(&args, vec!["http://e.com".to_string()]).is_err());
    }

    #[test]
    fn test_pipe_mode_selection() {
        let args = Args::parse_from(["endabyss", "--pipejson"]);
        assert_eq!(pipe_mode(&args), Some(PipeMode::Json));
        let args = Args::parse_from(["endabyss"]);
        assert_eq!(pipe_mode(&args), None);
    }
}
