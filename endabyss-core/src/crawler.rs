//! Scan orchestration: seeds the frontier, runs the worker pool, and folds
//! every finding into the aggregator until the frontier drains or the run
//! is cancelled.

use crate::aggregate::Aggregator;
use crate::config::{ScanConfig, ScanMode};
use crate::dirscan::{DirScanner, probe_hit};
use crate::error::{Result, ScanError};
use crate::extract::{Extraction, extract};
use crate::fetch::{BrowserBackend, FetchBackend, StaticBackend};
use crate::frontier::{Frontier, PopOutcome};
use crate::model::{
    Endpoint, EndpointSource, FetchRequest, FetchResult, ParameterSet, ParameterSource, ScanReport,
    ScanStats, Task,
};
use crate::politeness::Politeness;
use crate::scope::{ScopeFilter, Target, query_pairs, without_query};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Invoked after every completed fetch with the running count and the URL.
pub type ProgressCallback = Arc<dyn Fn(u64, String) + Send + Sync>;

const IDLE_POLL: Duration = Duration::from_millis(25);

pub struct Crawler {
    config: ScanConfig,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl Crawler {
    /// Validates the configuration; every configuration problem surfaces
    /// here, before any worker starts.
    pub fn new(config: ScanConfig) -> Result<Self> {
        config.validate().map_err(|e| {
            tracing::error!("configuration rejected: {}", e);
            e
        })?;
        Ok(Self {
            config,
            cancel: CancellationToken::new(),
            progress: None,
        })
    }

    /// Uses an externally owned cancellation token (signal handlers, run
    /// deadlines imposed by the caller).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub async fn scan(&self) -> Result<ScanReport> {
        let started = Instant::now();
        let config = &self.config;
        let cancel = self.cancel.clone();

        let mut targets = Vec::new();
        let mut seeds = Vec::new();
        for raw in &config.targets {
            let seed = crate::scope::canonicalize(raw, &config.tracking_denylist)?;
            targets.push(Target::from_seed(&seed, config.scope_mode)?);
            seeds.push(seed);
        }
        let scope = Arc::new(ScopeFilter::new(targets, config.tracking_denylist.clone()));

        let static_backend = Arc::new(StaticBackend::new(config, cancel.clone())?);
        let backend: Arc<dyn FetchBackend> = match config.mode {
            ScanMode::Static => static_backend.clone(),
            ScanMode::Dynamic => Arc::new(BrowserBackend::launch(config).await?),
        };

        let dirscan = if config.dirscan {
            let scanner = match &config.wordlist {
                Some(path) => DirScanner::from_file(path)?,
                None => DirScanner::with_default_wordlist(),
            };
            tracing::info!(words = scanner.word_count(), "directory scan enabled");
            Some(scanner)
        } else {
            None
        };

        let ctx = Arc::new(ScanContext {
            config: config.clone(),
            scope: scope.clone(),
            frontier: Frontier::new(scope),
            aggregator: Aggregator::new(),
            politeness: Politeness::new(config, cancel.clone()),
            backend: backend.clone(),
            probe_backend: static_backend.clone(),
            dirscan,
            cancel: cancel.clone(),
            fetched: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            progress: self.progress.clone(),
        });

        for seed in &seeds {
            ctx.frontier.push(Task {
                url: seed.to_string(),
                method: "GET".to_string(),
                depth: 0,
                referrer: None,
                source: EndpointSource::Seed,
            });
        }

        if let Some(max_time) = config.max_time {
            let deadline_cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(max_time) => {
                        tracing::warn!("run deadline reached, cancelling scan");
                        deadline_cancel.cancel();
                    }
                    _ = deadline_cancel.cancelled() => {}
                }
            });
        }

        tracing::info!(
            seeds = seeds.len(),
            workers = config.concurrency,
            max_depth = config.max_depth,
            mode = ?config.mode,
            "starting scan"
        );

        let mut workers = Vec::with_capacity(config.concurrency);
        for worker_id in 0..config.concurrency {
            let ctx = ctx.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(ctx, worker_id).await;
            }));
        }
        for worker in workers {
            worker.await?;
        }

        backend.close().await;
        if config.mode == ScanMode::Dynamic {
            static_backend.close().await;
        }

        let (endpoints, forms, parameters) = ctx.aggregator.finalise();
        let stats = ScanStats {
            fetched: ctx.fetched.load(Ordering::Relaxed),
            failed: ctx.failed.load(Ordering::Relaxed),
            deduped: ctx.frontier.deduped(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            endpoints = endpoints.len(),
            forms = forms.len(),
            parameters = parameters.len(),
            fetched = stats.fetched,
            failed = stats.failed,
            "scan finished"
        );

        Ok(ScanReport {
            endpoints,
            forms,
            parameters,
            stats,
            cancelled: cancel.is_cancelled(),
        })
    }
}

/// Runs a scan with a fresh cancellation token.
pub async fn scan(config: ScanConfig) -> Result<ScanReport> {
    Crawler::new(config)?.scan().await
}

struct ScanContext {
    config: ScanConfig,
    scope: Arc<ScopeFilter>,
    frontier: Frontier,
    aggregator: Aggregator,
    politeness: Politeness,
    backend: Arc<dyn FetchBackend>,
    /// Probes always go over raw HTTP, even in dynamic mode: a browser
    /// cannot issue HEAD requests.
    probe_backend: Arc<StaticBackend>,
    dirscan: Option<DirScanner>,
    cancel: CancellationToken,
    fetched: AtomicU64,
    failed: AtomicU64,
    progress: Option<ProgressCallback>,
}

async fn worker_loop(ctx: Arc<ScanContext>, worker_id: usize) {
    tracing::debug!(worker_id, "worker started");
    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }
        match ctx.frontier.pop() {
            PopOutcome::Drained => break,
            PopOutcome::Wait => {
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                    _ = ctx.cancel.cancelled() => break,
                }
            }
            PopOutcome::Task(task) => {
                let outcome = process_task(&ctx, &task).await;
                ctx.frontier.task_done();
                if matches!(outcome, Err(ScanError::Cancelled)) {
                    break;
                }
            }
        }
    }
    tracing::debug!(worker_id, "worker exiting");
}

async fn process_task(ctx: &ScanContext, task: &Task) -> Result<()> {
    let is_probe = task.method == "HEAD";
    let backend: &dyn FetchBackend = if is_probe {
        ctx.probe_backend.as_ref()
    } else {
        ctx.backend.as_ref()
    };

    let request = build_request(ctx, task);
    let mut result = match ctx.politeness.fetch(backend, &request).await {
        Ok(result) => result,
        Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
        Err(e) => {
            ctx.failed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(url = %task.url, error = %e, "fetch failed");
            return Ok(());
        }
    };

    // Some servers reject HEAD outright; retry the probe as a GET.
    if is_probe && result.status == 405 {
        if let Ok(url) = Url::parse(&task.url)
            && ctx.frontier.mark_visited("GET", &url)
        {
            let mut get_request = request.clone();
            get_request.method = "GET".to_string();
            match ctx.politeness.fetch(ctx.probe_backend.as_ref(), &get_request).await {
                Ok(get_result) => result = get_result,
                Err(ScanError::Cancelled) => return Err(ScanError::Cancelled),
                Err(_) => {}
            }
        }
    }

    let count = ctx.fetched.fetch_add(1, Ordering::Relaxed) + 1;
    if let Some(ref progress) = ctx.progress {
        progress(count, task.url.clone());
    }

    let Ok(final_url) = ctx.scope.canonicalize(&result.final_url) else {
        tracing::debug!(url = %result.final_url, "final URL unparseable, skipping extraction");
        return Ok(());
    };
    let in_scope = ctx.scope.in_scope(&final_url);

    if is_probe {
        if !probe_hit(result.status) {
            return Ok(());
        }
        // A probe hit is a real, GET-able endpoint.
        let mut endpoint = Endpoint::new(
            without_query(&final_url),
            "GET",
            EndpointSource::Dirscan,
            task.depth,
        );
        endpoint.status = Some(result.status);
        endpoint.content_type = result.content_type.clone();
        if in_scope {
            ctx.aggregator.record_endpoint(endpoint);
        }
    } else {
        record_fetched_endpoint(ctx, task, &result, &final_url, in_scope);
    }

    if !in_scope {
        tracing::debug!(url = %final_url, "redirected out of scope, not extracting");
        return Ok(());
    }

    if let Some(ref dirscan) = ctx.dirscan {
        let probe_depth = task.depth + 1;
        if probe_depth <= ctx.config.max_depth {
            for probe in dirscan.expand(&final_url, probe_depth) {
                ctx.frontier.push(probe);
            }
        }
    }

    let extraction = extract(&result, &final_url);
    record_extraction(ctx, task, &final_url, extraction);
    record_subrequests(ctx, task, &result);
    Ok(())
}

fn build_request(ctx: &ScanContext, task: &Task) -> FetchRequest {
    let mut request = FetchRequest::get(task.url.clone(), ctx.config.request_timeout());
    request.method = task.method.clone();
    if let Some(ref referrer) = task.referrer {
        request
            .headers
            .push(("Referer".to_string(), referrer.clone()));
    }
    request
}

/// Records the endpoint a crawl task actually fetched, plus its query
/// parameters and, after a redirect, the endpoint it landed on.
fn record_fetched_endpoint(
    ctx: &ScanContext,
    task: &Task,
    result: &FetchResult,
    final_url: &Url,
    in_scope: bool,
) {
    let task_url = ctx.scope.canonicalize(&task.url).ok();

    if let Some(ref url) = task_url
        && ctx.scope.in_scope(url)
    {
        let mut endpoint =
            Endpoint::new(without_query(url), &task.method, task.source, task.depth);
        endpoint.status = Some(result.status);
        endpoint.content_type = result.content_type.clone();
        ctx.aggregator.record_endpoint(endpoint);
        record_query_parameters(ctx, url, "GET");
    }

    let redirected = task_url
        .as_ref()
        .map(|u| u != final_url)
        .unwrap_or(true);
    if redirected && in_scope {
        let mut endpoint = Endpoint::new(
            without_query(final_url),
            &task.method,
            task.source,
            task.depth,
        );
        endpoint.status = Some(result.status);
        endpoint.content_type = result.content_type.clone();
        ctx.aggregator.record_endpoint(endpoint);
        record_query_parameters(ctx, final_url, "GET");
    }
}

fn record_query_parameters(ctx: &ScanContext, url: &Url, method: &str) {
    let pairs = query_pairs(url);
    if pairs.is_empty() {
        return;
    }
    ctx.aggregator.record_parameters(ParameterSet {
        url: without_query(url),
        method: method.to_string(),
        parameters: pairs.into_iter().collect(),
        source: ParameterSource::Query,
    });
}

fn record_extraction(ctx: &ScanContext, task: &Task, final_url: &Url, extraction: Extraction) {
    let child_depth = task.depth + 1;

    for link in extraction.links {
        let Ok(url) = ctx.scope.canonicalize(&link.url) else {
            continue;
        };
        if !ctx.scope.in_scope(&url) {
            continue;
        }
        ctx.aggregator.record_endpoint(Endpoint::new(
            without_query(&url),
            "GET",
            link.source,
            child_depth,
        ));
        record_query_parameters(ctx, &url, "GET");
        if child_depth <= ctx.config.max_depth {
            ctx.frontier.push(Task {
                url: url.to_string(),
                method: "GET".to_string(),
                depth: child_depth,
                referrer: Some(final_url.to_string()),
                source: link.source,
            });
        }
    }

    for mut form in extraction.forms {
        let Ok(action) = ctx.scope.canonicalize(&form.action_url) else {
            continue;
        };
        if !ctx.scope.in_scope(&action) {
            continue;
        }
        // Query keys baked into the action are parameters in their own right.
        record_query_parameters(ctx, &action, &form.method);
        form.action_url = without_query(&action);

        let parameters = form
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.value.clone().unwrap_or_default()))
            .collect();
        ctx.aggregator.record_parameters(ParameterSet {
            url: form.action_url.clone(),
            method: form.method.clone(),
            parameters,
            source: ParameterSource::Form,
        });
        ctx.aggregator.record_form(form);
    }

    if !extraction.parameter_names.is_empty() {
        ctx.aggregator.record_parameters(ParameterSet {
            url: without_query(final_url),
            method: "GET".to_string(),
            parameters: extraction
                .parameter_names
                .into_iter()
                .map(|name| (name, String::new()))
                .collect(),
            source: ParameterSource::JsInferred,
        });
    }
}

/// Network requests the dynamic backend observed are endpoints already;
/// no heuristics needed.
fn record_subrequests(ctx: &ScanContext, task: &Task, result: &FetchResult) {
    let child_depth = task.depth + 1;
    for sub in &result.observed_subrequests {
        let Ok(url) = ctx.scope.canonicalize(&sub.url) else {
            continue;
        };
        if !ctx.scope.in_scope(&url) {
            continue;
        }
        ctx.aggregator.record_endpoint(Endpoint::new(
            without_query(&url),
            &sub.method,
            EndpointSource::BrowserNet,
            child_depth,
        ));
        record_query_parameters(ctx, &url, &sub.method);
        if child_depth <= ctx.config.max_depth {
            ctx.frontier.push(Task {
                url: url.to_string(),
                method: sub.method.clone(),
                depth: child_depth,
                referrer: Some(task.url.clone()),
                source: EndpointSource::BrowserNet,
            });
        }
    }
}
