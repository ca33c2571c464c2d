//! Headless-browser backend speaking the WebDriver protocol directly over
//! HTTP. Drives a local chromedriver; no browser automation crate needed.
//!
//! Each worker borrows a session from the pool and navigates. Right after
//! navigation a recorder script wraps `window.fetch` and `XMLHttpRequest`,
//! so requests fired while we wait (timers, deferred XHR) are captured with
//! their real method and post body. Load-phase requests predate the
//! recorder and come from the Resource Timing API instead, which exposes
//! neither method nor body; those entries are recorded as bare GETs.

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::fetch::FetchBackend;
use crate::model::{FetchRequest, FetchResult};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:9515";
const DRIVER_STARTUP_TIMEOUT: Duration = Duration::from_secs(8);
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// How long the network must stay quiet before the page counts as idle.
const IDLE_QUIET_WINDOW: Duration = Duration::from_millis(1500);

/// Wraps fetch and XHR so late requests are observed with method and body.
/// Installed once per navigation; requests resolve to absolute URLs.
const RECORDER_SCRIPT: &str = r#"
    if (!window.__eabRequests) {
        window.__eabRequests = [];
        var record = function (url, method, body) {
            try {
                window.__eabRequests.push({
                    url: new URL(url, window.location.href).href,
                    method: (method || 'GET').toUpperCase(),
                    body: typeof body === 'string' ? body : null
                });
            } catch (e) {}
        };
        var origFetch = window.fetch;
        if (origFetch) {
            window.fetch = function (input, init) {
                var url = (input && input.url) ? input.url : String(input);
                var method = (init && init.method) || (input && input.method);
                record(url, method, init && init.body);
                return origFetch.apply(this, arguments);
            };
        }
        var origOpen = XMLHttpRequest.prototype.open;
        var origSend = XMLHttpRequest.prototype.send;
        XMLHttpRequest.prototype.open = function (method, url) {
            this.__eabMethod = method;
            this.__eabUrl = url;
            return origOpen.apply(this, arguments);
        };
        XMLHttpRequest.prototype.send = function (body) {
            record(this.__eabUrl, this.__eabMethod, body);
            return origSend.apply(this, arguments);
        };
    }
    return true;
"#;

const SNAPSHOT_SCRIPT: &str = r#"
    return {
        url: window.location.href || "",
        html: document.documentElement ? document.documentElement.outerHTML : "",
        requests: window.__eabRequests || [],
        resources: performance.getEntriesByType('resource').map(function (e) {
            return { url: e.name, initiator: e.initiatorType };
        })
    };
"#;

/// Total observed network activity; growth resets the idle window.
const ACTIVITY_COUNT_SCRIPT: &str = r#"
    return performance.getEntriesByType('resource').length
        + (window.__eabRequests || []).length;
"#;

pub struct BrowserBackend {
    http: reqwest::Client,
    endpoint: String,
    sessions: Mutex<Vec<String>>,
    driver: std::sync::Mutex<Option<tokio::process::Child>>,
    headless: bool,
    wait_time: Duration,
    max_body_bytes: usize,
}

impl BrowserBackend {
    /// Connects to a WebDriver endpoint, autostarting a local chromedriver
    /// when none is reachable. Failure here is fatal for dynamic scans.
    pub async fn launch(config: &ScanConfig) -> Result<Self> {
        let endpoint = config
            .webdriver_url
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(ScanError::Http)?;

        let mut backend = Self {
            http,
            endpoint,
            sessions: Mutex::new(Vec::new()),
            driver: std::sync::Mutex::new(None),
            headless: config.headless,
            wait_time: config.wait_time,
            max_body_bytes: config.max_body_bytes,
        };

        if !backend.driver_ready().await {
            backend.autostart_driver().await?;
        }

        // Prove a session can actually be created before workers start.
        let probe = backend.create_session().await?;
        backend.sessions.lock().await.push(probe);
        Ok(backend)
    }

    async fn driver_ready(&self) -> bool {
        let status_url = format!("{}/status", self.endpoint.trim_end_matches('/'));
        matches!(
            self.http
                .get(&status_url)
                .timeout(Duration::from_secs(2))
                .send()
                .await,
            Ok(resp) if resp.status().is_success()
        )
    }

    async fn autostart_driver(&mut self) -> Result<()> {
        let port = url::Url::parse(&self.endpoint)
            .ok()
            .and_then(|u| u.port())
            .unwrap_or(9515);
        let child = tokio::process::Command::new("chromedriver")
            .arg(format!("--port={}", port))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ScanError::Browser(format!(
                    "no WebDriver at {} and chromedriver failed to start: {}",
                    self.endpoint, e
                ))
            })?;
        *self.driver.lock().unwrap() = Some(child);

        let deadline = Instant::now() + DRIVER_STARTUP_TIMEOUT;
        while Instant::now() < deadline {
            if self.driver_ready().await {
                tracing::debug!(endpoint = %self.endpoint, "chromedriver autostarted");
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Err(ScanError::Browser(format!(
            "chromedriver did not become ready at {}",
            self.endpoint
        )))
    }

    fn capabilities(&self) -> Value {
        let mut args = vec![
            "--disable-gpu".to_string(),
            "--no-first-run".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--no-sandbox".to_string(),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "acceptInsecureCerts": true,
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }

    async fn create_session(&self) -> Result<String> {
        let url = format!("{}/session", self.endpoint.trim_end_matches('/'));
        let value = self
            .driver_call(|| self.http.post(&url).json(&self.capabilities()))
            .await?;
        value
            .pointer("/value/sessionId")
            .or_else(|| value.pointer("/sessionId"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ScanError::Browser("session response missing sessionId".to_string()))
    }

    async fn navigate(&self, session: &str, url: &str) -> Result<()> {
        let nav = format!(
            "{}/session/{}/url",
            self.endpoint.trim_end_matches('/'),
            session
        );
        self.driver_call(|| self.http.post(&nav).json(&json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn execute(&self, session: &str, script: &str) -> Result<Value> {
        let exec = format!(
            "{}/session/{}/execute/sync",
            self.endpoint.trim_end_matches('/'),
            session
        );
        let value = self
            .driver_call(|| self.http.post(&exec).json(&json!({ "script": script, "args": [] })))
            .await?;
        Ok(value.pointer("/value").cloned().unwrap_or(Value::Null))
    }

    async fn delete_session(&self, session: &str) {
        let url = format!(
            "{}/session/{}",
            self.endpoint.trim_end_matches('/'),
            session
        );
        let _ = self.http.delete(&url).send().await;
    }

    async fn driver_call(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<Value> {
        let response = build()
            .send()
            .await
            .map_err(|e| ScanError::Browser(format!("driver request failed: {}", e)))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScanError::Browser(format!("driver response unreadable: {}", e)))?;
        let value: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        if let Some(error) = value.pointer("/value/error").and_then(|v| v.as_str()) {
            let message = value
                .pointer("/value/message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown webdriver error");
            return Err(ScanError::Browser(format!("{}: {}", error, message)));
        }
        if !status.is_success() {
            return Err(ScanError::Browser(format!("driver HTTP {}", status.as_u16())));
        }
        Ok(value)
    }

    /// Approximates networkidle: the activity count must hold still for a
    /// full [`IDLE_QUIET_WINDOW`] before the page counts as idle, so a
    /// request fired from a timer resets the clock. `wait_time` caps the
    /// whole wait, whichever comes first.
    async fn wait_for_idle(&self, session: &str) {
        let deadline = Instant::now() + self.wait_time;
        let quiet_window = IDLE_QUIET_WINDOW.min(self.wait_time);
        let mut last_count = -1i64;
        let mut last_change = Instant::now();
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if last_count >= 0 && now.duration_since(last_change) >= quiet_window {
                break;
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL.min(deadline - now)).await;
            let count = match self.execute(session, ACTIVITY_COUNT_SCRIPT).await {
                Ok(value) => value.as_i64().unwrap_or(-1),
                Err(_) => break,
            };
            if count != last_count {
                last_count = count;
                last_change = Instant::now();
            }
        }
    }

    async fn checkout_session(&self) -> Result<String> {
        if let Some(session) = self.sessions.lock().await.pop() {
            return Ok(session);
        }
        self.create_session().await
    }

    async fn checkin_session(&self, session: String) {
        self.sessions.lock().await.push(session);
    }

    /// Recorder entries carry real methods and bodies; resource-timing
    /// entries fill in the load-phase requests the recorder missed, as
    /// method-less GETs.
    fn collect_subrequests(snapshot: &Value, timeout: Duration) -> Vec<FetchRequest> {
        let mut out: Vec<FetchRequest> = Vec::new();
        if let Some(entries) = snapshot.pointer("/requests").and_then(|v| v.as_array()) {
            for entry in entries {
                let Some(url) = entry.pointer("/url").and_then(|u| u.as_str()) else {
                    continue;
                };
                let mut sub = FetchRequest::get(url, timeout);
                if let Some(method) = entry.pointer("/method").and_then(|m| m.as_str()) {
                    sub.method = method.to_uppercase();
                }
                sub.body = entry
                    .pointer("/body")
                    .and_then(|b| b.as_str())
                    .map(|s| s.to_string());
                out.push(sub);
            }
        }
        if let Some(entries) = snapshot.pointer("/resources").and_then(|v| v.as_array()) {
            for entry in entries {
                let Some(url) = entry.pointer("/url").and_then(|u| u.as_str()) else {
                    continue;
                };
                if out.iter().any(|r| r.url == url) {
                    continue;
                }
                out.push(FetchRequest::get(url, timeout));
            }
        }
        out
    }
}

#[async_trait]
impl FetchBackend for BrowserBackend {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult> {
        let started = Instant::now();
        let session = self.checkout_session().await?;

        let outcome: Result<FetchResult> = async {
            self.navigate(&session, &request.url).await?;
            // Navigation blocks until the load event, so the recorder is in
            // place for everything the page does after load.
            self.execute(&session, RECORDER_SCRIPT).await?;
            self.wait_for_idle(&session).await;

            let snapshot = self.execute(&session, SNAPSHOT_SCRIPT).await?;
            let final_url = snapshot
                .pointer("/url")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .unwrap_or(&request.url)
                .to_string();
            let mut body = snapshot
                .pointer("/html")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let mut truncated = false;
            if body.len() > self.max_body_bytes {
                body.truncate(self.max_body_bytes);
                truncated = true;
            }

            let observed_subrequests = Self::collect_subrequests(&snapshot, request.timeout);

            Ok(FetchResult {
                final_url,
                // The classic WebDriver protocol does not surface the HTTP
                // status of a navigation; a rendered document counts as 200.
                status: 200,
                headers: Vec::new(),
                body,
                content_type: Some("text/html".to_string()),
                truncated,
                elapsed: started.elapsed(),
                observed_subrequests,
            })
        }
        .await;

        match outcome {
            Ok(result) => {
                self.checkin_session(session).await;
                Ok(result)
            }
            Err(e) => {
                // A failed session may be wedged; drop it instead of reusing.
                self.delete_session(&session).await;
                Err(e)
            }
        }
    }

    async fn close(&self) {
        let sessions: Vec<String> = self.sessions.lock().await.drain(..).collect();
        for session in sessions {
            self.delete_session(&session).await;
        }
        if let Some(mut child) = self.driver.lock().unwrap().take() {
            let _ = child.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    /// Plays the driver side of execute/sync: serves the snapshot for the
    /// snapshot script, acks the recorder install, and replays a scripted
    /// sequence of activity counts for the idle poll.
    struct ExecuteResponder {
        snapshot: Value,
        counts: Vec<i64>,
        polls: Arc<AtomicUsize>,
    }

    impl Respond for ExecuteResponder {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body = String::from_utf8_lossy(&request.body);
            if body.contains("outerHTML") {
                ResponseTemplate::new(200).set_body_json(json!({ "value": self.snapshot }))
            } else if body.contains("XMLHttpRequest.prototype.open") {
                ResponseTemplate::new(200).set_body_json(json!({ "value": true }))
            } else {
                let poll = self.polls.fetch_add(1, Ordering::SeqCst);
                let count = *self
                    .counts
                    .get(poll)
                    .or(self.counts.last())
                    .unwrap_or(&0);
                ResponseTemplate::new(200).set_body_json(json!({ "value": count }))
            }
        }
    }

    async fn fake_driver(snapshot: Value, counts: Vec<i64>, polls: Arc<AtomicUsize>) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "value": { "ready": true } })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "value": { "sessionId": "fake-session" } })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex("^/session/[^/]+/url$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex("^/session/[^/]+/execute/sync$"))
            .respond_with(ExecuteResponder {
                snapshot,
                counts,
                polls,
            })
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path_regex("^/session/[^/]+$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
            .mount(&server)
            .await;
        server
    }

    fn dynamic_config(endpoint: String, wait_time: Duration) -> ScanConfig {
        ScanConfig {
            targets: vec!["http://target.test/".to_string()],
            webdriver_url: Some(endpoint),
            wait_time,
            ..ScanConfig::default()
        }
    }

    fn backend(headless: bool) -> BrowserBackend {
        BrowserBackend {
            http: reqwest::Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            sessions: Mutex::new(Vec::new()),
            driver: std::sync::Mutex::new(None),
            headless,
            wait_time: Duration::from_secs(3),
            max_body_bytes: 1024,
        }
    }

    #[test]
    fn test_capabilities_headless_flag() {
        let caps = backend(true).capabilities();
        let args = caps
            .pointer("/capabilities/alwaysMatch/goog:chromeOptions/args")
            .unwrap()
            .as_array()
            .unwrap();
        assert!(args.iter().any(|a| a == "--headless=new"));

        let caps = backend(false).capabilities();
        let args = caps
            .pointer("/capabilities/alwaysMatch/goog:chromeOptions/args")
            .unwrap()
            .as_array()
            .unwrap();
        assert!(!args.iter().any(|a| a == "--headless=new"));
    }

    #[test]
    fn test_capabilities_accept_insecure_certs() {
        let caps = backend(true).capabilities();
        assert_eq!(
            caps.pointer("/capabilities/alwaysMatch/acceptInsecureCerts"),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn test_collect_subrequests_keeps_recorder_method_and_body() {
        let snapshot = json!({
            "requests": [
                { "url": "http://t/api/submit", "method": "post", "body": "a=1" }
            ],
            "resources": [
                { "url": "http://t/app.js", "initiator": "script" },
                { "url": "http://t/api/submit", "initiator": "fetch" }
            ]
        });
        let subs = BrowserBackend::collect_subrequests(&snapshot, Duration::from_secs(5));

        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].url, "http://t/api/submit");
        assert_eq!(subs[0].method, "POST");
        assert_eq!(subs[0].body.as_deref(), Some("a=1"));
        // The resource-timing duplicate of the recorded request is dropped;
        // the script load stays as a method-less GET.
        assert_eq!(subs[1].url, "http://t/app.js");
        assert_eq!(subs[1].method, "GET");
        assert_eq!(subs[1].body, None);
    }

    #[tokio::test]
    async fn test_fetch_surfaces_observed_subrequests() {
        let snapshot = json!({
            "url": "http://target.test/",
            "html": "<html><body>app</body></html>",
            "requests": [
                { "url": "http://target.test/api/save", "method": "POST", "body": "x=1" }
            ],
            "resources": [
                { "url": "http://target.test/bundle.js", "initiator": "script" }
            ]
        });
        let polls = Arc::new(AtomicUsize::new(0));
        let server = fake_driver(snapshot, vec![2], polls).await;

        let config = dynamic_config(server.uri(), Duration::from_millis(300));
        let backend = BrowserBackend::launch(&config).await.unwrap();
        let request = FetchRequest::get("http://target.test/", Duration::from_secs(5));
        let result = backend.fetch(&request).await.unwrap();
        backend.close().await;

        assert_eq!(result.final_url, "http://target.test/");
        assert_eq!(result.status, 200);
        let urls: Vec<&str> = result
            .observed_subrequests
            .iter()
            .map(|r| r.url.as_str())
            .collect();
        assert!(urls.contains(&"http://target.test/api/save"));
        assert!(urls.contains(&"http://target.test/bundle.js"));
        let save = result
            .observed_subrequests
            .iter()
            .find(|r| r.url.ends_with("/api/save"))
            .unwrap();
        assert_eq!(save.method, "POST");
        assert_eq!(save.body.as_deref(), Some("x=1"));
    }

    #[tokio::test]
    async fn test_wait_for_idle_outlasts_a_late_request() {
        // Activity jumps from 1 to 2 on the fourth poll (~1s in), the way a
        // request fired from a 1s timer would look. Idling out after two
        // equal polls would have stopped ~500ms in, before the jump.
        let snapshot = json!({
            "url": "http://target.test/",
            "html": "<html></html>",
            "requests": [
                { "url": "http://target.test/hidden", "method": "GET", "body": null }
            ],
            "resources": []
        });
        let polls = Arc::new(AtomicUsize::new(0));
        let server = fake_driver(snapshot, vec![1, 1, 1, 2], polls.clone()).await;

        let config = dynamic_config(server.uri(), Duration::from_secs(2));
        let backend = BrowserBackend::launch(&config).await.unwrap();
        let started = Instant::now();
        let request = FetchRequest::get("http://target.test/", Duration::from_secs(5));
        let result = backend.fetch(&request).await.unwrap();
        backend.close().await;

        assert!(
            polls.load(Ordering::SeqCst) >= 4,
            "idle wait gave up after {} polls",
            polls.load(Ordering::SeqCst)
        );
        assert!(
            started.elapsed() >= Duration::from_secs(1),
            "idle wait exited too early: {:?}",
            started.elapsed()
        );
        assert!(
            result
                .observed_subrequests
                .iter()
                .any(|r| r.url == "http://target.test/hidden"),
            "late request missing from snapshot"
        );
    }
}
