//! Raw HTTP backend over a pooled reqwest client.

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::fetch::FetchBackend;
use crate::model::{FetchRequest, FetchResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{Client, Method, Response, StatusCode};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// How long an in-flight body read may continue after cancellation.
const BODY_DRAIN_GRACE: Duration = Duration::from_secs(2);

pub struct StaticBackend {
    /// One client per proxy; a single direct client when none are set.
    /// Rotation happens per fetch call, which the retry loop turns into
    /// per-attempt rotation.
    clients: Vec<Client>,
    next_client: AtomicUsize,
    max_redirects: usize,
    max_body_bytes: usize,
    cancel: CancellationToken,
}

impl StaticBackend {
    pub fn new(config: &ScanConfig, cancel: CancellationToken) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ScanError::Config(format!("bad header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ScanError::Config(format!("bad header value: {}", e)))?;
            default_headers.insert(name, value);
        }
        if !config.cookies.is_empty() {
            let cookie = config
                .cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            let value = HeaderValue::from_str(&cookie)
                .map_err(|e| ScanError::Config(format!("bad cookie value: {}", e)))?;
            default_headers.insert(reqwest::header::COOKIE, value);
        }

        let build = |proxy: Option<&str>| -> Result<Client> {
            let mut builder = Client::builder()
                .user_agent(config.user_agent.clone())
                .default_headers(default_headers.clone())
                .timeout(config.request_timeout())
                .connect_timeout(config.request_timeout().min(Duration::from_secs(10)))
                .pool_max_idle_per_host(config.concurrency)
                .gzip(true)
                .danger_accept_invalid_certs(true)
                .redirect(reqwest::redirect::Policy::none());
            if let Some(proxy) = proxy {
                builder = builder.proxy(reqwest::Proxy::all(proxy).map_err(ScanError::Http)?);
            }
            builder.build().map_err(ScanError::Http)
        };

        let clients = if config.proxies.is_empty() {
            vec![build(None)?]
        } else {
            config
                .proxies
                .iter()
                .map(|p| build(Some(p)))
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Self {
            clients,
            next_client: AtomicUsize::new(0),
            max_redirects: crate::config::DEFAULT_MAX_REDIRECTS,
            max_body_bytes: config.max_body_bytes,
            cancel,
        })
    }

    fn client(&self) -> &Client {
        let idx = self.next_client.fetch_add(1, Ordering::Relaxed);
        &self.clients[idx % self.clients.len()]
    }

    async fn send_once(
        &self,
        client: &Client,
        request: &FetchRequest,
        url: &str,
    ) -> Result<Response> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| ScanError::InvalidUrl(format!("bad method {}", request.method)))?;
        let mut builder = client.request(method, url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }
        builder.send().await.map_err(ScanError::Http)
    }

    /// Reads the body up to `max_body_bytes`. After cancellation the read
    /// gets a short grace period, then whatever arrived is returned.
    async fn read_body(&self, mut response: Response) -> (Vec<u8>, bool) {
        let mut buf: Vec<u8> = Vec::new();
        let mut truncated = false;
        let drain_deadline = async {
            self.cancel.cancelled().await;
            tokio::time::sleep(BODY_DRAIN_GRACE).await;
        };
        tokio::pin!(drain_deadline);
        loop {
            let chunk = tokio::select! {
                c = response.chunk() => c,
                _ = &mut drain_deadline => {
                    truncated = true;
                    break;
                }
            };
            match chunk {
                Ok(Some(bytes)) => {
                    let remaining = self.max_body_bytes.saturating_sub(buf.len());
                    if bytes.len() >= remaining {
                        buf.extend_from_slice(&bytes[..remaining]);
                        truncated = true;
                        break;
                    }
                    buf.extend_from_slice(&bytes);
                }
                Ok(None) => break,
                Err(_) => {
                    truncated = true;
                    break;
                }
            }
        }
        (buf, truncated)
    }

    async fn response_to_result(
        &self,
        response: Response,
        final_url: String,
        started: Instant,
    ) -> FetchResult {
        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let content_type = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.clone());
        let (body, truncated) = self.read_body(response).await;
        FetchResult {
            final_url,
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
            content_type,
            truncated,
            elapsed: started.elapsed(),
            observed_subrequests: Vec::new(),
        }
    }
}

#[async_trait]
impl FetchBackend for StaticBackend {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult> {
        let client = self.client();
        let started = Instant::now();
        let mut current = request.url.clone();
        let mut chain: HashSet<String> = HashSet::new();
        chain.insert(current.clone());

        loop {
            let response = self.send_once(client, request, &current).await?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|loc| Url::parse(&current).ok()?.join(loc).ok())
                    .map(|u| u.to_string());

                if let Some(next) = location {
                    let looped = !chain.insert(next.clone());
                    if looped || chain.len() > self.max_redirects {
                        // A cycle or an over-long chain: the last 3xx is the
                        // answer, extraction still sees its headers and body.
                        tracing::debug!(url = %current, "redirect chain stopped at {}", next);
                        return Ok(self.response_to_result(response, current, started).await);
                    }
                    tracing::trace!(from = %current, to = %next, "following redirect");
                    current = next;
                    continue;
                }
                // 3xx without a usable Location is terminal.
                return Ok(self.response_to_result(response, current, started).await);
            }

            if status == StatusCode::OK {
                tracing::trace!(url = %current, "fetched");
            }
            return Ok(self.response_to_result(response, current, started).await);
        }
    }
}
