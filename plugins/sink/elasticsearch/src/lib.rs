//! Bulk document-store sink speaking the Elasticsearch `_bulk` API.
//!
//! Each `emit_many` call becomes one NDJSON request. Connection errors,
//! `429` and `5xx` answers are retried here with exponential backoff,
//! rotating over the configured hosts; the dispatcher never retries.

mod bulk;
mod config;
mod template;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;

use delay_api::{DeliveryCapability, EventRecord, EventSink, SinkError, SinkFactory};

pub use bulk::{BulkFormat, BulkRequest, check_response};
pub use config::{BulkAction, ElasticsearchConfig};
pub use template::Template;

const MAX_BACKOFF: Duration = Duration::from_secs(64);

fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(MAX_BACKOFF)
}

/// Outcome of a single HTTP attempt.
enum Attempt {
    Retry(SinkError),
    Fatal(SinkError),
}

pub struct ElasticsearchSink {
    http: reqwest::Client,
    urls: Vec<String>,
    next_url: AtomicUsize,
    credentials: Option<(String, Option<String>)>,
    format: BulkFormat,
    max_retries: u32,
    retry_initial: Duration,
}

impl ElasticsearchSink {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self, SinkError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout_duration()?)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| SinkError::config(format!("HTTP client: {e}")))?;

        let format = BulkFormat {
            index: Template::parse(&config.index)?,
            document_id: config.document_id.as_deref().map(Template::parse).transpose()?,
            action: config.action,
            doc_as_upsert: config.doc_as_upsert,
        };

        Ok(Self {
            http,
            urls: config.base_urls(),
            next_url: AtomicUsize::new(0),
            credentials: config.user.clone().map(|user| (user, config.password.clone())),
            format,
            max_retries: config.max_retries,
            retry_initial: config.retry_initial_duration()?.min(MAX_BACKOFF),
        })
    }

    fn pick_url(&self) -> &str {
        let i = self.next_url.fetch_add(1, Ordering::Relaxed) % self.urls.len();
        &self.urls[i]
    }

    async fn post_bulk(&self, url: &str, body: Vec<u8>) -> Result<(), Attempt> {
        let mut request = self
            .http
            .post(format!("{url}/_bulk"))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_deref());
        }

        let resp = request
            .send()
            .await
            .map_err(|e| Attempt::Retry(SinkError::io(format!("bulk request: {e}"))))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Attempt::Retry(SinkError::io(format!("bulk read: {e}"))))?;

        if status.is_success() {
            return check_response(&text).map_err(Attempt::Fatal);
        }

        let snippet: String = text.chars().take(256).collect();
        let err = SinkError::io(format!("bulk: HTTP {status}: {snippet}"));
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(Attempt::Retry(err))
        } else {
            Err(Attempt::Fatal(err))
        }
    }

    async fn send(&self, body: Vec<u8>) -> Result<(), SinkError> {
        let mut backoff = self.retry_initial;
        let mut attempt = 0;
        loop {
            let url = self.pick_url();
            match self.post_bulk(url, body.clone()).await {
                Ok(()) => return Ok(()),
                Err(Attempt::Retry(e)) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        sink = "elasticsearch",
                        %url,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = ?e,
                        "bulk request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                }
                Err(Attempt::Retry(e) | Attempt::Fatal(e)) => return Err(e),
            }
        }
    }
}

impl EventSink for ElasticsearchSink {
    fn emit_many<'a>(&'a self, events: &'a [EventRecord])
        -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            let request = self.format.build(events)?;
            if request.items == 0 {
                return Ok(());
            }
            let (items, skipped) = (request.items, request.skipped);
            self.send(request.body).await?;
            tracing::debug!(sink = "elasticsearch", items, skipped, "bulk indexed");
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  ElasticsearchSinkFactory
// ═══════════════════════════════════════════════════════════════

pub struct ElasticsearchSinkFactory;

impl SinkFactory for ElasticsearchSinkFactory {
    fn delivery(&self) -> DeliveryCapability {
        DeliveryCapability::Batch
    }

    fn create(&self, config_json: &str) -> Result<Arc<dyn EventSink>, SinkError> {
        let config: ElasticsearchConfig = serde_json::from_str(config_json)
            .map_err(|e| SinkError::config(format!("elasticsearch sink: {e}")))?;
        Ok(Arc::new(ElasticsearchSink::new(&config)?))
    }
}
