use std::time::Duration;

use serde::Deserialize;

use delay_api::SinkError;

/// Bulk action applied to every event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    #[default]
    Index,
    Create,
    Update,
    Delete,
}

impl BulkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkAction::Index => "index",
            BulkAction::Create => "create",
            BulkAction::Update => "update",
            BulkAction::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElasticsearchConfig {
    /// Cluster nodes, e.g. `http://es1:9200`. Requests rotate over them.
    pub hosts: Vec<String>,
    /// Target index template.
    #[serde(default = "default_index")]
    pub index: String,
    /// Document id template; required for `update` and `delete`.
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub action: BulkAction,
    /// With `update`: create the document when it does not exist.
    #[serde(default)]
    pub doc_as_upsert: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Per-request timeout, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    /// Retries after the first attempt for connection errors, 429 and 5xx.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff, seconds; doubled per retry.
    #[serde(default = "default_retry_initial_interval")]
    pub retry_initial_interval: f64,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_index() -> String {
    "logstash-%{+YYYY.MM.dd}".into()
}
fn default_timeout() -> f64 {
    60.0
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_initial_interval() -> f64 {
    1.0
}

impl ElasticsearchConfig {
    pub fn validate(&self) -> Result<(), SinkError> {
        if self.hosts.is_empty() || self.hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(SinkError::config("elasticsearch: 'hosts' must list at least one non-empty host"));
        }
        if self.index.trim().is_empty() {
            return Err(SinkError::config("elasticsearch: 'index' must not be empty"));
        }
        if matches!(self.action, BulkAction::Update | BulkAction::Delete) && self.document_id.is_none() {
            return Err(SinkError::config(format!(
                "elasticsearch: action '{}' requires 'document_id'",
                self.action.as_str()
            )));
        }
        if self.doc_as_upsert && self.action != BulkAction::Update {
            return Err(SinkError::config("elasticsearch: 'doc_as_upsert' only applies to action 'update'"));
        }
        if self.password.is_some() && self.user.is_none() {
            return Err(SinkError::config("elasticsearch: 'password' given without 'user'"));
        }
        self.timeout_duration()?;
        self.retry_initial_duration()?;
        Ok(())
    }

    pub fn timeout_duration(&self) -> Result<Duration, SinkError> {
        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            return Err(SinkError::config("elasticsearch: 'timeout' must be a positive number of seconds"));
        }
        Duration::try_from_secs_f64(self.timeout)
            .map_err(|e| SinkError::config(format!("elasticsearch: 'timeout': {e}")))
    }

    pub fn retry_initial_duration(&self) -> Result<Duration, SinkError> {
        Duration::try_from_secs_f64(self.retry_initial_interval).map_err(|e| {
            SinkError::config(format!("elasticsearch: 'retry_initial_interval': {e}"))
        })
    }

    /// Base URLs without trailing slash; `http://` is assumed when no scheme
    /// is given.
    pub fn base_urls(&self) -> Vec<String> {
        self.hosts
            .iter()
            .map(|h| {
                let h = h.trim().trim_end_matches('/');
                if h.contains("://") {
                    h.to_string()
                } else {
                    format!("http://{h}")
                }
            })
            .collect()
    }
}
