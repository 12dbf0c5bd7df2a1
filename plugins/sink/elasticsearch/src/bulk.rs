use serde::Deserialize;
use serde_json::{Value, json};

use delay_api::{EventRecord, SinkError};

use crate::config::BulkAction;
use crate::template::Template;

/// How each event becomes a `_bulk` entry.
#[derive(Debug, Clone)]
pub struct BulkFormat {
    pub index: Template,
    pub document_id: Option<Template>,
    pub action: BulkAction,
    pub doc_as_upsert: bool,
}

/// NDJSON body for one `_bulk` request.
#[derive(Debug, Default)]
pub struct BulkRequest {
    pub body: Vec<u8>,
    /// Entries written to `body`.
    pub items: usize,
    /// Events left out because they could not be rendered.
    pub skipped: usize,
}

impl BulkFormat {
    /// Render `events` in order. An event whose payload or templates cannot
    /// be rendered is skipped and logged, so one bad event does not fail
    /// the whole chunk.
    pub fn build(&self, events: &[EventRecord]) -> Result<BulkRequest, SinkError> {
        let mut request = BulkRequest::default();
        for event in events {
            match self.entry(event) {
                Ok((action, source)) => {
                    serde_json::to_writer(&mut request.body, &action)?;
                    request.body.push(b'\n');
                    if let Some(source) = source {
                        serde_json::to_writer(&mut request.body, &source)?;
                        request.body.push(b'\n');
                    }
                    request.items += 1;
                }
                Err(e) => {
                    request.skipped += 1;
                    tracing::warn!(sink = "elasticsearch", error = ?e, "skipping event");
                }
            }
        }
        Ok(request)
    }

    fn entry(&self, event: &EventRecord) -> Result<(Value, Option<Value>), SinkError> {
        let doc = event.payload().to_document()?;
        let mut meta = serde_json::Map::new();
        meta.insert("_index".into(), Value::String(self.index.render(&doc, event.received_ms())?));
        if let Some(id) = &self.document_id {
            meta.insert("_id".into(), Value::String(id.render(&doc, event.received_ms())?));
        }

        let mut action = serde_json::Map::new();
        action.insert(self.action.as_str().into(), Value::Object(meta));
        let action = Value::Object(action);
        let source = match self.action {
            BulkAction::Delete => None,
            BulkAction::Update if self.doc_as_upsert => Some(json!({ "doc": doc, "doc_as_upsert": true })),
            BulkAction::Update => Some(json!({ "doc": doc })),
            BulkAction::Index | BulkAction::Create => Some(doc),
        };
        Ok((action, source))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Response
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<serde_json::Map<String, Value>>,
}

/// Check a 2xx `_bulk` response body for per-item failures.
pub fn check_response(body: &str) -> Result<(), SinkError> {
    let response: BulkResponse = serde_json::from_str(body)
        .map_err(|e| SinkError::io(format!("bulk response: {e}")))?;
    if !response.errors {
        return Ok(());
    }

    let mut failed = 0;
    let mut first_reason = None;
    for item in &response.items {
        let Some(result) = item.values().next() else {
            continue;
        };
        let status = result.get("status").and_then(Value::as_u64).unwrap_or(0);
        let error = result.get("error");
        if status >= 300 || error.is_some() {
            failed += 1;
            if first_reason.is_none() {
                first_reason = error
                    .and_then(|e| e.get("reason").and_then(Value::as_str).map(str::to_string))
                    .or_else(|| Some(format!("status {status}")));
            }
        }
    }

    Err(SinkError::io(format!(
        "bulk: {failed} of {} items failed ({})",
        response.items.len(),
        first_reason.unwrap_or_else(|| "no reason given".into()),
    )))
}
