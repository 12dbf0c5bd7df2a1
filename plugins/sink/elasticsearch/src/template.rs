use delay_api::{SinkError, civil_from_ms, resolve_path};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    /// `%{user.name}`: dot path into the document.
    Field(String),
    /// `%{+YYYY.MM.dd}`: arrival date (UTC).
    Date(String),
}

/// A parsed `%{...}` template, as used for index names and document ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, SinkError> {
        let mut parts = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find("%{") {
            if start > 0 {
                parts.push(Part::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after.find('}').ok_or_else(|| {
                SinkError::config(format!("template '{source}': unterminated '%{{'"))
            })?;
            let key = after[..end].trim();
            if key.is_empty() {
                return Err(SinkError::config(format!("template '{source}': empty '%{{}}'")));
            }
            match key.strip_prefix('+') {
                Some(format) => parts.push(Part::Date(format.to_string())),
                None => parts.push(Part::Field(key.to_string())),
            }
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_string()));
        }
        Ok(Self { parts })
    }

    /// Render against a document and the event's arrival time.
    ///
    /// A missing or null field is a format error for that event.
    pub fn render(&self, doc: &serde_json::Value, received_ms: i64) -> Result<String, SinkError> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Date(format) => out.push_str(&format_date(format, received_ms)),
                Part::Field(path) => match resolve_path(doc, path) {
                    None | Some(serde_json::Value::Null) => {
                        return Err(SinkError::format_err(format!("field '{path}' missing")));
                    }
                    Some(serde_json::Value::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                },
            }
        }
        Ok(out)
    }
}

/// Supports `YYYY`, `MM` and `dd`; everything else is copied.
fn format_date(format: &str, ms: i64) -> String {
    let (y, m, d) = civil_from_ms(ms);
    format
        .replace("YYYY", &format!("{y:04}"))
        .replace("MM", &format!("{m:02}"))
        .replace("dd", &format!("{d:02}"))
}
