/// Category of a sink error. Lets the core decide how loudly to report a
/// failure; retries belong to the sink itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid sink parameters. Permanent, fails at startup.
    Config,
    /// I/O or network error, including a backend rejecting a request.
    Io,
    /// Payload could not be rendered for this sink.
    Format,
    /// The sink was asked for a delivery mode it does not implement.
    Unsupported,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Unsupported => f.write_str("unsupported"),
        }
    }
}

/// Unified error type for sink construction and delivery.
///
/// Carries an `ErrorKind` and a human-readable message. `From` impls assign
/// the kind automatically so sinks can use `?` freely.
#[derive(Clone)]
pub struct SinkError {
    kind: ErrorKind,
    message: String,
}

impl SinkError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    pub fn format_err(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Unsupported, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Debug for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SinkError {}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self { Self { kind: ErrorKind::Io, message: e.to_string() } }
}

impl From<serde_json::Error> for SinkError {
    fn from(e: serde_json::Error) -> Self { Self { kind: ErrorKind::Format, message: e.to_string() } }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_assign_kind() {
        assert_eq!(SinkError::config("x").kind(), ErrorKind::Config);
        assert_eq!(SinkError::io("x").kind(), ErrorKind::Io);
        assert_eq!(SinkError::format_err("x").kind(), ErrorKind::Format);
        assert_eq!(SinkError::unsupported("x").kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn debug_includes_kind_display_does_not() {
        let e = SinkError::io("connection refused");
        assert_eq!(format!("{e:?}"), "[io] connection refused");
        assert_eq!(e.to_string(), "connection refused");
    }

    #[test]
    fn io_error_converts_to_io_kind() {
        let e: SinkError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert_eq!(e.kind(), ErrorKind::Io);
    }
}
