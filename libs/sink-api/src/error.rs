use std::fmt;

/// Category of a sink error. Lets the stage decide between dropping
/// the message, escalating, or refusing to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration: permanent, fail at startup.
    Config,
    /// I/O or network error: backend could not accept the write.
    Io,
    /// Data format/parse error: bad input, drop the message.
    Format,
    /// Record layout does not fit the configured shape (e.g. more body
    /// fields than cell definitions). A configuration fault, not a bad message.
    Layout,
    /// Logical error (invalid state, generic).
    Logic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Layout => f.write_str("layout"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Unified error type for all converter, writer and connector methods.
///
/// `From` impls assign the appropriate kind automatically and allow
/// ergonomic `?` in plugin implementations.
#[derive(Clone, PartialEq, Eq)]
pub struct SinkError {
    kind: ErrorKind,
    message: String,
}

impl SinkError {
    /// Generic logic error.
    pub fn new(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Logic, message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    pub fn format_err(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    pub fn layout(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Layout, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Add context, preserving the original kind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Debug for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SinkError {}

// ---------------------------------------------------------------------------
// From impls: standard error types → SinkError with correct ErrorKind
// ---------------------------------------------------------------------------

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(e: serde_json::Error) -> Self {
        Self::format_err(e.to_string())
    }
}

impl From<std::str::Utf8Error> for SinkError {
    fn from(e: std::str::Utf8Error) -> Self {
        Self::format_err(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for SinkError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Self::format_err(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind() {
        let err = SinkError::layout("body has 3 fields").with_context("stage 'hbase'");
        assert_eq!(err.kind(), ErrorKind::Layout);
        assert_eq!(err.message(), "stage 'hbase': body has 3 fields");
        assert_eq!(format!("{err:?}"), "[layout] stage 'hbase': body has 3 fields");
    }

    #[test]
    fn json_errors_are_format() {
        let err: SinkError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Format);
    }
}
