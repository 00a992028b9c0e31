//! # Error Handling
//!
//! This module defines the error type shared by every stage of a capture/upload
//! cycle. Each variant maps to one failure kind the node can hit, and every one
//! of them is terminal for the current cycle: the node logs it and goes back to
//! sleep. The next wake starts fresh.
//!
//! ## Failure Kinds:
//! - **StorageOpen**: the WAV sink could not be created or opened
//! - **Storage**: a write/seek/flush on an already open sink failed
//! - **Connection**: socket connect or TLS handshake failed, nothing was sent
//! - **Transport**: the connection broke after the request started
//! - **StreamRead**: the WAV file became unreadable mid-upload
//! - **Adc**: the analog input could not be read
//! - **Protocol**: the request was driven out of order or with a forbidden header
//! - **Config**: configuration could not be loaded or failed validation

use std::fmt;
use std::io;

/// Errors produced while capturing or uploading a recording.
///
/// ## Usage Example:
/// ```rust
/// return Err(NodeError::Connection("connection refused".to_string()));
/// ```
#[derive(Debug)]
pub enum NodeError {
    /// Sink could not be created or opened (capture or upload aborts immediately)
    StorageOpen(String),

    /// I/O failure on an open storage sink
    Storage(String),

    /// Socket connect or TLS handshake failed before any byte was sent
    Connection(String),

    /// Write/read failure on an established session
    Transport(String),

    /// The file part's byte source failed mid-stream
    StreamRead(String),

    /// Analog input read failure
    Adc(String),

    /// Request driven out of order, or a header the session manages itself
    Protocol(String),

    /// Configuration file or environment variable problems
    Config(String),
}

impl NodeError {
    /// Short machine-readable kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::StorageOpen(_) => "storage_open_failure",
            NodeError::Storage(_) => "storage_failure",
            NodeError::Connection(_) => "connection_failure",
            NodeError::Transport(_) => "transport_failure",
            NodeError::StreamRead(_) => "stream_read_failure",
            NodeError::Adc(_) => "adc_failure",
            NodeError::Protocol(_) => "protocol_error",
            NodeError::Config(_) => "config_error",
        }
    }

    /// Wrap an I/O error raised while writing to the session socket.
    pub fn transport(context: &str, err: io::Error) -> Self {
        NodeError::Transport(format!("{}: {}", context, err))
    }

    /// Wrap an I/O error raised by an open storage sink.
    pub fn storage(context: &str, err: io::Error) -> Self {
        NodeError::Storage(format!("{}: {}", context, err))
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::StorageOpen(msg) => write!(f, "Storage open failure: {}", msg),
            NodeError::Storage(msg) => write!(f, "Storage failure: {}", msg),
            NodeError::Connection(msg) => write!(f, "Connection failure: {}", msg),
            NodeError::Transport(msg) => write!(f, "Transport failure: {}", msg),
            NodeError::StreamRead(msg) => write!(f, "Stream read failure: {}", msg),
            NodeError::Adc(msg) => write!(f, "ADC failure: {}", msg),
            NodeError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            NodeError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for NodeError {}

/// Automatic conversion from configuration errors to NodeError.
///
/// ## When this happens:
/// - node.toml has invalid syntax
/// - An environment variable cannot be parsed into the target field type
impl From<config::ConfigError> for NodeError {
    fn from(err: config::ConfigError) -> Self {
        NodeError::Config(err.to_string())
    }
}

/// Type alias for Results that use the node error type.
pub type NodeResult<T> = Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_message() {
        let err = NodeError::StorageOpen("/data/audio.wav: permission denied".to_string());
        assert_eq!(
            err.to_string(),
            "Storage open failure: /data/audio.wav: permission denied"
        );
        assert_eq!(err.kind(), "storage_open_failure");
    }

    #[test]
    fn test_io_helpers_keep_context() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err = NodeError::transport("write chunk", io_err);
        assert!(matches!(err, NodeError::Transport(_)));
        assert!(err.to_string().contains("write chunk: pipe closed"));
    }
}
