//! Error types module.
//!
//! This module defines the error types used throughout the hostpin library.
//! It uses `thiserror` for structured error handling and provides
//! a custom `Result` type alias for convenience.

use std::path::PathBuf;
use thiserror::Error;

/// A specialized `Result` type for hostpin operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the hostpin library.
///
/// Per-candidate unreachability is not an error: it is recorded in
/// [`ProbeResult`](crate::probe::ProbeResult) as an absent latency.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, network sockets, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error (configuration files, remote responses, reports)
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// DNS resolver error (plain DNS lookups)
    #[error("DNS resolver error: {0}")]
    Resolver(#[from] trust_dns_resolver::error::ResolveError),

    /// No candidate data could be obtained for a domain.
    #[error("no candidates for {domain}: {reason}")]
    SourceUnavailable { domain: String, reason: String },

    /// No candidate passed the validity gate.
    #[error("no candidate for {domain} passed the validity threshold")]
    SelectionEmpty { domain: String },

    /// The hosts file could not be read or written.
    #[error("cannot update {}: {source}", path.display())]
    SinkWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// DNS cache invalidation failed (never fatal)
    #[error("DNS cache flush failed: {0}")]
    CacheInvalidation(String),

    /// Network-related error (connection failures, timeouts)
    #[error("Network error: {0}")]
    Network(String),

    /// Configuration error (invalid config, missing files)
    #[error("Config error: {0}")]
    Config(String),

    /// Parse error (invalid input format, malformed data)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Operation timeout
    #[error("Operation timed out")]
    Timeout,
}

impl Error {
    /// Create a new network error with a message.
    #[must_use]
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a new configuration error with a message.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new parse error with a message.
    #[must_use]
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a `SourceUnavailable` error for a domain.
    #[must_use]
    pub fn source_unavailable(domain: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            domain: domain.into(),
            reason: reason.into(),
        }
    }

    /// Create a `SinkWrite` error for a path.
    #[must_use]
    pub fn sink_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::SinkWrite {
            path: path.into(),
            source,
        }
    }

    /// Whether the caller can recover by falling back to static data.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. } | Self::SelectionEmpty { .. } | Self::CacheInvalidation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_domain() {
        let err = Error::source_unavailable("github.com", "timeout");
        assert_eq!(err.to_string(), "no candidates for github.com: timeout");

        let err = Error::SelectionEmpty {
            domain: "raw.githubusercontent.com".into(),
        };
        assert!(err.to_string().contains("raw.githubusercontent.com"));
    }

    #[test]
    fn test_sink_write_names_path() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = Error::sink_write("/etc/hosts", io);
        assert!(err.to_string().contains("/etc/hosts"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::source_unavailable("a", "b").is_recoverable());
        assert!(Error::CacheInvalidation("x".into()).is_recoverable());
        assert!(!Error::Timeout.is_recoverable());
    }
}
