//! TLS-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, TlsError>;

/// How a failed fetch is presented when there is nothing else on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connectivity or I/O failure; the user is told to check the network.
    Network,
    /// Server or application failure; only a generic retry is offered.
    Generic,
}

/// Top-level error type for timeline sync.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("[TLS-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[TLS-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[TLS-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[TLS-2001] network failure: {details}")]
    TransientNetwork { details: String },

    #[error("[TLS-2002] server failure{}: {details}", http_suffix(.status))]
    Server { status: Option<u16>, details: String },

    #[error("[TLS-2101] gap {gap} cannot be fetched: {details}")]
    InvalidGapPosition { gap: i64, details: String },

    #[error("[TLS-2102] stale completion for request {request} discarded")]
    StaleCompletion { request: u64 },

    #[error("[TLS-3001] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[TLS-3002] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[TLS-3003] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[TLS-3004] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[TLS-3900] runtime failure: {details}")]
    Runtime { details: String },
}

fn http_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl TlsError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "TLS-1001",
            Self::MissingConfig { .. } => "TLS-1002",
            Self::ConfigParse { .. } => "TLS-1003",
            Self::TransientNetwork { .. } => "TLS-2001",
            Self::Server { .. } => "TLS-2002",
            Self::InvalidGapPosition { .. } => "TLS-2101",
            Self::StaleCompletion { .. } => "TLS-2102",
            Self::Serialization { .. } => "TLS-3001",
            Self::Sql { .. } => "TLS-3002",
            Self::Io { .. } => "TLS-3003",
            Self::ChannelClosed { .. } => "TLS-3004",
            Self::Runtime { .. } => "TLS-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork { .. }
                | Self::Server { .. }
                | Self::Io { .. }
                | Self::Sql { .. }
                | Self::ChannelClosed { .. }
        )
    }

    /// Classify a fetch failure for the full-screen error state.
    #[must_use]
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::TransientNetwork { .. } | Self::Io { .. } => FailureKind::Network,
            _ => FailureKind::Generic,
        }
    }

    /// Convenience constructor for connectivity failures.
    #[must_use]
    pub fn network(details: impl Into<String>) -> Self {
        Self::TransientNetwork {
            details: details.into(),
        }
    }

    /// Convenience constructor for non-2xx or malformed responses.
    #[must_use]
    pub fn server(status: Option<u16>, details: impl Into<String>) -> Self {
        Self::Server {
            status,
            details: details.into(),
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for TlsError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for TlsError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for TlsError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
