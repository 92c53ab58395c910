//! Error types for the sweeper

use regex::Regex;
use thiserror::Error;

lazy_static::lazy_static! {
    /// Auth rejection wording, matched as whole words only
    static ref AUTH_REJECTION: Regex =
        Regex::new(r"\b(?:forbidden|unauthorized)\b").expect("static regex");
}

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// How a failure should be treated by the retry and health layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeouts, exhausted connection pools, anything unexpected. Retried locally.
    Transient,
    /// Auth rejection or DNS failure. Never retried; disables the backend.
    Permanent,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// Main error type for the sweeper
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    // Credential / signing errors
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Transaction send failed: {0}")]
    TransactionSend(String),

    // Persistence errors
    #[error("Persistence failed: {0}")]
    Persistence(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify this error for retry and health bookkeeping
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::Http { status, .. } if *status == 401 || *status == 403 => {
                FailureKind::Permanent
            }
            Error::UnknownBackend(_) => FailureKind::Permanent,
            Error::Http { .. } | Error::RpcTimeout(_) => FailureKind::Transient,
            Error::Serialization(_) | Error::Deserialization(_) => FailureKind::Transient,
            Error::Rpc(msg) | Error::RpcConnection(msg) => classify_message(msg),
            other => classify_message(&other.to_string()),
        }
    }

    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        self.failure_kind() == FailureKind::Transient
    }
}

/// Map a raw error message onto the failure taxonomy.
///
/// Connection-pool exhaustion and "max retries" are explicitly transient;
/// auth rejections and name-resolution failures are permanent. Status codes
/// are never read from message text; HTTP status goes through [`Error::Http`].
pub fn classify_message(message: &str) -> FailureKind {
    let msg = message.to_lowercase();

    if msg.contains("max retries")
        || msg.contains("connection pool")
        || msg.contains("pool timed out")
        || msg.starts_with("timeout:")
    {
        return FailureKind::Transient;
    }

    if AUTH_REJECTION.is_match(&msg) {
        return FailureKind::Permanent;
    }

    const PERMANENT: &[&str] = &[
        "name or service not known",
        "name not known",
        "nodename nor servname",
        "failed to lookup address",
        "dns error",
    ];

    if PERMANENT.iter().any(|p| msg.contains(p)) {
        FailureKind::Permanent
    } else {
        FailureKind::Transient
    }
}

/// Render an error with its whole `source()` chain.
///
/// reqwest hides the resolver message behind "error sending request"; the
/// classifier needs the inner text.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let message = error_chain(&e);
        if e.is_timeout() {
            Error::Rpc(format!("timeout: {}", message))
        } else if e.is_connect() {
            Error::RpcConnection(message)
        } else {
            Error::Rpc(message)
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
