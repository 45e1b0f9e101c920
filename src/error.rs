//! src/error.rs
//!
//! Defines the crate-wide `Error` enum using `thiserror`. Variant text
//! preserves the classifier substrings callers rely on for upstream
//! matching (dial timeouts, disconnects, proxy-error escalation, auth
//! failures).

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Substring present while a Host's proxy-error moving average has not
/// yet tripped its cutoff.
pub const PROXY_ERROR: &str = "ProxyError";

/// Substring surfaced once the proxy error rate trips its cutoff, so the
/// layer above knows to evict the Host.
pub const TOO_MANY_PROXY_ERROR: &str = "TooManyProxyError";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize or deserialize: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Cryptography error: {0}")]
    Crypto(#[from] ed25519_dalek::SignatureError),

    #[error("Invalid identity key file")]
    InvalidKeyFile,

    #[error("Tokio task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("Failed to initiate connection to {0}: {1}")]
    ConnectFailed(String, #[source] quinn::ConnectError),

    #[error("Connection to {0} failed during establishment: {1}")]
    ConnectionEstablishFailed(String, #[source] quinn::ConnectionError),

    #[error("An established connection failed: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("Failed to write to network stream: {0}")]
    WriteStream(#[from] quinn::WriteError),

    #[error("Failed to read from network stream: {0}")]
    ReadStream(String),

    #[error("Host address is blank, host might be receive only.")]
    BlankAddress,

    #[error("Failed to transmit: host disconnected")]
    HostDisconnected,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("Last try to connect to {0} failed. Giving up")]
    ConnectRetriesExhausted(String),

    #[error("{PROXY_ERROR}: {0}")]
    ProxyError(String),

    #[error("{TOO_MANY_PROXY_ERROR}: {0}")]
    TooManyProxyError(String),

    #[error("Failed to validate token: {0}")]
    TokenValidationFailed(String),

    #[error("Invalid token signature: {0}")]
    InvalidTokenSignature(String),

    #[error("Malformed authenticated message: {0}")]
    MalformedMessage(String),

    #[error("Invalid dynamic authentication attempt: {0}")]
    InvalidDynamicAuth(String),

    #[error("Provided ID does not match. Expected: {expected}, Actual: {actual}")]
    IdMismatch { expected: String, actual: String },

    #[error("Cannot sign message: No private key")]
    NoPrivateKey,

    #[error("unable to retrieve metadata / header")]
    MissingAuthHeaders,

    #[error("API server error: {0}")]
    ApiServer(#[from] axum::Error),

    #[error("Gossip protocol for tag '{0}' is defunct")]
    ProtocolDefunct(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Mirrors the source's `isConnError`: classifies an error as
    /// connection-transient (worth retrying) by substring.
    pub fn is_retryable(&self) -> bool {
        let text = self.to_string();
        text.contains("context deadline exceeded")
            || text.contains("connection refused")
            || text.contains("host disconnected")
    }
}
