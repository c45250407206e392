use thiserror::Error;

/// Errors produced by the network layer.
#[derive(Debug, Error)]
pub enum NetError {
    /// The peer could not be reached or the request timed out.
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    /// The peer answered with a non-success HTTP status.
    #[error("Peer answered with status {0}")]
    Status(u16),

    /// The peer's answer was not the expected JSON document.
    #[error("Malformed answer: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The proxy URL could not be used.
    #[error("Invalid proxy: {0}")]
    Proxy(String),

    /// HTTP client construction or request failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Binding or serving the inbound listener failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
