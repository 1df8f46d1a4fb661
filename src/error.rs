/// Closed taxonomy for pipeline failures. Everything except configuration
/// and startup connectivity is recovered locally at the smallest enclosing
/// component; one unhealthy tick never prevents the next.
#[derive(Debug, thiserror::Error)]
pub enum SentinelError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("observability backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend query failed: {0}")]
    Query(#[from] clickhouse::error::Error),

    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("analyzer request failed: {0}")]
    Analyzer(String),

    #[error("notifier '{channel}' failed: {reason}")]
    Notifier { channel: String, reason: String },
}
