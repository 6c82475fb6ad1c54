use thiserror::Error;

/// Errors that can occur while fetching an archive from the remote host.
///
/// The variants only matter for logging; the filesystem layer collapses all
/// of them into a single "not found" status.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The request never produced a response.
    #[error("connection failed for {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status code.
    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    /// The response did not declare a nonzero content length.
    #[error("zero declared content length for {url}")]
    ZeroLength { url: String },

    /// The response declared a length but delivered no bytes, whether the
    /// stream ended cleanly or failed before the first byte.
    #[error("empty body for {url}")]
    EmptyBody { url: String },

    /// The body ended before the declared length was reached.
    #[error("truncated body: expected {expected} bytes, received {received}")]
    Truncated { expected: u64, received: u64 },

    /// The body could not be streamed to disk.
    #[error("body transfer failed for {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },

    /// The destination path has no parent directory.
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    /// Local I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the external extraction tool.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The tool could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool exited unsuccessfully.
    #[error("{program} exited with {status}")]
    Failed { program: String, status: String },

    /// The tool reported success but the member is not on disk.
    #[error("member {0} missing after extraction")]
    Missing(String),

    /// Local I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for fetch operations.
pub type Result<T> = std::result::Result<T, FetchError>;
