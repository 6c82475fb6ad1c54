//! HTTP transport for archive downloads.

use crate::error::{FetchError, Result};
use log::{debug, info, warn};
use reqwest::blocking::{Client, Response};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::Builder;

/// Default connect timeout for the HTTP client.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Prefix of in-progress download files inside the cache.
pub const PARTIAL_PREFIX: &str = ".rompath-partial-";

/// Result of a successful fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The destination already held data; the network was not contacted.
    AlreadyPresent,
    /// The resource was downloaded.
    Downloaded { bytes: u64 },
}

/// Retrieves a remote resource into a local file.
///
/// Implementations must:
/// - return [`FetchOutcome::AlreadyPresent`] for an existing nonempty
///   destination without touching the network,
/// - not create any directory before the resource is known to be fetchable,
/// - leave neither a file nor a newly created empty parent behind on failure.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, destination: &Path) -> Result<FetchOutcome>;
}

impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    fn fetch(&self, url: &str, destination: &Path) -> Result<FetchOutcome> {
        (**self).fetch(url, destination)
    }
}

/// Configuration for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    /// Timeout for establishing the connection. Transfers themselves are
    /// never cut short.
    pub connect_timeout: Duration,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: format!("cloud-rompath/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Blocking HTTP(S) fetcher backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with the default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(HttpFetcherConfig::default())
    }

    /// Create a fetcher with an explicit configuration.
    pub fn with_config(config: HttpFetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent)
            .connect_timeout(config.connect_timeout)
            .timeout(None)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, destination: &Path) -> Result<FetchOutcome> {
        if is_populated(destination) {
            debug!("Skipping fetch, already cached: {}", destination.display());
            return Ok(FetchOutcome::AlreadyPresent);
        }

        let parent = destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| FetchError::InvalidDestination(destination.display().to_string()))?;

        debug!("GET {}", url);
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|source| FetchError::Connect {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let declared = response.content_length().unwrap_or(0);
        debug!("Content-Length: {} for {}", declared, url);
        if declared == 0 {
            return Err(FetchError::ZeroLength {
                url: url.to_string(),
            });
        }

        // Directories are only created once the resource is known to exist.
        let created_root = first_missing_ancestor(parent);
        if created_root.is_some() {
            fs::create_dir_all(parent)?;
        }

        let result = stream_to_file(&mut response, url, parent, destination, declared);
        if let (Err(_), Some(top)) = (&result, &created_root) {
            prune_created_dirs(parent, top);
        }
        result
    }
}

fn stream_to_file(
    response: &mut Response,
    url: &str,
    parent: &Path,
    destination: &Path,
    declared: u64,
) -> Result<FetchOutcome> {
    let mut partial = Builder::new().prefix(PARTIAL_PREFIX).tempfile_in(parent)?;

    let received = match io::copy(response, &mut partial) {
        Ok(received) => received,
        Err(source) => {
            // The client reports a body cut short as a stream error.
            let written = partial.as_file().metadata().map(|m| m.len()).unwrap_or(0);
            if written == 0 {
                debug!("Body stream for {} failed before any data: {}", url, source);
                return Err(FetchError::EmptyBody {
                    url: url.to_string(),
                });
            }
            return Err(FetchError::Body {
                url: url.to_string(),
                source,
            });
        }
    };

    // Dropping `partial` on any early return deletes it.
    if received == 0 {
        return Err(FetchError::EmptyBody {
            url: url.to_string(),
        });
    }
    if received < declared {
        return Err(FetchError::Truncated {
            expected: declared,
            received,
        });
    }

    partial.as_file().sync_all()?;
    partial
        .persist(destination)
        .map_err(|e| FetchError::Io(e.error))?;

    info!(
        "Downloaded {} bytes from {} to {}",
        received,
        url,
        destination.display()
    );
    Ok(FetchOutcome::Downloaded { bytes: received })
}

/// Whether `path` is a regular file with at least one byte.
pub fn is_populated(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Outermost ancestor of `dir` (inclusive) that does not exist yet.
fn first_missing_ancestor(dir: &Path) -> Option<PathBuf> {
    dir.ancestors()
        .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
        .last()
        .map(Path::to_path_buf)
}

/// Remove `dir` and its ancestors up to and including `top`, stopping at
/// the first one that is not empty.
fn prune_created_dirs(dir: &Path, top: &Path) {
    for current in dir.ancestors() {
        // remove_dir refuses non-empty directories.
        if let Err(e) = fs::remove_dir(current) {
            debug!("Kept directory {}: {}", current.display(), e);
            return;
        }
        warn!("Removed empty directory: {}", current.display());
        if current == top {
            return;
        }
    }
}
