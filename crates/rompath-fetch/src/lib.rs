//! # rompath-fetch
//!
//! Transport collaborators for `cloud-rompath`.
//!
//! This crate provides:
//! - The [`Fetcher`] contract used by the filesystem engine to pull archives
//! - [`HttpFetcher`], a blocking `reqwest` implementation
//! - The [`Extractor`] contract and [`ExternalExtractor`], which shells out
//!   to an archive tool
//!
//! ## Example
//!
//! ```ignore
//! use rompath_fetch::{Fetcher, HttpFetcher};
//! use std::path::Path;
//!
//! let fetcher = HttpFetcher::new()?;
//! fetcher.fetch(
//!     "https://mdk.cab/download/split/pacman.zip",
//!     Path::new("/var/cache/mame/pacman.zip"),
//! )?;
//! ```

mod error;
mod extract;
mod http;

pub use error::{ExtractError, FetchError, Result};
pub use extract::{Extractor, ExternalExtractor};
pub use http::{
    is_populated, FetchOutcome, Fetcher, HttpFetcher, HttpFetcherConfig, DEFAULT_CONNECT_TIMEOUT,
    PARTIAL_PREFIX,
};
