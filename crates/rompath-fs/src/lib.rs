//! # rompath-fs
//!
//! Read-only virtual filesystem that presents a remote ROM archive
//! repository as a local directory tree.
//!
//! Archives (`.zip`, optionally `.7z`) are downloaded into a local cache the
//! first time they are opened and served from the cache afterwards. Files
//! that logically live *inside* an archive are never served: an emulator
//! probing `gameA/rom1.bin` gets "not found", and the request kicks off a
//! background fetch of `gameA.zip` so the archive is ready when the emulator
//! falls back to it.
//!
//! This crate provides:
//! - [`FsEngine`]: the callback contract (open, read, close, enumerate, ...)
//! - [`MountConfig`]: defaults and TOML configuration
//! - [`MountSession`]: registration with retry and private-mode fallback
//! - A FUSE adapter (optional, with the `fuse` feature)
//!
//! ## Example
//!
//! ```ignore
//! use rompath_fs::{EngineConfig, FsEngine, OpenOptions};
//! use rompath_fetch::HttpFetcher;
//!
//! let config = EngineConfig::new("/var/cache/rompath", "https://mdk.cab/download/");
//! let engine = FsEngine::new(config, HttpFetcher::new()?);
//!
//! let (handle, info) = engine.open("\\pacman.zip", OpenOptions::file())?;
//! let mut buf = vec![0u8; info.size as usize];
//! engine.read(handle, 0, &mut buf)?;
//! engine.close(Some(handle));
//! ```
//!
//! ## FUSE Support (Optional)
//!
//! ```ignore
//! use rompath_fs::fuse::mount;
//! use rompath_fs::{FsEngine, HttpFetcher, MountConfig};
//!
//! let config = MountConfig::default();
//! let engine = FsEngine::new(config.engine_config(), HttpFetcher::new()?);
//! let session = mount(engine, &config.mount_point)?;
//! session.wait();
//! ```

mod cache;
mod config;
mod engine;
mod error;
mod handle;
mod info;
mod locks;
mod path;
mod router;
mod session;

#[cfg(feature = "fuse")]
pub mod fuse;

pub use cache::{CacheEntry, CacheStore};
pub use config::{
    ConfigError, MountConfig, DEFAULT_BASE_URL, DEFAULT_CACHE_DIR, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_MOUNT_POINT,
};
pub use engine::{
    DirBuffer, DirPage, DirSink, EngineConfig, FsEngine, OpenOptions, DEFAULT_FREE_SIZE,
    DEFAULT_TOTAL_SIZE, DEFAULT_VOLUME_LABEL,
};
pub use error::{FsError, Result};
pub use handle::FileHandle;
pub use info::{DirEntry, FileInfo, VolumeInfo};
pub use locks::FetchLocks;
pub use path::VirtualPath;
pub use router::{ArchiveKind, ArchiveTarget, PathRouter, Route};
pub use session::{
    MountError, MountHost, MountMode, MountSession, VolumeParams, FS_NAME, REGISTER_ATTEMPTS,
};

// Re-export the transport types callers need to build an engine.
pub use rompath_fetch::{FetchOutcome, Fetcher, HttpFetcher, HttpFetcherConfig};
