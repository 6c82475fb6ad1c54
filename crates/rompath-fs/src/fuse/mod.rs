//! FUSE adapter for the ROM archive filesystem.
//!
//! FUSE addresses files by inode and pages directories by numeric offset,
//! while [`FsEngine`](crate::FsEngine) works with virtual paths and resume
//! markers. The adapter bridges the two:
//!
//! - **Inodes**: assigned on first sight of a path and kept for the life of
//!   the mount
//! - **Directory offsets**: each open directory remembers the names it has
//!   emitted, so offset `3 + k` resumes after the `k`-th entry
//! - **Lookups**: an extension-less name directly under the root is a game
//!   directory and is looked up as a directory request, so a loader probing
//!   `gameA/rom1.bin` reaches the engine (and triggers the `gameA.zip`
//!   prefetch)
//!
//! # Example
//!
//! ```ignore
//! use rompath_fs::fuse::mount;
//! use rompath_fs::{FsEngine, HttpFetcher, MountConfig};
//!
//! let config = MountConfig::default();
//! let engine = FsEngine::new(config.engine_config(), HttpFetcher::new()?);
//! mount(engine, &config.mount_point)?.wait();
//! ```

mod adapter;
mod mount;

pub use adapter::*;
pub use mount::{mount, FuseHost};
