//! The filesystem request engine.
//!
//! [`FsEngine`] implements the callback contract a host framework drives:
//! open/create, read, cleanup/close, directory enumeration, attribute and
//! volume queries. Every callback runs behind a panic boundary and returns an
//! [`FsError`] status, never a transport error.

use crate::cache::CacheStore;
use crate::error::{FsError, Result};
use crate::handle::{FileHandle, HandleTable, OpenFileContext};
use crate::info::{DirEntry, FileInfo, VolumeInfo};
use crate::locks::{lock, FetchLocks};
use crate::path::VirtualPath;
use crate::router::{ArchiveKind, ArchiveTarget, PathRouter, Route};
use log::{debug, error, info, trace, warn};
use rompath_fetch::{FetchOutcome, Fetcher};
use std::any::Any;
use std::fs::{self, File};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

/// Synthetic capacity reported by [`FsEngine::volume_info`].
pub const DEFAULT_TOTAL_SIZE: u64 = 1024 * 1024 * 1024 * 1024;
pub const DEFAULT_FREE_SIZE: u64 = 512 * 1024 * 1024 * 1024;
pub const DEFAULT_VOLUME_LABEL: &str = "CloudRompath";

/// Immutable engine configuration, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Root of the local cache mirror.
    pub cache_dir: PathBuf,
    /// Remote base URL; the archive selector is fixed up per request.
    pub base_url: String,
    /// Serve `.7z` archives from the `standalone` directory.
    pub enable_secondary: bool,
    pub volume_label: String,
    pub total_size: u64,
    pub free_size: u64,
}

impl EngineConfig {
    pub fn new<P: Into<PathBuf>>(cache_dir: P, base_url: impl Into<String>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            base_url: base_url.into(),
            enable_secondary: false,
            volume_label: DEFAULT_VOLUME_LABEL.to_string(),
            total_size: DEFAULT_TOTAL_SIZE,
            free_size: DEFAULT_FREE_SIZE,
        }
    }

    pub fn with_secondary(mut self, enable: bool) -> Self {
        self.enable_secondary = enable;
        self
    }

    pub fn with_volume_label(mut self, label: impl Into<String>) -> Self {
        self.volume_label = label.into();
        self
    }
}

/// Options of an open request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// The host explicitly asked for a directory.
    pub directory: bool,
}

impl OpenOptions {
    pub const fn file() -> Self {
        Self { directory: false }
    }

    pub const fn directory() -> Self {
        Self { directory: true }
    }
}

/// Output buffer of one directory enumeration call.
pub trait DirSink {
    /// Offer an entry. Returns `true` if the buffer is full and the entry was
    /// NOT taken.
    fn push(&mut self, entry: &DirEntry) -> bool;
}

/// A [`DirSink`] that holds at most `capacity` entries.
#[derive(Debug, Clone, Default)]
pub struct DirBuffer {
    capacity: usize,
    entries: Vec<DirEntry>,
}

impl DirBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }
}

impl DirSink for DirBuffer {
    fn push(&mut self, entry: &DirEntry) -> bool {
        if self.entries.len() >= self.capacity {
            return true;
        }
        self.entries.push(entry.clone());
        false
    }
}

/// Summary of one [`FsEngine::read_directory`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirPage {
    /// Entries accepted by the sink.
    pub emitted: usize,
    /// Resume marker for the next call: the last emitted name.
    pub marker: Option<String>,
    /// No entries remain after this page.
    pub exhausted: bool,
}

impl DirPage {
    /// End of enumeration: nothing returned and nothing left.
    pub fn is_end(&self) -> bool {
        self.emitted == 0 && self.exhausted
    }
}

/// Read-only filesystem engine over a lazily populated cache.
///
/// Cloning is cheap and clones share handles, locks, and the fetcher.
pub struct FsEngine<F> {
    inner: Arc<EngineShared<F>>,
}

impl<F> Clone for FsEngine<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct EngineShared<F> {
    config: EngineConfig,
    router: PathRouter,
    cache: CacheStore,
    fetcher: F,
    handles: HandleTable,
    locks: FetchLocks,
}

impl<F: Fetcher> EngineShared<F> {
    /// Fetch `url` into `local` unless it is already cached.
    fn fetch_once(&self, url: &str, local: &Path) -> rompath_fetch::Result<FetchOutcome> {
        self.locks.run(local, || {
            // Re-check under the lock: a concurrent opener may have finished.
            if self.cache.is_populated(local) {
                return Ok(FetchOutcome::AlreadyPresent);
            }
            info!("Fetching {} -> {}", url, local.display());
            self.fetcher.fetch(url, local)
        })
    }
}

impl<F: Fetcher + 'static> FsEngine<F> {
    pub fn new(config: EngineConfig, fetcher: F) -> Self {
        let router = PathRouter::new(
            config.cache_dir.clone(),
            &config.base_url,
            config.enable_secondary,
        );
        let cache = CacheStore::new(config.cache_dir.clone());
        Self {
            inner: Arc::new(EngineShared {
                config,
                router,
                cache,
                fetcher,
                handles: HandleTable::new(),
                locks: FetchLocks::new(),
            }),
        }
    }

    pub fn router(&self) -> &PathRouter {
        &self.inner.router
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    /// Number of open handles.
    pub fn open_handles(&self) -> usize {
        self.inner.handles.len()
    }

    /// Open a file or directory.
    ///
    /// - Root and directory requests create the local directory if needed.
    /// - Archives are fetched on first access; a failed fetch is `NotFound`.
    /// - Disabled archive kinds are `NotFound` without network activity.
    /// - Leaf members are always `NotFound`, after possibly starting a
    ///   background fetch of the archive named after their parent directory.
    pub fn open(&self, path: &str, options: OpenOptions) -> Result<(FileHandle, FileInfo)> {
        trace!("open({}, {:?})", path, options);
        self.dispatch("open", || self.open_inner(path, options))
    }

    /// Same as [`FsEngine::open`]; nothing is ever created on behalf of the caller.
    pub fn create(&self, path: &str, options: OpenOptions) -> Result<(FileHandle, FileInfo)> {
        trace!("create({}, {:?})", path, options);
        self.dispatch("create", || self.open_inner(path, options))
    }

    /// Attributes of `path` through a short-lived handle.
    pub fn stat(&self, path: &str, options: OpenOptions) -> Result<FileInfo> {
        let (handle, info) = self.open(path, options)?;
        self.close(Some(handle));
        Ok(info)
    }

    /// Positioned read into `buf`.
    ///
    /// Returns [`FsError::EndOfFile`] only when `offset` is at or past the end
    /// of the file. A short read before the end is logged and returned as is.
    pub fn read(&self, handle: FileHandle, offset: u64, buf: &mut [u8]) -> Result<usize> {
        trace!("read({:?}, offset={}, len={})", handle, offset, buf.len());
        self.dispatch("read", || {
            let context = self.context(handle)?;
            let context = lock(&context);
            if context.is_dir() {
                return Err(FsError::InvalidHandle);
            }

            let size = context.file().metadata()?.len();
            if offset >= size {
                return Err(FsError::EndOfFile);
            }

            let read = read_at(context.file(), buf, offset)?;
            if read < buf.len() && offset + (read as u64) < size {
                warn!(
                    "Partial read in middle of file {}: requested={} read={} offset={} size={}",
                    context.path().display(),
                    buf.len(),
                    read,
                    offset,
                    size
                );
            }
            Ok(read)
        })
    }

    /// Called when the last user handle goes away. Nothing to flush.
    pub fn cleanup(&self, handle: Option<FileHandle>) {
        trace!("cleanup({:?})", handle);
    }

    /// Release a handle and its directory cursor. Unknown or absent handles are ignored.
    pub fn close(&self, handle: Option<FileHandle>) {
        let Some(handle) = handle else {
            return;
        };
        let removed = self.dispatch("close", || Ok(self.inner.handles.remove(handle)));
        if let Ok(false) = removed {
            trace!("close({:?}): already closed", handle);
        }
    }

    /// Enumerate a directory handle into `sink`, one page per call.
    ///
    /// `marker = None` restarts from the first entry; otherwise the scan
    /// resumes after the entry named `marker`.
    pub fn read_directory(
        &self,
        handle: FileHandle,
        marker: Option<&str>,
        sink: &mut dyn DirSink,
    ) -> Result<DirPage> {
        trace!("read_directory({:?}, marker={:?})", handle, marker);
        self.dispatch("read_directory", || {
            let context = self.context(handle)?;
            let mut context = lock(&context);
            if !context.is_dir() {
                return Err(FsError::InvalidHandle);
            }

            let Some(cursor) = context.cursor_for(marker)? else {
                debug!("read_directory: marker {:?} no longer present", marker);
                return Ok(DirPage {
                    emitted: 0,
                    marker: None,
                    exhausted: true,
                });
            };

            let mut emitted = 0;
            let mut last = None;
            loop {
                let full = match cursor.peek()? {
                    None => break,
                    Some(entry) => {
                        let full = sink.push(entry);
                        if !full {
                            last = Some(entry.name.clone());
                        }
                        full
                    }
                };
                if full {
                    break;
                }
                cursor.advance();
                emitted += 1;
            }

            Ok(DirPage {
                emitted,
                marker: last.or_else(|| marker.map(str::to_string)),
                exhausted: cursor.is_exhausted(),
            })
        })
    }

    /// Live attributes of an open handle.
    pub fn get_file_info(&self, handle: FileHandle) -> Result<FileInfo> {
        trace!("get_file_info({:?})", handle);
        self.dispatch("get_file_info", || {
            let context = self.context(handle)?;
            let context = lock(&context);
            let metadata = context.file().metadata()?;
            Ok(FileInfo::from_metadata(&metadata))
        })
    }

    /// The filesystem is read-only.
    pub fn overwrite(&self, handle: FileHandle) -> Result<FileInfo> {
        trace!("overwrite({:?})", handle);
        Err(FsError::WriteProtected)
    }

    pub fn volume_info(&self) -> VolumeInfo {
        let config = &self.inner.config;
        VolumeInfo {
            total_size: config.total_size,
            free_size: config.free_size,
            label: config.volume_label.clone(),
        }
    }

    /// Security descriptors are left to the host's defaults.
    pub fn get_security(&self, path: &str) -> Result<()> {
        trace!("get_security({})", path);
        Err(FsError::NotImplemented)
    }

    fn open_inner(&self, raw: &str, options: OpenOptions) -> Result<(FileHandle, FileInfo)> {
        let path = VirtualPath::parse(raw)?;
        match self.inner.router.classify(&path, options.directory) {
            Route::Root { local } | Route::Directory { local } => {
                self.inner.cache.ensure_dir(&local)?;
                self.open_local(local)
            }
            Route::Archive { kind, local } => {
                if !self.inner.cache.is_populated(&local) {
                    self.fetch_archive(kind, &path, &local)?;
                }
                self.open_local(local)
            }
            Route::Unsupported { kind } => {
                debug!(
                    "Ignored .{} request ({} support disabled): {}",
                    kind.extension(),
                    kind.extension(),
                    path
                );
                Err(FsError::NotFound)
            }
            Route::LeafMember { parent_name } => {
                debug!(
                    "Refusing loose member {} (parent {:?})",
                    path, parent_name
                );
                self.prefetch_sibling(&path);
                Err(FsError::NotFound)
            }
        }
    }

    fn open_local(&self, local: PathBuf) -> Result<(FileHandle, FileInfo)> {
        let file = open_shared(&local)?;
        let metadata = file.metadata()?;
        let info = FileInfo::from_metadata(&metadata);
        let handle = self
            .inner
            .handles
            .insert(OpenFileContext::new(file, local, metadata.is_dir()));
        trace!("opened {:?} (size={}, links={})", handle, info.size, info.hard_links);
        Ok((handle, info))
    }

    fn fetch_archive(&self, kind: ArchiveKind, path: &VirtualPath, local: &Path) -> Result<()> {
        let url = self.inner.router.remote_url(kind, path);
        debug!("Routing .{} request to {}", kind.extension(), kind.selector());
        match self.inner.fetch_once(&url, local) {
            Ok(outcome) => {
                debug!("Fetch for {} finished: {:?}", local.display(), outcome);
                Ok(())
            }
            Err(e) => {
                warn!("Fetch failed for archive {}: {}", url, e);
                Err(FsError::NotFound)
            }
        }
    }

    fn prefetch_sibling(&self, member: &VirtualPath) {
        let Some(ArchiveTarget { url, local, .. }) = self.inner.router.sibling_archive(member)
        else {
            return;
        };
        if self.inner.cache.is_populated(&local) {
            return;
        }
        if self.inner.locks.is_busy(&local) {
            debug!("Fetch already in flight for {}", local.display());
            return;
        }

        info!("Member file requested; triggering proactive archive fetch: {}", url);
        let shared = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("rompath-prefetch".to_string())
            .spawn(move || match shared.fetch_once(&url, &local) {
                Ok(outcome) => debug!("Proactive fetch of {} finished: {:?}", url, outcome),
                Err(e) => warn!("Proactive fetch failed for {}: {}", url, e),
            });
        if let Err(e) = spawned {
            warn!("Could not start proactive fetch: {}", e);
        }
    }

    fn context(&self, handle: FileHandle) -> Result<Arc<Mutex<OpenFileContext>>> {
        self.inner.handles.get(handle).ok_or(FsError::InvalidHandle)
    }

    /// Run one callback, turning a panic into [`FsError::Internal`].
    fn dispatch<T>(&self, op: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Panic in {}: {}", op, message);
                Err(FsError::Internal(message))
            }
        }
    }
}

/// Open a cache path read-only without denying access to anyone else.
fn open_shared(path: &Path) -> io::Result<File> {
    let mut options = fs::OpenOptions::new();
    options.read(true);
    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        // FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE
        options.share_mode(0x7);
        // FILE_FLAG_BACKUP_SEMANTICS, required to open directories
        options.custom_flags(0x0200_0000);
    }
    options.open(path)
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
