//! Open-file contexts and directory cursors.

use crate::info::{DirEntry, FileInfo};
use crate::locks::lock;
use rompath_fetch::PARTIAL_PREFIX;
use std::collections::HashMap;
use std::fs::{self, File, ReadDir};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Opaque id of an open file, issued by [`HandleTable::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(u64);

impl FileHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// State owned by one open handle.
#[derive(Debug)]
pub struct OpenFileContext {
    file: File,
    path: PathBuf,
    is_dir: bool,
    cursor: Option<DirCursor>,
}

impl OpenFileContext {
    pub fn new(file: File, path: PathBuf, is_dir: bool) -> Self {
        Self {
            file,
            path,
            is_dir,
            cursor: None,
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Position the cursor for a request carrying `marker`.
    ///
    /// `None` restarts the scan. A marker the cursor last returned continues
    /// in place; any other marker rescans from the start and skips past the
    /// matching entry. Returns `None` if the marker is no longer present.
    pub fn cursor_for(&mut self, marker: Option<&str>) -> io::Result<Option<&mut DirCursor>> {
        match marker {
            None => self.cursor = Some(DirCursor::start(&self.path)?),
            Some(marker) => {
                let positioned = self
                    .cursor
                    .as_ref()
                    .is_some_and(|c| c.is_positioned_at(marker));
                if !positioned {
                    let mut cursor = DirCursor::start(&self.path)?;
                    let found = cursor.seek_past(marker)?;
                    self.cursor = Some(cursor);
                    if !found {
                        return Ok(None);
                    }
                }
            }
        }
        Ok(self.cursor.as_mut())
    }
}

/// Lazy, restartable scan over one cache directory.
#[derive(Debug)]
pub struct DirCursor {
    scan: ReadDir,
    pending: Option<DirEntry>,
    last_emitted: Option<String>,
    exhausted: bool,
}

impl DirCursor {
    pub fn start(dir: &Path) -> io::Result<Self> {
        Ok(Self {
            scan: fs::read_dir(dir)?,
            pending: None,
            last_emitted: None,
            exhausted: false,
        })
    }

    pub fn is_positioned_at(&self, marker: &str) -> bool {
        self.last_emitted.as_deref() == Some(marker)
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.pending.is_none()
    }

    /// Current entry without consuming it.
    pub fn peek(&mut self) -> io::Result<Option<&DirEntry>> {
        if self.pending.is_none() && !self.exhausted {
            self.pending = self.read_next()?;
            if self.pending.is_none() {
                self.exhausted = true;
            }
        }
        Ok(self.pending.as_ref())
    }

    /// Mark the current entry as returned to the caller.
    pub fn advance(&mut self) {
        if let Some(entry) = self.pending.take() {
            self.last_emitted = Some(entry.name);
        }
    }

    /// Skip entries up to and including `marker`.
    pub fn seek_past(&mut self, marker: &str) -> io::Result<bool> {
        loop {
            let is_marker = match self.peek()? {
                Some(entry) => entry.name == marker,
                None => return Ok(false),
            };
            if is_marker {
                self.advance();
                return Ok(true);
            }
            self.pending = None;
        }
    }

    fn read_next(&mut self) -> io::Result<Option<DirEntry>> {
        for entry in self.scan.by_ref() {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(PARTIAL_PREFIX) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                // Removed between listing and stat.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            return Ok(Some(DirEntry {
                name,
                info: FileInfo::from_metadata(&metadata),
            }));
        }
        Ok(None)
    }
}

/// Arena of open contexts keyed by [`FileHandle`].
///
/// Each context has its own lock, so calls on distinct handles never wait on
/// each other.
#[derive(Debug)]
pub struct HandleTable {
    next: AtomicU64,
    slots: Mutex<HashMap<FileHandle, Arc<Mutex<OpenFileContext>>>>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, context: OpenFileContext) -> FileHandle {
        let handle = FileHandle(self.next.fetch_add(1, Ordering::Relaxed));
        lock(&self.slots).insert(handle, Arc::new(Mutex::new(context)));
        handle
    }

    pub fn get(&self, handle: FileHandle) -> Option<Arc<Mutex<OpenFileContext>>> {
        lock(&self.slots).get(&handle).cloned()
    }

    /// Drop a context. Returns `false` if it was already gone.
    pub fn remove(&self, handle: FileHandle) -> bool {
        lock(&self.slots).remove(&handle).is_some()
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }
}
