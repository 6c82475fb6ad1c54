//! `fuser::Filesystem` implementation on top of [`FsEngine`].

use crate::engine::{DirSink, FsEngine, OpenOptions};
use crate::error::FsError;
use crate::handle::FileHandle;
use crate::info::{DirEntry, FileInfo};
use crate::path::VirtualPath;
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, Request, FUSE_ROOT_ID,
};
use libc::{EACCES, EBADF, EBUSY, EINVAL, EIO, EISDIR, ENOENT, ENOSYS, ENOTDIR, EROFS};
use log::{debug, trace, warn};
use rompath_fetch::Fetcher;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::Duration;

/// Time-to-live for cached attributes and entries.
const TTL: Duration = Duration::from_secs(1);

/// Block size for filesystem statistics.
const BLOCK_SIZE: u32 = 512;

/// Maximum file name length reported by statfs.
const NAME_MAX: u32 = 255;

/// Readdir offsets below this are `.` and `..`.
const FIRST_ENTRY_OFFSET: i64 = 3;

/// Map an engine status to an errno.
pub fn errno(err: &FsError) -> i32 {
    match err {
        FsError::NotFound => ENOENT,
        FsError::AccessDenied => EACCES,
        FsError::SharingViolation => EBUSY,
        FsError::WriteProtected => EROFS,
        FsError::InvalidHandle => EBADF,
        // Only reachable outside read, where EOF is an empty reply.
        FsError::EndOfFile => EINVAL,
        FsError::NotImplemented => ENOSYS,
        FsError::Internal(_) => EIO,
    }
}

/// Engine resume marker for a readdir request at `offset`.
///
/// `names` holds the entries already emitted on this handle; entry `k` was
/// sent with offset `3 + k`. Offsets before the first entry restart the scan
/// (`Some(None)`). A known offset resumes after that entry and forgets
/// anything emitted past it. Returns `None` for an offset never handed out.
fn resume_marker(names: &mut Vec<String>, offset: i64) -> Option<Option<String>> {
    if offset < FIRST_ENTRY_OFFSET {
        names.clear();
        return Some(None);
    }
    let index = usize::try_from(offset - FIRST_ENTRY_OFFSET).ok()?;
    let name = names.get(index)?.clone();
    names.truncate(index + 1);
    Some(Some(name))
}

/// Bidirectional inode <-> virtual path map.
///
/// Inodes are never reused; the set of paths a loader looks up is small.
#[derive(Debug)]
pub struct InodeTable {
    paths: HashMap<u64, VirtualPath>,
    inodes: HashMap<VirtualPath, u64>,
    next: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        let mut table = Self {
            paths: HashMap::new(),
            inodes: HashMap::new(),
            next: FUSE_ROOT_ID + 1,
        };
        table.paths.insert(FUSE_ROOT_ID, VirtualPath::root());
        table.inodes.insert(VirtualPath::root(), FUSE_ROOT_ID);
        table
    }
}

impl InodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inode of `path`, assigning a new one on first sight.
    pub fn assign(&mut self, path: &VirtualPath) -> u64 {
        if let Some(&ino) = self.inodes.get(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.clone());
        self.inodes.insert(path.clone(), ino);
        ino
    }

    pub fn path(&self, ino: u64) -> Option<&VirtualPath> {
        self.paths.get(&ino)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// FUSE filesystem serving a lazily populated ROM cache.
pub struct RompathFuseFS<F> {
    engine: FsEngine<F>,
    inodes: InodeTable,
    /// Names emitted so far per open directory handle, indexed by offset.
    dir_names: HashMap<u64, Vec<String>>,
    uid: u32,
    gid: u32,
}

impl<F: Fetcher + 'static> RompathFuseFS<F> {
    pub fn new(engine: FsEngine<F>) -> Self {
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        Self {
            engine,
            inodes: InodeTable::new(),
            dir_names: HashMap::new(),
            uid,
            gid,
        }
    }

    pub fn engine(&self) -> &FsEngine<F> {
        &self.engine
    }

    /// Whether a lookup of `path` should be issued as a directory open.
    pub fn is_directory_request(&self, path: &VirtualPath) -> bool {
        let local = self.engine.router().local_path(path);
        if self.engine.cache().is_dir(&local) {
            return true;
        }
        path.depth() == 1 && path.file_name().is_some_and(|name| !name.contains('.'))
    }

    fn attr(&self, ino: u64, info: &FileInfo) -> FileAttr {
        let (kind, perm) = if info.is_dir {
            (FileType::Directory, 0o555)
        } else {
            (FileType::RegularFile, 0o444)
        };
        FileAttr {
            ino,
            size: info.size,
            blocks: info.size.div_ceil(BLOCK_SIZE as u64),
            atime: info.accessed,
            mtime: info.modified,
            ctime: info.changed,
            crtime: info.created,
            kind,
            perm,
            nlink: info.hard_links,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    fn stat(&self, path: &VirtualPath) -> Result<FileInfo, FsError> {
        let options = if path.is_root() || self.is_directory_request(path) {
            OpenOptions::directory()
        } else {
            OpenOptions::file()
        };
        self.engine.stat(&path.to_string(), options)
    }

    fn path_of(&self, ino: u64) -> Result<VirtualPath, FsError> {
        self.inodes.path(ino).cloned().ok_or(FsError::NotFound)
    }
}

/// Feeds engine entries into a FUSE directory reply.
struct ReplySink<'a> {
    reply: &'a mut ReplyDirectory,
    names: &'a mut Vec<String>,
    inodes: &'a mut InodeTable,
    dir: &'a VirtualPath,
}

impl DirSink for ReplySink<'_> {
    fn push(&mut self, entry: &DirEntry) -> bool {
        let Ok(path) = self.dir.join(&entry.name) else {
            // Not representable as a virtual path; skip it.
            return false;
        };
        let ino = self.inodes.assign(&path);
        let kind = if entry.info.is_dir {
            FileType::Directory
        } else {
            FileType::RegularFile
        };
        let offset = FIRST_ENTRY_OFFSET + self.names.len() as i64;
        let full = self.reply.add(ino, offset, kind, &entry.name);
        if !full {
            self.names.push(entry.name.clone());
        }
        full
    }
}

impl<F: Fetcher + 'static> Filesystem for RompathFuseFS<F> {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = name.to_string_lossy();
        trace!("lookup(parent={}, name='{}')", parent, name);

        let path = match self.path_of(parent).and_then(|p| p.join(&name)) {
            Ok(path) => path,
            Err(e) => {
                reply.error(errno(&e));
                return;
            }
        };

        match self.stat(&path) {
            Ok(info) => {
                let ino = self.inodes.assign(&path);
                reply.entry(&TTL, &self.attr(ino, &info), 0);
            }
            Err(e) => {
                debug!("lookup: {} -> {}", path, e);
                reply.error(errno(&e));
            }
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        trace!("getattr(ino={}, fh={:?})", ino, fh);

        let info = match fh {
            Some(fh) => self.engine.get_file_info(FileHandle::from_raw(fh)),
            None => self.path_of(ino).and_then(|path| self.stat(&path)),
        };
        match info {
            Ok(info) => reply.attr(&TTL, &self.attr(ino, &info)),
            Err(e) => {
                warn!("getattr: inode {} -> {}", ino, e);
                reply.error(errno(&e));
            }
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!("open(ino={}, flags={:#x})", ino, flags);

        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(e) => {
                reply.error(errno(&e));
                return;
            }
        };
        if ino == FUSE_ROOT_ID {
            reply.error(EISDIR);
            return;
        }

        let (handle, _info) = match self.engine.open(&path.to_string(), OpenOptions::file()) {
            Ok(opened) => opened,
            Err(e) => {
                reply.error(errno(&e));
                return;
            }
        };

        let wants_write = flags & libc::O_ACCMODE != libc::O_RDONLY;
        if wants_write || flags & libc::O_TRUNC != 0 {
            let status = self.engine.overwrite(handle).err().unwrap_or(FsError::WriteProtected);
            self.engine.close(Some(handle));
            reply.error(errno(&status));
            return;
        }

        reply.opened(handle.raw(), 0);
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!("read(ino={}, fh={}, offset={}, size={})", ino, fh, offset, size);

        if offset < 0 {
            reply.error(EINVAL);
            return;
        }

        let mut buffer = vec![0u8; size as usize];
        match self
            .engine
            .read(FileHandle::from_raw(fh), offset as u64, &mut buffer)
        {
            Ok(read) => reply.data(&buffer[..read]),
            Err(FsError::EndOfFile) => reply.data(&[]),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let handle = FileHandle::from_raw(fh);
        self.engine.cleanup(Some(handle));
        self.engine.close(Some(handle));
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        trace!("opendir(ino={})", ino);

        let opened = self
            .path_of(ino)
            .and_then(|path| self.engine.open(&path.to_string(), OpenOptions::directory()));
        match opened {
            Ok((handle, info)) if info.is_dir => {
                self.dir_names.insert(handle.raw(), Vec::new());
                reply.opened(handle.raw(), 0);
            }
            Ok((handle, _)) => {
                self.engine.close(Some(handle));
                reply.error(ENOTDIR);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!("readdir(ino={}, fh={}, offset={})", ino, fh, offset);

        let dir = match self.path_of(ino) {
            Ok(dir) => dir,
            Err(e) => {
                reply.error(errno(&e));
                return;
            }
        };
        let parent_ino = dir
            .parent()
            .map(|p| self.inodes.assign(&p))
            .unwrap_or(FUSE_ROOT_ID);
        let Some(names) = self.dir_names.get_mut(&fh) else {
            reply.error(EBADF);
            return;
        };

        // "." and ".." occupy offsets 1 and 2.
        if offset < 1 && reply.add(ino, 1, FileType::Directory, ".") {
            reply.ok();
            return;
        }
        if offset < 2 && reply.add(parent_ino, 2, FileType::Directory, "..") {
            reply.ok();
            return;
        }

        let Some(marker) = resume_marker(names, offset) else {
            warn!("readdir: stale offset {} for fh {}", offset, fh);
            reply.ok();
            return;
        };

        let mut sink = ReplySink {
            reply: &mut reply,
            names,
            inodes: &mut self.inodes,
            dir: &dir,
        };
        match self
            .engine
            .read_directory(FileHandle::from_raw(fh), marker.as_deref(), &mut sink)
        {
            Ok(page) => {
                trace!("readdir: emitted {} (exhausted={})", page.emitted, page.exhausted);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn releasedir(&mut self, _req: &Request, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        self.dir_names.remove(&fh);
        let handle = FileHandle::from_raw(fh);
        self.engine.cleanup(Some(handle));
        self.engine.close(Some(handle));
        reply.ok();
    }

    /// Nothing is ever created.
    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        debug!("create(parent={}, name={:?}) rejected", parent, name);
        reply.error(EROFS);
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        trace!("statfs");

        let volume = self.engine.volume_info();
        let block = BLOCK_SIZE as u64;
        let free = volume.free_size / block;
        reply.statfs(
            volume.total_size / block,
            free,
            free,
            self.inodes.len() as u64,
            0,
            BLOCK_SIZE,
            NAME_MAX,
            BLOCK_SIZE,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use rompath_fetch::{FetchError, FetchOutcome};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    struct NoNetwork;

    impl Fetcher for NoNetwork {
        fn fetch(&self, url: &str, _destination: &Path) -> rompath_fetch::Result<FetchOutcome> {
            Err(FetchError::Status {
                status: 404,
                url: url.to_string(),
            })
        }
    }

    fn fs_over(cache: &Path) -> RompathFuseFS<NoNetwork> {
        let config = EngineConfig::new(cache, "https://host/download/");
        RompathFuseFS::new(FsEngine::new(config, NoNetwork))
    }

    fn vp(raw: &str) -> VirtualPath {
        VirtualPath::parse(raw).unwrap()
    }

    #[test]
    fn readdir_offsets_map_to_markers() {
        let mut names: Vec<String> = ["a", "b", "c"].map(String::from).to_vec();

        // Offsets 0..=2 cover "." and ".." and restart the scan.
        for offset in 0..FIRST_ENTRY_OFFSET {
            let mut fresh = names.clone();
            assert_eq!(resume_marker(&mut fresh, offset), Some(None));
            assert!(fresh.is_empty());
        }

        // Offset 3 + k resumes after entry k.
        let mut resumed = names.clone();
        assert_eq!(resume_marker(&mut resumed, 4), Some(Some("b".to_string())));
        assert_eq!(resumed, ["a", "b"].map(String::from).to_vec());

        assert_eq!(resume_marker(&mut names, 5), Some(Some("c".to_string())));
        assert_eq!(names.len(), 3);

        // Offsets never handed out leave the state alone.
        assert_eq!(resume_marker(&mut names, 6), None);
        assert_eq!(resume_marker(&mut names, 1000), None);
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn errno_mapping() {
        assert_eq!(errno(&FsError::NotFound), ENOENT);
        assert_eq!(errno(&FsError::AccessDenied), EACCES);
        assert_eq!(errno(&FsError::SharingViolation), EBUSY);
        assert_eq!(errno(&FsError::WriteProtected), EROFS);
        assert_eq!(errno(&FsError::InvalidHandle), EBADF);
        assert_eq!(errno(&FsError::NotImplemented), ENOSYS);
        assert_eq!(errno(&FsError::Internal("boom".into())), EIO);
    }

    #[test]
    fn inode_table_is_stable() {
        let mut table = InodeTable::new();
        assert_eq!(table.path(FUSE_ROOT_ID), Some(&VirtualPath::root()));

        let a = table.assign(&vp("/gameA.zip"));
        let b = table.assign(&vp("/gameB.zip"));
        assert_ne!(a, b);
        assert_ne!(a, FUSE_ROOT_ID);
        assert_eq!(table.assign(&vp("\\gameA.zip")), a);
        assert_eq!(table.path(b), Some(&vp("/gameB.zip")));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn top_level_bare_names_are_directories() {
        let cache = TempDir::new().unwrap();
        fs::create_dir_all(cache.path().join("gameA/sub")).unwrap();
        let fs = fs_over(cache.path());

        assert!(fs.is_directory_request(&vp("/gameB")));
        assert!(!fs.is_directory_request(&vp("/gameB.zip")));
        assert!(!fs.is_directory_request(&vp("/gameA/rom1.bin")));
        assert!(!fs.is_directory_request(&vp("/gameA/missing")));
        assert!(fs.is_directory_request(&vp("/gameA/sub")));
    }

    #[test]
    fn attributes_report_one_link_and_read_only_modes() {
        let cache = TempDir::new().unwrap();
        fs::write(cache.path().join("gameA.zip"), vec![0u8; 1000]).unwrap();
        let fs = fs_over(cache.path());

        let info = fs.stat(&vp("/gameA.zip")).unwrap();
        let attr = fs.attr(7, &info);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.size, 1000);
        assert_eq!(attr.blocks, 2);
        assert_eq!(attr.nlink, 1);
        assert_eq!(attr.perm, 0o444);

        let root = fs.attr(FUSE_ROOT_ID, &fs.stat(&VirtualPath::root()).unwrap());
        assert_eq!(root.kind, FileType::Directory);
        assert_eq!(root.nlink, 1);
        assert_eq!(fs.engine().open_handles(), 0);
    }

    #[test]
    fn leaf_member_lookup_is_not_found() {
        let cache = TempDir::new().unwrap();
        let fs = fs_over(cache.path());

        assert_eq!(fs.stat(&vp("/gameA/rom1.bin")).unwrap_err(), FsError::NotFound);
    }
}
