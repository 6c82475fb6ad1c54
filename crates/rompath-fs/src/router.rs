//! Request classification and remote routing.

use crate::path::VirtualPath;
use std::path::{Path, PathBuf};

/// The two archive container formats published by the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    /// `.zip` sets, served from the `split` directory.
    Primary,
    /// `.7z` sets, served from the `standalone` directory. Gated by a toggle.
    Secondary,
}

impl ArchiveKind {
    pub const fn extension(self) -> &'static str {
        match self {
            ArchiveKind::Primary => "zip",
            ArchiveKind::Secondary => "7z",
        }
    }

    /// Remote subdirectory holding archives of this kind.
    pub const fn selector(self) -> &'static str {
        match self {
            ArchiveKind::Primary => "split",
            ArchiveKind::Secondary => "standalone",
        }
    }

    pub const fn opposite(self) -> Self {
        match self {
            ArchiveKind::Primary => ArchiveKind::Secondary,
            ArchiveKind::Secondary => ArchiveKind::Primary,
        }
    }

    /// Kind implied by a file name's extension (ASCII case-insensitive).
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        [ArchiveKind::Primary, ArchiveKind::Secondary]
            .into_iter()
            .find(|kind| ext.eq_ignore_ascii_case(kind.extension()))
    }
}

/// How a request for a virtual path must be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The mount root.
    Root { local: PathBuf },
    /// A directory open; the local directory is created if absent.
    Directory { local: PathBuf },
    /// An archive, served from the cache after an on-demand fetch.
    Archive { kind: ArchiveKind, local: PathBuf },
    /// A file that logically lives inside an archive. Never served.
    LeafMember { parent_name: Option<String> },
    /// An archive of a disabled kind.
    Unsupported { kind: ArchiveKind },
}

/// The archive whose virtual directory contains a leaf member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTarget {
    pub virtual_path: VirtualPath,
    pub local: PathBuf,
    pub url: String,
}

/// Classifies virtual paths and computes their cache and remote locations.
#[derive(Debug, Clone)]
pub struct PathRouter {
    cache_root: PathBuf,
    base_url: String,
    enable_secondary: bool,
}

impl PathRouter {
    pub fn new<P: Into<PathBuf>>(cache_root: P, base_url: &str, enable_secondary: bool) -> Self {
        Self {
            cache_root: cache_root.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            enable_secondary,
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn local_path(&self, path: &VirtualPath) -> PathBuf {
        path.to_local(&self.cache_root)
    }

    /// Classify a request. `directory` is the host's explicit directory-open flag.
    pub fn classify(&self, path: &VirtualPath, directory: bool) -> Route {
        if path.is_root() {
            return Route::Root {
                local: self.cache_root.clone(),
            };
        }
        if directory {
            return Route::Directory {
                local: self.local_path(path),
            };
        }

        match path.file_name().and_then(ArchiveKind::from_file_name) {
            Some(ArchiveKind::Secondary) if !self.enable_secondary => Route::Unsupported {
                kind: ArchiveKind::Secondary,
            },
            Some(kind) => Route::Archive {
                kind,
                local: self.local_path(path),
            },
            None => Route::LeafMember {
                parent_name: path
                    .parent()
                    .and_then(|p| p.file_name().map(str::to_string)),
            },
        }
    }

    /// Remote URL of an archive.
    ///
    /// An existing opposite-kind selector in the base URL is swapped for this
    /// kind's selector; if neither is present the selector is appended.
    pub fn remote_url(&self, kind: ArchiveKind, path: &VirtualPath) -> String {
        let canonical = format!("/{}", kind.selector());
        let opposite = format!("/{}", kind.opposite().selector());

        let mut url = self.base_url.clone();
        if let Some(pos) = url.find(&opposite) {
            url.replace_range(pos..pos + opposite.len(), &canonical);
        } else if !url.contains(&canonical) {
            url.push_str(&canonical);
        }
        url.push_str(&path.to_url_path());
        url
    }

    /// The primary archive named after a leaf member's parent directory.
    ///
    /// `\gameA\rom1.bin` maps to `\gameA.zip`. Returns `None` when the member
    /// sits directly in the mount root.
    pub fn sibling_archive(&self, member: &VirtualPath) -> Option<ArchiveTarget> {
        let parent = member.parent()?;
        let parent_name = parent.file_name()?;
        let archive_name = format!("{}.{}", parent_name, ArchiveKind::Primary.extension());
        let virtual_path = parent.parent()?.join(&archive_name).ok()?;

        Some(ArchiveTarget {
            local: self.local_path(&virtual_path),
            url: self.remote_url(ArchiveKind::Primary, &virtual_path),
            virtual_path,
        })
    }
}
