//! Paths in the mounted namespace.

use crate::error::{FsError, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// A normalized path in the mounted namespace.
///
/// Accepts both `\` and `/` as separators, so `\gameA\rom1.bin` and
/// `/gameA/rom1.bin` are the same path. Empty and `.` components are
/// dropped; `..` is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VirtualPath {
    components: Vec<String>,
}

impl VirtualPath {
    /// The mount root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a path as delivered by the host framework.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut components = Vec::new();
        for part in raw.split(['/', '\\']) {
            match part {
                "" | "." => continue,
                ".." => return Err(FsError::AccessDenied),
                name if name.contains('\0') => return Err(FsError::NotFound),
                name => components.push(name.to_string()),
            }
        }
        Ok(Self { components })
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Final component, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// Parent path, `None` for the root.
    pub fn parent(&self) -> Option<VirtualPath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    /// Append a single component.
    pub fn join(&self, name: &str) -> Result<VirtualPath> {
        if name.is_empty() || name == "." || name.contains(['/', '\\', '\0']) {
            return Err(FsError::NotFound);
        }
        if name == ".." {
            return Err(FsError::AccessDenied);
        }
        let mut components = self.components.clone();
        components.push(name.to_string());
        Ok(Self { components })
    }

    /// Location of this path inside the cache mirror.
    pub fn to_local(&self, cache_root: &Path) -> PathBuf {
        let mut local = cache_root.to_path_buf();
        local.extend(&self.components);
        local
    }

    /// URL form: `/a/b`, or `/` for the root.
    pub fn to_url_path(&self) -> String {
        if self.is_root() {
            return "/".to_string();
        }
        let mut out = String::new();
        for component in &self.components {
            out.push('/');
            out.push_str(component);
        }
        out
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url_path())
    }
}
