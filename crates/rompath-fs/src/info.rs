use std::fs::Metadata;
use std::time::{SystemTime, UNIX_EPOCH};

/// Attributes reported for a file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
    pub allocation_size: u64,
    pub is_dir: bool,
    pub created: SystemTime,
    pub accessed: SystemTime,
    pub modified: SystemTime,
    pub changed: SystemTime,
    /// Always [`FileInfo::HARD_LINKS`]; some ROM loaders reject higher counts.
    pub hard_links: u32,
}

impl FileInfo {
    pub const HARD_LINKS: u32 = 1;

    /// Build from live metadata, overriding the link count.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
        let size = if metadata.is_dir() { 0 } else { metadata.len() };
        Self {
            size,
            allocation_size: size,
            is_dir: metadata.is_dir(),
            created: metadata.created().unwrap_or(modified),
            accessed: metadata.accessed().unwrap_or(modified),
            modified,
            changed: modified,
            hard_links: Self::HARD_LINKS,
        }
    }
}

/// One directory enumeration entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub info: FileInfo,
}

/// Synthetic volume description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub total_size: u64,
    pub free_size: u64,
    pub label: String,
}
