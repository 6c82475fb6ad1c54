//! Member extraction through an external archive tool.

use crate::error::ExtractError;
use log::{debug, info, warn};
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

/// Extracts a single member from a cached archive.
pub trait Extractor: Send + Sync {
    fn extract(
        &self,
        archive: &Path,
        member: &str,
        destination: &Path,
    ) -> Result<(), ExtractError>;
}

/// Runs `<program> -xf <archive> -C <dir> <member>`.
///
/// `bsdtar` (the default `tar` on Windows and macOS) reads both `.zip` and
/// `.7z`; GNU tar does not.
#[derive(Debug, Clone)]
pub struct ExternalExtractor {
    program: String,
}

impl Default for ExternalExtractor {
    fn default() -> Self {
        Self::new("tar")
    }
}

impl ExternalExtractor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Extractor for ExternalExtractor {
    fn extract(
        &self,
        archive: &Path,
        member: &str,
        destination: &Path,
    ) -> Result<(), ExtractError> {
        let dest_dir = destination.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dest_dir)?;

        debug!(
            "Extracting {} from {} into {}",
            member,
            archive.display(),
            dest_dir.display()
        );

        let status = Command::new(&self.program)
            .arg("-xf")
            .arg(archive)
            .arg("-C")
            .arg(dest_dir)
            .arg(member)
            .stdin(Stdio::null())
            .status()
            .map_err(|source| ExtractError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            warn!("Extraction failed for {} from {}", member, archive.display());
            return Err(ExtractError::Failed {
                program: self.program.clone(),
                status: status.to_string(),
            });
        }

        if !destination.exists() {
            return Err(ExtractError::Missing(member.to_string()));
        }

        info!("Extracted: {}", member);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_program_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let extractor = ExternalExtractor::new("definitely-not-a-real-tar-binary");

        let err = extractor
            .extract(
                &dir.path().join("gameA.zip"),
                "rom1.bin",
                &dir.path().join("gameA/rom1.bin"),
            )
            .expect_err("spawn should fail");

        assert!(matches!(err, ExtractError::Spawn { .. }));
    }

    #[test]
    fn failing_tool_is_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        let extractor = ExternalExtractor::new("false");

        let err = extractor
            .extract(
                &dir.path().join("gameA.zip"),
                "rom1.bin",
                &dir.path().join("gameA/rom1.bin"),
            )
            .expect_err("false exits nonzero");

        assert!(matches!(err, ExtractError::Failed { .. }));
        // The destination directory is prepared before the tool runs.
        assert!(dir.path().join("gameA").is_dir());
    }

    #[test]
    fn success_without_member_is_missing() {
        let dir = TempDir::new().unwrap();
        let extractor = ExternalExtractor::new("true");

        let err = extractor
            .extract(
                &dir.path().join("gameA.zip"),
                "rom1.bin",
                &dir.path().join("gameA/rom1.bin"),
            )
            .expect_err("nothing was written");

        assert!(matches!(err, ExtractError::Missing(name) if name == "rom1.bin"));
    }
}
