//! Registering [`RompathFuseFS`] with the kernel.

use super::adapter::RompathFuseFS;
use crate::engine::FsEngine;
use crate::session::{MountError, MountHost, MountMode, MountSession, VolumeParams};
use fuser::{BackgroundSession, MountOption};
use log::{debug, info};
use rompath_fetch::Fetcher;
use std::io;
use std::path::{Path, PathBuf};

const SUBTYPE: &str = "rompath";

/// [`MountHost`] backed by `fuser::spawn_mount2`.
///
/// Dispatch runs on fuser's background thread; the session unmounts when
/// dropped.
pub struct FuseHost<F> {
    engine: FsEngine<F>,
    mount_point: PathBuf,
}

impl<F: Fetcher + 'static> FuseHost<F> {
    pub fn new<P: Into<PathBuf>>(engine: FsEngine<F>, mount_point: P) -> Self {
        Self {
            engine,
            mount_point: mount_point.into(),
        }
    }

    fn options(params: &VolumeParams) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::RO,
            MountOption::FSName(params.fs_name.clone()),
            MountOption::Subtype(SUBTYPE.to_string()),
            MountOption::DefaultPermissions,
        ];
        if params.mode == MountMode::Shared {
            options.push(MountOption::AllowOther);
            options.push(MountOption::AutoUnmount);
        }
        options
    }
}

impl<F: Fetcher + 'static> MountHost for FuseHost<F> {
    type Session = BackgroundSession;

    fn register(&mut self, params: &VolumeParams) -> Result<BackgroundSession, MountError> {
        let fs = RompathFuseFS::new(self.engine.clone());
        let options = Self::options(params);
        debug!(
            "Mounting {} at {} ({:?})",
            params.fs_name,
            self.mount_point.display(),
            params.mode
        );

        fuser::spawn_mount2(fs, &self.mount_point, &options).map_err(|e| {
            if is_collision(&e) {
                MountError::NameCollision(e.to_string())
            } else {
                MountError::Io(e)
            }
        })
    }
}

fn is_collision(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::AlreadyExists || err.raw_os_error() == Some(libc::EBUSY)
}

/// Mount `engine` at `mount_point` in the background.
///
/// Tries [`MountMode::Shared`] first and falls back to [`MountMode::Private`].
/// The filesystem stays mounted until the returned session is dropped.
pub fn mount<F: Fetcher + 'static>(
    engine: FsEngine<F>,
    mount_point: &Path,
) -> Result<MountSession<BackgroundSession>, MountError> {
    let mut host = FuseHost::new(engine, mount_point);
    let session = MountSession::register(&mut host)?;
    info!(
        "Mounted {} at {} ({:?})",
        session.params().fs_name,
        mount_point.display(),
        session.params().mode
    );
    Ok(session)
}
