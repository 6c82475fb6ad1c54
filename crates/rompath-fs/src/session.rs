//! Mount registration with the host framework.

use log::{error, info, warn};
use std::io;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

/// Base of every filesystem name this crate registers.
pub const FS_NAME: &str = "cloud-rompath";

/// Attempts in [`MountMode::Shared`] before falling back.
pub const REGISTER_ATTEMPTS: u32 = 5;

/// How the volume is exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    /// Visible to all users; registered under a uniquely suffixed name.
    Shared,
    /// Visible to the mounting user only; fixed name.
    Private,
}

/// Parameters of one registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeParams {
    pub fs_name: String,
    pub mode: MountMode,
}

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    /// The identifier is already taken; retry with another one.
    #[error("mount name collision: {0}")]
    NameCollision(String),
    #[error("mount failed: {0}")]
    Io(#[from] io::Error),
}

/// A framework able to register the filesystem callbacks and start
/// dispatching them.
pub trait MountHost {
    /// Keeps the filesystem mounted while alive.
    type Session;

    fn register(&mut self, params: &VolumeParams) -> Result<Self::Session, MountError>;
}

/// A mounted filesystem.
#[derive(Debug)]
pub struct MountSession<S> {
    session: S,
    params: VolumeParams,
}

impl<S> MountSession<S> {
    /// Register with suffixes derived from the current time.
    pub fn register<H>(host: &mut H) -> Result<Self, MountError>
    where
        H: MountHost<Session = S>,
    {
        Self::register_with(host, time_suffix)
    }

    /// Register in [`MountMode::Shared`] under `FS_NAME + suffix(attempt)`,
    /// retrying name collisions up to [`REGISTER_ATTEMPTS`] times, then fall
    /// back to [`MountMode::Private`].
    pub fn register_with<H>(
        host: &mut H,
        mut suffix: impl FnMut(u32) -> String,
    ) -> Result<Self, MountError>
    where
        H: MountHost<Session = S>,
    {
        for attempt in 0..REGISTER_ATTEMPTS {
            let params = VolumeParams {
                fs_name: format!("{}{}", FS_NAME, suffix(attempt)),
                mode: MountMode::Shared,
            };
            info!("Attempting shared mount as {}", params.fs_name);
            match host.register(&params) {
                Ok(session) => return Ok(Self { session, params }),
                Err(MountError::NameCollision(reason)) => {
                    warn!("Name collision ({}), retrying with a fresh suffix...", reason);
                }
                Err(e) => {
                    warn!("Shared mount failed: {}", e);
                    break;
                }
            }
        }

        warn!("Shared mount attempts failed. Falling back to private mode...");
        let params = VolumeParams {
            fs_name: format!("{}-private", FS_NAME),
            mode: MountMode::Private,
        };
        match host.register(&params) {
            Ok(session) => Ok(Self { session, params }),
            Err(e) => {
                error!("All mount attempts failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn params(&self) -> &VolumeParams {
        &self.params
    }

    pub fn into_inner(self) -> S {
        self.session
    }

    /// Block for the lifetime of the process.
    pub fn wait(self) -> ! {
        let _session = self.session;
        loop {
            thread::park();
        }
    }
}

fn time_suffix(attempt: u32) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    (millis + u128::from(attempt)).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collides on the first `collisions` shared attempts, then follows the failure flags.
    struct ScriptedHost {
        collisions: u32,
        shared_fails: bool,
        private_fails: bool,
        seen: Vec<VolumeParams>,
    }

    impl ScriptedHost {
        fn new(collisions: u32, shared_fails: bool, private_fails: bool) -> Self {
            Self {
                collisions,
                shared_fails,
                private_fails,
                seen: Vec::new(),
            }
        }
    }

    impl MountHost for ScriptedHost {
        type Session = String;

        fn register(&mut self, params: &VolumeParams) -> Result<String, MountError> {
            self.seen.push(params.clone());
            match params.mode {
                MountMode::Shared if self.collisions > 0 => {
                    self.collisions -= 1;
                    Err(MountError::NameCollision(params.fs_name.clone()))
                }
                MountMode::Shared if self.shared_fails => Err(MountError::Io(
                    io::Error::new(io::ErrorKind::PermissionDenied, "allow_other"),
                )),
                MountMode::Private if self.private_fails => {
                    Err(MountError::Io(io::Error::other("no fuse")))
                }
                _ => Ok(params.fs_name.clone()),
            }
        }
    }

    #[test]
    fn retries_collisions_with_fresh_suffixes() {
        let mut host = ScriptedHost::new(2, false, false);
        let session = MountSession::register_with(&mut host, |n| n.to_string()).unwrap();

        assert_eq!(session.params().mode, MountMode::Shared);
        assert_eq!(session.into_inner(), "cloud-rompath2");
        let names: Vec<_> = host.seen.iter().map(|p| p.fs_name.as_str()).collect();
        assert_eq!(names, ["cloud-rompath0", "cloud-rompath1", "cloud-rompath2"]);
    }

    #[test]
    fn falls_back_after_exhausting_attempts() {
        let mut host = ScriptedHost::new(REGISTER_ATTEMPTS, false, false);
        let session = MountSession::register_with(&mut host, |n| n.to_string()).unwrap();

        assert_eq!(session.params().mode, MountMode::Private);
        assert_eq!(session.params().fs_name, "cloud-rompath-private");
        assert_eq!(host.seen.len() as u32, REGISTER_ATTEMPTS + 1);
    }

    #[test]
    fn other_errors_skip_straight_to_fallback() {
        let mut host = ScriptedHost::new(0, true, false);
        let session = MountSession::register_with(&mut host, |n| n.to_string()).unwrap();

        assert_eq!(session.params().mode, MountMode::Private);
        assert_eq!(host.seen.len(), 2);
    }

    #[test]
    fn reports_fallback_failure() {
        let mut host = ScriptedHost::new(0, true, true);
        let err = MountSession::register_with(&mut host, |n| n.to_string()).unwrap_err();

        assert!(matches!(err, MountError::Io(_)));
    }
}
