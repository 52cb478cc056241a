//! Pidfile custody: claim, stale reclamation, commit, and removal.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{info, warn};

use super::PROCESS_TARGET;
use super::files::atomic_write;
use crate::options::ResolvedIdentity;

const PIDFILE_MODE: u32 = 0o644;

/// Errors surfaced while managing the pidfile.
#[derive(Debug, Error)]
pub enum PidFileError {
    /// A live process already holds the pidfile.
    #[error("daemon already running with pid {pid} (pidfile '{path}')")]
    AlreadyRunning {
        /// PID recorded in the existing pidfile.
        pid: u32,
        /// Contested pidfile path.
        path: PathBuf,
    },
    /// Creating the pidfile failed.
    #[error("failed to create pidfile '{path}': {source}")]
    Create {
        /// Pidfile path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the process id failed.
    #[error("failed to write pidfile '{path}': {source}")]
    Write {
        /// Pidfile path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Removing a stale pidfile failed.
    #[error("failed to remove stale pidfile '{path}': {source}")]
    Cleanup {
        /// Pidfile path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Probing the recorded process failed.
    #[error("failed to check existing process {pid}: {source}")]
    CheckProcess {
        /// PID that failed to probe.
        pid: u32,
        /// Underlying OS error.
        source: Errno,
    },
    /// Changing pidfile ownership failed.
    #[error("failed to change ownership of pidfile '{path}': {source}")]
    Ownership {
        /// Pidfile path.
        path: PathBuf,
        /// Underlying OS error.
        source: Errno,
    },
}

/// A claimed pidfile; the record is removed when the guard drops.
///
/// The claim happens before the process detaches so conflicts surface on
/// the invoking terminal; [`commit`](Self::commit) rewrites the record with
/// the post-fork pid once detaching has completed.
#[derive(Debug)]
pub(crate) struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Claims `path`, reclaiming stale records left by dead processes.
    pub(crate) fn claim(path: &Path) -> Result<Self, PidFileError> {
        let mut file = create_claim(path)?;
        // Record the claiming pid straight away so the window in which the
        // file exists without a parseable pid stays negligible.
        writeln!(file, "{}", std::process::id()).map_err(|source| PidFileError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        file.sync_all().map_err(|source| PidFileError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            target: PROCESS_TARGET,
            file = %path.display(),
            "pidfile claimed"
        );
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Records `pid` as the live daemon process.
    pub(crate) fn commit(&self, pid: u32) -> Result<(), PidFileError> {
        let contents = format!("{pid}\n");
        atomic_write(&self.path, contents.as_bytes(), PIDFILE_MODE).map_err(|source| {
            PidFileError::Write {
                path: self.path.clone(),
                source,
            }
        })?;
        info!(
            target: PROCESS_TARGET,
            pid,
            file = %self.path.display(),
            "pidfile committed"
        );
        Ok(())
    }

    /// Hands the record to the identity the run drops to, so the file stays
    /// removable after privileges are gone.
    pub(crate) fn apply_ownership(&self, identity: &ResolvedIdentity) -> Result<(), PidFileError> {
        if identity.is_empty() {
            return Ok(());
        }
        nix::unistd::chown(&self.path, identity.uid, identity.gid).map_err(|source| {
            PidFileError::Ownership {
                path: self.path.clone(),
                source,
            }
        })?;
        info!(
            target: PROCESS_TARGET,
            file = %self.path.display(),
            uid = ?identity.uid,
            gid = ?identity.gid,
            "pidfile ownership applied"
        );
        Ok(())
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                warn!(
                    target: PROCESS_TARGET,
                    file = %self.path.display(),
                    error = %error,
                    "failed to remove pidfile"
                );
            }
            _ => {}
        }
    }
}

fn create_claim(path: &Path) -> Result<File, PidFileError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(PIDFILE_MODE);
    }
    match options.open(path) {
        Ok(file) => Ok(file),
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => reclaim_stale(path),
        Err(source) => Err(PidFileError::Create {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn reclaim_stale(path: &Path) -> Result<File, PidFileError> {
    if let Some(pid) = read_pid(path)
        && pid != 0
    {
        match process_alive(pid) {
            Ok(true) => {
                info!(
                    target: PROCESS_TARGET,
                    pid,
                    "refusing to start: existing daemon alive"
                );
                return Err(PidFileError::AlreadyRunning {
                    pid,
                    path: path.to_path_buf(),
                });
            }
            Ok(false) => {
                warn!(
                    target: PROCESS_TARGET,
                    pid,
                    file = %path.display(),
                    "recorded process not running; reclaiming stale pidfile"
                );
            }
            Err(error) => return Err(error),
        }
    }
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(PidFileError::Cleanup {
                path: path.to_path_buf(),
                source,
            });
        }
    }
    create_claim(path)
}

fn read_pid(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse::<u32>().ok()
}

fn process_alive(pid: u32) -> Result<bool, PidFileError> {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => Ok(true),
        Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) | Err(Errno::ECHILD) => Ok(false),
        Err(source) => Err(PidFileError::CheckProcess { pid, source }),
    }
}
