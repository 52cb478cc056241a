//! Daemonisation backend detaching the process from its session.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;
use crate::options::Options;

/// Abstraction over daemonisation strategies.
pub trait Daemonizer: Send + Sync {
    /// Detaches the process into the background.
    fn daemonize(&self, options: &Options) -> Result<(), DaemonizeError>;
}

/// Errors surfaced by the daemonisation backend.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    /// System-level daemonisation failed.
    #[cfg(unix)]
    #[error("{0}")]
    System(#[from] daemonize_me::DaemonError),
    /// Opening the log sink for stream redirection failed.
    #[error("failed to open log sink '{path}': {source}")]
    LogSink {
        /// Configured logfile path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// This platform has no detach primitive.
    #[error("daemonisation is not supported on this platform")]
    Unsupported,
}

/// Daemoniser that delegates to `daemonize-me`.
#[derive(Debug, Default)]
pub struct SystemDaemonizer;

impl SystemDaemonizer {
    /// Builds a new system daemoniser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
impl Daemonizer for SystemDaemonizer {
    fn daemonize(&self, options: &Options) -> Result<(), DaemonizeError> {
        use daemonize_me::Daemon;

        info!(
            target: PROCESS_TARGET,
            stdout = options.stdout(),
            logfile = options.logfile().map(|path| path.display().to_string()),
            "daemonising into background"
        );
        let mut daemon = Daemon::new();
        daemon = daemon.work_dir("/");
        if !options.stdout()
            && let Some(path) = options.logfile()
        {
            let sink = open_log_sink(path)?;
            let errors = sink
                .try_clone()
                .map_err(|source| DaemonizeError::LogSink {
                    path: path.to_path_buf(),
                    source,
                })?;
            daemon = daemon.stdout(sink).stderr(errors);
        }
        daemon.start()?;
        info!(
            target: PROCESS_TARGET,
            "daemon process detached; continuing in child"
        );
        Ok(())
    }
}

#[cfg(not(unix))]
impl Daemonizer for SystemDaemonizer {
    fn daemonize(&self, _options: &Options) -> Result<(), DaemonizeError> {
        Err(DaemonizeError::Unsupported)
    }
}

#[cfg(unix)]
fn open_log_sink(path: &std::path::Path) -> Result<std::fs::File, DaemonizeError> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| DaemonizeError::LogSink {
            path: path.to_path_buf(),
            source,
        })
}
