//! Unified error surface and exit codes for controller runs.

use thiserror::Error;

use crate::options::OptionsError;
use crate::process::daemonizer::DaemonizeError;
use crate::process::guard::PidFileError;
use crate::process::identity::IdentityError;
use crate::service::ServiceError;
use crate::signal::SignalError;

/// Errors surfaced while sequencing a controller run.
///
/// Every variant names the lifecycle phase it arose in and carries the
/// underlying cause, so a failed run can be diagnosed without re-running.
#[derive(Debug, Error)]
pub enum RunError {
    /// The options failed validation; no side effect occurred.
    #[error("invalid options: {source}")]
    Config {
        /// Underlying validation error.
        #[from]
        source: OptionsError,
    },
    /// The initialization hook failed.
    #[error("initialization hook failed: {source}")]
    Init {
        /// Error returned by the hook.
        source: ServiceError,
    },
    /// Claiming or updating the pidfile failed.
    #[error("pidfile unavailable: {source}")]
    PidFile {
        /// Underlying pidfile error.
        #[from]
        source: PidFileError,
    },
    /// Detaching into the background failed.
    #[error("failed to daemonise: {source}")]
    Daemonize {
        /// Underlying daemonisation error.
        #[from]
        source: DaemonizeError,
    },
    /// Subscribing to process signals failed.
    #[error("failed to install signal coordinator: {source}")]
    Signals {
        /// Underlying signal error.
        #[from]
        source: SignalError,
    },
    /// Switching to the requested identity failed.
    #[error("failed to drop privileges: {source}")]
    Identity {
        /// Underlying identity error.
        #[from]
        source: IdentityError,
    },
    /// The periodic hook reported a fatal error; shutdown still ran.
    #[error("periodic hook failed: {source}")]
    Tick {
        /// Error returned by the hook.
        source: ServiceError,
    },
    /// The periodic hook panicked; shutdown still ran.
    #[error("periodic hook panicked")]
    TickPanic,
    /// The shutdown hook failed; teardown still completed.
    #[error("shutdown hook failed: {source}")]
    Shutdown {
        /// Error returned by the hook.
        source: ServiceError,
    },
}

impl RunError {
    /// Process exit code this failure maps to.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config { .. } => ExitCode::InvalidOptions,
            Self::Init { .. } => ExitCode::InitFailed,
            Self::PidFile { .. }
            | Self::Daemonize { .. }
            | Self::Signals { .. }
            | Self::Identity { .. } => ExitCode::SetupFailed,
            Self::Tick { .. } | Self::TickPanic | Self::Shutdown { .. } => ExitCode::ShutdownFailed,
        }
    }
}

/// Shell-visible exit codes for a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Clean stop.
    Clean,
    /// Options failed validation.
    InvalidOptions,
    /// The initialization hook failed.
    InitFailed,
    /// Daemonization, pidfile, signal, or privilege setup failed.
    SetupFailed,
    /// A failure after startup completed: a fatal tick or shutdown error.
    ShutdownFailed,
}

impl ExitCode {
    /// Numeric code handed to the shell.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Clean => 0,
            Self::InvalidOptions => 1,
            Self::InitFailed => 2,
            Self::SetupFailed => 3,
            Self::ShutdownFailed => 4,
        }
    }

    /// `true` for a clean stop.
    #[must_use]
    pub fn is_clean(self) -> bool {
        matches!(self, Self::Clean)
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        Self::from(code.code())
    }
}
