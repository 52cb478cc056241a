//! Caller-populated run options and their up-front validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::unistd::{Gid, Group, Uid, User};
use thiserror::Error;

/// A user or group reference, by name or numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Resolved against the system account database during validation.
    Name(String),
    /// Used as-is, without a database lookup.
    Id(u32),
}

/// Errors reported by options validation.
#[derive(Debug, Error)]
pub enum OptionsError {
    /// The tick interval must be positive.
    #[error("interval must be greater than zero")]
    ZeroInterval,
    /// The requested user does not exist.
    #[error("unknown user '{name}'")]
    UnknownUser {
        /// Name that failed to resolve.
        name: String,
    },
    /// The requested group does not exist.
    #[error("unknown group '{name}'")]
    UnknownGroup {
        /// Name that failed to resolve.
        name: String,
    },
    /// The account database could not be queried.
    #[error("failed to query the account database for '{name}': {source}")]
    Lookup {
        /// Name whose lookup failed.
        name: String,
        /// Underlying OS error.
        source: nix::Error,
    },
}

/// Requested identity resolved to raw ids, ready to apply.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ResolvedIdentity {
    pub(crate) uid: Option<Uid>,
    pub(crate) gid: Option<Gid>,
}

impl ResolvedIdentity {
    pub(crate) fn is_empty(&self) -> bool {
        self.uid.is_none() && self.gid.is_none()
    }
}

/// Immutable configuration for one controller run.
///
/// Populated by the caller's argument-parsing layer; the controller
/// validates it once, before any side effect, and never mutates it. The
/// default shape is a foreground run logging to the inherited streams.
#[derive(Debug, Clone)]
pub struct Options {
    interval: Duration,
    daemon: bool,
    stdout: bool,
    logfile: Option<PathBuf>,
    pidfile: Option<PathBuf>,
    user: Option<Identity>,
    group: Option<Identity>,
    config_path: Option<PathBuf>,
    immediate_first_tick: bool,
}

impl Options {
    /// Foreground options with the given tick interval.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            daemon: false,
            stdout: true,
            logfile: None,
            pidfile: None,
            user: None,
            group: None,
            config_path: None,
            immediate_first_tick: false,
        }
    }

    /// Requests background execution.
    #[must_use]
    pub fn with_daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    /// Keeps the standard streams attached instead of redirecting them.
    #[must_use]
    pub fn with_stdout(mut self, stdout: bool) -> Self {
        self.stdout = stdout;
        self
    }

    /// Log sink the daemonizer redirects the standard streams to.
    #[must_use]
    pub fn with_logfile(mut self, logfile: impl Into<PathBuf>) -> Self {
        self.logfile = Some(logfile.into());
        self
    }

    /// Path of the pidfile recording the live daemon.
    #[must_use]
    pub fn with_pidfile(mut self, pidfile: impl Into<PathBuf>) -> Self {
        self.pidfile = Some(pidfile.into());
        self
    }

    /// User identity to drop to before the run loop starts.
    #[must_use]
    pub fn with_user(mut self, user: Identity) -> Self {
        self.user = Some(user);
        self
    }

    /// Group identity to drop to before the run loop starts.
    #[must_use]
    pub fn with_group(mut self, group: Identity) -> Self {
        self.group = Some(group);
        self
    }

    /// Configuration file path carried through to the service hooks.
    #[must_use]
    pub fn with_config_path(mut self, config_path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(config_path.into());
        self
    }

    /// Fires the first tick immediately instead of after one interval.
    #[must_use]
    pub fn with_immediate_first_tick(mut self, immediate: bool) -> Self {
        self.immediate_first_tick = immediate;
        self
    }

    /// Interval between scheduled ticks.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the run detaches into the background.
    #[must_use]
    pub fn daemon(&self) -> bool {
        self.daemon
    }

    /// Whether the standard streams stay attached.
    #[must_use]
    pub fn stdout(&self) -> bool {
        self.stdout
    }

    /// Configured log sink, if any.
    #[must_use]
    pub fn logfile(&self) -> Option<&Path> {
        self.logfile.as_deref()
    }

    /// Configured pidfile path, if any.
    #[must_use]
    pub fn pidfile(&self) -> Option<&Path> {
        self.pidfile.as_deref()
    }

    /// Requested user identity, if any.
    #[must_use]
    pub fn user(&self) -> Option<&Identity> {
        self.user.as_ref()
    }

    /// Requested group identity, if any.
    #[must_use]
    pub fn group(&self) -> Option<&Identity> {
        self.group.as_ref()
    }

    /// Configuration file path for the caller's own loading layer.
    #[must_use]
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Whether the first tick fires without waiting one interval.
    #[must_use]
    pub fn immediate_first_tick(&self) -> bool {
        self.immediate_first_tick
    }

    /// Validates the options and resolves the requested identity.
    ///
    /// Runs before any side effect; a failure here leaves the process
    /// untouched.
    pub(crate) fn validate(&self) -> Result<ResolvedIdentity, OptionsError> {
        if self.interval.is_zero() {
            return Err(OptionsError::ZeroInterval);
        }
        let uid = match &self.user {
            None => None,
            Some(Identity::Id(id)) => Some(Uid::from_raw(*id)),
            Some(Identity::Name(name)) => Some(resolve_user(name)?),
        };
        let gid = match &self.group {
            None => None,
            Some(Identity::Id(id)) => Some(Gid::from_raw(*id)),
            Some(Identity::Name(name)) => Some(resolve_group(name)?),
        };
        Ok(ResolvedIdentity { uid, gid })
    }
}

fn resolve_user(name: &str) -> Result<Uid, OptionsError> {
    match User::from_name(name) {
        Ok(Some(user)) => Ok(user.uid),
        Ok(None) => Err(OptionsError::UnknownUser {
            name: name.to_owned(),
        }),
        Err(source) => Err(OptionsError::Lookup {
            name: name.to_owned(),
            source,
        }),
    }
}

fn resolve_group(name: &str) -> Result<Gid, OptionsError> {
    match Group::from_name(name) {
        Ok(Some(group)) => Ok(group.gid),
        Ok(None) => Err(OptionsError::UnknownGroup {
            name: name.to_owned(),
        }),
        Err(source) => Err(OptionsError::Lookup {
            name: name.to_owned(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_a_foreground_run() {
        let options = Options::new(Duration::from_secs(10));
        assert!(!options.daemon());
        assert!(options.stdout());
        assert!(!options.immediate_first_tick());
        assert!(options.pidfile().is_none());
        assert!(options.logfile().is_none());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let error = Options::new(Duration::ZERO)
            .validate()
            .expect_err("zero interval should fail validation");
        assert!(matches!(error, OptionsError::ZeroInterval));
    }

    #[test]
    fn numeric_identities_pass_without_lookup() {
        let resolved = Options::new(Duration::from_secs(1))
            .with_user(Identity::Id(12345))
            .with_group(Identity::Id(54321))
            .validate()
            .expect("numeric identities should validate");
        assert_eq!(resolved.uid.map(Uid::as_raw), Some(12345));
        assert_eq!(resolved.gid.map(Gid::as_raw), Some(54321));
    }

    #[test]
    fn unknown_user_name_is_rejected() {
        let error = Options::new(Duration::from_secs(1))
            .with_user(Identity::Name("no-such-user-arbiter".to_owned()))
            .validate()
            .expect_err("unknown user should fail validation");
        assert!(matches!(error, OptionsError::UnknownUser { name } if name == "no-such-user-arbiter"));
    }

    #[test]
    fn root_user_resolves_to_uid_zero() {
        let resolved = Options::new(Duration::from_secs(1))
            .with_user(Identity::Name("root".to_owned()))
            .validate()
            .expect("root should resolve on unix hosts");
        assert_eq!(resolved.uid.map(Uid::as_raw), Some(0));
    }
}
