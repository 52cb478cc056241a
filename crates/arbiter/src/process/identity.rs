//! Applies the requested run identity by permanently dropping privileges.

use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;
use crate::options::ResolvedIdentity;

/// Errors surfaced while switching identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Replacing the supplementary group list failed.
    #[error("failed to set supplementary groups: {source}")]
    Groups {
        /// Underlying OS error.
        source: nix::Error,
    },
    /// Switching the group id failed.
    #[error("failed to switch group id to {gid}: {source}")]
    Group {
        /// Requested group id.
        gid: u32,
        /// Underlying OS error.
        source: nix::Error,
    },
    /// Switching the user id failed.
    #[error("failed to switch user id to {uid}: {source}")]
    User {
        /// Requested user id.
        uid: u32,
        /// Underlying OS error.
        source: nix::Error,
    },
}

/// Permanently switches the process to the resolved identity.
///
/// Group identity changes first: once the user id drops, the process no
/// longer has the rights to change groups. A no-op when nothing was
/// requested.
#[cfg(unix)]
pub(crate) fn apply(identity: &ResolvedIdentity) -> Result<(), IdentityError> {
    use nix::unistd::{setgid, setgroups, setuid};

    if let Some(gid) = identity.gid {
        setgroups(&[gid]).map_err(|source| IdentityError::Groups { source })?;
        setgid(gid).map_err(|source| IdentityError::Group {
            gid: gid.as_raw(),
            source,
        })?;
    }
    if let Some(uid) = identity.uid {
        setuid(uid).map_err(|source| IdentityError::User {
            uid: uid.as_raw(),
            source,
        })?;
    }
    if !identity.is_empty() {
        info!(
            target: PROCESS_TARGET,
            uid = ?identity.uid,
            gid = ?identity.gid,
            "dropped privileges"
        );
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn apply(identity: &ResolvedIdentity) -> Result<(), IdentityError> {
    // Identity resolution already failed validation on platforms without
    // an account database; an empty identity is the only value seen here.
    debug_assert!(identity.is_empty());
    Ok(())
}
