//! Post-run ownership normalization (`chown -R`).
//!
//! Runs once after every transaction has finished, over the trees a run
//! wrote into: the backup tree in overwrite mode, the output tree in copy
//! mode. Owners are given as `user[:group]`, where each part is a name or a
//! numeric id and either part may be omitted (`:staff`, `1000`).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OwnershipError {
    #[error("owner specification cannot be empty")]
    Empty,
    #[error("user '{0}' not found")]
    UnknownUser(String),
    #[error("group '{0}' not found")]
    UnknownGroup(String),
    #[error("failed to resolve '{name}': {reason}")]
    Lookup { name: String, reason: String },
    #[error("failed to traverse {} while adjusting ownership: {source}", .root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("failed to apply ownership to {}: {reason}", .path.display())]
    Chown { path: PathBuf, reason: String },
    #[error("ownership adjustments require a Unix-like platform")]
    Unsupported,
}

/// Parsed `user[:group]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerSpec {
    pub user: Option<String>,
    pub group: Option<String>,
}

impl FromStr for OwnerSpec {
    type Err = OwnershipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let part = |p: &str| {
            let p = p.trim();
            (!p.is_empty()).then(|| p.to_string())
        };
        let (user, group) = match s.split_once(':') {
            Some((user, group)) => (part(user), part(group)),
            None => (part(s), None),
        };
        if user.is_none() && group.is_none() {
            return Err(OwnershipError::Empty);
        }
        Ok(Self { user, group })
    }
}

impl fmt::Display for OwnerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.user, &self.group) {
            (Some(u), Some(g)) => write!(f, "{u}:{g}"),
            (Some(u), None) => f.write_str(u),
            (None, Some(g)) => write!(f, ":{g}"),
            (None, None) => Ok(()),
        }
    }
}

/// Recursively apply `spec` to every entry under each of `roots`.
///
/// Roots that do not exist are skipped. Returns the number of entries changed.
#[cfg(unix)]
pub fn normalize(spec: &OwnerSpec, roots: &[PathBuf]) -> Result<u64, OwnershipError> {
    use nix::unistd::chown;
    use walkdir::WalkDir;

    let uid = spec.user.as_deref().map(resolve_user).transpose()?;
    let gid = spec.group.as_deref().map(resolve_group).transpose()?;

    let mut changed = 0;
    for root in roots.iter().filter(|r| r.exists()) {
        for entry in WalkDir::new(root) {
            let entry = entry.map_err(|source| OwnershipError::Walk {
                root: root.clone(),
                source,
            })?;
            chown(entry.path(), uid, gid).map_err(|e| OwnershipError::Chown {
                path: entry.path().to_path_buf(),
                reason: e.to_string(),
            })?;
            changed += 1;
        }
        tracing::debug!(root = %root.display(), owner = %spec, "ownership applied");
    }
    Ok(changed)
}

#[cfg(not(unix))]
pub fn normalize(_spec: &OwnerSpec, _roots: &[PathBuf]) -> Result<u64, OwnershipError> {
    Err(OwnershipError::Unsupported)
}

#[cfg(unix)]
fn resolve_user(name: &str) -> Result<nix::unistd::Uid, OwnershipError> {
    use nix::unistd::{Uid, User};

    if let Ok(id) = name.parse::<u32>() {
        return Ok(Uid::from_raw(id));
    }
    User::from_name(name)
        .map_err(|e| OwnershipError::Lookup {
            name: name.to_string(),
            reason: e.to_string(),
        })?
        .map(|user| user.uid)
        .ok_or_else(|| OwnershipError::UnknownUser(name.to_string()))
}

#[cfg(unix)]
fn resolve_group(name: &str) -> Result<nix::unistd::Gid, OwnershipError> {
    use nix::unistd::{Gid, Group};

    if let Ok(id) = name.parse::<u32>() {
        return Ok(Gid::from_raw(id));
    }
    Group::from_name(name)
        .map_err(|e| OwnershipError::Lookup {
            name: name.to_string(),
            reason: e.to_string(),
        })?
        .map(|group| group.gid)
        .ok_or_else(|| OwnershipError::UnknownGroup(name.to_string()))
}

/// Convenience for callers holding the raw config string.
pub fn normalize_str(owner: &str, roots: &[PathBuf]) -> Result<u64, OwnershipError> {
    let spec: OwnerSpec = owner.parse()?;
    normalize(&spec, roots)
}
