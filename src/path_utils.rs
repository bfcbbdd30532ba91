//! Path utilities shared by local and remote endpoints
//!
//! Tilde expansion for both namespaces plus separator-aware join helpers.
//! Remote SFTP paths always use `/`; local paths use the platform separator.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Environment variable consulted for local tilde expansion
pub const HOME_ENV: &str = "HOME";

/// Home directory could not be determined
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HomeLookupError {
    #[error("Home directory unknown: ${0} is not set")]
    MissingEnv(&'static str),

    #[error("Remote working directory query failed: {0}")]
    Remote(String),
}

/// Returns true if the first `/`-separated segment is exactly `~`.
pub fn is_home_relative(path: &str) -> bool {
    path == "~" || path.starts_with("~/")
}

/// Replace a leading `~` segment with `home`.
///
/// Paths that are not home-relative are returned unchanged.
pub fn expand_home(path: &str, home: &str) -> String {
    if path == "~" {
        return home.to_string();
    }
    match path.strip_prefix("~/") {
        Some(rest) => {
            let rest = rest.trim_start_matches('/');
            if rest.is_empty() {
                home.to_string()
            } else {
                join_remote_path(home, rest)
            }
        }
        None => path.to_string(),
    }
}

/// Resolve a home-relative path, calling `home_lookup` only when needed.
///
/// ```
/// use sshrelay::path_utils::resolve_tilde;
///
/// let p = resolve_tilde("~/src/app", || Ok("/home/dev".to_string())).unwrap();
/// assert_eq!(p, "/home/dev/src/app");
/// ```
pub fn resolve_tilde<F>(path: &str, home_lookup: F) -> Result<String, HomeLookupError>
where
    F: FnOnce() -> Result<String, HomeLookupError>,
{
    if !is_home_relative(path) {
        return Ok(path.to_string());
    }
    let home = home_lookup()?;
    Ok(expand_home(path, &home))
}

/// Local home directory from `$HOME`.
pub fn local_home() -> Result<String, HomeLookupError> {
    match std::env::var(HOME_ENV) {
        Ok(home) if !home.is_empty() => Ok(home),
        _ => Err(HomeLookupError::MissingEnv(HOME_ENV)),
    }
}

/// Resolve a local path against `$HOME`.
pub fn resolve_local(path: &str) -> Result<String, HomeLookupError> {
    resolve_tilde(path, local_home)
}

/// Join local path components using platform-native separator.
pub fn join_local_path(base: &str, component: &str) -> String {
    let mut path = PathBuf::from(base);
    for part in component.split('/').filter(|p| !p.is_empty()) {
        path.push(part);
    }
    path.to_string_lossy().to_string()
}

/// Join remote SFTP path components using `/` separator.
pub fn join_remote_path(base: &str, component: &str) -> String {
    let component = component.trim_start_matches('/');
    if component.is_empty() {
        base.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, component)
    } else {
        format!("{}/{}", base, component)
    }
}

/// Parent of a remote path, `None` for a bare name or the root.
pub fn remote_parent(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) if trimmed.len() > 1 => Some("/".to_string()),
        Some(0) | None => None,
        Some(idx) => Some(trimmed[..idx].to_string()),
    }
}

/// Parent of a local path, `None` when the path has no parent component.
pub fn local_parent(path: &str) -> Option<String> {
    Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_string_lossy().to_string())
}

/// Last component of a `/`-separated or native path.
pub fn base_name(path: &str) -> String {
    let trimmed = path.trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(trimmed)
        .to_string()
}
