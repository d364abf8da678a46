//! Project-root discovery and the project registry.
//!
//! The registry is an append-only, newline-delimited list of absolute
//! project paths known to have active mailboxes. Read-only consumers use
//! it to enumerate scopes; the core only appends.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the registry, under `<user-home>/.ucas/`.
pub const REGISTRY_FILE: &str = "mail-projects.txt";

/// Walk up from `start` to the nearest directory containing `.ucas`.
/// Falls back to `start` itself when no marker is found.
pub fn find_project_root(start: &Path) -> PathBuf {
    let mut current = start.to_path_buf();
    loop {
        if current.join(".ucas").exists() {
            return current;
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return start.to_path_buf(),
        }
    }
}

/// Path of the registry file for a given user home.
pub fn registry_path(user_home: &Path) -> PathBuf {
    user_home.join(".ucas").join(REGISTRY_FILE)
}

/// Record a project root in the registry. Relative paths and paths under
/// the temporary-directory root are never recorded; duplicates are kept
/// out by checking existing lines before appending.
pub fn register_project(user_home: &Path, project_root: &Path) -> std::io::Result<()> {
    if !project_root.is_absolute() {
        return Ok(());
    }
    let tmp_root = std::env::temp_dir();
    if project_root.starts_with(&tmp_root) {
        log::debug!(
            "not registering temporary project root {}",
            project_root.display()
        );
        return Ok(());
    }

    let path = registry_path(user_home);
    let entry = project_root.display().to_string();

    if let Ok(existing) = fs::read_to_string(&path) {
        if existing.lines().any(|line| line == entry) {
            return Ok(());
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    writeln!(file, "{entry}")?;
    Ok(())
}

/// All distinct registered project roots, in first-seen order.
pub fn registered_projects(user_home: &Path) -> Vec<PathBuf> {
    let Ok(text) = fs::read_to_string(registry_path(user_home)) else {
        return Vec::new();
    };
    let mut seen = std::collections::HashSet::new();
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| seen.insert(line.to_string()))
        .map(PathBuf::from)
        .collect()
}
