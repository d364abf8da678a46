//! Template variable expansion.
//!
//! Order matters: literal `{placeholder}` tokens first, then `$VAR` /
//! `${VAR}` from the launch environment, then `~`, and finally path
//! absolutization (relative to the project root) for results that look
//! like paths. `{cmd}` is always substituted last so that a command
//! containing braces is never re-expanded.

use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};

/// Named substitution values for one expansion pass.
pub type Vars<'a> = [(&'a str, &'a str)];

/// Expand `{name}` placeholders and environment variables in `template`.
pub fn expand(template: &str, vars: &Vars<'_>) -> String {
    let mut result = template.to_string();
    for (name, value) in vars {
        if *name == "cmd" {
            continue;
        }
        result = result.replace(&format!("{{{name}}}"), value);
    }
    // {cmd} last: the command itself may contain braces.
    if let Some((_, cmd)) = vars.iter().find(|(name, _)| *name == "cmd") {
        result = result.replace("{cmd}", cmd);
    }

    let env_expanded = shellexpand::env_with_context_no_errors(&result, |var| {
        std::env::var(var).ok().map(Cow::Owned)
    });
    shellexpand::tilde(env_expanded.as_ref()).into_owned()
}

/// [`expand`] followed by absolutization against `project_root` when the
/// result reads as a path (`/`, `./`, or `../` prefix).
pub fn expand_path(template: &str, vars: &Vars<'_>, project_root: &Path) -> String {
    let result = expand(template, vars);
    if result.starts_with('/') || result.starts_with("./") || result.starts_with("../") {
        let path = PathBuf::from(&result);
        let path = if path.is_absolute() {
            path
        } else {
            project_root.join(path)
        };
        return normalize(&path).display().to_string();
    }
    result
}

/// Lexically normalize a path: drop `.` segments, fold `..` into their
/// parent. Unlike `canonicalize` this needs no existing file and keeps
/// symlinks alone.
pub fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                match parts.last() {
                    Some(Component::Normal(_)) => {
                        parts.pop();
                    }
                    Some(Component::RootDir) => {}
                    _ => parts.push(component),
                }
            }
            other => parts.push(other),
        }
    }
    parts.into_iter().collect()
}

/// Shell-quote a single value. Every expanded placeholder that is not
/// itself a shell fragment goes through this before entering a command
/// line.
pub fn shell_quote(value: &str) -> String {
    shlex::try_quote(value)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| format!("'{}'", value.replace('\'', "'\\''")))
}
