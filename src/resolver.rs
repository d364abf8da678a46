//! Entity resolution across an ordered, growing list of search directories.
//!
//! An entity is any directory containing a `ucas.yaml`; its kind (agent,
//! mod, ACLI, runner, team) is derived from the config contents, never
//! declared. Lookup scans the search list in order and returns the first
//! directory whose `<dir>/<name>/ucas.yaml` exists.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::config_tree::{self, CONFIG_FILE};
use crate::workspace::Workspace;
use crate::{Error, Result};

/// Ordered search directories with set-backed dedup.
///
/// The list only grows during a resolution: each successfully resolved
/// entity may prepend its declared `mod_path` directories.
#[derive(Debug, Clone, Default)]
pub struct SearchPaths {
    dirs: Vec<PathBuf>,
    seen: HashSet<PathBuf>,
}

impl SearchPaths {
    /// An empty search list.
    pub fn new() -> Self {
        Self::default()
    }

    fn canonical(path: &Path) -> PathBuf {
        path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
    }

    /// Append a directory if it exists and is not already present.
    pub fn push(&mut self, path: PathBuf) {
        if !path.is_dir() {
            return;
        }
        let key = Self::canonical(&path);
        if self.seen.insert(key) {
            self.dirs.push(path);
        }
    }

    /// Prepend directories, preserving their given order. Existing
    /// entries are never moved or removed.
    pub fn prepend_all(&mut self, paths: Vec<PathBuf>) {
        for path in paths.into_iter().rev() {
            if !path.is_dir() {
                continue;
            }
            let key = Self::canonical(&path);
            if self.seen.insert(key) {
                log::debug!("adding dynamic search path: {}", path.display());
                self.dirs.insert(0, path);
            }
        }
    }

    /// Directories in lookup order.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Number of directories currently on the list.
    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

/// Reject names containing whitespace. Lookup is case-sensitive and names
/// are used as directory names verbatim.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(Error::EntityNameInvalid(name.to_string()));
    }
    Ok(())
}

/// Build the initial search list: project mods, extra configured paths,
/// then (unless `strict`) user and system mods.
pub fn initial_search_paths(ws: &Workspace, extra: &[String], strict: bool) -> SearchPaths {
    let mut paths = SearchPaths::new();

    paths.push(ws.project_mods_dir());

    for entry in extra {
        let path = PathBuf::from(entry);
        let path = if path.is_absolute() {
            path
        } else {
            ws.project_root().join(path)
        };
        paths.push(path);
    }

    if !strict {
        paths.push(ws.user_mods_dir());
        paths.push(ws.system_mods_dir());
    }

    paths
}

/// Find an entity directory by name; `Ok(None)` is a plain miss.
pub fn find_entity(name: &str, search: &SearchPaths) -> Result<Option<PathBuf>> {
    validate_name(name)?;
    for base in search.dirs() {
        let candidate = base.join(name);
        if candidate.join(CONFIG_FILE).is_file() {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

/// Find an entity directory by name, raising `resolve.not_found` on a miss.
pub fn require_entity(name: &str, search: &SearchPaths) -> Result<PathBuf> {
    find_entity(name, search)?.ok_or_else(|| Error::EntityNotFound(name.to_string()))
}

/// Whether a key matches `name` or `name` plus one strategy suffix.
fn key_matches(key: &str, name: &str) -> bool {
    if let Some(rest) = key.strip_prefix(name) {
        rest.is_empty() || matches!(rest, "+" | "-" | "!" | "?" | "~")
    } else {
        false
    }
}

/// Suffix-tolerant lookup of `name` in a mapping.
pub fn lookup_suffixed<'a>(map: &'a Mapping, name: &str) -> Option<&'a Value> {
    map.iter().find_map(|(k, v)| match k {
        Value::String(key) if key_matches(key, name) => Some(v),
        _ => None,
    })
}

/// True iff the config declares an ACLI: an `executable` key, or an `acli`
/// block with a nested `executable`.
pub fn is_acli(config: &Mapping) -> bool {
    if lookup_suffixed(config, "executable").is_some() {
        return true;
    }
    match lookup_suffixed(config, "acli") {
        Some(Value::Mapping(block)) => lookup_suffixed(block, "executable").is_some(),
        _ => false,
    }
}

/// True iff the config declares a runner: a `run` block carrying at least
/// one of `script`, `executable`, `template`.
pub fn is_runner(config: &Mapping) -> bool {
    match lookup_suffixed(config, "run") {
        Some(Value::Mapping(block)) => ["script", "executable", "template"]
            .iter()
            .any(|k| lookup_suffixed(block, k).is_some()),
        _ => false,
    }
}

/// Extract the ACLI definition from a merged config. Uses the `acli`
/// block when present, else the config itself. A nested `arg_mapping`
/// (legacy layout) is flattened into the enclosing scope without
/// overwriting existing keys.
pub fn extract_acli(config: &Mapping) -> Mapping {
    let block = match lookup_suffixed(config, "acli") {
        Some(Value::Mapping(block)) => block.clone(),
        Some(_) => return Mapping::new(),
        None => config.clone(),
    };

    let Some(mapping) = config_tree::get_map(&block, "arg_mapping").cloned() else {
        return block;
    };
    let mut flat = block.clone();
    for (k, v) in mapping {
        if !flat.contains_key(&k) {
            flat.insert(k, v);
        }
    }
    flat
}

/// Extract the runner definition from a merged config: the `run` block, or
/// the config itself when it looks like a bare runner (`script` or
/// `template` present; `executable` alone is ambiguous with ACLIs).
pub fn extract_runner(config: &Mapping) -> Option<Mapping> {
    match lookup_suffixed(config, "run") {
        Some(Value::Mapping(block)) => return Some(block.clone()),
        Some(_) => return None,
        None => {}
    }
    if ["script", "template"]
        .iter()
        .any(|k| config_tree::get(config, k).is_some())
    {
        return Some(config.clone());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn map(text: &str) -> Mapping {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn names_with_whitespace_are_rejected() {
        assert!(matches!(
            validate_name("bad name"),
            Err(Error::EntityNameInvalid(_))
        ));
        assert!(matches!(
            validate_name("tab\tname"),
            Err(Error::EntityNameInvalid(_))
        ));
        assert!(validate_name("good-name").is_ok());
    }

    #[test]
    fn first_match_wins_and_misses_are_none() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        for base in [&first, &second] {
            let entity = base.join("shared");
            fs::create_dir_all(&entity).unwrap();
            fs::write(entity.join(CONFIG_FILE), "layer: x\n").unwrap();
        }

        let mut search = SearchPaths::new();
        search.push(first.clone());
        search.push(second);

        let found = find_entity("shared", &search).unwrap().unwrap();
        assert_eq!(found, first.join("shared"));
        assert!(find_entity("absent", &search).unwrap().is_none());
    }

    #[test]
    fn directory_without_config_is_not_an_entity() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("mods").join("bare")).unwrap();

        let mut search = SearchPaths::new();
        search.push(dir.path().join("mods"));
        assert!(find_entity("bare", &search).unwrap().is_none());
    }

    #[test]
    fn search_paths_dedupe_and_keep_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();

        let mut search = SearchPaths::new();
        search.push(a.clone());
        search.push(b.clone());
        let before = search.len();
        search.prepend_all(vec![b.clone(), a.clone()]);
        assert_eq!(search.len(), before);
        assert_eq!(search.dirs(), &[a.clone(), b.clone()]);

        let c = dir.path().join("c");
        fs::create_dir_all(&c).unwrap();
        search.prepend_all(vec![c.clone()]);
        assert_eq!(search.dirs(), &[c, a, b]);
    }

    #[test]
    fn acli_detection_supports_suffixes_and_nesting() {
        assert!(is_acli(&map("{executable: cli-x}")));
        assert!(is_acli(&map("{acli!: {executable: cli-x}}")));
        assert!(!is_acli(&map("{acli: {name: cli-x}}")));
        assert!(!is_acli(&map("{description: nothing}")));
    }

    #[test]
    fn runner_detection_requires_a_start_surface() {
        assert!(is_runner(&map("{run: {template: 'bash -c \"{cmd}\"'}}")));
        assert!(is_runner(&map("{run+: {script: ./start.sh}}")));
        assert!(!is_runner(&map("{run: {name: empty}}")));
        assert!(!is_runner(&map("{template: orphan}")));
    }

    #[test]
    fn extract_acli_flattens_arg_mapping() {
        let config = map(concat!(
            "{acli: {executable: cli-x, ",
            "arg_mapping: {prompt_arg: --msg, model_flag: --model}, ",
            "model_flag: --override}}"
        ));
        let acli = extract_acli(&config);
        assert_eq!(config_tree::get_str(&acli, "executable"), Some("cli-x"));
        assert_eq!(config_tree::get_str(&acli, "prompt_arg"), Some("--msg"));
        // Existing keys win over the flattened legacy mapping.
        assert_eq!(config_tree::get_str(&acli, "model_flag"), Some("--override"));
    }

    #[test]
    fn extract_runner_falls_back_to_bare_definitions() {
        let nested = map("{run: {template: 'echo {cmd}'}}");
        assert!(extract_runner(&nested).is_some());

        let bare = map("{script: ./runner.sh}");
        assert!(extract_runner(&bare).is_some());

        let acli_like = map("{executable: cli-x}");
        assert!(extract_runner(&acli_like).is_none());
    }
}
