//! The sandwich merge: system → user → project → default mods → agent →
//! explicit mods → overrides (system, user, project).
//!
//! Resolution and merging are interleaved: the base layers nominate extra
//! `mod_path` directories, and every resolved entity may prepend its own,
//! so the search list grows monotonically while names are being resolved.

use std::path::{Path, PathBuf};

use serde_yaml::Mapping;

use crate::config_tree::{self, CONFIG_FILE, OVERRIDE_FILE};
use crate::merge::merge_mappings;
use crate::resolver::{self, SearchPaths};
use crate::workspace::Workspace;
use crate::Result;

/// Paths of the six layer config files, absent entries filtered later.
#[derive(Debug, Clone)]
pub struct LayerPaths {
    /// `<install-root>/ucas.yaml`
    pub system: Option<PathBuf>,
    /// `<install-root>/ucas-override.yaml`
    pub system_override: Option<PathBuf>,
    /// `<user-home>/.ucas/ucas.yaml`
    pub user: Option<PathBuf>,
    /// `<user-home>/.ucas/ucas-override.yaml`
    pub user_override: Option<PathBuf>,
    /// `<project>/.ucas/ucas.yaml`
    pub project: Option<PathBuf>,
    /// `<project>/.ucas/ucas-override.yaml`
    pub project_override: Option<PathBuf>,
}

/// Locate the layer config files that actually exist.
pub fn layer_config_paths(ws: &Workspace) -> LayerPaths {
    let existing = |path: PathBuf| path.is_file().then_some(path);

    LayerPaths {
        system: existing(ws.install_root().join(CONFIG_FILE)),
        system_override: existing(ws.install_root().join(OVERRIDE_FILE)),
        user: existing(ws.user_ucas_dir().join(CONFIG_FILE)),
        user_override: existing(ws.user_ucas_dir().join(OVERRIDE_FILE)),
        project: existing(ws.project_ucas_dir().join(CONFIG_FILE)),
        project_override: existing(ws.project_ucas_dir().join(OVERRIDE_FILE)),
    }
}

/// Merge of the base layers (system → user → project), without overrides.
/// This is what nominates `mod_path`, `strict`, default mods, and default
/// ACLI/runner names before any entity is resolved.
pub fn base_config(ws: &Workspace) -> Result<Mapping> {
    let paths = layer_config_paths(ws);
    let mut result = Mapping::new();
    for (label, path) in [
        ("system", &paths.system),
        ("user", &paths.user),
        ("project", &paths.project),
    ] {
        if let Some(path) = path {
            log::debug!("merging {label} layer: {}", path.display());
            let layer = config_tree::load_config_file(path)?;
            result = merge_mappings(&result, &layer);
        }
    }
    Ok(result)
}

/// Outcome of resolving the default mods, the agent, and its explicit
/// mods.
#[derive(Debug)]
pub struct Resolved {
    /// Directory of the base agent entity.
    pub agent_path: PathBuf,
    /// Directories of the base layers' default mods, in list order.
    pub default_mod_paths: Vec<PathBuf>,
    /// Directories of the explicit mods, in invocation order.
    pub mod_paths: Vec<PathBuf>,
    /// The grown search list, for subsequent lookups (default ACLI, runner).
    pub search: SearchPaths,
    /// The merged base layers.
    pub base: Mapping,
}

/// Build the initial search list from the base layers' `mod_path` and
/// `strict` settings.
pub fn search_paths_from_base(ws: &Workspace, base: &Mapping) -> SearchPaths {
    let extra = config_tree::get_string_list(base, "mod_path");
    let strict = config_tree::get_bool(base, "strict");
    resolver::initial_search_paths(ws, &extra, strict)
}

/// Resolve the default mods, the agent, and each explicit mod in the
/// sandwich's order, growing the search list with every entity's
/// declared `mod_path` before the next lookup.
pub fn resolve_entities(ws: &Workspace, agent_name: &str, mods: &[String]) -> Result<Resolved> {
    let base = base_config(ws)?;
    let mut search = search_paths_from_base(ws, &base);

    let default_mod_paths = resolve_default_mods(&base, &mut search)?;

    let agent_path = resolver::require_entity(agent_name, &search)?;
    extend_from_entity(&mut search, &agent_path)?;

    let mut mod_paths = Vec::with_capacity(mods.len());
    for name in mods {
        let path = resolver::require_entity(name, &search)?;
        extend_from_entity(&mut search, &path)?;
        mod_paths.push(path);
    }

    Ok(Resolved {
        agent_path,
        default_mod_paths,
        mod_paths,
        search,
        base,
    })
}

/// Read an entity's config and prepend its `mod_path` directories,
/// resolved against the entity directory when relative.
pub fn extend_from_entity(search: &mut SearchPaths, entity_path: &Path) -> Result<()> {
    let config = config_tree::load_entity_config(entity_path)?;
    let declared = config_tree::get_string_list(&config, "mod_path");
    if declared.is_empty() {
        return Ok(());
    }
    let absolute = declared
        .into_iter()
        .map(|p| {
            let path = PathBuf::from(&p);
            if path.is_absolute() {
                path
            } else {
                entity_path.join(path)
            }
        })
        .collect();
    search.prepend_all(absolute);
    Ok(())
}

/// Perform the full sandwich merge for one launch.
///
/// `agent_path` is `None` for team-level merges that have no single base
/// agent. Missing layer files are treated as empty; a missing entity
/// config among the given paths is also empty (the paths were validated
/// during resolution).
pub fn merge_configs(
    ws: &Workspace,
    agent_path: Option<&Path>,
    default_mod_paths: &[PathBuf],
    explicit_mod_paths: &[PathBuf],
) -> Result<Mapping> {
    let paths = layer_config_paths(ws);
    let mut result = Mapping::new();

    let merge_file = |result: Mapping, label: &str, path: &Path| -> Result<Mapping> {
        if ws.settings().verbose || ws.settings().debug {
            log::info!("merging {label}: {}", path.display());
        }
        let layer = config_tree::load_config_file(path)?;
        Ok(merge_mappings(&result, &layer))
    };

    for (label, path) in [
        ("system defaults", &paths.system),
        ("user defaults", &paths.user),
        ("project defaults", &paths.project),
    ] {
        if let Some(path) = path {
            result = merge_file(result, label, path)?;
        }
    }

    for mod_path in default_mod_paths {
        result = merge_file(result, "default mod", &mod_path.join(CONFIG_FILE))?;
    }

    if let Some(agent_path) = agent_path {
        result = merge_file(result, "agent", &agent_path.join(CONFIG_FILE))?;
    }

    for mod_path in explicit_mod_paths {
        result = merge_file(result, "mod", &mod_path.join(CONFIG_FILE))?;
    }

    for (label, path) in [
        ("system override", &paths.system_override),
        ("user override", &paths.user_override),
        ("project override", &paths.project_override),
    ] {
        if let Some(path) = path {
            result = merge_file(result, label, path)?;
        }
    }

    Ok(result)
}

/// Resolve the names of the base layers' default mods, in list order.
/// Each resolved mod prepends its own `mod_path` to the live search list
/// before the next name is looked up, so default mods can chain just
/// like explicit ones.
pub fn resolve_default_mods(base: &Mapping, search: &mut SearchPaths) -> Result<Vec<PathBuf>> {
    let Some(value) = config_tree::get(base, "mods") else {
        return Ok(Vec::new());
    };
    let names = config_tree::mod_names(value);
    let mut paths = Vec::with_capacity(names.len());
    for name in names {
        let path = resolver::require_entity(&name, search)?;
        extend_from_entity(search, &path)?;
        paths.push(path);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::Settings;
    use std::fs;

    fn write_mod(base: &Path, name: &str, config: &str) -> PathBuf {
        let dir = base.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(CONFIG_FILE), config).unwrap();
        dir
    }

    fn workspace(root: &Path) -> Workspace {
        // Separate user home and install root keep host layers out.
        Workspace::at(
            root.join("project"),
            root.join("home"),
            root.join("install"),
            Settings::default(),
        )
    }

    #[test]
    fn agent_mod_path_makes_external_mods_resolvable() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        let project_mods = ws.project_mods_dir();
        fs::create_dir_all(&project_mods).unwrap();

        let external = dir.path().join("external");
        fs::create_dir_all(&external).unwrap();
        write_mod(&external, "ext-mod", "");
        write_mod(
            &project_mods,
            "agent1",
            &format!("mod_path: [{}]\n", external.display()),
        );

        let resolved =
            resolve_entities(&ws, "agent1", &["ext-mod".to_string()]).unwrap();
        assert_eq!(resolved.agent_path, project_mods.join("agent1"));
        assert_eq!(resolved.mod_paths, vec![external.join("ext-mod")]);
    }

    #[test]
    fn mod_path_chains_transitively() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        let project_mods = ws.project_mods_dir();
        fs::create_dir_all(&project_mods).unwrap();

        let ext1 = dir.path().join("ext1");
        let ext2 = dir.path().join("ext2");
        fs::create_dir_all(&ext1).unwrap();
        fs::create_dir_all(&ext2).unwrap();

        write_mod(
            &project_mods,
            "agent1",
            &format!("mod_path: [{}]\n", ext1.display()),
        );
        write_mod(
            &ext1,
            "mod1",
            &format!("mod_path: [{}]\n", ext2.display()),
        );
        write_mod(&ext2, "mod2", "");

        let resolved = resolve_entities(
            &ws,
            "agent1",
            &["mod1".to_string(), "mod2".to_string()],
        )
        .unwrap();
        assert_eq!(resolved.mod_paths[0], ext1.join("mod1"));
        assert_eq!(resolved.mod_paths[1], ext2.join("mod2"));
    }

    #[test]
    fn relative_mod_path_resolves_against_entity_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        let project_mods = ws.project_mods_dir();
        fs::create_dir_all(&project_mods).unwrap();

        let mod1 = write_mod(&project_mods, "mod1", "mod_path: ['./libs']\n");
        let libs = mod1.join("libs");
        fs::create_dir_all(&libs).unwrap();
        write_mod(&libs, "mod2", "");

        let resolved =
            resolve_entities(&ws, "mod1", &["mod2".to_string()]).unwrap();
        assert_eq!(resolved.mod_paths[0], libs.join("mod2"));
    }

    #[test]
    fn default_mod_mod_path_resolves_later_default_mods() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        let project_mods = ws.project_mods_dir();
        fs::create_dir_all(&project_mods).unwrap();

        let external = dir.path().join("external");
        fs::create_dir_all(&external).unwrap();

        // `bar` lives only in the directory nominated by `foo`.
        write_mod(
            &project_mods,
            "foo",
            &format!("mod_path: [{}]\n", external.display()),
        );
        write_mod(&external, "bar", "");
        write_mod(&project_mods, "agent1", "");
        fs::write(
            ws.project_ucas_dir().join(CONFIG_FILE),
            "mods: [foo, bar]\n",
        )
        .unwrap();

        let resolved = resolve_entities(&ws, "agent1", &[]).unwrap();
        assert_eq!(
            resolved.default_mod_paths,
            vec![project_mods.join("foo"), external.join("bar")]
        );
    }

    #[test]
    fn default_mods_grow_search_paths_before_the_agent() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        let project_mods = ws.project_mods_dir();
        fs::create_dir_all(&project_mods).unwrap();

        let external = dir.path().join("external");
        fs::create_dir_all(&external).unwrap();

        write_mod(
            &project_mods,
            "foo",
            &format!("mod_path: [{}]\n", external.display()),
        );
        write_mod(&external, "ext-agent", "");
        fs::write(ws.project_ucas_dir().join(CONFIG_FILE), "mods: [foo]\n").unwrap();

        // The agent is only findable through the default mod's mod_path.
        let resolved = resolve_entities(&ws, "ext-agent", &[]).unwrap();
        assert_eq!(resolved.agent_path, external.join("ext-agent"));
    }

    #[test]
    fn missing_entity_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        fs::create_dir_all(ws.project_mods_dir()).unwrap();

        let err = resolve_entities(&ws, "ghost", &[]).unwrap_err();
        assert!(matches!(err, crate::Error::EntityNotFound(_)));
    }

    #[test]
    fn sandwich_applies_overrides_last() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        let project_mods = ws.project_mods_dir();
        fs::create_dir_all(&project_mods).unwrap();

        fs::write(
            ws.project_ucas_dir().join(CONFIG_FILE),
            "requested_model: small\nfeature: base\n",
        )
        .unwrap();
        let agent = write_mod(&project_mods, "agent1", "feature: agent\n");
        fs::write(
            ws.project_ucas_dir().join(OVERRIDE_FILE),
            "feature!: vetoed\n",
        )
        .unwrap();

        let merged = merge_configs(&ws, Some(&agent), &[], &[]).unwrap();
        assert_eq!(config_tree::get_str(&merged, "feature"), Some("vetoed"));
        assert_eq!(
            config_tree::get_str(&merged, "requested_model"),
            Some("small")
        );
    }

    #[test]
    fn search_list_only_grows() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        let project_mods = ws.project_mods_dir();
        fs::create_dir_all(&project_mods).unwrap();

        let external = dir.path().join("external");
        fs::create_dir_all(&external).unwrap();
        write_mod(
            &project_mods,
            "agent1",
            &format!("mod_path: [{}]\n", external.display()),
        );

        let base = base_config(&ws).unwrap();
        let mut search = search_paths_from_base(&ws, &base);
        let before: Vec<PathBuf> = search.dirs().to_vec();

        let agent = resolver::require_entity("agent1", &search).unwrap();
        extend_from_entity(&mut search, &agent).unwrap();

        assert!(search.len() > before.len());
        for dir in &before {
            assert!(search.dirs().contains(dir));
        }
    }
}
