//! Command composition: turn a merged config into the ACLI command line.
//!
//! Selection of the ACLI and runner follows the same cascade: an
//! `override_*` key vetoes everything, an inline definition wins next,
//! then `default_*`, then the first `allowed_*` entry. The composed
//! command substitutes the ACLI's mapping keys (`prompt_arg`,
//! `model_flag`, `skills_dir`, ...) and shell-quotes every token.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::Mapping;

use crate::config_tree;
use crate::context::LaunchContext;
use crate::expand;
use crate::resolver::extract_acli;
use crate::workspace::Workspace;
use crate::{Error, Result};

/// Separator between prompt fragments in the assembled bundle.
const PROMPT_SEPARATOR: &str = "\n\n---\n\n";

/// Hard default runner name when nothing is configured.
pub const DEFAULT_RUNNER: &str = "run-tmux";

/// Pick the ACLI entity name to fold in when the merged config carries no
/// usable definition: `override_acli` → `default_acli` → first of
/// `allowed_acli`.
pub fn select_acli_name(merged: &Mapping, base: &Mapping) -> Option<String> {
    for source in [merged, base] {
        if let Some(name) = config_tree::get_str(source, "override_acli") {
            log::debug!("using override_acli: {name}");
            return Some(name.to_string());
        }
    }
    for source in [merged, base] {
        if let Some(name) = config_tree::get_str(source, "default_acli") {
            return Some(name.to_string());
        }
    }
    for source in [merged, base] {
        if let Some(allowed) = config_tree::get_seq(source, "allowed_acli") {
            if let Some(name) = allowed.first().and_then(|v| v.as_str()) {
                if allowed.len() == 1 {
                    log::debug!("forced ACLI (only one allowed): {name}");
                }
                return Some(name.to_string());
            }
        }
    }
    None
}

/// Pick the runner entity name, with hard default [`DEFAULT_RUNNER`]:
/// `override_run` → `default_run` → first of `allowed_run` → default.
pub fn select_runner_name(merged: &Mapping, base: &Mapping) -> String {
    for source in [merged, base] {
        if let Some(name) = config_tree::get_str(source, "override_run") {
            log::debug!("using override_run: {name}");
            return name.to_string();
        }
    }
    for source in [merged, base] {
        if let Some(name) = config_tree::get_str(source, "default_run") {
            return name.to_string();
        }
    }
    for source in [merged, base] {
        if let Some(allowed) = config_tree::get_seq(source, "allowed_run") {
            if let Some(name) = allowed.first().and_then(|v| v.as_str()) {
                return name.to_string();
            }
        }
    }
    DEFAULT_RUNNER.to_string()
}

/// Translate the agent's requested model through the ACLI's
/// `model_mapping`.
///
/// A miss falls back to `model_mapping.default`; failing that, the result
/// is `compose.unknown_model` unless the ACLI sets `ignore_unknown: true`,
/// in which case the model flag is omitted with a warning.
pub fn translate_model(requested: &str, acli_def: &Mapping) -> Result<Option<String>> {
    let mapping = config_tree::get_map(acli_def, "model_mapping");
    let ignore_unknown = config_tree::get_bool(acli_def, "ignore_unknown");

    if let Some(mapping) = mapping {
        if let Some(translated) = config_tree::get_str(mapping, requested) {
            log::debug!("translated model {requested} -> {translated}");
            return Ok(Some(translated.to_string()));
        }
        if let Some(translated) = config_tree::get_str(mapping, "default") {
            log::debug!("default model mapping for {requested} -> {translated}");
            return Ok(Some(translated.to_string()));
        }
    }

    if ignore_unknown {
        log::warn!("model `{requested}` not in ACLI model_mapping; skipping model flag");
        return Ok(None);
    }
    let available = mapping
        .map(|m| {
            m.keys()
                .filter_map(|k| k.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    Err(Error::UnknownModel {
        model: requested.to_string(),
        available,
    })
}

/// Skills directories of the agent and each mod, in order.
pub fn collect_skills(agent_path: &Path, mod_paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for entity in std::iter::once(agent_path).chain(mod_paths.iter().map(PathBuf::as_path)) {
        let skills = entity.join("skills");
        if skills.is_dir() {
            dirs.push(skills.canonicalize().unwrap_or(skills));
        }
    }
    dirs
}

/// The three prompt channels fed to the ACLI.
#[derive(Debug, Default)]
pub struct PromptBundle {
    /// Replacement system prompt: last `PROMPT_SYSTEM.md` wins.
    pub system: Option<String>,
    /// Appended system prompt: every `PROMPT_SYSTEM_ADD.md`, concatenated.
    pub system_add: Option<String>,
    /// Main prompt: agent `PROMPT.md` (or the explicit override), then
    /// each mod's `PROMPT.md`.
    pub prompt: Option<String>,
}

/// Assemble the prompt bundle from the agent and mod directories.
///
/// `prompt_override` replaces the agent's own `PROMPT.md` contribution;
/// mod prompts still append after it.
pub fn assemble_prompts(
    agent_path: &Path,
    mod_paths: &[PathBuf],
    prompt_override: Option<&str>,
) -> PromptBundle {
    let read = |dir: &Path, name: &str| -> Option<String> {
        let path = dir.join(name);
        path.is_file().then(|| fs::read_to_string(&path).ok())?
    };

    let mut system = read(agent_path, "PROMPT_SYSTEM.md");
    for mod_path in mod_paths {
        if let Some(text) = read(mod_path, "PROMPT_SYSTEM.md") {
            system = Some(text);
        }
    }

    let mut additions: Vec<String> = Vec::new();
    for entity in std::iter::once(agent_path).chain(mod_paths.iter().map(PathBuf::as_path)) {
        if let Some(text) = read(entity, "PROMPT_SYSTEM_ADD.md") {
            additions.push(text);
        }
    }

    let mut prompts: Vec<String> = Vec::new();
    match prompt_override {
        Some(text) => prompts.push(text.to_string()),
        None => {
            if let Some(text) = read(agent_path, "PROMPT.md") {
                prompts.push(text);
            }
        }
    }
    for mod_path in mod_paths {
        if let Some(text) = read(mod_path, "PROMPT.md") {
            prompts.push(text);
        }
    }

    let join = |parts: Vec<String>| -> Option<String> {
        if parts.is_empty() {
            None
        } else {
            Some(
                parts
                    .iter()
                    .map(|p| p.trim_end())
                    .collect::<Vec<_>>()
                    .join(PROMPT_SEPARATOR),
            )
        }
    };

    PromptBundle {
        system,
        system_add: join(additions),
        prompt: join(prompts),
    }
}

/// Build the ACLI command string from the merged config.
///
/// Every emitted token is shell-quoted. The `prompt_file` key (legacy)
/// writes the assembled prompt to `.ucas/tmp/<agent>.merged.md` and passes
/// the flag with that path; `prompt_arg` passes the prompt inline and wins
/// when both are mapped.
pub fn build_command(
    ws: &Workspace,
    agent_path: &Path,
    mod_paths: &[PathBuf],
    merged: &Mapping,
    skills_dirs: &[PathBuf],
    context: &LaunchContext,
    prompt_override: Option<&str>,
) -> Result<String> {
    let acli_def = extract_acli(merged);
    let executable = config_tree::get_str(&acli_def, "executable")
        .ok_or(Error::MissingExecutable)?;

    let vars = context.expansion_vars();
    let mut parts: Vec<String> = vec![executable.to_string()];

    let bundle = assemble_prompts(agent_path, mod_paths, prompt_override);

    if let (Some(flag), Some(text)) =
        (config_tree::get_str(&acli_def, "system_prompt_arg"), &bundle.system)
    {
        parts.push(flag.to_string());
        parts.push(expand::expand(text, &vars));
    }
    if let (Some(flag), Some(text)) = (
        config_tree::get_str(&acli_def, "system_prompt_add_arg"),
        &bundle.system_add,
    ) {
        parts.push(flag.to_string());
        parts.push(expand::expand(text, &vars));
    }

    if let Some(text) = &bundle.prompt {
        let expanded = expand::expand(text, &vars);
        if let Some(flag) = config_tree::get_str(&acli_def, "prompt_arg") {
            parts.push(flag.to_string());
            parts.push(expanded);
        } else if let Some(flag) = config_tree::get_str(&acli_def, "prompt_file") {
            let agent_name = context.get("UCAS_AGENT").unwrap_or("agent");
            let tmp_dir = ws.project_tmp_dir();
            fs::create_dir_all(&tmp_dir)?;
            let prompt_path = tmp_dir.join(format!("{agent_name}.merged.md"));
            fs::write(&prompt_path, &expanded)?;
            parts.push(flag.to_string());
            parts.push(prompt_path.display().to_string());
        }
    }

    if let Some(requested) = config_tree::get_str(merged, "requested_model") {
        if let Some(model) = translate_model(requested, &acli_def)? {
            if let Some(flag) = config_tree::get_str(&acli_def, "model_flag") {
                parts.push(flag.to_string());
                parts.push(model);
            }
        }
    }

    if let Some(provider) = config_tree::get_str(merged, "requested_provider") {
        if let Some(flag) = config_tree::get_str(&acli_def, "provider_flag") {
            parts.push(flag.to_string());
            parts.push(provider.to_string());
        }
    }

    if let Some(flag) = config_tree::get_str(&acli_def, "skills_dir") {
        for dir in skills_dirs {
            parts.push(flag.to_string());
            parts.push(dir.display().to_string());
        }
    }

    if let Some(template) = config_tree::get_str(&acli_def, "session_arg") {
        let expanded = expand::expand_path(template, &vars, ws.project_root());
        let tokens = shlex::split(&expanded).unwrap_or_else(|| vec![expanded.clone()]);
        for token in &tokens {
            if token.ends_with(".json") {
                if let Some(parent) = Path::new(token).parent() {
                    if parent.is_absolute() {
                        fs::create_dir_all(parent)?;
                    }
                }
            }
        }
        parts.extend(tokens);
        log::debug!("session arg: {expanded}");
    }

    Ok(parts
        .iter()
        .map(|p| expand::shell_quote(p))
        .collect::<Vec<_>>()
        .join(" "))
}
