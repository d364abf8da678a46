//! The per-member launch pipeline.
//!
//! One launch walks a fixed sequence of phases (resolving, merging,
//! composing, validating, starting) and either reaches `running` or
//! fails carrying the offending phase. The pipeline folds in a default
//! ACLI and runner when the first merge produced neither, then hands the
//! final command chain to the runner subsystem.

use std::fmt;
use std::path::PathBuf;

use serde_yaml::Value;

use crate::config_tree;
use crate::context::{LaunchContext, TeamSlot};
use crate::expand;
use crate::hooks::HookRunner;
use crate::layers;
use crate::resolver::{self, extract_acli, extract_runner};
use crate::runner::{self, RunnerDef};
use crate::workspace::Workspace;
use crate::{compose, Error, Result};

/// Phases of one member launch, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPhase {
    /// Nothing happened yet.
    Idle,
    /// Locating the agent and mods.
    Resolving,
    /// Sandwich-merging the configuration.
    Merging,
    /// Building the ACLI command.
    Composing,
    /// Checking the runner against the launch context.
    Validating,
    /// Handing over to the runner.
    Starting,
    /// The runner reported a successful start.
    Running,
}

impl fmt::Display for LaunchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LaunchPhase::Idle => "idle",
            LaunchPhase::Resolving => "resolving",
            LaunchPhase::Merging => "merging",
            LaunchPhase::Composing => "composing",
            LaunchPhase::Validating => "validating",
            LaunchPhase::Starting => "starting",
            LaunchPhase::Running => "running",
        };
        f.write_str(label)
    }
}

/// Everything needed to launch one member.
#[derive(Debug, Default)]
pub struct MemberLaunch {
    /// Name the member runs under (window name, `UCAS_AGENT`).
    pub member_name: String,
    /// Base agent entity name.
    pub agent_name: String,
    /// Explicit mod names, in order.
    pub mods: Vec<String>,
    /// Team position, when part of a team.
    pub slot: TeamSlot,
    /// Line prefix for user-visible output (`[member] `).
    pub prefix: String,
    /// Replacement for the agent's `PROMPT.md`.
    pub prompt: Option<String>,
    /// Value for `requested_model`.
    pub model: Option<String>,
    /// Value for `requested_provider`.
    pub provider: Option<String>,
}

/// Run one member to the `running` state (or print the preview when
/// dry-run is active).
pub fn run_member(ws: &Workspace, launch: &MemberLaunch) -> Result<()> {
    let mut phase = LaunchPhase::Idle;
    run_member_phases(ws, launch, &mut phase).inspect_err(|e| {
        log::error!(
            "{}launch of `{}` failed during {phase}: {e}",
            launch.prefix,
            launch.member_name
        );
    })
}

fn run_member_phases(
    ws: &Workspace,
    launch: &MemberLaunch,
    phase: &mut LaunchPhase,
) -> Result<()> {
    let settings = ws.settings();

    enter(phase, LaunchPhase::Resolving, launch);
    let resolved = layers::resolve_entities(ws, &launch.agent_name, &launch.mods)?;
    let default_mod_paths = resolved.default_mod_paths.clone();
    let mut explicit_mod_paths = resolved.mod_paths.clone();
    let mut search = resolved.search;

    enter(phase, LaunchPhase::Merging, launch);
    let mut merged = layers::merge_configs(
        ws,
        Some(&resolved.agent_path),
        &default_mod_paths,
        &explicit_mod_paths,
    )?;

    // Fold in a default ACLI when the merge produced none. An
    // `override_acli` vetoes an already-present definition too.
    let has_override_acli = config_tree::get_str(&merged, "override_acli").is_some()
        || config_tree::get_str(&resolved.base, "override_acli").is_some();
    if has_override_acli
        || config_tree::get_str(&extract_acli(&merged), "executable").is_none()
    {
        if let Some(name) = compose::select_acli_name(&merged, &resolved.base) {
            let acli_path = resolver::require_entity(&name, &search)?;
            layers::extend_from_entity(&mut search, &acli_path)?;
            explicit_mod_paths.push(acli_path);
            merged = layers::merge_configs(
                ws,
                Some(&resolved.agent_path),
                &default_mod_paths,
                &explicit_mod_paths,
            )?;
        }
    }

    // Same for the runner, with its hard default.
    let has_override_run = config_tree::get_str(&merged, "override_run").is_some()
        || config_tree::get_str(&resolved.base, "override_run").is_some();
    if has_override_run || extract_runner(&merged).is_none() {
        let name = compose::select_runner_name(&merged, &resolved.base);
        if let Some(run_path) = resolver::find_entity(&name, &search)? {
            layers::extend_from_entity(&mut search, &run_path)?;
            explicit_mod_paths.push(run_path);
            merged = layers::merge_configs(
                ws,
                Some(&resolved.agent_path),
                &default_mod_paths,
                &explicit_mod_paths,
            )?;
        }
    }

    if let Some(model) = &launch.model {
        merged.insert(
            Value::String("requested_model".to_string()),
            Value::String(model.clone()),
        );
    }
    if let Some(provider) = &launch.provider {
        merged.insert(
            Value::String("requested_provider".to_string()),
            Value::String(provider.clone()),
        );
    }

    enter(phase, LaunchPhase::Composing, launch);
    let mut context =
        LaunchContext::prepare(ws, &launch.member_name, &resolved.agent_path, &launch.slot)?;

    // Extra environment from the merged `env` block, expanded against the
    // context assembled so far.
    if let Some(env_block) = config_tree::get_map(&merged, "env") {
        let pairs: Vec<(String, String)> = env_block
            .iter()
            .filter_map(|(k, v)| {
                let key = k.as_str()?.to_string();
                let value = match v {
                    Value::String(s) => expand::expand(s, &context.expansion_vars()),
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                Some((key, value))
            })
            .collect();
        for (key, value) in pairs {
            context.set(&key, &value);
        }
    }

    let all_mod_paths: Vec<PathBuf> = default_mod_paths
        .iter()
        .chain(explicit_mod_paths.iter())
        .cloned()
        .collect();
    let skills_dirs = compose::collect_skills(&resolved.agent_path, &all_mod_paths);

    let main_cmd = compose::build_command(
        ws,
        &resolved.agent_path,
        &all_mod_paths,
        &merged,
        &skills_dirs,
        &context,
        launch.prompt.as_deref(),
    )?;

    let acli_def = extract_acli(&merged);
    if let Some(exe) = config_tree::get_str(&acli_def, "executable") {
        context.set("UCAS_ACLI_EXE", exe);
    }
    context.set("UCAS_MAIN_COMMAND", &main_cmd);

    let hooks = config_tree::get_map(&merged, "hooks")
        .cloned()
        .unwrap_or_default();
    let mut chain = vec![context.export_string()];
    chain.extend(HookRunner::stage_commands(&hooks, "prerun"));
    chain.push(main_cmd);
    chain.extend(HookRunner::stage_commands(&hooks, "postrun"));
    let final_command = chain
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" && ");

    enter(phase, LaunchPhase::Validating, launch);
    let run_def = extract_runner(&merged)
        .map(|m| RunnerDef::from_mapping(&m))
        .ok_or_else(|| {
            Error::RunnerInvalid("no `run` block in final configuration".to_string())
        })?;
    runner::validate(&run_def, &context)?;

    if settings.dry_run {
        let rendered = runner::preview(&run_def, &final_command, &launch.member_name, &context)?;
        println!("{}[DRY-RUN] {rendered}", launch.prefix);
        return Ok(());
    }

    enter(phase, LaunchPhase::Starting, launch);
    HookRunner::new(&context, settings).run(&hooks, "install")?;
    runner::start(&run_def, &final_command, &launch.member_name, &context, settings)?;

    enter(phase, LaunchPhase::Running, launch);
    log::info!(
        "{}launched `{}` as `{}`",
        launch.prefix,
        launch.agent_name,
        launch.member_name
    );
    Ok(())
}

fn enter(phase: &mut LaunchPhase, next: LaunchPhase, launch: &MemberLaunch) {
    *phase = next;
    log::debug!("{}{next} `{}`", launch.prefix, launch.member_name);
}

/// Launch a single agent outside any team, as `run <agent> [+mod ...]`
/// does.
pub fn run_agent(ws: &Workspace, agent_name: &str, mods: Vec<String>) -> Result<()> {
    let launch = MemberLaunch {
        member_name: agent_name.to_string(),
        agent_name: agent_name.to_string(),
        mods,
        slot: TeamSlot {
            team: String::new(),
            index: 0,
            size: 1,
        },
        ..Default::default()
    };
    run_member(ws, &launch)
}
