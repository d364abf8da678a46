//! Team lifecycle: expand a team definition into ordered member launches,
//! prepare mailboxes, autostart on inbound mail, stop, and report status.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use serde_yaml::{Mapping, Value};

use crate::config_tree;
use crate::context::{LaunchContext, TeamSlot};
use crate::launch::{run_member, MemberLaunch};
use crate::mail::{MailStore, USER_NAME};
use crate::resolver::{self, extract_runner};
use crate::runner::{self, RunnerDef};
use crate::workspace::Workspace;
use crate::{layers, project, Error, Result};

/// A parsed team definition.
#[derive(Debug, Default)]
pub struct TeamDef {
    /// Team name; falls back to the entity name or the project name.
    pub name: String,
    /// Members in declaration order.
    pub members: Vec<Member>,
    /// Mods applied to every member.
    pub mods: Vec<String>,
    /// Prompt override applied to members without their own.
    pub prompt: Option<String>,
    /// Pause between member launches, in seconds.
    pub sleep_seconds: u64,
}

/// One team member: a base agent plus member-specific modifiers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Member {
    /// Name the member runs under.
    pub name: String,
    /// Base agent entity.
    pub agent: String,
    /// Member-specific mods, in order.
    pub mods: Vec<String>,
    /// Member prompt override.
    pub prompt: Option<String>,
    /// Member model override.
    pub model: Option<String>,
    /// Member provider override.
    pub provider: Option<String>,
}

/// Parse a member spec: a sequence `[base, mod...]`, a bare string, or a
/// mapping with `agent` and/or `mods`. With both keys, `agent` names the
/// base and `mods` is the complete mod list; with only `mods`, its head
/// is the base.
pub fn parse_member(name: &str, spec: &Value) -> Result<Member> {
    let invalid = || Error::RunnerInvalid(format!("member `{name}` has an unusable spec"));

    let mut member = Member {
        name: name.to_string(),
        ..Default::default()
    };
    match spec {
        Value::String(base) => {
            member.agent = base.clone();
        }
        Value::Sequence(seq) => {
            let names: Vec<String> = seq
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            let (base, mods) = names.split_first().ok_or_else(invalid)?;
            member.agent = base.clone();
            member.mods = mods.to_vec();
        }
        Value::Mapping(map) => {
            let mods = config_tree::get(map, "mods")
                .map(config_tree::string_or_list)
                .unwrap_or_default();
            if let Some(agent) = config_tree::get_str(map, "agent") {
                member.agent = agent.to_string();
                member.mods = mods;
            } else {
                let (base, rest) = mods.split_first().ok_or_else(invalid)?;
                member.agent = base.clone();
                member.mods = rest.to_vec();
            }
            member.prompt = config_tree::get_str(map, "prompt").map(str::to_string);
            member.model = config_tree::get_str(map, "model").map(str::to_string);
            member.provider = config_tree::get_str(map, "provider").map(str::to_string);
        }
        _ => return Err(invalid()),
    }
    if member.agent.is_empty() {
        return Err(invalid());
    }
    Ok(member)
}

/// Extract the team definition from a merged config: the `team` block, or
/// the config itself when it declares `agents` / `members` at top level.
pub fn parse_team(merged: &Mapping, fallback_name: &str) -> Result<TeamDef> {
    let block = match config_tree::get_map(merged, "team") {
        Some(block) => block,
        None => {
            if config_tree::get(merged, "agents").is_some()
                || config_tree::get(merged, "members").is_some()
            {
                merged
            } else {
                return Err(Error::RunnerInvalid(
                    "no `team` block or agents definition in final configuration".to_string(),
                ));
            }
        }
    };

    let agents = config_tree::get_map(block, "agents")
        .or_else(|| config_tree::get_map(block, "members"))
        .ok_or_else(|| {
            Error::RunnerInvalid("team definition has no `agents` map".to_string())
        })?;

    let mut members = Vec::with_capacity(agents.len());
    for (name, spec) in agents {
        let Some(name) = name.as_str() else {
            continue;
        };
        members.push(parse_member(name, spec)?);
    }

    Ok(TeamDef {
        name: config_tree::get_str(block, "name")
            .unwrap_or(fallback_name)
            .to_string(),
        members,
        mods: config_tree::get_string_list(block, "mods"),
        prompt: config_tree::get_str(block, "prompt").map(str::to_string),
        sleep_seconds: config_tree::get_u64(block, "sleep_seconds").unwrap_or(0),
    })
}

/// Resolve the team-level merged config: layer configs plus the team
/// entity (when named) and any extra mods folded in as mods.
fn merge_team_config(
    ws: &Workspace,
    team: Option<&str>,
    extra_mods: &[String],
) -> Result<(Mapping, Vec<String>)> {
    let base = layers::base_config(ws)?;
    let mut search = layers::search_paths_from_base(ws, &base);

    let default_mod_paths = layers::resolve_default_mods(&base, &mut search)?;

    let mut mod_names: Vec<String> = Vec::new();
    if let Some(team) = team {
        mod_names.push(team.to_string());
    }
    mod_names.extend(extra_mods.iter().cloned());

    let mut mod_paths = Vec::new();
    for name in &mod_names {
        let path = resolver::require_entity(name, &search)?;
        layers::extend_from_entity(&mut search, &path)?;
        mod_paths.push(path);
    }

    let merged = layers::merge_configs(ws, None, &default_mod_paths, &mod_paths)?;
    Ok((merged, mod_names))
}

/// Create every member's mailbox up front when `mails: true`, printing a
/// pending-mail notice per non-empty inbox. Uppercase member names are
/// not mailbox owners.
fn init_mailboxes(ws: &Workspace, merged: &Mapping, team: &TeamDef) -> Result<()> {
    if !config_tree::get_bool(merged, "mails") {
        return Ok(());
    }
    let store = MailStore::new(ws);
    project::register_project(ws.user_home(), ws.project_root())?;

    for member in &team.members {
        if !is_mailbox_member(&member.name) {
            continue;
        }
        let mailbox = store.agent_mailbox(&member.name, ws.project_root());
        mailbox.ensure_dirs()?;
        let pending = mailbox.pending_count();
        if pending > 0 {
            println!("[{}] {pending} new message(s) in the inbox", member.name);
        }
    }
    if ws.settings().verbose {
        log::info!(
            "initialized mailboxes for {} members at {}",
            team.members.len(),
            ws.project_root().display()
        );
    }
    Ok(())
}

/// Run a team: resolve its definition, prepare mailboxes, then launch
/// each member in declaration order with the optional pause in between.
pub fn run_team(ws: &Workspace, team_name: Option<&str>, cli_mods: &[String]) -> Result<()> {
    let (merged, team_mod_names) = merge_team_config(ws, team_name, cli_mods)?;

    let fallback = team_name.map(str::to_string).unwrap_or_else(|| {
        ws.project_root()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "team".to_string())
    });
    let team = parse_team(&merged, &fallback)?;

    println!(
        "Starting team `{}` with {} members...",
        team.name,
        team.members.len()
    );
    init_mailboxes(ws, &merged, &team)?;

    let size = team.members.len();
    for (index, member) in team.members.iter().enumerate() {
        let mut mods = team_mod_names.clone();
        mods.extend(team.mods.iter().cloned());
        mods.extend(member.mods.iter().cloned());

        let launch = MemberLaunch {
            member_name: member.name.clone(),
            agent_name: member.agent.clone(),
            mods,
            slot: TeamSlot {
                team: team.name.clone(),
                index,
                size,
            },
            prefix: format!("[{}] ", member.name),
            prompt: member.prompt.clone().or_else(|| team.prompt.clone()),
            model: member.model.clone(),
            provider: member.provider.clone(),
        };
        run_member(ws, &launch)?;

        let last = index + 1 == size;
        if team.sleep_seconds > 0 && !last && !ws.settings().dry_run {
            std::thread::sleep(std::time::Duration::from_secs(team.sleep_seconds));
        }
    }
    Ok(())
}

/// Stop a team: resolve its merged config, extract the runner (folding in
/// the default when absent), and invoke its stop surface.
pub fn stop_team(ws: &Workspace, team_name: Option<&str>) -> Result<()> {
    let (mut merged, _) = merge_team_config(ws, team_name, &[])?;

    if extract_runner(&merged).is_none() {
        let base = layers::base_config(ws)?;
        let run_name = crate::compose::select_runner_name(&merged, &base);
        let search = layers::search_paths_from_base(ws, &base);
        if let Some(run_path) = resolver::find_entity(&run_name, &search)? {
            let run_cfg = config_tree::load_entity_config(&run_path)?;
            merged = crate::merge::merge_mappings(&merged, &run_cfg);
        }
    }
    let run_def = extract_runner(&merged)
        .map(|m| RunnerDef::from_mapping(&m))
        .ok_or_else(|| Error::RunnerInvalid("no `run` block found to stop".to_string()))?;

    let team_label = config_tree::get_map(&merged, "team")
        .and_then(|block| config_tree::get_str(block, "name").map(str::to_string))
        .or_else(|| team_name.map(str::to_string))
        .unwrap_or_else(|| {
            ws.project_root()
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        });

    let mut context = LaunchContext::prepare(
        ws,
        "stop",
        ws.project_root(),
        &TeamSlot {
            team: team_label,
            index: 0,
            size: 1,
        },
    )?;
    context.set("UCAS_RUN_DIR", &ws.project_root().display().to_string());

    runner::stop(&run_def, &context, ws.settings())
}

/// Whether some team session is already running for the project.
pub fn is_team_running(project_root: &Path) -> bool {
    let name = project_root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    !name.is_empty() && runner::session_alive(&name)
}

fn in_flight_launches() -> &'static Mutex<HashSet<PathBuf>> {
    static IN_FLIGHT: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    IN_FLIGHT.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Autostart hook invoked by the mail store after a successful delivery.
///
/// Launches the target project's team when its config opts in with
/// `team_autostart: true`, no session is already running there, and no
/// launch for that root is already in flight in this process.
pub fn autostart_on_delivery(ws: &Workspace, target_root: &Path) {
    let target = ws.with_project_root(target_root);
    let autostart = layers::base_config(&target)
        .map(|base| config_tree::get_bool(&base, "team_autostart"))
        .unwrap_or(false);
    if !autostart {
        return;
    }
    if is_team_running(target_root) {
        log::debug!(
            "autostart skipped, team already running at {}",
            target_root.display()
        );
        return;
    }
    {
        let mut in_flight = in_flight_launches().lock().expect("in-flight lock");
        if !in_flight.insert(target_root.to_path_buf()) {
            return;
        }
    }
    log::info!("autostarting team at {}", target_root.display());
    let result = run_team(&target, None, &[]);
    in_flight_launches()
        .lock()
        .expect("in-flight lock")
        .remove(target_root);
    if let Err(e) = result {
        log::warn!("autostart failed for {}: {e}", target_root.display());
    }
}

/// One row of the status report.
#[derive(Debug)]
pub struct StatusRow {
    /// Session the window belongs to.
    pub session: String,
    /// Window (member) name.
    pub window: String,
    /// Pane process id.
    pub pid: String,
    /// `RUNNING` or `DEAD`.
    pub state: &'static str,
}

/// Live runner windows for this project, grouped by session.
pub fn status(ws: &Workspace) -> Vec<StatusRow> {
    let root = ws.project_root().display().to_string();
    let mut rows = Vec::new();
    let mut seen = HashSet::new();
    for pane in runner::list_panes() {
        let inside = pane.path == root || pane.path.starts_with(&format!("{root}/"));
        if !inside {
            continue;
        }
        if !seen.insert((pane.session.clone(), pane.window.clone())) {
            continue;
        }
        rows.push(StatusRow {
            session: pane.session,
            window: pane.window,
            pid: pane.pid,
            state: if pane.dead { "DEAD" } else { "RUNNING" },
        });
    }
    rows
}

/// `ls-mods` flag block `[SARP]`: skills, ACLI, runner, prompt presence.
pub fn entity_flags(entity_dir: &Path, config: &Mapping) -> String {
    let mut flags = String::with_capacity(4);
    flags.push(if entity_dir.join("skills").is_dir() { 'S' } else { '.' });
    flags.push(if resolver::lookup_suffixed(config, "acli").is_some()
        || resolver::lookup_suffixed(config, "executable").is_some()
    {
        'A'
    } else {
        '.'
    });
    flags.push(if resolver::lookup_suffixed(config, "run").is_some() { 'R' } else { '.' });
    flags.push(if entity_dir.join("PROMPT.md").is_file() { 'P' } else { '.' });
    flags
}

/// Skip uppercase names when creating mailboxes for members; USER is the
/// only reserved uppercase owner and its box lives in the user home.
pub fn is_mailbox_member(name: &str) -> bool {
    name != USER_NAME && !name.chars().any(|c| c.is_uppercase())
}
