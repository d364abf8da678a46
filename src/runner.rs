//! Runner subsystem: abstract interface over process launchers.
//!
//! A runner definition carries one of `template` (a shell command with
//! placeholders), `script` (a path, `.py` goes through the system
//! interpreter), or `executable`. Script and executable runners receive a
//! fixed flag surface; templates get placeholder expansion. The matching
//! `stop_*` fields terminate a session, and `preview` returns the exact
//! command without executing.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Local;
use serde_yaml::Mapping;

use crate::config_tree;
use crate::context::LaunchContext;
use crate::expand::{self, shell_quote};
use crate::workspace::Settings;
use crate::{Error, Result};

/// Parsed runner definition.
#[derive(Debug, Clone, Default)]
pub struct RunnerDef {
    /// Display name, when declared.
    pub name: Option<String>,
    /// Script path start surface.
    pub script: Option<String>,
    /// Binary start surface.
    pub executable: Option<String>,
    /// Shell template start surface.
    pub template: Option<String>,
    /// Script path stop surface.
    pub stop_script: Option<String>,
    /// Binary stop surface.
    pub stop_executable: Option<String>,
    /// Shell template stop surface.
    pub stop_template: Option<String>,
    /// Marks the runner unusable for team execution.
    pub single: bool,
}

impl RunnerDef {
    /// Read a runner definition from an extracted `run` mapping.
    pub fn from_mapping(map: &Mapping) -> Self {
        let field = |key: &str| config_tree::get_str(map, key).map(str::to_string);
        Self {
            name: field("name"),
            script: field("script"),
            executable: field("executable"),
            template: field("template"),
            stop_script: field("stop_script"),
            stop_executable: field("stop_executable"),
            stop_template: field("stop_template"),
            single: config_tree::get_bool(map, "single"),
        }
    }

    fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    /// Whether any start surface is declared.
    pub fn has_start_surface(&self) -> bool {
        self.script.is_some() || self.executable.is_some() || self.template.is_some()
    }
}

/// A `single: true` runner cannot start team members.
pub fn validate(def: &RunnerDef, context: &LaunchContext) -> Result<()> {
    let in_team = context.get("UCAS_TEAM").is_some_and(|t| !t.is_empty());
    if in_team && def.single {
        return Err(Error::RunnerInvalid(format!(
            "runner `{}` is marked `single: true` and cannot start team members",
            def.display_name()
        )));
    }
    if !def.has_start_surface() {
        return Err(Error::RunnerInvalid(
            "runner definition missing `script`, `executable`, or `template`".to_string(),
        ));
    }
    Ok(())
}

/// The fixed flag surface passed to script and executable runners.
pub fn run_args(cmd: &str, member_name: &str, context: &LaunchContext) -> Vec<String> {
    let team = context.get("UCAS_TEAM").unwrap_or("");
    vec![
        "--cmd".into(),
        cmd.to_string(),
        "--agent".into(),
        context.get("UCAS_AGENT").unwrap_or("").to_string(),
        "--team".into(),
        team.to_string(),
        "--project-root".into(),
        context.get("UCAS_PROJECT_ROOT").unwrap_or("").to_string(),
        "--session-id".into(),
        context.get("UCAS_SESSION_ID").unwrap_or("").to_string(),
        "--session-name".into(),
        session_name(context),
        "--window-name".into(),
        window_name(member_name),
    ]
}

/// Session name: project directory name, `-team` suffixed in team runs.
pub fn session_name(context: &LaunchContext) -> String {
    let root = context.get("UCAS_PROJECT_ROOT").unwrap_or("");
    let base = Path::new(root)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "ucas".to_string());
    match context.get("UCAS_TEAM") {
        Some(team) if !team.is_empty() => format!("{base}-{team}"),
        _ => base,
    }
}

/// Window name: member name plus a time stamp to stay unique within a
/// session.
pub fn window_name(member_name: &str) -> String {
    format!("{member_name}-{}", Local::now().format("%H%M%S"))
}

/// Expand a runner template with the launch context. Placeholders other
/// than `{cmd}` are shell-quoted; `{cmd}` is a literal shell fragment.
pub fn expand_template(
    template: &str,
    cmd: &str,
    member_name: &str,
    context: &LaunchContext,
) -> String {
    let session = session_name(context);
    let window = window_name(member_name);
    let agent = context.get("UCAS_AGENT").unwrap_or("").to_string();
    let team = context.get("UCAS_TEAM").unwrap_or("").to_string();
    let root = context.get("UCAS_PROJECT_ROOT").unwrap_or("").to_string();
    let session_id = context.get("UCAS_SESSION_ID").unwrap_or("").to_string();

    let quoted: Vec<(&str, String)> = vec![
        ("agent", shell_quote(&agent)),
        ("team", shell_quote(&team)),
        ("project_root", shell_quote(&root)),
        ("session_id", shell_quote(&session_id)),
        ("session_name", shell_quote(&session)),
        ("window_name", shell_quote(&window)),
    ];
    let mut vars: Vec<(&str, &str)> = quoted
        .iter()
        .map(|(name, value)| (*name, value.as_str()))
        .collect();
    vars.push(("cmd", cmd));

    expand::expand(template, &vars)
}

fn start_parts(
    def: &RunnerDef,
    cmd: &str,
    member_name: &str,
    context: &LaunchContext,
) -> Option<Vec<String>> {
    let mut parts = interpreter_parts(def.script.as_deref(), def.executable.as_deref(), context)?;
    parts.extend(run_args(cmd, member_name, context));
    Some(parts)
}

fn stop_parts(def: &RunnerDef, context: &LaunchContext) -> Option<Vec<String>> {
    let mut parts = interpreter_parts(
        def.stop_script.as_deref(),
        def.stop_executable.as_deref(),
        context,
    )?;
    parts.extend(run_args("", "stop", context));
    Some(parts)
}

fn interpreter_parts(
    script: Option<&str>,
    executable: Option<&str>,
    context: &LaunchContext,
) -> Option<Vec<String>> {
    let resolve = |raw: &str| -> PathBuf {
        let path = PathBuf::from(raw);
        if path.is_absolute() {
            path
        } else {
            let root = context.get("UCAS_PROJECT_ROOT").unwrap_or(".");
            expand::normalize(&Path::new(root).join(path))
        }
    };

    if let Some(script) = script {
        let path = resolve(script);
        let mut parts = Vec::new();
        if path.extension().is_some_and(|ext| ext == std::ffi::OsStr::new("py")) {
            parts.push("python3".to_string());
        }
        parts.push(path.display().to_string());
        return Some(parts);
    }
    if let Some(executable) = executable {
        return Some(vec![resolve(executable).display().to_string()]);
    }
    None
}

/// The exact command a start would execute, without executing it.
pub fn preview(def: &RunnerDef, cmd: &str, member_name: &str, context: &LaunchContext) -> Result<String> {
    if let Some(parts) = start_parts(def, cmd, member_name, context) {
        return Ok(parts
            .iter()
            .map(|p| shell_quote(p))
            .collect::<Vec<_>>()
            .join(" "));
    }
    if let Some(template) = &def.template {
        return Ok(expand_template(template, cmd, member_name, context));
    }
    Err(Error::RunnerInvalid(
        "runner definition missing `script`, `executable`, or `template`".to_string(),
    ))
}

/// Start the runner; blocks until the launcher command returns. The
/// launcher itself typically detaches the child.
pub fn start(
    def: &RunnerDef,
    cmd: &str,
    member_name: &str,
    context: &LaunchContext,
    settings: Settings,
) -> Result<()> {
    if let Some(parts) = start_parts(def, cmd, member_name, context) {
        if settings.debug {
            log::debug!("running: {}", parts.join(" "));
        }
        return wait_checked(Command::new(&parts[0]).args(&parts[1..]).envs(context.env_iter()));
    }
    if let Some(template) = &def.template {
        let expanded = expand_template(template, cmd, member_name, context);
        if settings.debug {
            log::debug!("running template: {expanded}");
        }
        return wait_checked(
            Command::new("sh")
                .arg("-c")
                .arg(&expanded)
                .envs(context.env_iter()),
        );
    }
    Err(Error::RunnerInvalid(
        "runner definition missing `script`, `executable`, or `template`".to_string(),
    ))
}

/// Invoke the runner's stop surface. A runner without one is not an
/// error; it simply has nothing to stop.
pub fn stop(def: &RunnerDef, context: &LaunchContext, settings: Settings) -> Result<()> {
    if let Some(parts) = stop_parts(def, context) {
        let rendered = parts
            .iter()
            .map(|p| shell_quote(p))
            .collect::<Vec<_>>()
            .join(" ");
        if settings.dry_run {
            println!("[DRY-RUN] would run stop: {rendered}");
            return Ok(());
        }
        log::debug!("running stop: {rendered}");
        return wait_checked(Command::new(&parts[0]).args(&parts[1..]).envs(context.env_iter()));
    }
    if let Some(template) = &def.stop_template {
        let expanded = expand_template(template, "", "stop", context);
        if settings.dry_run {
            println!("[DRY-RUN] would run stop template: {expanded}");
            return Ok(());
        }
        return wait_checked(
            Command::new("sh")
                .arg("-c")
                .arg(&expanded)
                .envs(context.env_iter()),
        );
    }
    log::debug!("no stop surface defined for runner `{}`", def.display_name());
    Ok(())
}

fn wait_checked(command: &mut Command) -> Result<()> {
    let status = command.status()?;
    if status.success() {
        Ok(())
    } else {
        Err(Error::RunnerExec(status.code().unwrap_or(1)))
    }
}

/// One pane reported by the process registry.
#[derive(Debug, Clone)]
pub struct SessionPane {
    /// Terminal-multiplexer session name.
    pub session: String,
    /// Window name inside the session.
    pub window: String,
    /// Current working directory of the pane.
    pub path: String,
    /// Whether the pane's process has exited.
    pub dead: bool,
    /// Process id of the pane.
    pub pid: String,
}

/// Enumerate panes of the terminal multiplexer's registry. An absent
/// multiplexer yields an empty list.
pub fn list_panes() -> Vec<SessionPane> {
    let output = Command::new("tmux")
        .args([
            "list-panes",
            "-a",
            "-F",
            "#{session_name}|#{window_name}|#{pane_current_path}|#{pane_dead}|#{pane_pid}",
        ])
        .output();
    let Ok(output) = output else {
        return Vec::new();
    };
    if !output.status.success() {
        return Vec::new();
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('|').collect();
            if parts.len() < 5 {
                return None;
            }
            Some(SessionPane {
                session: parts[0].to_string(),
                window: parts[1].to_string(),
                path: parts[2].to_string(),
                dead: parts[3] == "1",
                pid: parts[4].to_string(),
            })
        })
        .collect()
}

/// Whether any live session belongs to the given project: an exact name
/// match or a `<name>-` prefix.
pub fn session_alive(project_name: &str) -> bool {
    list_panes().iter().any(|pane| {
        pane.session == project_name || pane.session.starts_with(&format!("{project_name}-"))
    })
}
