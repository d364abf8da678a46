//! Launch context: the `UCAS_*` environment exported into every spawned
//! runner, plus the shell export string injected ahead of the main
//! command.

use std::env;
use std::fs;
use std::path::Path;

use crate::expand::shell_quote;
use crate::workspace::Workspace;
use crate::Result;

/// Ordered set of environment variables for one launch.
///
/// Order is preserved so the export string reads predictably; empty
/// values are suppressed everywhere.
#[derive(Debug, Clone, Default)]
pub struct LaunchContext {
    vars: Vec<(String, String)>,
}

/// Team position for a member launch.
#[derive(Debug, Clone, Default)]
pub struct TeamSlot {
    /// Team name, empty for single-agent runs.
    pub team: String,
    /// Zero-based member index.
    pub index: usize,
    /// Member count.
    pub size: usize,
}

impl LaunchContext {
    /// Prepare the context for a member launch. Creates the agent's notes
    /// directory and allocates a session id unless one is inherited from
    /// a parent team process.
    pub fn prepare(
        ws: &Workspace,
        agent_name: &str,
        agent_path: &Path,
        slot: &TeamSlot,
    ) -> Result<Self> {
        let notes_dir = ws
            .project_ucas_dir()
            .join("notes")
            .join(agent_name);
        fs::create_dir_all(&notes_dir)?;

        let session_id = env::var("UCAS_SESSION_ID")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut ctx = Self::default();
        ctx.set("UCAS_AGENT", agent_name);
        ctx.set("UCAS_TEAM", &slot.team);
        ctx.set("UCAS_TEAM_INDEX", &slot.index.to_string());
        ctx.set("UCAS_TEAM_SIZE", &slot.size.to_string());
        ctx.set("UCAS_AGENT_DIR", &agent_path.display().to_string());
        ctx.set("UCAS_AGENT_NOTES", &notes_dir.display().to_string());
        ctx.set(
            "UCAS_PROJECT_ROOT",
            &ws.project_root().display().to_string(),
        );
        ctx.set("UCAS_SESSION_ID", &session_id);
        Ok(ctx)
    }

    /// Set or replace a variable.
    pub fn set(&mut self, key: &str, value: &str) {
        if let Some(slot) = self.vars.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value.to_string();
        } else {
            self.vars.push((key.to_string(), value.to_string()));
        }
    }

    /// Value of a variable, if set.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Variables with non-empty values, for `Command::envs`.
    pub fn env_iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Substitution pairs for template expansion.
    pub fn expansion_vars(&self) -> Vec<(&str, &str)> {
        let mut vars: Vec<(&str, &str)> = Vec::new();
        for (key, value) in &self.vars {
            let name = match key.as_str() {
                "UCAS_AGENT" => "agent",
                "UCAS_TEAM" => "team",
                "UCAS_PROJECT_ROOT" => "project_root",
                "UCAS_SESSION_ID" => "session_id",
                _ => continue,
            };
            vars.push((name, value.as_str()));
        }
        // {uuid} is an alias for the session id.
        if let Some(id) = self.get("UCAS_SESSION_ID") {
            vars.push(("uuid", id));
        }
        vars
    }

    /// Shell export prefix: `export K=V && ...`, values quoted, empty
    /// values suppressed.
    pub fn export_string(&self) -> String {
        self.vars
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| format!("export {k}={}", shell_quote(v)))
            .collect::<Vec<_>>()
            .join(" && ")
    }
}
