//! Lifecycle hook execution.
//!
//! The merged config may carry a `hooks` mapping whose stages are a
//! command string or a list of command strings. `install` hooks run in
//! this process before the runner starts and fail the launch on non-zero
//! exit; `prerun` / `postrun` are chained into the exported command string
//! by the launch pipeline instead.

use std::process::Command;

use serde_yaml::Mapping;

use crate::config_tree;
use crate::context::LaunchContext;
use crate::workspace::Settings;
use crate::{Error, Result};

/// Runs hook stages with the launch context injected into the child
/// environment.
pub struct HookRunner<'a> {
    context: &'a LaunchContext,
    settings: Settings,
}

impl<'a> HookRunner<'a> {
    /// A runner bound to one launch context.
    pub fn new(context: &'a LaunchContext, settings: Settings) -> Self {
        Self { context, settings }
    }

    /// Commands configured for a stage; a bare string counts as a
    /// one-element list.
    pub fn stage_commands(hooks: &Mapping, stage: &str) -> Vec<String> {
        config_tree::get(hooks, stage)
            .map(config_tree::string_or_list)
            .unwrap_or_default()
    }

    /// Run all commands of a stage in order, stopping at the first
    /// failure.
    pub fn run(&self, hooks: &Mapping, stage: &str) -> Result<()> {
        for command in Self::stage_commands(hooks, stage) {
            if self.settings.debug {
                log::debug!("running {stage} hook: {command}");
            }
            let status = Command::new("sh")
                .arg("-c")
                .arg(&command)
                .envs(self.context.env_iter())
                .status()?;
            if !status.success() {
                return Err(Error::HookFailed {
                    stage: stage.to_string(),
                    command,
                    code: status.code().unwrap_or(1),
                });
            }
        }
        Ok(())
    }
}
