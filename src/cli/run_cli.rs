use clap::Parser;
use ucas::{Result, Workspace};

/// Launch one agent: `ucas run <agent> [+mod ...]`.
#[derive(Parser, Debug)]
pub struct RunCli {
    /// Agent entity name.
    agent: String,

    /// Mod names applied on top of the agent, each optionally prefixed
    /// with `+`.
    #[clap(value_name = "MOD")]
    mods: Vec<String>,
}

impl RunCli {
    /// Resolve, merge, compose, and launch the agent.
    pub fn run(self, ws: &Workspace) -> Result<()> {
        let mods = crate::strip_mod_prefixes(self.mods);
        ucas::run_agent(ws, &self.agent, mods)
    }
}
