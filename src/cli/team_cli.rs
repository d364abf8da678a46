use clap::Parser;
use ucas::{team, Result, Workspace};

/// Launch a team: `ucas run-team [team] [+mod ...]`.
///
/// The team name is optional when the project config carries its own
/// `team` block.
#[derive(Parser, Debug)]
pub struct RunTeamCli {
    /// Team entity name.
    team: Option<String>,

    /// Extra mods applied to every member.
    #[clap(value_name = "MOD")]
    mods: Vec<String>,
}

impl RunTeamCli {
    /// Resolve the team definition and launch each member in order.
    pub fn run(self, ws: &Workspace) -> Result<()> {
        let mods = crate::strip_mod_prefixes(self.mods);
        team::run_team(ws, self.team.as_deref(), &mods)
    }
}

/// Stop a team session: `ucas stop-team [team]`.
#[derive(Parser, Debug)]
pub struct StopTeamCli {
    /// Team entity name.
    team: Option<String>,
}

impl StopTeamCli {
    /// Invoke the runner's stop surface for the team session.
    pub fn run(self, ws: &Workspace) -> Result<()> {
        team::stop_team(ws, self.team.as_deref())
    }
}

/// Show live runner sessions for this project.
#[derive(Parser, Debug)]
pub struct StatusCli {}

impl StatusCli {
    /// Print one row per live window, grouped by session.
    pub fn run(self, ws: &Workspace) -> Result<()> {
        let rows = team::status(ws);
        if rows.is_empty() {
            println!(
                "No active sessions for project at {}.",
                ws.project_root().display()
            );
            return Ok(());
        }

        let mut current_session = String::new();
        for row in rows {
            if row.session != current_session {
                println!("Session: {}", row.session);
                println!("{:<20} {:<8} {:<8}", "AGENT", "PID", "STATUS");
                println!("{}", "-".repeat(40));
                current_session = row.session.clone();
            }
            println!("{:<20} {:<8} {:<8}", row.window, row.pid, row.state);
        }
        Ok(())
    }
}
