//! Invocation-wide context: behavioral toggles and filesystem roots.
//!
//! Both are immutable for the lifetime of one invocation and threaded
//! explicitly through the subsystems, which keeps resolution and merging
//! testable against temporary trees without touching the process
//! environment.

use std::env;
use std::path::{Path, PathBuf};

use crate::project;

/// Global behavioral toggles taken from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct Settings {
    /// Preview commands instead of executing them.
    pub dry_run: bool,
    /// Emit merge/resolution tracing.
    pub debug: bool,
    /// Chatty progress output.
    pub verbose: bool,
    /// Suppress decoration in listings.
    pub quiet: bool,
}

/// The three filesystem roots every resolution works against.
#[derive(Debug, Clone)]
pub struct Workspace {
    project_root: PathBuf,
    user_home: PathBuf,
    install_root: PathBuf,
    settings: Settings,
}

impl Workspace {
    /// Discover roots for the current process: the project root is the
    /// nearest ancestor of the working directory containing `.ucas`, the
    /// install root is `$UCAS_HOME` or the executable's directory.
    pub fn discover(settings: Settings) -> crate::Result<Self> {
        let cwd = env::current_dir()?;
        let project_root = project::find_project_root(&cwd);
        let user_home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        let install_root = install_root_default();
        Ok(Self {
            project_root,
            user_home,
            install_root,
            settings,
        })
    }

    /// Build a workspace over explicit roots. Used by the team autostart
    /// hook (a foreign project root) and by tests.
    pub fn at(
        project_root: impl Into<PathBuf>,
        user_home: impl Into<PathBuf>,
        install_root: impl Into<PathBuf>,
        settings: Settings,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            user_home: user_home.into(),
            install_root: install_root.into(),
            settings,
        }
    }

    /// A copy of this workspace rooted at a different project.
    pub fn with_project_root(&self, project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            ..self.clone()
        }
    }

    /// The project root for this invocation.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// The user's home directory.
    pub fn user_home(&self) -> &Path {
        &self.user_home
    }

    /// The install root holding the system layer.
    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// Behavioral toggles for this invocation.
    pub fn settings(&self) -> Settings {
        self.settings
    }

    /// `<project>/.ucas`
    pub fn project_ucas_dir(&self) -> PathBuf {
        self.project_root.join(".ucas")
    }

    /// `<user-home>/.ucas`
    pub fn user_ucas_dir(&self) -> PathBuf {
        self.user_home.join(".ucas")
    }

    /// `<project>/.ucas/mods`
    pub fn project_mods_dir(&self) -> PathBuf {
        self.project_ucas_dir().join("mods")
    }

    /// `<user-home>/.ucas/mods`
    pub fn user_mods_dir(&self) -> PathBuf {
        self.user_ucas_dir().join("mods")
    }

    /// `<install-root>/mods`
    pub fn system_mods_dir(&self) -> PathBuf {
        self.install_root.join("mods")
    }

    /// `<project>/.ucas/mails`
    pub fn project_mails_dir(&self) -> PathBuf {
        self.project_ucas_dir().join("mails")
    }

    /// `<project>/.ucas/tmp`
    pub fn project_tmp_dir(&self) -> PathBuf {
        self.project_ucas_dir().join("tmp")
    }

    /// The session name used by runners: the project directory name,
    /// suffixed with the team name when running a team.
    pub fn session_name(&self, team: Option<&str>) -> String {
        let base = self
            .project_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "ucas".to_string());
        match team {
            Some(team) if !team.is_empty() => format!("{base}-{team}"),
            _ => base,
        }
    }
}

fn install_root_default() -> PathBuf {
    if let Ok(home) = env::var("UCAS_HOME") {
        if !home.is_empty() {
            return PathBuf::from(home);
        }
    }
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("/usr/local/share/ucas"))
}
