#![warn(missing_docs)]
//! # ucas
//!
//! Universal launcher and orchestrator for command-line AI agents.
//!
//! Given a named agent or team, ucas assembles a runtime configuration
//! from layered YAML fragments (system, user, project, mods, overrides),
//! composes an executable command for a third-party agent CLI, and spawns
//! it under a pluggable process runner such as a tmux window. Agents that
//! run together as a team coordinate through a filesystem mailbox
//! protocol under `.ucas/mails/`.
//!
//! The crate splits into:
//!
//! - configuration: [`config_tree`], [`merge`], [`resolver`], [`layers`]
//! - composition and launch: [`compose`], [`expand`], [`context`],
//!   [`hooks`], [`runner`], [`launch`]
//! - the mail system: [`mail`]
//! - team lifecycle: [`team`]

pub mod compose;
pub mod config_tree;
pub mod context;
pub mod expand;
pub mod hooks;
pub mod launch;
pub mod layers;
pub mod mail;
pub mod merge;
pub mod project;
pub mod resolver;
pub mod runner;
pub mod team;
pub mod workspace;

mod error;

pub use error::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

pub use context::{LaunchContext, TeamSlot};
pub use launch::{run_agent, run_member, LaunchPhase, MemberLaunch};
pub use mail::{Address, MailStore, Message, SendRequest};
pub use merge::{merge_mappings, Strategy};
pub use resolver::SearchPaths;
pub use runner::RunnerDef;
pub use team::{run_team, stop_team, TeamDef};
pub use workspace::{Settings, Workspace};
