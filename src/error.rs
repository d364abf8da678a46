use std::path::PathBuf;

use thiserror::Error;

/// Error messages for ucas
#[derive(Debug, Error)]
pub enum Error {
    /// A config file could not be parsed
    #[error("failed to parse `{path}`: {detail}")]
    ConfigParse {
        /// Path of the offending file
        path: PathBuf,
        /// Parser diagnostic, including the byte offset where available
        detail: String,
    },
    /// A named entity was not found in any search directory
    #[error("`{0}` not found in any search path")]
    EntityNotFound(String),
    /// An entity name contained whitespace
    #[error("entity name `{0}` must not contain whitespace")]
    EntityNameInvalid(String),
    /// The selected ACLI definition has no `executable`
    #[error("ACLI definition missing `executable`")]
    MissingExecutable,
    /// The requested model has no mapping and no default
    #[error("model `{model}` not found in ACLI model_mapping (available: {available:?})")]
    UnknownModel {
        /// The model name the agent asked for
        model: String,
        /// Keys present in the mapping
        available: Vec<String>,
    },
    /// The runner definition cannot be used in this context
    #[error("runner invalid: {0}")]
    RunnerInvalid(String),
    /// The runner command exited with a non-zero status
    #[error("runner exited with status {0}")]
    RunnerExec(i32),
    /// A lifecycle hook exited with a non-zero status
    #[error("hook `{stage}` failed: {command} (exit code {code})")]
    HookFailed {
        /// Hook stage name (`install`, ...)
        stage: String,
        /// The command that failed
        command: String,
        /// Its exit code
        code: i32,
    },
    /// No message with the given id exists in any folder
    #[error("mail `{0}` not found")]
    MailNotFound(String),
    /// A message file exists but its envelope is unreadable
    #[error("unreadable mail envelope `{path}`: {detail}")]
    MailParse {
        /// Path of the message file
        path: PathBuf,
        /// What went wrong
        detail: String,
    },
    /// Delivery to a single recipient failed
    #[error("delivery to `{recipient}` failed: {source}")]
    MailDeliver {
        /// The recipient address as given
        recipient: String,
        /// Underlying I/O failure
        source: std::io::Error,
    },
    /// Any other I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON rendering failure in `--json` output modes
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Exit code contract: `2` for hard configuration errors, `1` for
    /// recoverable failures, the child's own code for execution errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ConfigParse { .. }
            | Error::EntityNotFound(_)
            | Error::EntityNameInvalid(_)
            | Error::MissingExecutable
            | Error::UnknownModel { .. }
            | Error::RunnerInvalid(_) => 2,
            Error::RunnerExec(code) => *code,
            Error::HookFailed { code, .. } => *code,
            Error::MailNotFound(_)
            | Error::MailParse { .. }
            | Error::MailDeliver { .. }
            | Error::Io(_)
            | Error::Json(_) => 1,
        }
    }
}
