//! The on-disk message envelope.
//!
//! Messages are RFC-822-style: a header block, a blank line, and a
//! plain-text body. Mandatory headers are `From`, `To`, `Subject`, `Date`
//! (RFC 2822), `Message-ID` (`<id@ucas-<hostname>>`), and `X-Ucas-Project`
//! (absolute path of the originating project); `X-Ucas-In-Reply-To` is
//! optional.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::{Error, Result};

/// A parsed or freshly composed message.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    /// Generated mail id; equals the file stem.
    pub id: String,
    /// Sender address, including the project suffix for agents.
    pub from: String,
    /// Recipient address as given.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// RFC 2822 date string.
    pub date: String,
    /// Absolute path of the originating project.
    pub project: String,
    /// Id of the message this replies to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    /// Plain-text body.
    pub body: String,
}

impl Message {
    /// Compose a new message stamped with the current time and this
    /// host's name.
    pub fn compose(
        id: &str,
        from: &str,
        to: &str,
        subject: &str,
        project: &Path,
        in_reply_to: Option<&str>,
        body: &str,
    ) -> Self {
        let now: DateTime<Local> = Local::now();
        Self {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            subject: subject.to_string(),
            date: now.to_rfc2822(),
            project: project.display().to_string(),
            in_reply_to: in_reply_to.map(str::to_string),
            body: body.to_string(),
        }
    }

    /// The on-wire `Message-ID` header value.
    pub fn message_id(&self) -> String {
        format!("<{}@ucas-{}>", self.id, hostname())
    }

    /// Render the envelope for writing to disk.
    pub fn to_eml(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "From: {}", self.from);
        let _ = writeln!(out, "To: {}", self.to);
        let _ = writeln!(out, "Subject: {}", self.subject);
        let _ = writeln!(out, "Date: {}", self.date);
        let _ = writeln!(out, "Message-ID: {}", self.message_id());
        let _ = writeln!(out, "X-Ucas-Project: {}", self.project);
        if let Some(reply) = &self.in_reply_to {
            let _ = writeln!(out, "X-Ucas-In-Reply-To: {reply}");
        }
        out.push('\n');
        out.push_str(&self.body);
        if !self.body.ends_with('\n') {
            out.push('\n');
        }
        out
    }

    /// Parse an envelope read from `path`. The id is recovered from the
    /// file stem, which by construction equals the generated mail id.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let mut from = None;
        let mut to = None;
        let mut subject = None;
        let mut date = None;
        let mut project = None;
        let mut in_reply_to = None;
        let mut message_id: Option<String> = None;

        let mut lines = text.lines();
        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(Error::MailParse {
                    path: path.to_path_buf(),
                    detail: format!("malformed header line `{line}`"),
                });
            };
            let value = value.trim_start().to_string();
            match name {
                "From" => from = Some(value),
                "To" => to = Some(value),
                "Subject" => subject = Some(value),
                "Date" => date = Some(value),
                "Message-ID" => message_id = Some(value),
                "X-Ucas-Project" => project = Some(value),
                "X-Ucas-In-Reply-To" => in_reply_to = Some(value),
                _ => {}
            }
        }

        let body: String = lines.collect::<Vec<_>>().join("\n");
        let missing = |header: &str| Error::MailParse {
            path: path.to_path_buf(),
            detail: format!("missing `{header}` header"),
        };

        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .or_else(|| message_id.as_ref().map(|m| local_part(m)))
            .ok_or_else(|| missing("Message-ID"))?;

        Ok(Self {
            id,
            from: from.ok_or_else(|| missing("From"))?,
            to: to.ok_or_else(|| missing("To"))?,
            subject: subject.ok_or_else(|| missing("Subject"))?,
            date: date.ok_or_else(|| missing("Date"))?,
            project: project.unwrap_or_default(),
            in_reply_to,
            body,
        })
    }

    /// Load and parse a message file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::MailParse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Self::parse(&text, path)
    }
}

/// This host's name as stamped into `Message-ID` headers.
pub fn hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

fn local_part(message_id: &str) -> String {
    message_id
        .trim_start_matches('<')
        .split('@')
        .next()
        .unwrap_or(message_id)
        .to_string()
}

/// A message paired with the folder it was found in; the listing shape.
#[derive(Debug, Clone, Serialize)]
pub struct FolderedMessage {
    /// Folder name: `inbox`, `read`, `sent`, or `archive`.
    pub folder: String,
    /// The message itself.
    #[serde(flatten)]
    pub message: Message,
    /// Path of the file, for transitions.
    #[serde(skip)]
    pub path: PathBuf,
}
