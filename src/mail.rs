//! Filesystem mail between agents, teams, and the user.
//!
//! Each agent owns a mailbox `<project>/.ucas/mails/<agent>/` with the
//! four folders `inbox`, `read`, `sent`, and `archive`; the human operator
//! (`USER`) owns a global mailbox under the user home. Delivery is
//! write-then-rename so a reader never observes a partial file, and every
//! message lives in exactly one folder.

use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::workspace::Workspace;
use crate::{project, team, Error, Result};

pub mod addressbook;
pub mod message;

pub use message::{FolderedMessage, Message};

/// Reserved recipient name for the human operator.
pub const USER_NAME: &str = "USER";

/// Reserved recipient name for project-wide broadcast.
pub const ALL_NAME: &str = "ALL";

/// Mailbox folder names, in lookup order.
pub const FOLDERS: [&str; 4] = ["inbox", "read", "sent", "archive"];

/// A parsed recipient or sender address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// The human operator's global mailbox.
    User,
    /// Broadcast to every agent mailbox in the current project.
    All,
    /// A single agent, optionally in another project.
    Agent {
        /// Agent name (mailbox directory name).
        name: String,
        /// Project root owning the mailbox; `None` means the current one.
        project: Option<PathBuf>,
    },
}

impl Address {
    /// Parse an address: `USER`, `ALL`, `name`, `name@/abs/path`, or
    /// `name@./relative/path` (resolved against `current_root`).
    pub fn parse(raw: &str, current_root: &Path) -> Self {
        if raw == USER_NAME {
            return Address::User;
        }
        if raw == ALL_NAME {
            return Address::All;
        }
        if let Some((name, path)) = raw.split_once('@') {
            if !name.is_empty() && !path.is_empty() {
                let root = PathBuf::from(path);
                let root = if root.is_absolute() {
                    root
                } else {
                    crate::expand::normalize(&current_root.join(root))
                };
                return Address::Agent {
                    name: name.to_string(),
                    project: Some(root),
                };
            }
        }
        Address::Agent {
            name: raw.to_string(),
            project: None,
        }
    }
}

/// One agent's (or the user's) mail directories in a concrete project.
#[derive(Debug, Clone)]
pub struct Mailbox {
    /// Owner name.
    pub name: String,
    /// Project root owning the mailbox; `None` for the global USER box.
    pub project: Option<PathBuf>,
    /// `.../mails/<name>`
    pub dir: PathBuf,
}

impl Mailbox {
    /// Path of a folder inside this mailbox.
    pub fn folder(&self, folder: &str) -> PathBuf {
        self.dir.join(folder)
    }

    /// Create all four folders.
    pub fn ensure_dirs(&self) -> Result<()> {
        for folder in FOLDERS {
            fs::create_dir_all(self.folder(folder))?;
        }
        Ok(())
    }

    /// Number of messages waiting in the inbox.
    pub fn pending_count(&self) -> usize {
        eml_files(&self.folder("inbox")).len()
    }
}

/// The mail store bound to one invocation's workspace.
pub struct MailStore<'a> {
    ws: &'a Workspace,
}

/// Inputs of one send.
#[derive(Debug, Default)]
pub struct SendRequest {
    /// Recipient address; may be empty when replying.
    pub recipient: Option<String>,
    /// Subject; auto-filled with `Re: ...` when replying.
    pub subject: Option<String>,
    /// Message body.
    pub body: String,
    /// Id of the message being replied to.
    pub reply_to: Option<String>,
    /// Acts as this sender instead of the environment identity.
    pub sender_override: Option<String>,
}

impl<'a> MailStore<'a> {
    /// A store over the given workspace.
    pub fn new(ws: &'a Workspace) -> Self {
        Self { ws }
    }

    /// The global USER mailbox.
    pub fn user_mailbox(&self) -> Mailbox {
        Mailbox {
            name: USER_NAME.to_string(),
            project: None,
            dir: self.ws.user_ucas_dir().join("mails").join(USER_NAME),
        }
    }

    /// The mailbox of an agent in a project.
    pub fn agent_mailbox(&self, name: &str, root: &Path) -> Mailbox {
        Mailbox {
            name: name.to_string(),
            project: Some(root.to_path_buf()),
            dir: root.join(".ucas").join("mails").join(name),
        }
    }

    /// Mailbox for a parsed address.
    pub fn mailbox_for(&self, address: &Address) -> Mailbox {
        match address {
            Address::User | Address::All => self.user_mailbox(),
            Address::Agent { name, project } => {
                let root = project
                    .clone()
                    .unwrap_or_else(|| self.ws.project_root().to_path_buf());
                self.agent_mailbox(name, &root)
            }
        }
    }

    /// The identity this process sends as: `UCAS_AGENT` (with its project
    /// derived from `UCAS_AGENT_NOTES` when set), else USER.
    pub fn sender_identity(&self, sender_override: Option<&str>) -> (String, Mailbox) {
        if let Some(name) = sender_override {
            let address = Address::parse(name, self.ws.project_root());
            let mailbox = self.mailbox_for(&address);
            let name = match address {
                Address::Agent { name, .. } => name,
                _ => USER_NAME.to_string(),
            };
            return (name, mailbox);
        }

        let agent = std::env::var("UCAS_AGENT").ok().filter(|a| !a.is_empty());
        let Some(agent) = agent else {
            return (USER_NAME.to_string(), self.user_mailbox());
        };

        // UCAS_AGENT_NOTES is <root>/.ucas/notes/<agent>; strip three
        // components to recover the owning project root.
        let root = std::env::var("UCAS_AGENT_NOTES")
            .ok()
            .map(PathBuf::from)
            .and_then(|notes| {
                notes
                    .parent()
                    .and_then(Path::parent)
                    .and_then(Path::parent)
                    .map(Path::to_path_buf)
            })
            .unwrap_or_else(|| self.ws.project_root().to_path_buf());

        let mailbox = self.agent_mailbox(&agent, &root);
        (agent, mailbox)
    }

    /// Full sender address for the `From` header: agents carry their
    /// project so replies are routable cross-project.
    fn from_address(&self, name: &str, mailbox: &Mailbox) -> String {
        match &mailbox.project {
            Some(root) if name != USER_NAME => format!("{name}@{}", root.display()),
            _ => name.to_string(),
        }
    }

    /// Send a message per the send contract. Returns the number of
    /// successful deliveries.
    pub fn send(&self, request: &SendRequest) -> Result<usize> {
        let (sender_name, sender_mailbox) = self.sender_identity(request.sender_override.as_deref());

        // Reply auto-fill: recipient from the replied message's From,
        // subject gains a single `Re:` prefix.
        let replied = match &request.reply_to {
            Some(id) => Some(self.find_message(id, &sender_mailbox)?),
            None => None,
        };
        let recipient = match (&request.recipient, &replied) {
            (Some(r), _) if !r.is_empty() => r.clone(),
            (_, Some(replied)) => replied.message.from.clone(),
            _ => {
                return Err(Error::MailDeliver {
                    recipient: String::new(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "no recipient and no reply id",
                    ),
                })
            }
        };
        let subject = match (&request.subject, &replied) {
            (Some(s), _) if !s.is_empty() => s.clone(),
            (_, Some(replied)) => {
                let original = &replied.message.subject;
                if original.starts_with("Re:") {
                    original.clone()
                } else {
                    format!("Re: {original}")
                }
            }
            _ => String::new(),
        };

        let sender_root = sender_mailbox
            .project
            .clone()
            .unwrap_or_else(|| self.ws.project_root().to_path_buf());
        let id = generate_mail_id();
        let message = Message::compose(
            &id,
            &self.from_address(&sender_name, &sender_mailbox),
            &recipient,
            &subject,
            &sender_root,
            request.reply_to.as_deref(),
            &request.body,
        );

        let targets = self.delivery_targets(&recipient, &sender_name)?;
        let mut delivered = 0usize;
        for target in &targets {
            match self.deliver(&message, target) {
                Ok(()) => {
                    delivered += 1;
                    self.after_delivery(target);
                }
                Err(e) => {
                    log::warn!("{e}");
                    eprintln!("Warning: {e}");
                }
            }
        }

        if delivered > 0 {
            if let Err(e) = self.write_message(&message, &sender_mailbox, "sent") {
                log::warn!("could not save sent copy: {e}");
            }
            if let Err(e) = project::register_project(self.ws.user_home(), &sender_root) {
                log::warn!("could not update project registry: {e}");
            }
        }
        Ok(delivered)
    }

    /// Resolve a recipient string into concrete target mailboxes.
    /// Broadcast covers every lowercase agent directory in the current
    /// project's `mails/`, excluding the sender.
    fn delivery_targets(&self, recipient: &str, sender_name: &str) -> Result<Vec<Mailbox>> {
        let address = Address::parse(recipient, self.ws.project_root());
        if address != Address::All {
            return Ok(vec![self.mailbox_for(&address)]);
        }

        let mails_dir = self.ws.project_mails_dir();
        let mut targets = Vec::new();
        if let Ok(entries) = fs::read_dir(&mails_dir) {
            let mut names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|name| name.chars().all(|c| !c.is_uppercase()))
                .filter(|name| name != sender_name)
                .collect();
            names.sort();
            for name in names {
                targets.push(self.agent_mailbox(&name, self.ws.project_root()));
            }
        }
        Ok(targets)
    }

    /// Write the message into the target's inbox.
    fn deliver(&self, message: &Message, target: &Mailbox) -> Result<()> {
        self.write_message(message, target, "inbox")
            .map_err(|e| Error::MailDeliver {
                recipient: target.name.clone(),
                source: match e {
                    Error::Io(io) => io,
                    other => std::io::Error::other(other.to_string()),
                },
            })
    }

    /// Atomic write: temp file plus rename within the same directory.
    fn write_message(&self, message: &Message, mailbox: &Mailbox, folder: &str) -> Result<()> {
        mailbox.ensure_dirs()?;
        let dir = mailbox.folder(folder);
        let final_path = dir.join(format!("{}.eml", message.id));
        let tmp_path = dir.join(format!("{}.eml.tmp", message.id));
        fs::write(&tmp_path, message.to_eml())?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Post-delivery hooks: USER deliveries fire the notification
    /// command, agent deliveries may autostart the owning project's team.
    fn after_delivery(&self, target: &Mailbox) {
        match &target.project {
            None => addressbook::notify_user_delivery(self.ws, &target.dir),
            Some(root) => team::autostart_on_delivery(self.ws, root),
        }
    }

    /// Messages across the given folders, newest first by file
    /// modification time. Unreadable envelopes are skipped with a
    /// warning.
    pub fn list(&self, mailbox: &Mailbox, folders: &[&str]) -> Vec<FolderedMessage> {
        let mut entries: Vec<(std::time::SystemTime, FolderedMessage)> = Vec::new();
        for folder in folders {
            for path in eml_files(&mailbox.folder(folder)) {
                let message = match Message::load(&path) {
                    Ok(message) => message,
                    Err(e) => {
                        log::warn!("skipping unreadable message: {e}");
                        continue;
                    }
                };
                let mtime = fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                entries.push((
                    mtime,
                    FolderedMessage {
                        folder: folder.to_string(),
                        message,
                        path,
                    },
                ));
            }
        }
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        entries.into_iter().map(|(_, m)| m).collect()
    }

    /// Locate a message by id across all folders; exact stem match first,
    /// then partial-prefix/substring match.
    pub fn find_message(&self, id: &str, mailbox: &Mailbox) -> Result<FolderedMessage> {
        for folder in FOLDERS {
            let path = mailbox.folder(folder).join(format!("{id}.eml"));
            if path.is_file() {
                return Ok(FolderedMessage {
                    folder: folder.to_string(),
                    message: Message::load(&path)?,
                    path,
                });
            }
        }
        for folder in FOLDERS {
            for path in eml_files(&mailbox.folder(folder)) {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                if stem.contains(id) {
                    return Ok(FolderedMessage {
                        folder: folder.to_string(),
                        message: Message::load(&path)?,
                        path,
                    });
                }
            }
        }
        Err(Error::MailNotFound(id.to_string()))
    }

    /// Read a message; a first read promotes it from `inbox` to `read`
    /// via rename. Reading from any other folder changes nothing.
    pub fn read(&self, id: &str, mailbox: &Mailbox) -> Result<FolderedMessage> {
        let mut found = self.find_message(id, mailbox)?;
        if found.folder == "inbox" {
            mailbox.ensure_dirs()?;
            let new_path = mailbox
                .folder("read")
                .join(found.path.file_name().unwrap_or_default());
            fs::rename(&found.path, &new_path)?;
            found.path = new_path;
            found.folder = "read".to_string();
        }
        Ok(found)
    }

    /// Move a message to `archive` from wherever it currently lives.
    pub fn archive(&self, id: &str, mailbox: &Mailbox) -> Result<FolderedMessage> {
        let mut found = self.find_message(id, mailbox)?;
        if found.folder != "archive" {
            mailbox.ensure_dirs()?;
            let new_path = mailbox
                .folder("archive")
                .join(found.path.file_name().unwrap_or_default());
            fs::rename(&found.path, &new_path)?;
            found.path = new_path;
            found.folder = "archive".to_string();
        }
        Ok(found)
    }

    /// Whether the inbox holds any message.
    pub fn has_new_mail(&self, mailbox: &Mailbox) -> bool {
        mailbox.pending_count() > 0
    }

    /// Block until a message arrives, polling at a fixed short interval.
    pub fn wait_for_mail(&self, mailbox: &Mailbox) {
        let _ = mailbox.ensure_dirs();
        let interval = std::time::Duration::from_secs(2);
        eprintln!("Waiting for mail in {}...", mailbox.folder("inbox").display());
        while !self.has_new_mail(mailbox) {
            std::thread::sleep(interval);
        }
    }
}

/// Generate a mail id: `YYYYMMDD-HHMMSS` plus a 4-hex random suffix.
pub fn generate_mail_id() -> String {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let suffix: u16 = rand::thread_rng().gen();
    format!("{stamp}-{suffix:04x}")
}

fn eml_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == std::ffi::OsStr::new("eml")))
        .collect()
}

/// The static usage blurb printed by `mail instruction`.
pub fn instruction_text(agent: &str) -> String {
    format!(
        "You are `{agent}`. You have a mailbox; use it to coordinate with \
your team and the user.\n\
\n\
  ucas mail check            exit 0 when new mail is waiting\n\
  ucas mail check --idle     block until mail arrives\n\
  ucas mail list             list your inbox (--all includes read)\n\
  ucas mail read <id>        read a message (moves it to read/)\n\
  ucas mail send <to> <subject> --body '...'   send a message\n\
  ucas mail send --reply <id> --body '...'     reply (recipient and\n\
                                               subject are filled in)\n\
  ucas mail archive <id>     move a message to archive/\n\
  ucas mail addressbook      who you can write to\n\
\n\
Address `USER` reaches the human operator; `ALL` broadcasts to every \
agent in this project. Cross-project delivery uses `name@/abs/path`."
    )
}
