use std::io::Read;

use clap::{Parser, Subcommand};
use ucas::mail::{addressbook, instruction_text, FolderedMessage, MailStore, SendRequest};
use ucas::{Result, Workspace};

/// The agent mail system: `ucas mail <COMMAND>`.
#[derive(Parser, Debug)]
pub struct MailCli {
    #[command(subcommand)]
    command: MailCmds,
}

#[derive(Subcommand, Debug)]
enum MailCmds {
    /// Compose and deliver a message.
    ///
    /// The body comes from `--body` or stdin. With `--reply`, recipient
    /// and subject are recovered from the replied message when omitted.
    Send(SendCli),

    /// List messages; inbox by default.
    List(ListCli),

    /// Read a message by id; a first read moves it from inbox to read.
    Read(ReadCli),

    /// Exit 0 when new mail is waiting, 1 otherwise.
    Check(CheckCli),

    /// Move a message to the archive folder.
    Archive(ArchiveCli),

    /// Print known contacts.
    Addressbook(AddressbookCli),

    /// Print the mail usage blurb for an agent.
    Instruction(InstructionCli),
}

impl MailCli {
    /// Dispatch the mail verb; the return value is the process exit code.
    pub fn run(self, ws: &Workspace) -> Result<i32> {
        let store = MailStore::new(ws);
        match self.command {
            MailCmds::Send(cli) => cli.run(&store).map(|()| 0),
            MailCmds::List(cli) => cli.run(&store).map(|()| 0),
            MailCmds::Read(cli) => cli.run(&store).map(|()| 0),
            MailCmds::Check(cli) => cli.run(&store),
            MailCmds::Archive(cli) => cli.run(&store).map(|()| 0),
            MailCmds::Addressbook(cli) => cli.run(ws).map(|()| 0),
            MailCmds::Instruction(cli) => cli.run().map(|()| 0),
        }
    }
}

/// Output format shared by the listing-style commands. JSON is the
/// default; `--table` renders for humans.
#[derive(Parser, Debug, Default)]
struct FormatArgs {
    /// Output as JSON (default).
    #[clap(long)]
    json: bool,

    /// Output as a human-readable table.
    #[clap(long, conflicts_with = "json")]
    table: bool,
}

#[derive(Parser, Debug)]
struct SendCli {
    /// Recipient address (`name`, `name@/path`, `USER`, `ALL`).
    recipient: Option<String>,

    /// Subject line.
    subject: Option<String>,

    /// Recipient, as a flag alternative to the positional.
    #[clap(long)]
    to: Option<String>,

    /// Subject, as a flag alternative to the positional.
    #[clap(long = "subject", value_name = "SUBJECT")]
    subject_flag: Option<String>,

    /// Message body; read from stdin when omitted.
    #[clap(long)]
    body: Option<String>,

    /// Id of the message being replied to.
    #[clap(long, value_name = "ID")]
    reply: Option<String>,
}

impl SendCli {
    fn run(self, store: &MailStore) -> Result<()> {
        let body = match self.body {
            Some(body) => body,
            None => {
                let mut buffer = String::new();
                std::io::stdin().read_to_string(&mut buffer)?;
                buffer
            }
        };

        let request = SendRequest {
            recipient: self.to.or(self.recipient),
            subject: self.subject_flag.or(self.subject),
            body,
            reply_to: self.reply,
            sender_override: None,
        };
        let delivered = store.send(&request)?;
        println!("Mail sent to {delivered} recipient(s).");
        Ok(())
    }
}

#[derive(Parser, Debug)]
struct ListCli {
    /// Include already-read messages.
    #[clap(long)]
    all: bool,

    /// Show the sent folder instead of the inbox.
    #[clap(long)]
    sent: bool,

    /// Show the archive folder instead of the inbox.
    #[clap(long)]
    archive: bool,

    #[clap(flatten)]
    format: FormatArgs,
}

impl ListCli {
    fn run(self, store: &MailStore) -> Result<()> {
        let mut folders: Vec<&str> = Vec::new();
        if self.sent {
            folders.push("sent");
        } else if self.archive {
            folders.push("archive");
        } else {
            folders.push("inbox");
            if self.all {
                folders.push("read");
            }
        }

        let (_, mailbox) = store.sender_identity(None);
        let messages = store.list(&mailbox, &folders);

        if self.format.table {
            if messages.is_empty() {
                println!("No messages.");
                return Ok(());
            }
            println!(
                "{:<22} {:<32} {:<20} {:<8} SUBJECT",
                "ID", "DATE", "FROM", "FOLDER"
            );
            println!("{}", "-".repeat(100));
            for entry in &messages {
                println!(
                    "{:<22} {:<32} {:<20} {:<8} {}",
                    entry.message.id,
                    entry.message.date,
                    entry.message.from,
                    entry.folder,
                    entry.message.subject
                );
            }
        } else {
            println!("{}", serde_json::to_string_pretty(&messages)?);
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
struct ReadCli {
    /// Mail id; a unique prefix is enough.
    id: String,

    #[clap(flatten)]
    format: FormatArgs,
}

impl ReadCli {
    fn run(self, store: &MailStore) -> Result<()> {
        let (_, mailbox) = store.sender_identity(None);
        let promoted_from_inbox = store
            .find_message(&self.id, &mailbox)
            .map(|found| found.folder == "inbox")
            .unwrap_or(false);
        let entry = store.read(&self.id, &mailbox)?;

        if self.format.table {
            print_message(&entry);
            if promoted_from_inbox {
                println!("\n(Message moved to read folder)");
            }
        } else {
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
struct CheckCli {
    /// Block until mail arrives instead of reporting immediately.
    #[clap(long)]
    idle: bool,
}

impl CheckCli {
    fn run(self, store: &MailStore) -> Result<i32> {
        let (_, mailbox) = store.sender_identity(None);

        if self.idle {
            store.wait_for_mail(&mailbox);
        } else if !store.has_new_mail(&mailbox) {
            return Ok(1);
        }

        println!("*** NEW MAIL ***");
        for entry in store.list(&mailbox, &["inbox"]) {
            println!("ID:      {}", entry.message.id);
            println!("From:    {}", entry.message.from);
            println!("Subject: {}", entry.message.subject);
            println!("Command: ucas mail read {}", entry.message.id);
            println!("{}", "-".repeat(40));
        }
        Ok(0)
    }
}

#[derive(Parser, Debug)]
struct ArchiveCli {
    /// Mail id; a unique prefix is enough.
    id: String,
}

impl ArchiveCli {
    fn run(self, store: &MailStore) -> Result<()> {
        let (_, mailbox) = store.sender_identity(None);
        let entry = store.archive(&self.id, &mailbox)?;
        println!("Message {} archived.", entry.message.id);
        Ok(())
    }
}

#[derive(Parser, Debug)]
struct AddressbookCli {
    #[clap(flatten)]
    format: FormatArgs,
}

impl AddressbookCli {
    fn run(self, ws: &Workspace) -> Result<()> {
        let current_agent = std::env::var("UCAS_AGENT").ok();
        let contacts = addressbook::address_book(ws, current_agent.as_deref())?;

        if self.format.table {
            println!("{:<24} {:<12} DESCRIPTION", "ADDRESS", "TYPE");
            println!("{}", "-".repeat(64));
            for contact in &contacts {
                println!(
                    "{:<24} {:<12} {}",
                    contact.address, contact.kind, contact.description
                );
            }
        } else {
            println!("{}", serde_json::to_string_pretty(&contacts)?);
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
struct InstructionCli {
    /// Agent name to address; defaults to `UCAS_AGENT` or `agent`.
    agent: Option<String>,
}

impl InstructionCli {
    fn run(self) -> Result<()> {
        let agent = self
            .agent
            .or_else(|| std::env::var("UCAS_AGENT").ok())
            .unwrap_or_else(|| "agent".to_string());
        println!("{}", instruction_text(&agent));
        Ok(())
    }
}

fn print_message(entry: &FolderedMessage) {
    println!("From:    {}", entry.message.from);
    println!("To:      {}", entry.message.to);
    println!("Date:    {}", entry.message.date);
    println!("Subject: {}", entry.message.subject);
    if let Some(reply) = &entry.message.in_reply_to {
        println!("Reply:   {reply}");
    }
    println!("{}", "-".repeat(40));
    println!("{}", entry.message.body);
    println!("{}", "-".repeat(40));
}
