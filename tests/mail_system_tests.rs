//! Disk-level integration tests for the mail store: envelope format,
//! folder transitions, cross-project delivery, and the USER mailbox.

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;
use ucas::mail::{message, MailStore, SendRequest};
use ucas::{Settings, Workspace};

struct MailFixture {
    _temp: TempDir,
    ws: Workspace,
}

impl MailFixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        fs::create_dir_all(project.join(".ucas")).unwrap();
        let ws = Workspace::at(
            project,
            temp.path().join("home"),
            temp.path().join("install"),
            Settings::default(),
        );
        Self { _temp: temp, ws }
    }

    fn send(&self, from: &str, to: &str, subject: &str, body: &str) -> usize {
        MailStore::new(&self.ws)
            .send(&SendRequest {
                recipient: Some(to.to_string()),
                subject: Some(subject.to_string()),
                body: body.to_string(),
                sender_override: Some(from.to_string()),
                ..Default::default()
            })
            .unwrap()
    }

    fn inbox_files(&self, agent: &str) -> Vec<PathBuf> {
        let dir = self
            .ws
            .project_root()
            .join(".ucas/mails")
            .join(agent)
            .join("inbox");
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        entries.map(|e| e.unwrap().path()).collect()
    }
}

#[test]
fn delivered_file_stem_equals_mail_id_and_headers_are_complete() {
    let fixture = MailFixture::new();
    fixture.send("alice", "bob", "Greetings", "Body text");

    let files = fixture.inbox_files("bob");
    assert_eq!(files.len(), 1);
    let path = &files[0];
    assert_eq!(path.extension().unwrap(), "eml");

    let text = fs::read_to_string(path).unwrap();
    let stem = path.file_stem().unwrap().to_string_lossy();

    assert!(text.starts_with(&format!(
        "From: alice@{}",
        fixture.ws.project_root().display()
    )));
    assert!(text.contains("\nTo: bob\n"));
    assert!(text.contains("\nSubject: Greetings\n"));
    assert!(text.contains("\nDate: "));
    assert!(text.contains(&format!(
        "\nMessage-ID: <{stem}@ucas-{}>\n",
        message::hostname()
    )));
    assert!(text.contains(&format!(
        "\nX-Ucas-Project: {}\n",
        fixture.ws.project_root().display()
    )));
    assert!(text.ends_with("\n\nBody text\n"));

    // No leftover temp file from the write-then-rename protocol.
    let siblings: Vec<_> = fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(siblings.len(), 1);
}

#[test]
fn four_folders_exist_after_first_send() {
    let fixture = MailFixture::new();
    fixture.send("alice", "bob", "Hi", "Hello");

    for owner in ["alice", "bob"] {
        for folder in ["inbox", "read", "sent", "archive"] {
            let dir = fixture
                .ws
                .project_root()
                .join(".ucas/mails")
                .join(owner)
                .join(folder);
            assert!(dir.is_dir(), "missing {owner}/{folder}");
        }
    }
}

#[test]
fn cross_project_address_delivers_to_other_root() {
    let fixture = MailFixture::new();
    let other = fixture.ws.project_root().parent().unwrap().join("other");
    fs::create_dir_all(other.join(".ucas")).unwrap();

    let delivered = fixture.send(
        "alice",
        &format!("bob@{}", other.display()),
        "Over there",
        "Hi",
    );
    assert_eq!(delivered, 1);

    let inbox = other.join(".ucas/mails/bob/inbox");
    assert_eq!(fs::read_dir(inbox).unwrap().count(), 1);
}

#[test]
fn relative_cross_project_address_resolves_against_project_root() {
    let fixture = MailFixture::new();
    let sub = fixture.ws.project_root().join("sub");
    fs::create_dir_all(sub.join(".ucas")).unwrap();

    fixture.send("alice", "target@./sub", "Nested", "Hi");
    let inbox = sub.join(".ucas/mails/target/inbox");
    assert_eq!(fs::read_dir(inbox).unwrap().count(), 1);
}

#[test]
fn archive_moves_from_any_folder() {
    let fixture = MailFixture::new();
    let store = MailStore::new(&fixture.ws);
    fixture.send("alice", "bob", "Keep", "Body");

    let bob = store.agent_mailbox("bob", fixture.ws.project_root());
    let id = store.list(&bob, &["inbox"])[0].message.id.clone();

    // inbox -> read -> archive
    store.read(&id, &bob).unwrap();
    let archived = store.archive(&id, &bob).unwrap();
    assert_eq!(archived.folder, "archive");
    assert!(archived.path.parent().unwrap().ends_with("archive"));
    assert_eq!(bob.pending_count(), 0);
    assert_eq!(
        fs::read_dir(bob.folder("read")).unwrap().count(),
        0,
        "read copy must move, not duplicate"
    );
}

#[test]
fn user_mailbox_lives_in_user_home() {
    let fixture = MailFixture::new();
    let delivered = fixture.send("alice", "USER", "Ping", "For the human");
    assert_eq!(delivered, 1);

    let inbox = fixture.ws.user_home().join(".ucas/mails/USER/inbox");
    assert_eq!(fs::read_dir(inbox).unwrap().count(), 1);
}

#[test]
fn round_trip_preserves_reply_chain() {
    let fixture = MailFixture::new();
    let store = MailStore::new(&fixture.ws);
    fixture.send("alice", "bob", "Thread", "First");

    let bob = store.agent_mailbox("bob", fixture.ws.project_root());
    let first_id = store.list(&bob, &["inbox"])[0].message.id.clone();

    store
        .send(&SendRequest {
            body: "Second".to_string(),
            reply_to: Some(first_id.clone()),
            sender_override: Some("bob".to_string()),
            ..Default::default()
        })
        .unwrap();

    let alice = store.agent_mailbox("alice", fixture.ws.project_root());
    let reply = store.read(
        &store.list(&alice, &["inbox"])[0].message.id.clone(),
        &alice,
    );
    let reply = reply.unwrap();
    assert_eq!(reply.message.subject, "Re: Thread");
    assert_eq!(reply.message.in_reply_to.as_deref(), Some(first_id.as_str()));
    assert_eq!(reply.message.body, "Second");
    // Replying to a reply keeps a single Re: prefix.
    store
        .send(&SendRequest {
            body: "Third".to_string(),
            reply_to: Some(reply.message.id.clone()),
            sender_override: Some("alice".to_string()),
            ..Default::default()
        })
        .unwrap();
    let back = store.list(&bob, &["inbox"]);
    assert_eq!(back[0].message.subject, "Re: Thread");
}

#[test]
fn sender_project_suffix_routes_reply_across_projects() {
    let fixture = MailFixture::new();
    let store = MailStore::new(&fixture.ws);
    let other = fixture.ws.project_root().parent().unwrap().join("other");
    fs::create_dir_all(other.join(".ucas")).unwrap();

    // alice (current project) writes to bob in the other project.
    fixture.send("alice", &format!("bob@{}", other.display()), "X", "Hi");

    // bob reads it there and replies without naming a recipient.
    let bob = store.agent_mailbox("bob", &other);
    let id = store.list(&bob, &["inbox"])[0].message.id.clone();
    let bob_address = format!("bob@{}", other.display());
    store
        .send(&SendRequest {
            body: "Back at you".to_string(),
            reply_to: Some(id),
            sender_override: Some(bob_address),
            ..Default::default()
        })
        .unwrap();

    let alice = store.agent_mailbox("alice", fixture.ws.project_root());
    assert_eq!(alice.pending_count(), 1);
}

#[test]
fn unreadable_envelope_is_skipped_in_listing() {
    let fixture = MailFixture::new();
    let store = MailStore::new(&fixture.ws);
    fixture.send("alice", "bob", "Good", "Body");

    let bob = store.agent_mailbox("bob", fixture.ws.project_root());
    fs::write(bob.folder("inbox").join("broken.eml"), "no headers here").unwrap();

    let listed = store.list(&bob, &["inbox"]);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].message.subject, "Good");
}
