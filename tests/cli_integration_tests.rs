//! End-to-end CLI tests: dry-run launches, team expansion, ls-mods, and
//! the mail verbs, all against temporary layer trees.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Temporary system + user + project layers plus helpers to invoke the
/// binary against them.
struct CliFixture {
    temp: TempDir,
    home: PathBuf,
    install: PathBuf,
    project: PathBuf,
}

impl CliFixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let home = temp.path().join("home");
        let install = temp.path().join("install");
        let project = temp.path().join("project");
        fs::create_dir_all(&home).unwrap();
        fs::create_dir_all(install.join("mods")).unwrap();
        fs::create_dir_all(project.join(".ucas").join("mods")).unwrap();
        Self {
            temp,
            home,
            install,
            project,
        }
    }

    fn write_entity(&self, base: &Path, name: &str, config: &str) -> PathBuf {
        let dir = base.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("ucas.yaml"), config).unwrap();
        dir
    }

    fn system_entity(&self, name: &str, config: &str) -> PathBuf {
        self.write_entity(&self.install.join("mods"), name, config)
    }

    fn project_entity(&self, name: &str, config: &str) -> PathBuf {
        self.write_entity(&self.project.join(".ucas").join("mods"), name, config)
    }

    fn system_config(&self, config: &str) {
        fs::write(self.install.join("ucas.yaml"), config).unwrap();
    }

    fn ucas(&self) -> Command {
        let mut cmd = Command::cargo_bin("ucas").unwrap();
        cmd.current_dir(&self.project);
        cmd.env_clear();
        cmd.env("PATH", std::env::var("PATH").unwrap_or_default());
        cmd.env("HOME", &self.home);
        cmd.env("UCAS_HOME", &self.install);
        cmd.env("UCAS_SESSION_ID", "test-session");
        cmd
    }

    /// The standard launch stack: cli-x ACLI, bash template runner, and
    /// a basic agent with a one-line prompt.
    fn seed_launch_stack(&self) {
        self.system_config("default_acli: cli-x\ndefault_run: run-bash\n");
        self.system_entity(
            "cli-x",
            "acli:\n  name: cli-x\n  executable: cli-x\n  arg_mapping:\n    prompt_arg: --msg\n    model_flag: --model\n  model_mapping:\n    small: cli-small\n",
        );
        self.system_entity(
            "run-bash",
            "run:\n  name: run-bash\n  template: bash -c \"{cmd}\"\n",
        );
        let agent = self.project_entity("basic-agent", "");
        fs::write(agent.join("PROMPT.md"), "Hello.").unwrap();
    }
}

#[test]
fn dry_run_prints_exported_context_and_command() {
    let fixture = CliFixture::new();
    fixture.seed_launch_stack();

    fixture
        .ucas()
        .args(["run", "basic-agent", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[DRY-RUN]"))
        .stdout(predicate::str::contains("bash -c \""))
        .stdout(predicate::str::contains("export UCAS_AGENT=basic-agent"))
        .stdout(predicate::str::contains("cli-x --msg Hello."));
}

#[test]
fn dry_run_includes_mod_hooks_in_chain() {
    let fixture = CliFixture::new();
    fixture.seed_launch_stack();
    fixture.project_entity(
        "mod-a",
        "hooks:\n  prerun: echo \"MOD-A-PRE\"\n",
    );

    fixture
        .ucas()
        .args(["run", "basic-agent", "+mod-a", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("MOD-A-PRE"))
        .stdout(predicate::str::contains("export UCAS_AGENT=basic-agent"));
}

#[test]
fn unknown_agent_exits_with_config_error() {
    let fixture = CliFixture::new();
    fixture.seed_launch_stack();

    fixture
        .ucas()
        .args(["run", "no-such-agent", "--dry-run"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no-such-agent"));
}

#[test]
fn unknown_model_is_fatal_without_ignore() {
    let fixture = CliFixture::new();
    fixture.seed_launch_stack();
    fixture.project_entity("picky-agent", "requested_model: medium\n");

    fixture
        .ucas()
        .args(["run", "picky-agent", "--dry-run"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("medium"));
}

#[test]
fn unknown_model_with_ignore_omits_flag() {
    let fixture = CliFixture::new();
    fixture.seed_launch_stack();
    fixture.project_entity("picky-agent", "requested_model: medium\n");
    fs::write(
        fixture.project.join(".ucas").join("ucas-override.yaml"),
        "acli+:\n  ignore_unknown: true\n",
    )
    .unwrap();

    fixture
        .ucas()
        .args(["run", "picky-agent", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--model").not())
        .stdout(predicate::str::contains("cli-x"));
}

#[test]
fn team_members_launch_in_order_with_team_context() {
    let fixture = CliFixture::new();
    fixture.seed_launch_stack();
    fixture.project_entity(
        "mod-a",
        "hooks:\n  prerun: echo \"MOD-A-PRE\"\n",
    );
    fixture.project_entity(
        "test-team",
        "team:\n  name: test-team\n  agents:\n    member1: [basic-agent, mod-a]\n    member2: basic-agent\n",
    );

    let output = fixture
        .ucas()
        .args(["run-team", "test-team", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Starting team `test-team` with 2 members",
        ))
        .stdout(predicate::str::contains("[member1] [DRY-RUN]"))
        .stdout(predicate::str::contains("[member2] [DRY-RUN]"))
        .stdout(predicate::str::contains("export UCAS_TEAM=test-team"))
        .stdout(predicate::str::contains("MOD-A-PRE"))
        .get_output()
        .clone();

    // Declaration order is launch order.
    let stdout = String::from_utf8(output.stdout).unwrap();
    let first = stdout.find("[member1]").unwrap();
    let second = stdout.find("[member2]").unwrap();
    assert!(first < second);
}

#[test]
fn single_runner_refuses_team_execution() {
    let fixture = CliFixture::new();
    fixture.seed_launch_stack();
    fixture.system_entity(
        "run-solo",
        "run:\n  name: run-solo\n  single: true\n  template: bash -c \"{cmd}\"\n",
    );
    fixture.project_entity(
        "solo-team",
        "override_run: run-solo\nteam:\n  name: solo-team\n  agents:\n    worker: basic-agent\n",
    );

    fixture
        .ucas()
        .args(["run-team", "solo-team", "--dry-run"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("single"));
}

#[test]
fn ls_mods_reports_sarp_flags() {
    let fixture = CliFixture::new();
    fixture.seed_launch_stack();
    let skilled = fixture.project_entity("skilled", "");
    fs::create_dir_all(skilled.join("skills")).unwrap();
    fs::write(skilled.join("PROMPT.md"), "x").unwrap();

    fixture
        .ucas()
        .args(["ls-mods"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[S..P] skilled"))
        .stdout(predicate::str::contains("[.A..] cli-x"))
        .stdout(predicate::str::contains("[..R.] run-bash"))
        .stdout(predicate::str::contains("PROJECT MODS"));
}

#[test]
fn mail_send_list_read_round_trip() {
    let fixture = CliFixture::new();

    fixture
        .ucas()
        .env("UCAS_AGENT", "alice")
        .args(["mail", "send", "bob", "Hi", "--body", "Hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Mail sent to 1 recipient(s)."));

    // bob lists his inbox as JSON and recovers the id.
    let output = fixture
        .ucas()
        .env("UCAS_AGENT", "bob")
        .args(["mail", "list"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let listed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = listed.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["subject"], "Hi");
    let from = entries[0]["from"].as_str().unwrap();
    assert!(from.starts_with("alice@"));
    assert!(from.contains("project"));
    let id = entries[0]["id"].as_str().unwrap().to_string();

    fixture
        .ucas()
        .env("UCAS_AGENT", "bob")
        .args(["mail", "read", &id, "--table"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello"))
        .stdout(predicate::str::contains("moved to read folder"));

    let inbox = fixture.project.join(".ucas/mails/bob/inbox");
    let read = fixture.project.join(".ucas/mails/bob/read");
    assert_eq!(fs::read_dir(inbox).unwrap().count(), 0);
    assert_eq!(fs::read_dir(read).unwrap().count(), 1);
}

#[test]
fn mail_check_exit_codes() {
    let fixture = CliFixture::new();

    fixture
        .ucas()
        .env("UCAS_AGENT", "bob")
        .args(["mail", "check"])
        .assert()
        .code(1);

    fixture
        .ucas()
        .env("UCAS_AGENT", "alice")
        .args(["mail", "send", "bob", "Hi", "--body", "Hello"])
        .assert()
        .success();

    fixture
        .ucas()
        .env("UCAS_AGENT", "bob")
        .args(["mail", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("NEW MAIL"));

    // check is report-only: the message stays in the inbox.
    let inbox = fixture.project.join(".ucas/mails/bob/inbox");
    assert_eq!(fs::read_dir(inbox).unwrap().count(), 1);
}

#[test]
fn mail_reply_autofills_recipient_and_subject() {
    let fixture = CliFixture::new();

    fixture
        .ucas()
        .env("UCAS_AGENT", "alice")
        .args(["mail", "send", "bob", "Hi", "--body", "Hello"])
        .assert()
        .success();

    let output = fixture
        .ucas()
        .env("UCAS_AGENT", "bob")
        .args(["mail", "list"])
        .output()
        .unwrap();
    let listed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let id = listed[0]["id"].as_str().unwrap().to_string();

    fixture
        .ucas()
        .env("UCAS_AGENT", "bob")
        .args(["mail", "send", "--reply", &id, "--body", "Hi back"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Mail sent to 1 recipient(s)."));

    let output = fixture
        .ucas()
        .env("UCAS_AGENT", "alice")
        .args(["mail", "list"])
        .output()
        .unwrap();
    let listed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(listed[0]["subject"], "Re: Hi");
    assert_eq!(listed[0]["in_reply_to"].as_str().unwrap(), id);
}

#[test]
fn mail_broadcast_excludes_sender() {
    let fixture = CliFixture::new();
    for agent in ["alice", "bob", "carol"] {
        for folder in ["inbox", "read", "sent", "archive"] {
            fs::create_dir_all(
                fixture
                    .project
                    .join(".ucas/mails")
                    .join(agent)
                    .join(folder),
            )
            .unwrap();
        }
    }

    fixture
        .ucas()
        .env("UCAS_AGENT", "alice")
        .args(["mail", "send", "ALL", "Fanout", "--body", "To everyone"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Mail sent to 2 recipient(s)."));

    let alice_inbox = fixture.project.join(".ucas/mails/alice/inbox");
    assert_eq!(fs::read_dir(alice_inbox).unwrap().count(), 0);
}

#[test]
fn mail_addressbook_lists_reserved_and_local() {
    let fixture = CliFixture::new();
    fs::create_dir_all(fixture.project.join(".ucas/mails/bob/inbox")).unwrap();
    fs::write(
        fixture.project.join(".ucas/ucas.yaml"),
        "mail-addressbook:\n  ops@/srv/ops: Ops project\n",
    )
    .unwrap();

    fixture
        .ucas()
        .env("UCAS_AGENT", "alice")
        .args(["mail", "addressbook", "--table"])
        .assert()
        .success()
        .stdout(predicate::str::contains("USER"))
        .stdout(predicate::str::contains("ALL"))
        .stdout(predicate::str::contains("bob"))
        .stdout(predicate::str::contains("ops@/srv/ops"));
}

#[test]
fn mail_instruction_mentions_agent() {
    let fixture = CliFixture::new();
    fixture
        .ucas()
        .args(["mail", "instruction", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("`alice`"))
        .stdout(predicate::str::contains("ucas mail read"));
}

#[test]
fn stop_team_without_runner_stop_surface_succeeds() {
    let fixture = CliFixture::new();
    fixture.seed_launch_stack();
    fixture.project_entity(
        "test-team",
        "team:\n  name: test-team\n  agents:\n    member1: basic-agent\n",
    );

    // run-bash defines no stop surface; stopping is a no-op, not an error.
    fixture
        .ucas()
        .args(["stop-team", "test-team"])
        .assert()
        .success();
}

#[test]
fn delivery_autostarts_opted_in_project() {
    let fixture = CliFixture::new();
    fixture.seed_launch_stack();
    // The member agent must be resolvable from the target project too.
    let agent = fixture.system_entity("basic-agent", "");
    fs::write(agent.join("PROMPT.md"), "Hello.").unwrap();

    let target = fixture.temp.path().join("autostarted");
    fs::create_dir_all(target.join(".ucas")).unwrap();
    fs::write(
        target.join(".ucas/ucas.yaml"),
        "team_autostart: true\nteam:\n  name: auto\n  agents:\n    worker: basic-agent\n",
    )
    .unwrap();

    fixture
        .ucas()
        .env("UCAS_AGENT", "alice")
        .args([
            "mail",
            "send",
            &format!("bob@{}", target.display()),
            "Wake up",
            "--body",
            "ping",
            "--dry-run",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Starting team `auto` with 1 members"))
        .stdout(predicate::str::contains("[worker] [DRY-RUN]"))
        .stdout(predicate::str::contains("Mail sent to 1 recipient(s)."));
}

#[test]
fn delivery_without_autostart_flag_launches_nothing() {
    let fixture = CliFixture::new();
    fixture.seed_launch_stack();

    let target = fixture.temp.path().join("passive");
    fs::create_dir_all(target.join(".ucas")).unwrap();

    fixture
        .ucas()
        .env("UCAS_AGENT", "alice")
        .args([
            "mail",
            "send",
            &format!("bob@{}", target.display()),
            "Hi",
            "--body",
            "ping",
            "--dry-run",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Starting team").not());
}

#[test]
fn temp_projects_stay_out_of_the_registry() {
    let fixture = CliFixture::new();

    fixture
        .ucas()
        .env("UCAS_AGENT", "alice")
        .args(["mail", "send", "bob", "Hi", "--body", "Hello"])
        .assert()
        .success();

    // The fixture project lives under the OS temp root, so the registry
    // must stay absent or empty.
    let registry = fixture.home.join(".ucas/mail-projects.txt");
    let content = fs::read_to_string(&registry).unwrap_or_default();
    assert!(!content.contains(fixture.temp.path().to_str().unwrap()));
}
