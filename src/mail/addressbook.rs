//! Contacts and delivery notifications.
//!
//! The address book merges the reserved addresses, the agents discovered
//! in the current project's `mails/`, and the `mail-addressbook` mapping
//! from the merged configuration. Delivery to USER may fire a
//! user-configured notification command; its placeholders are
//! shell-quoted before substitution.

use std::path::Path;
use std::process::Command;

use serde::Serialize;

use crate::config_tree;
use crate::expand::shell_quote;
use crate::workspace::Workspace;
use crate::{layers, resolver, Result};

use super::{Message, ALL_NAME, USER_NAME};

/// One address book entry.
#[derive(Debug, Clone, Serialize)]
pub struct Contact {
    /// Address accepted by `mail send`.
    pub address: String,
    /// Entry kind: `System`, `Broadcast`, `Agent`, or `Configured`.
    pub kind: String,
    /// Human description.
    pub description: String,
}

/// Build the address book for the current project. `current_agent` is
/// skipped among the discovered local agents.
pub fn address_book(ws: &Workspace, current_agent: Option<&str>) -> Result<Vec<Contact>> {
    let mut contacts = vec![
        Contact {
            address: USER_NAME.to_string(),
            kind: "System".to_string(),
            description: "Human operator".to_string(),
        },
        Contact {
            address: ALL_NAME.to_string(),
            kind: "Broadcast".to_string(),
            description: "All agents in this project".to_string(),
        },
    ];

    let base = layers::base_config(ws)?;
    let search = layers::search_paths_from_base(ws, &base);

    // Local agents discovered from the mailbox directory.
    if let Ok(entries) = std::fs::read_dir(ws.project_mails_dir()) {
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.chars().all(|c| !c.is_uppercase()))
            .filter(|name| Some(name.as_str()) != current_agent)
            .collect();
        names.sort();
        for name in names {
            let description = resolver::find_entity(&name, &search)
                .ok()
                .flatten()
                .and_then(|path| config_tree::load_entity_config(&path).ok())
                .and_then(|cfg| config_tree::get_str(&cfg, "description").map(str::to_string))
                .unwrap_or_else(|| "Local agent".to_string());
            contacts.push(Contact {
                address: name,
                kind: "Agent".to_string(),
                description,
            });
        }
    }

    // Configured external contacts not already covered.
    if let Some(configured) = config_tree::get_map(&base, "mail-addressbook") {
        for (address, description) in configured {
            let Some(address) = address.as_str() else {
                continue;
            };
            if contacts.iter().any(|c| c.address == address) {
                continue;
            }
            contacts.push(Contact {
                address: address.to_string(),
                kind: "Configured".to_string(),
                description: description.as_str().unwrap_or("").to_string(),
            });
        }
    }

    Ok(contacts)
}

/// Fire the configured notification command for a USER delivery, if any.
/// The command is spawned fire-and-forget; failures only log.
pub fn notify_user_delivery(ws: &Workspace, user_mail_dir: &Path) {
    let Ok(base) = layers::base_config(ws) else {
        return;
    };
    let Some(template) = notification_template(&base) else {
        return;
    };

    // Newest inbox entry is the one just delivered.
    let store = super::MailStore::new(ws);
    let mailbox = super::Mailbox {
        name: USER_NAME.to_string(),
        project: None,
        dir: user_mail_dir.to_path_buf(),
    };
    let Some(latest) = store.list(&mailbox, &["inbox"]).into_iter().next() else {
        return;
    };

    let command = render_notification(&template, &latest.message);
    log::debug!("running mail notification: {command}");
    if let Err(e) = Command::new("sh").arg("-c").arg(&command).spawn() {
        log::warn!("mail notification failed to start: {e}");
    }
}

/// The `mail.notifications.on_new_mail` template, when non-empty.
pub fn notification_template(config: &serde_yaml::Mapping) -> Option<String> {
    let mail = config_tree::get_map(config, "mail")?;
    let notifications = config_tree::get_map(mail, "notifications")?;
    let template = config_tree::get_str(notifications, "on_new_mail")?;
    let template = template.trim();
    (!template.is_empty()).then(|| template.to_string())
}

/// Substitute `{subject}`, `{from}`, `{id}`, `{date}` into a notification
/// template; each value is shell-quoted.
pub fn render_notification(template: &str, message: &Message) -> String {
    template
        .replace("{subject}", &shell_quote(&message.subject))
        .replace("{from}", &shell_quote(&message.from))
        .replace("{id}", &shell_quote(&message.id))
        .replace("{date}", &shell_quote(&message.date))
}
