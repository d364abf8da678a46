use std::path::PathBuf;

use clap::Parser;
use ucas::{config_tree, team, Result, Workspace};

/// Enumerate entity directories across layers: `ucas ls-mods`.
///
/// Each entity gets a 4-character flag block `[SARP]`: Skills directory,
/// ACLI definition, Runner definition, PROMPT.md.
#[derive(Parser, Debug)]
pub struct LsModsCli {}

impl LsModsCli {
    /// Print entities per layer with their flags and descriptions.
    pub fn run(self, ws: &Workspace) -> Result<()> {
        let layers: [(&str, PathBuf); 3] = [
            ("project", ws.project_mods_dir()),
            ("user", ws.user_mods_dir()),
            ("system", ws.system_mods_dir()),
        ];

        for (label, path) in layers {
            if !path.is_dir() {
                continue;
            }

            let mut entries: Vec<(String, String, String)> = Vec::new();
            let mut names: Vec<PathBuf> = std::fs::read_dir(&path)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            names.sort();

            for entity in names {
                let name = entity
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                match config_tree::load_entity_config(&entity) {
                    Ok(config) => {
                        let flags = team::entity_flags(&entity, &config);
                        let description = config_tree::get_str(&config, "description")
                            .unwrap_or("")
                            .to_string();
                        entries.push((name, description, flags));
                    }
                    Err(e) => {
                        log::warn!("skipping `{name}`: {e}");
                        entries.push((name, String::new(), "....".to_string()));
                    }
                }
            }
            if entries.is_empty() {
                continue;
            }

            if ws.settings().quiet {
                println!("# {label}");
                for (name, _, flags) in &entries {
                    if flags == "...." {
                        println!("{name}");
                    } else {
                        println!("{name} [{flags}]");
                    }
                }
            } else {
                println!("--- {} MODS ({}) ---", label.to_uppercase(), path.display());
                for (name, description, flags) in &entries {
                    if description.is_empty() {
                        println!("[{flags}] {name}");
                    } else {
                        println!("[{flags}] {name:<20} - {description}");
                    }
                }
            }
            println!();
        }
        Ok(())
    }
}
