//! Config tree model and file loader.
//!
//! A config is a tree of mappings, sequences, and scalars; the concrete
//! representation is [`serde_yaml::Value`] with insertion-ordered mappings,
//! which the team `agents` map relies on. The loader reads one file,
//! substitutes the literal token `__DIR__` with the absolute path of the
//! file's directory, and parses the result. It attaches no semantics: key
//! suffixes, references, and required fields are the business of later
//! stages.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::{Error, Result};

/// Name of the per-entity and per-layer config file.
pub const CONFIG_FILE: &str = "ucas.yaml";

/// Name of the paired override config file.
pub const OVERRIDE_FILE: &str = "ucas-override.yaml";

/// Load a config file, returning an empty mapping when the file is absent.
///
/// The raw text has `__DIR__` replaced by the absolute path of the file's
/// directory before parsing. A malformed file is a `config.parse` error
/// carrying the path and, when the parser reports one, the byte offset.
pub fn load_config_file(path: &Path) -> Result<Mapping> {
    if !path.exists() {
        return Ok(Mapping::new());
    }

    let text = fs::read_to_string(path)?;
    let dir = absolute_parent(path);
    let text = text.replace("__DIR__", &dir.display().to_string());

    match serde_yaml::from_str::<Value>(&text) {
        Ok(Value::Mapping(map)) => Ok(map),
        Ok(Value::Null) => Ok(Mapping::new()),
        Ok(_) => Err(Error::ConfigParse {
            path: path.to_path_buf(),
            detail: "top level must be a mapping".to_string(),
        }),
        Err(e) => {
            let detail = match e.location() {
                Some(loc) => format!("{e} (byte offset {})", loc.index()),
                None => e.to_string(),
            };
            Err(Error::ConfigParse {
                path: path.to_path_buf(),
                detail,
            })
        }
    }
}

/// Load `ucas.yaml` from an entity directory.
pub fn load_entity_config(entity_dir: &Path) -> Result<Mapping> {
    load_config_file(&entity_dir.join(CONFIG_FILE))
}

fn absolute_parent(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if parent.as_os_str().is_empty() {
        return std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    }
    parent
        .canonicalize()
        .unwrap_or_else(|_| parent.to_path_buf())
}

/// Look up a key in a mapping by its string name.
pub fn get<'a>(map: &'a Mapping, key: &str) -> Option<&'a Value> {
    map.get(Value::String(key.to_owned()))
}

/// String value of a key, if present and a string.
pub fn get_str<'a>(map: &'a Mapping, key: &str) -> Option<&'a str> {
    get(map, key).and_then(Value::as_str)
}

/// Boolean value of a key, defaulting to `false`.
pub fn get_bool(map: &Mapping, key: &str) -> bool {
    get(map, key).and_then(Value::as_bool).unwrap_or(false)
}

/// Integer value of a key, if present.
pub fn get_u64(map: &Mapping, key: &str) -> Option<u64> {
    get(map, key).and_then(Value::as_u64)
}

/// Nested mapping value of a key, if present.
pub fn get_map<'a>(map: &'a Mapping, key: &str) -> Option<&'a Mapping> {
    get(map, key).and_then(Value::as_mapping)
}

/// Sequence value of a key, if present.
pub fn get_seq<'a>(map: &'a Mapping, key: &str) -> Option<&'a Vec<Value>> {
    get(map, key).and_then(Value::as_sequence)
}

/// A value that may be written either as a single string or as a sequence
/// of strings; non-string elements are skipped.
pub fn string_or_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Sequence(seq) => seq
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Convenience for keys holding either a string or a list of strings.
pub fn get_string_list(map: &Mapping, key: &str) -> Vec<String> {
    get(map, key).map(string_or_list).unwrap_or_default()
}

/// Mod list entries may be plain names or mappings carrying a `name` key;
/// return the names in order.
pub fn mod_names(value: &Value) -> Vec<String> {
    let items: Vec<&Value> = match value {
        Value::Sequence(seq) => seq.iter().collect(),
        other => vec![other],
    };
    items
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Mapping(m) => get_str(m, "name").map(str::to_string),
            _ => None,
        })
        .collect()
}
