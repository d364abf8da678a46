//! Suffix-strategy merge engine.
//!
//! Combines a *base* tree with an *overlay* tree. Each overlay key may
//! carry a one-character strategy suffix controlling how it combines with
//! the same key in the base:
//!
//! | Suffix | Effect |
//! |---|---|
//! | (none) | recurse on mappings, otherwise replace |
//! | `+` | recurse on mappings, concatenate sequences, otherwise replace |
//! | `-` | remove listed elements / keys, or drop the entry for scalars |
//! | `!` | unconditional replace |
//! | `?` | insert only when the key is absent |
//! | `~` | update only when the key is present |
//!
//! Unknown suffixes are part of the key. The engine is pure: it never
//! touches the filesystem and only emits trace/warn logs.

use serde_yaml::{Mapping, Value};

/// Per-key combination strategy, parsed from the key's last character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Recurse on mappings, replace otherwise.
    Default,
    /// `+`: merge mappings, concatenate sequences.
    Merge,
    /// `-`: remove elements, keys, or the whole entry.
    Remove,
    /// `!`: unconditional replacement.
    Override,
    /// `?`: set only if missing.
    IfMissing,
    /// `~`: set only if present.
    IfPresent,
}

/// Split a raw overlay key into its effective key and strategy.
pub fn split_key(raw: &str) -> (&str, Strategy) {
    let strategy = match raw.chars().last() {
        Some('+') => Strategy::Merge,
        Some('-') => Strategy::Remove,
        Some('!') => Strategy::Override,
        Some('?') => Strategy::IfMissing,
        Some('~') => Strategy::IfPresent,
        _ => return (raw, Strategy::Default),
    };
    (&raw[..raw.len() - 1], strategy)
}

/// Merge `overlay` into `base`, returning a new mapping.
pub fn merge_mappings(base: &Mapping, overlay: &Mapping) -> Mapping {
    let mut result = base.clone();

    for (raw_key, value) in overlay {
        let Value::String(raw) = raw_key else {
            // Non-string keys cannot carry a suffix; plain replace.
            result.insert(raw_key.clone(), value.clone());
            continue;
        };
        let (key, strategy) = split_key(raw);
        let key_value = Value::String(key.to_string());

        match strategy {
            Strategy::Override => {
                result.insert(key_value, value.clone());
            }
            Strategy::IfMissing => {
                if !result.contains_key(&key_value) {
                    result.insert(key_value, value.clone());
                }
            }
            Strategy::IfPresent => {
                if let Some(existing) = result.get(&key_value) {
                    let merged = match (existing, value) {
                        (Value::Mapping(b), Value::Mapping(o)) => {
                            Value::Mapping(merge_mappings(b, o))
                        }
                        _ => value.clone(),
                    };
                    result.insert(key_value, merged);
                }
            }
            Strategy::Remove => {
                apply_remove(&mut result, &key_value, value);
            }
            Strategy::Merge => {
                let merged = match result.get(&key_value) {
                    Some(Value::Sequence(b)) => match value {
                        Value::Sequence(o) => {
                            let mut joined = b.clone();
                            joined.extend(o.iter().cloned());
                            Value::Sequence(joined)
                        }
                        _ => {
                            log::warn!("type clash merging `{key}`: overlay replaces base");
                            value.clone()
                        }
                    },
                    Some(Value::Mapping(b)) => match value {
                        Value::Mapping(o) => Value::Mapping(merge_mappings(b, o)),
                        _ => {
                            log::warn!("type clash merging `{key}`: overlay replaces base");
                            value.clone()
                        }
                    },
                    Some(_) | None => value.clone(),
                };
                result.insert(key_value, merged);
            }
            Strategy::Default => {
                let merged = match (result.get(&key_value), value) {
                    (Some(Value::Mapping(b)), Value::Mapping(o)) => {
                        Value::Mapping(merge_mappings(b, o))
                    }
                    (Some(old), _) => {
                        log::trace!("overlay overwrites `{key}`: {old:?} -> {value:?}");
                        value.clone()
                    }
                    (None, _) => value.clone(),
                };
                result.insert(key_value, merged);
            }
        }
    }

    result
}

fn apply_remove(result: &mut Mapping, key: &Value, value: &Value) {
    let Some(existing) = result.get(key) else {
        return;
    };
    match existing {
        Value::Sequence(seq) => {
            if let Value::Sequence(to_remove) = value {
                let kept: Vec<Value> = seq
                    .iter()
                    .filter(|item| !to_remove.contains(*item))
                    .cloned()
                    .collect();
                result.insert(key.clone(), Value::Sequence(kept));
            } else {
                result.remove(key);
            }
        }
        Value::Mapping(map) => {
            let mut map = map.clone();
            match value {
                Value::Sequence(keys) => {
                    for k in keys {
                        map.remove(k);
                    }
                }
                Value::Mapping(keys) => {
                    for (k, _) in keys {
                        map.remove(k);
                    }
                }
                _ => {}
            }
            result.insert(key.clone(), Value::Mapping(map));
        }
        _ => {
            result.remove(key);
        }
    }
}
