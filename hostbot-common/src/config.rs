// config.rs -- dotted-key config file loader with a HashMap-indexed raw
// store, the same shape as the original's CvarContext (find-by-name via an
// index into a backing Vec), but read from a file up front rather than
// mutated live from a console.
//
// Converted from: myq2-original/qcommon/cvar.c's CvarContext, restructured
// per spec.md ss5 as a two-stage load: raw dotted keys with one-level
// fallback (`realm_N.X` falls back to `global_realm.X` when unset), then a
// typed accessor layer that turns `ConfigError::MissingRequired` /
// `InvalidValue` into a startup-time failure rather than a later panic.

use crate::error::ConfigError;
use std::collections::HashMap;
use std::path::Path;

/// The raw dotted-key store, after parsing but before typed validation.
#[derive(Debug, Clone, Default)]
pub struct RawConfig {
    entries: HashMap<String, String>,
    index: HashMap<String, usize>,
    order: Vec<String>,
}

impl RawConfig {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut cfg = RawConfig::default();
        for (line_no, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let eq = line.find('=').ok_or_else(|| ConfigError::Malformed {
                line: line_no + 1,
                text: raw_line.to_string(),
            })?;
            let key = line[..eq].trim().to_string();
            let value = line[eq + 1..].trim().to_string();
            if key.is_empty() {
                return Err(ConfigError::Malformed {
                    line: line_no + 1,
                    text: raw_line.to_string(),
                });
            }
            cfg.insert(key, value);
        }
        Ok(cfg)
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: std::sync::Arc::new(e),
        })?;
        Self::parse(&text)
    }

    fn insert(&mut self, key: String, value: String) {
        if let Some(&idx) = self.index.get(&key) {
            self.order[idx] = key.clone();
            self.entries.insert(key, value);
        } else {
            let idx = self.order.len();
            self.index.insert(key.clone(), idx);
            self.order.push(key.clone());
            self.entries.insert(key, value);
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    /// Look up `key` directly, with no fallback.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|s| s.as_str())
    }

    /// Look up a `realm_N.<suffix>` key, falling back one level to
    /// `global_realm.<suffix>` when the realm-specific key is absent
    /// (spec.md ss5: "config keys fall back exactly one level").
    pub fn get_realm(&self, realm_index: usize, suffix: &str) -> Option<&str> {
        let scoped = format!("realm_{realm_index}.{suffix}");
        if let Some(v) = self.entries.get(&scoped) {
            return Some(v.as_str());
        }
        let fallback = format!("global_realm.{suffix}");
        self.entries.get(&fallback).map(|s| s.as_str())
    }

    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingRequired(key.to_string()))
    }

    pub fn get_u16(&self, key: &str) -> Result<Option<u16>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .parse::<u16>()
                .map(Some)
                .map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: v.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => match v {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: other.to_string(),
                    reason: "expected a boolean (true/false/1/0/yes/no/on/off)".to_string(),
                }),
            },
        }
    }

    pub fn get_u32(&self, key: &str) -> Result<Option<u32>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .parse::<u32>()
                .map(Some)
                .map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: v.to_string(),
                    reason: e.to_string(),
                }),
        }
    }
}

/// Keys the runtime recognizes. An unrecognized key in the file is logged
/// as a warning (spec.md ss5: "unknown keys are tolerated, not rejected")
/// rather than failing startup -- this lets an older bot skip a newer
/// config's extra keys and vice versa.
pub const KNOWN_KEY_PREFIXES: &[&str] = &[
    "bot.",
    "db.",
    "global_realm.",
    "realm_",
    "map.",
    "lan.",
    "discovery.",
];

pub fn warn_on_unknown_keys(cfg: &RawConfig) {
    for key in cfg.keys() {
        let known = KNOWN_KEY_PREFIXES.iter().any(|p| key.starts_with(p));
        if !known {
            log::warn!("unrecognized config key `{key}` (ignored)");
        }
    }
}
