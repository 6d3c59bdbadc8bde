//! Hierarchical configuration lookup.
//!
//! Three TOML tiers are consulted in order: the instance file
//! (`.loopctl/config.toml`), an optional group file supplied by the caller, and
//! the global file (`<config_dir>/loopctl/config.toml`). The first non-empty
//! scalar wins; otherwise the caller's default is used. A missing or malformed
//! tier behaves like an empty one and never aborts the caller.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use toml::Value;
use tracing::{debug, warn};

pub const WORKER_COMMAND: &str = "worker.command";
pub const WORKER_ARGS: &str = "worker.args";
pub const IMPROVE_MAX_ITERATIONS: &str = "improve.max_iterations";
pub const IMPROVE_THRESHOLD: &str = "improve.threshold";
pub const NOTIFY_TIMEOUT_SECS: &str = "notify.timeout_secs";

pub const DEFAULT_WORKER_COMMAND: &str = "claude";
pub const DEFAULT_MAX_ITERATIONS: &str = "10";
pub const DEFAULT_THRESHOLD: &str = "0.05";
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: &str = "10";

/// Which tier supplied a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine,
    Instance,
    Group,
    Global,
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigSource::CommandLine => "command line",
            ConfigSource::Instance => "instance",
            ConfigSource::Group => "group",
            ConfigSource::Global => "global",
            ConfigSource::Default => "default",
        })
    }
}

/// A resolved key with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValue {
    pub key: String,
    pub value: String,
    pub source: ConfigSource,
}

/// A configuration value that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {key} '{value}' from {origin}: {reason}")]
pub struct ConfigError {
    pub key: String,
    pub value: String,
    pub origin: ConfigSource,
    pub reason: String,
}

/// Tier file locations.
#[derive(Debug, Clone, Default)]
pub struct ConfigTiers {
    pub instance: Option<PathBuf>,
    pub group: Option<PathBuf>,
    pub global: Option<PathBuf>,
}

impl ConfigTiers {
    /// Standard tiers for a work directory: instance file, optional group file,
    /// and the user's global file.
    pub fn standard(instance: &Path, group: Option<&Path>) -> Self {
        Self {
            instance: Some(instance.to_path_buf()),
            group: group.map(Path::to_path_buf),
            global: dirs::config_dir().map(|dir| dir.join("loopctl").join("config.toml")),
        }
    }
}

/// Resolves dotted keys across the loaded tiers.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    tiers: Vec<(ConfigSource, Value)>,
}

impl ConfigResolver {
    /// Load every tier once. Unreadable tiers are logged and skipped.
    pub fn load(tiers: &ConfigTiers) -> Self {
        let ordered = [
            (ConfigSource::Instance, tiers.instance.as_deref()),
            (ConfigSource::Group, tiers.group.as_deref()),
            (ConfigSource::Global, tiers.global.as_deref()),
        ];
        let tiers = ordered
            .into_iter()
            .filter_map(|(source, path)| load_tier(source, path?).map(|doc| (source, doc)))
            .collect();
        Self { tiers }
    }

    /// Build a resolver from in-memory documents (highest priority first).
    pub fn from_documents(tiers: Vec<(ConfigSource, Value)>) -> Self {
        Self { tiers }
    }

    /// Like [`resolve`](Self::resolve), but an explicit value wins over every tier.
    pub fn resolve_override(&self, key: &str, explicit: Option<&str>, default: &str) -> ConfigValue {
        match explicit {
            Some(value) => ConfigValue {
                key: key.to_string(),
                value: value.trim().to_string(),
                source: ConfigSource::CommandLine,
            },
            None => self.resolve(key, default),
        }
    }

    /// Look up `key`, returning the first non-empty match or `default`.
    pub fn resolve(&self, key: &str, default: &str) -> ConfigValue {
        for (source, doc) in &self.tiers {
            if let Some(value) = lookup(doc, key) {
                debug!(key, value = %value, source = %source, "config resolved");
                return ConfigValue {
                    key: key.to_string(),
                    value,
                    source: *source,
                };
            }
        }
        debug!(key, value = default, "config default");
        ConfigValue {
            key: key.to_string(),
            value: default.to_string(),
            source: ConfigSource::Default,
        }
    }
}

impl ConfigValue {
    /// Parse as a finite float.
    pub fn as_f64(&self) -> Result<f64, ConfigError> {
        match self.value.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(self.invalid("expected a number")),
        }
    }

    /// Parse as a positive integer.
    pub fn as_positive_u32(&self) -> Result<u32, ConfigError> {
        match self.value.trim().parse::<u32>() {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(self.invalid("expected a positive integer")),
        }
    }

    fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError {
            key: self.key.clone(),
            value: self.value.clone(),
            origin: self.source,
            reason: reason.to_string(),
        }
    }
}

fn load_tier(source: ConfigSource, path: &Path) -> Option<Value> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(source = %source, path = %path.display(), "config tier absent");
            return None;
        }
        Err(err) => {
            warn!(source = %source, path = %path.display(), err = %err, "config tier unreadable, ignoring");
            return None;
        }
    };
    match toml::from_str::<toml::Table>(&contents) {
        Ok(doc) => Some(Value::Table(doc)),
        Err(err) => {
            warn!(source = %source, path = %path.display(), err = %err, "config tier malformed, ignoring");
            None
        }
    }
}

fn lookup(doc: &Value, key: &str) -> Option<String> {
    let mut current = doc;
    for part in key.split('.') {
        current = current.as_table()?.get(part)?;
    }
    let text = match current {
        Value::String(s) => s.trim().to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Datetime(d) => d.to_string(),
        Value::Array(_) | Value::Table(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}
