//! Repeater configuration (repeat.toml or inline TOML)

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse repeater config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize repeater config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Per-repeater options
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RepeatConfig {
    /// Attribute carrying instructions; also the prefix for `-<action>`
    /// sub-attributes and `_useif`/`_usedefault`/`_showonempty`/`_key` flags
    #[serde(default = "default_base_attr")]
    pub base_attr: String,
    /// Quiet window before a desynced repeater rebuilds itself
    #[serde(default = "default_rebuild_delay_ms")]
    pub rebuild_delay_ms: u64,
    /// Keep instruction attributes on clones and mark items with `repeater-item`
    #[serde(default = "default_true")]
    pub debug_mode: bool,
    /// Don't warn when a pattern resolves to nothing
    #[serde(default)]
    pub empty_pattern_ok: bool,
    /// Don't log a note when showing an empty list
    #[serde(default)]
    pub empty_data_ok: bool,
    /// A failed show/hide test stops the remaining instructions on that node
    #[serde(default = "default_true")]
    pub break_on_hide: bool,
    /// Keep hidden items around and reuse them if the data is unchanged
    #[serde(default = "default_true")]
    pub cache_on_hide: bool,
    /// Give every item its own copy of the repeaters found inside a template
    #[serde(default)]
    pub clone_template_repeaters: bool,
}

fn default_base_attr() -> String {
    "rv-repeat".to_string()
}

fn default_rebuild_delay_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl Default for RepeatConfig {
    fn default() -> Self {
        Self {
            base_attr: default_base_attr(),
            rebuild_delay_ms: default_rebuild_delay_ms(),
            debug_mode: true,
            empty_pattern_ok: false,
            empty_data_ok: false,
            break_on_hide: true,
            cache_on_hide: true,
            clone_template_repeaters: false,
        }
    }
}

impl RepeatConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn rebuild_delay(&self) -> Duration {
        Duration::from_millis(self.rebuild_delay_ms)
    }

    pub(crate) fn sub_attr(&self, suffix: &str) -> String {
        format!("{}{}", self.base_attr, suffix)
    }
}
