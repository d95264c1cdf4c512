//! Policy configuration: structs, parsing, and validation.
//!
//! The config module is split across several sub-modules:
//! - `common`: shared helpers and `ConfigError`
//! - `zone`, `ipset`, `helper`, `redirect`: per-section configs

mod common;
mod helper;
mod ipset;
mod redirect;
mod zone;

pub use common::{ConfigError, parse_address, parse_cidr, parse_port};
pub use helper::CtHelperConfig;
pub use ipset::IpsetConfig;
pub use redirect::RedirectConfig;
pub use zone::ZoneConfig;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use domain::state::{Defaults, PolicyState};

use common::{
    MAX_HELPERS, MAX_IPSETS, MAX_REDIRECTS, MAX_ZONES, check_limit, default_true,
    warn_if_world_readable,
};

// ── Top-level config ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub zones: Vec<ZoneConfig>,

    #[serde(default)]
    pub ipsets: Vec<IpsetConfig>,

    #[serde(default)]
    pub helpers: Vec<CtHelperConfig>,

    #[serde(default)]
    pub redirects: Vec<RedirectConfig>,
}

/// Global policy switches, the `defaults` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    /// Pick conntrack helpers from the rewrite port when a record
    /// does not name one.
    #[serde(default = "default_true")]
    pub auto_helper: bool,

    /// Reject any record referencing an ipset.
    #[serde(default)]
    pub disable_ipsets: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            auto_helper: true,
            disable_ipsets: false,
        }
    }
}

impl PolicyConfig {
    /// Load config from a YAML file.
    ///
    /// On Unix, logs a warning if the config file is world-readable
    /// (permissions more permissive than 0o640).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        warn_if_world_readable(path, "config file");
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the named-object sections after deserialization.
    ///
    /// Redirect records are deliberately not validated here: a
    /// malformed record drops that record during `build_state`, it
    /// does not fail the whole load.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_limit("zones", self.zones.len(), MAX_ZONES)?;
        check_limit("ipsets", self.ipsets.len(), MAX_IPSETS)?;
        check_limit("helpers", self.helpers.len(), MAX_HELPERS)?;
        check_limit("redirects", self.redirects.len(), MAX_REDIRECTS)?;

        for (idx, zone) in self.zones.iter().enumerate() {
            zone.validate(idx)?;
        }
        for (idx, set) in self.ipsets.iter().enumerate() {
            set.validate(idx)?;
        }
        for (idx, helper) in self.helpers.iter().enumerate() {
            helper.validate(idx)?;
        }

        check_unique("zones", self.zones.iter().map(|z| z.name.as_str()))?;
        check_unique("ipsets", self.ipsets.iter().map(|s| s.name.as_str()))?;
        check_unique("helpers", self.helpers.iter().map(|h| h.name.as_str()))?;

        Ok(())
    }

    /// Build the domain policy: registries from the named-object
    /// sections, then each redirect record validated and admitted.
    /// Malformed or invalid records are logged and skipped.
    pub fn build_state(&self) -> Result<PolicyState, ConfigError> {
        let mut state = PolicyState::new(Defaults {
            auto_helper: self.defaults.auto_helper,
            disable_ipsets: self.defaults.disable_ipsets,
        });

        for zone in &self.zones {
            state.zones.push(zone.to_domain()?);
        }
        for set in &self.ipsets {
            state.ipsets.push(set.to_domain()?);
        }
        for helper in &self.helpers {
            state.helpers.push(helper.to_domain()?);
        }

        for (idx, cfg) in self.redirects.iter().enumerate() {
            match cfg.to_domain(idx) {
                Ok(redir) => state.add_redirect(redir),
                Err(err) => {
                    warn!(
                        redirect = idx,
                        %err,
                        "skipping redirect due to invalid options"
                    );
                }
            }
        }

        Ok(state)
    }
}

fn check_unique<'a>(
    section: &str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfigError::Validation {
                field: section.to_string(),
                message: format!("duplicate name '{name}'"),
            });
        }
    }
    Ok(())
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

// ── Log level ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(format!(
                "invalid log level '{s}': expected error|warn|info|debug|trace"
            )),
        }
    }
}

// ── Log format ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "pretty" => Ok(Self::Text),
            _ => Err(format!("invalid log format '{s}': expected json|text")),
        }
    }
}
