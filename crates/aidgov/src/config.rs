use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use aidgov_policy::DEFAULT_ADMIN_MARKER;
use aidgov_review::DuplicatePolicy;

use crate::error::{RootError, RootResult};

/// Governance behavior switches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GovernanceConfig {
    /// What happens when a second change is proposed for a field that
    /// already has one pending: `reject` or `allow`.
    #[serde(default)]
    pub duplicate_pending: DuplicatePolicy,

    /// Substring of a session role identifier that marks an admin.
    #[serde(default = "default_admin_marker")]
    pub admin_marker: String,

    /// Admin edits to approval-gated fields apply directly.
    #[serde(default = "default_admin_bypass")]
    pub admin_bypasses_approval: bool,
}

fn default_admin_marker() -> String {
    DEFAULT_ADMIN_MARKER.to_string()
}

fn default_admin_bypass() -> bool {
    true
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            duplicate_pending: DuplicatePolicy::default(),
            admin_marker: default_admin_marker(),
            admin_bypasses_approval: default_admin_bypass(),
        }
    }
}

/// Where the field policy table comes from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    /// TOML file with `[[fields]]` tables. The built-in table is used when
    /// unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_file: Option<PathBuf>,
}

/// Top-level configuration for the aidgov binary.
///
/// Loaded from a TOML file (typically `~/.aidgov/config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootConfig {
    /// SQLite database holding entity fields and pending changes.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub governance: GovernanceConfig,

    #[serde(default)]
    pub policy: PolicyConfig,
}

fn default_database_path() -> PathBuf {
    dirs_or_default(".aidgov/aidgov.db")
}

/// Returns `$HOME/<suffix>` if HOME is available, otherwise `./<suffix>`.
fn dirs_or_default(suffix: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(suffix))
        .unwrap_or_else(|_| PathBuf::from(suffix))
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            governance: GovernanceConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

impl RootConfig {
    /// Load configuration from a TOML file. If the file does not exist,
    /// returns a default configuration.
    pub fn load(path: &Path) -> RootResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(RootError::Io)?;
        let config: RootConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> RootResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RootError::Config(format!("TOML serialize error: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(RootError::Io)?;
        }
        std::fs::write(path, contents).map_err(RootError::Io)?;
        Ok(())
    }

    pub fn validate(&self) -> RootResult<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(RootError::Config("database_path must not be empty".into()));
        }
        if self.governance.admin_marker.trim().is_empty() {
            return Err(RootError::Config(
                "governance.admin_marker must not be empty".into(),
            ));
        }
        if let Some(file) = &self.policy.policy_file {
            if file.as_os_str().is_empty() {
                return Err(RootError::Config(
                    "policy.policy_file must not be empty when set".into(),
                ));
            }
        }
        Ok(())
    }

    /// Return the path to the default config file location.
    pub fn default_config_path() -> PathBuf {
        dirs_or_default(".aidgov/config.toml")
    }
}
