//! Repository configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::auth::blacklist::PrincipalBlacklist;
use crate::auth::privilege::Privilege;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepositoryConfig {
    /// Refuse mutations from non-root principals (default false)
    #[serde(default)]
    pub read_only: bool,

    /// Lock timeout used when none is requested or the request exceeds the
    /// maximum (default 1800 = 30 min)
    #[serde(default = "default_lock_timeout")]
    pub lock_default_timeout_secs: u64,

    /// Longest lock timeout honoured (default 3600 = 1 hour)
    #[serde(default = "default_lock_max_timeout")]
    pub lock_max_timeout_secs: u64,

    /// Maximum number of children per collection (default 3000)
    #[serde(default = "default_max_children")]
    pub max_children: usize,

    /// Maximum number of comments per resource (default 1000)
    #[serde(default = "default_max_comments")]
    pub max_comments: usize,

    /// Days a trashed resource stays recoverable (default 60)
    #[serde(default = "default_trash_retention")]
    pub trash_retention_days: u32,

    /// Seconds between maintenance runs (default 600 = 10 min)
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,

    /// Privilege to `user:<glob>` / `group:<glob>` patterns that may never
    /// hold it
    #[serde(default)]
    pub permission_blacklist: HashMap<Privilege, Vec<String>>,
}

/// Upper bound accepted for `lock_max_timeout_secs` (one year).
pub const MAX_LOCK_TIMEOUT_SECS: u64 = 365 * 24 * 3600;

fn default_lock_timeout() -> u64 { 1800 }
fn default_lock_max_timeout() -> u64 { 3600 }
fn default_max_children() -> usize { 3000 }
fn default_max_comments() -> usize { 1000 }
fn default_trash_retention() -> u32 { 60 }
fn default_maintenance_interval() -> u64 { 600 }

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            lock_default_timeout_secs: default_lock_timeout(),
            lock_max_timeout_secs: default_lock_max_timeout(),
            max_children: default_max_children(),
            max_comments: default_max_comments(),
            trash_retention_days: default_trash_retention(),
            maintenance_interval_secs: default_maintenance_interval(),
            permission_blacklist: HashMap::new(),
        }
    }
}

impl RepositoryConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("invalid repository configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lock_default_timeout_secs > self.lock_max_timeout_secs {
            anyhow::bail!(
                "lock_default_timeout_secs ({}) exceeds lock_max_timeout_secs ({})",
                self.lock_default_timeout_secs,
                self.lock_max_timeout_secs
            );
        }
        if self.lock_max_timeout_secs > MAX_LOCK_TIMEOUT_SECS {
            anyhow::bail!(
                "lock_max_timeout_secs ({}) exceeds the limit of {}",
                self.lock_max_timeout_secs,
                MAX_LOCK_TIMEOUT_SECS
            );
        }
        if self.maintenance_interval_secs == 0 {
            anyhow::bail!("maintenance_interval_secs must be positive");
        }
        self.blacklist().map(|_| ())
    }

    pub fn blacklist(&self) -> Result<PrincipalBlacklist> {
        PrincipalBlacklist::compile(&self.permission_blacklist)
    }
}
