//! Per-privilege principal blacklist.
//!
//! Patterns are written as `user:<glob>` or `group:<glob>`, where `*`
//! matches any run of characters and every other character (including `.`)
//! matches literally.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::collections::HashMap;

use super::principal::{Principal, PrincipalType};
use super::privilege::Privilege;

#[derive(Debug, Default, Clone)]
pub struct PrincipalBlacklist {
    users: HashMap<Privilege, Vec<Regex>>,
    groups: HashMap<Privilege, Vec<Regex>>,
}

impl PrincipalBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(table: &HashMap<Privilege, Vec<String>>) -> Result<Self> {
        let mut blacklist = Self::new();
        for (privilege, patterns) in table {
            for pattern in patterns {
                blacklist.add(*privilege, pattern)?;
            }
        }
        Ok(blacklist)
    }

    pub fn add(&mut self, privilege: Privilege, pattern: &str) -> Result<()> {
        let (target, glob) = if let Some(glob) = pattern.strip_prefix("user:") {
            (&mut self.users, glob)
        } else if let Some(glob) = pattern.strip_prefix("group:") {
            (&mut self.groups, glob)
        } else {
            return Err(anyhow!(
                "blacklist pattern '{}' must start with 'user:' or 'group:'",
                pattern
            ));
        };
        let regex = Regex::new(&glob_to_regex(glob))?;
        target.entry(privilege).or_default().push(regex);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.groups.is_empty()
    }

    /// Whether an Acl entry granting `privilege` to `principal` is void.
    pub fn is_blacklisted(&self, privilege: Privilege, principal: &Principal) -> bool {
        let table = match principal.kind() {
            PrincipalType::User => &self.users,
            PrincipalType::Group => &self.groups,
            PrincipalType::Pseudo => return false,
        };
        table
            .get(&privilege)
            .map_or(false, |patterns| patterns.iter().any(|re| re.is_match(principal.name())))
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    for c in glob.chars() {
        if c == '*' {
            out.push_str(".*");
        } else {
            out.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4])));
        }
    }
    out.push('$');
    out
}
