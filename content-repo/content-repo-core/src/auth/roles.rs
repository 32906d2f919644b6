use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::principal::Principal;

/// Coarse grants resolved independently of any Acl.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Unconditional access to everything.
    Root,
    /// Unconditional read access.
    ReadEverything,
}

/// Role, group and existence lookups for principals.
#[async_trait]
pub trait PrincipalManager: Send + Sync {
    async fn has_role(&self, principal: &Principal, role: Role) -> bool;

    /// Whether `principal` is a (possibly transitive) member of `group`.
    async fn is_member(&self, principal: &Principal, group: &Principal) -> bool;

    async fn principal_exists(&self, principal: &Principal) -> bool;

    async fn group_exists(&self, group: &Principal) -> bool;
}

/// Principal directory held in memory, populated up front.
#[derive(Default)]
pub struct StaticPrincipalManager {
    users: RwLock<HashSet<String>>,
    groups: RwLock<HashMap<String, HashSet<Principal>>>,
    roles: RwLock<HashMap<Role, HashSet<String>>>,
}

impl StaticPrincipalManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, name: impl Into<String>) -> Principal {
        let name = name.into();
        self.users.write().insert(name.clone());
        Principal::user(name)
    }

    /// Add `member` (a user or another group) to `group`, creating the
    /// group if needed.
    pub fn add_member(&self, group: &str, member: Principal) {
        self.groups
            .write()
            .entry(group.to_string())
            .or_default()
            .insert(member);
    }

    pub fn add_group(&self, group: &str) -> Principal {
        self.groups.write().entry(group.to_string()).or_default();
        Principal::group(group)
    }

    pub fn grant_role(&self, user: &str, role: Role) {
        self.roles
            .write()
            .entry(role)
            .or_default()
            .insert(user.to_string());
    }

    fn member_of(&self, principal: &Principal, group: &str, seen: &mut HashSet<String>) -> bool {
        if !seen.insert(group.to_string()) {
            return false;
        }
        let nested: Vec<String> = {
            let groups = self.groups.read();
            let Some(members) = groups.get(group) else {
                return false;
            };
            if members.contains(principal) {
                return true;
            }
            members
                .iter()
                .filter(|m| m.is_group())
                .map(|m| m.name().to_string())
                .collect()
        };
        nested
            .iter()
            .any(|inner| self.member_of(principal, inner, seen))
    }
}

#[async_trait]
impl PrincipalManager for StaticPrincipalManager {
    async fn has_role(&self, principal: &Principal, role: Role) -> bool {
        principal.is_user()
            && self
                .roles
                .read()
                .get(&role)
                .map_or(false, |users| users.contains(principal.name()))
    }

    async fn is_member(&self, principal: &Principal, group: &Principal) -> bool {
        if !group.is_group() {
            return false;
        }
        self.member_of(principal, group.name(), &mut HashSet::new())
    }

    async fn principal_exists(&self, principal: &Principal) -> bool {
        principal.is_user() && self.users.read().contains(principal.name())
    }

    async fn group_exists(&self, group: &Principal) -> bool {
        group.is_group() && self.groups.read().contains_key(group.name())
    }
}
