use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::principal::Principal;
use super::privilege::Privilege;

/// Privilege to principal-set mapping attached to (or inherited by) a
/// resource.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Acl {
    entries: BTreeMap<Privilege, BTreeSet<Principal>>,
}

impl Acl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Acl::add_entry`].
    pub fn with(mut self, privilege: Privilege, principal: Principal) -> Self {
        self.add_entry(privilege, principal);
        self
    }

    /// Returns false if the entry was already present.
    pub fn add_entry(&mut self, privilege: Privilege, principal: Principal) -> bool {
        self.entries.entry(privilege).or_default().insert(principal)
    }

    pub fn remove_entry(&mut self, privilege: Privilege, principal: &Principal) -> bool {
        let Some(set) = self.entries.get_mut(&privilege) else {
            return false;
        };
        let removed = set.remove(principal);
        if set.is_empty() {
            self.entries.remove(&privilege);
        }
        removed
    }

    pub fn principals(&self, privilege: Privilege) -> impl Iterator<Item = &Principal> {
        self.entries.get(&privilege).into_iter().flatten()
    }

    pub fn contains(&self, privilege: Privilege, principal: &Principal) -> bool {
        self.entries
            .get(&privilege)
            .map_or(false, |set| set.contains(principal))
    }

    pub fn grants_everyone(&self, privilege: Privilege) -> bool {
        self.contains(privilege, &Principal::everyone())
    }

    pub fn privileges(&self) -> impl Iterator<Item = Privilege> + '_ {
        self.entries.keys().copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = (Privilege, &Principal)> {
        self.entries
            .iter()
            .flat_map(|(privilege, set)| set.iter().map(move |p| (*privilege, p)))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries present in `self` but not in `original`.
    pub fn added_since(&self, original: &Acl) -> Vec<(Privilege, Principal)> {
        self.entries()
            .filter(|(privilege, principal)| !original.contains(*privilege, principal))
            .map(|(privilege, principal)| (privilege, principal.clone()))
            .collect()
    }
}
