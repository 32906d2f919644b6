use serde::{Deserialize, Serialize};
use std::fmt;

pub const EVERYONE: &str = "pseudo:all";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalType {
    User,
    Group,
    Pseudo,
}

/// A user, a group, or the `everyone` pseudo principal.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Principal {
    kind: PrincipalType,
    name: String,
}

impl Principal {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            kind: PrincipalType::User,
            name: name.into(),
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self {
            kind: PrincipalType::Group,
            name: name.into(),
        }
    }

    pub fn everyone() -> Self {
        Self {
            kind: PrincipalType::Pseudo,
            name: EVERYONE.to_string(),
        }
    }

    pub fn kind(&self) -> PrincipalType {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_user(&self) -> bool {
        self.kind == PrincipalType::User
    }

    pub fn is_group(&self) -> bool {
        self.kind == PrincipalType::Group
    }

    pub fn is_everyone(&self) -> bool {
        self.kind == PrincipalType::Pseudo && self.name == EVERYONE
    }

    /// Parse the `user:name`, `group:name` or `pseudo:all` form produced by
    /// [`Display`](fmt::Display).
    pub fn parse(qualified: &str) -> Option<Self> {
        if qualified == EVERYONE {
            return Some(Self::everyone());
        }
        let (prefix, name) = qualified.split_once(':')?;
        if name.is_empty() {
            return None;
        }
        match prefix {
            "user" => Some(Self::user(name)),
            "group" => Some(Self::group(name)),
            _ => None,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PrincipalType::User => write!(f, "user:{}", self.name),
            PrincipalType::Group => write!(f, "group:{}", self.name),
            PrincipalType::Pseudo => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_names_roundtrip() {
        for p in [Principal::user("alice"), Principal::group("staff"), Principal::everyone()] {
            assert_eq!(Principal::parse(&p.to_string()), Some(p));
        }
        assert_eq!(Principal::parse("robot:x"), None);
        assert_eq!(Principal::parse("user:"), None);
    }
}
