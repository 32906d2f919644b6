use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named permission levels that can appear in an [`Acl`](super::acl::Acl).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Privilege {
    All,
    ReadWrite,
    ReadWriteUnpublished,
    AddComment,
    Read,
    ReadProcessed,
}

use Privilege::*;

impl Privilege {
    pub const VALUES: [Privilege; 6] = [All, ReadWrite, ReadWriteUnpublished, AddComment, Read, ReadProcessed];

    /// Every privilege that is at least as permissive as `self`, most
    /// permissive first. Always contains `self`.
    pub const fn implied_by(self) -> &'static [Privilege] {
        match self {
            All => &[All],
            ReadWrite => &[All, ReadWrite],
            ReadWriteUnpublished => &[All, ReadWrite, ReadWriteUnpublished],
            AddComment => &[All, ReadWrite, AddComment],
            Read => &[All, ReadWrite, ReadWriteUnpublished, AddComment, Read],
            ReadProcessed => &[All, ReadWrite, ReadWriteUnpublished, AddComment, Read, ReadProcessed],
        }
    }

    /// Whether holding `self` satisfies a check for `required`.
    pub fn satisfies(self, required: Privilege) -> bool {
        required.implied_by().contains(&self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            All => "all",
            ReadWrite => "read-write",
            ReadWriteUnpublished => "read-write-unpublished",
            AddComment => "add-comment",
            Read => "read",
            ReadProcessed => "read-processed",
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Privilege {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Privilege::VALUES
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown privilege '{}'", s))
    }
}
