use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::acl::Acl;
use crate::auth::principal::Principal;

pub const WORKING_COPY_NAME: &str = "WORKING_COPY";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RevisionType {
    Regular,
    WorkingCopy,
}

/// Snapshot metadata for one revision of a document. Content lives in the
/// revision store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Revision {
    pub id: i64,
    pub name: String,
    pub revision_type: RevisionType,
    pub checksum: String,
    /// Changed lines against the preceding regular revision, if any.
    pub change_amount: Option<u32>,
    pub timestamp: DateTime<Utc>,
    pub author: Principal,
    pub acl: Acl,
}

impl Revision {
    pub fn is_working_copy(&self) -> bool {
        self.revision_type == RevisionType::WorkingCopy
    }

    /// Name for the next regular revision given the existing ones.
    pub fn next_regular_name(existing: &[Revision]) -> String {
        let last = existing
            .iter()
            .filter(|r| r.revision_type == RevisionType::Regular)
            .filter_map(|r| r.name.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        (last + 1).to_string()
    }
}

/// Number of lines removed plus lines added to turn `old` into `new`.
///
/// Uses a longest-common-subsequence over lines; inputs whose product of
/// line counts exceeds the work limit fall back to comparing line multisets.
pub fn change_amount(old: &[u8], new: &[u8]) -> u32 {
    const WORK_LIMIT: usize = 4_000_000;

    let a: Vec<&[u8]> = old.split(|b| *b == b'\n').collect();
    let b: Vec<&[u8]> = new.split(|b| *b == b'\n').collect();
    let common = if a.len().saturating_mul(b.len()) <= WORK_LIMIT {
        lcs_len(&a, &b)
    } else {
        shared_lines(&a, &b)
    };
    ((a.len() - common) + (b.len() - common)) as u32
}

fn lcs_len(a: &[&[u8]], b: &[&[u8]]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            cur[j + 1] = if x == y {
                prev[j] + 1
            } else {
                cur[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

fn shared_lines(a: &[&[u8]], b: &[&[u8]]) -> usize {
    let mut counts = std::collections::HashMap::new();
    for line in a {
        *counts.entry(*line).or_insert(0usize) += 1;
    }
    let mut shared = 0;
    for line in b {
        if let Some(n) = counts.get_mut(line) {
            if *n > 0 {
                *n -= 1;
                shared += 1;
            }
        }
    }
    shared
}
