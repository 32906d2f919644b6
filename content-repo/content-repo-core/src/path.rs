//! Hierarchical resource identifiers.
//!
//! A [`Path`] is an immutable, validated `/`-separated uri. Canonical values
//! are shared through a small interning table that always holds the root.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{RepositoryError, Result};

pub const SEPARATOR: char = '/';
pub const MAX_LENGTH: usize = 1500;
const INTERN_CAPACITY: usize = 1024;

static INTERNED: Lazy<RwLock<HashMap<Arc<str>, Path>>> = Lazy::new(|| {
    let root = Path(Arc::from("/"));
    let mut table = HashMap::with_capacity(64);
    table.insert(root.0.clone(), root);
    RwLock::new(table)
});

#[derive(Clone)]
pub struct Path(Arc<str>);

impl Path {
    /// Parse and validate a path string.
    pub fn from_string(uri: &str) -> Result<Path> {
        validate(uri)?;
        Ok(Self::canonical(uri))
    }

    pub fn root() -> Path {
        Self::canonical("/")
    }

    /// Look up (or create and, space permitting, intern) the canonical value
    /// for an already-validated uri.
    fn canonical(uri: &str) -> Path {
        if let Some(path) = INTERNED.read().get(uri) {
            return path.clone();
        }
        let path = Path(Arc::from(uri));
        let mut table = INTERNED.write();
        if let Some(existing) = table.get(uri) {
            return existing.clone();
        }
        if table.len() < INTERN_CAPACITY {
            table.insert(path.0.clone(), path.clone());
        }
        path
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        &*self.0 == "/"
    }

    /// Last segment of the path, `/` for the root.
    pub fn name(&self) -> &str {
        if self.is_root() {
            return "/";
        }
        match self.0.rfind(SEPARATOR) {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        let idx = self.0.rfind(SEPARATOR)?;
        if idx == 0 {
            Some(Path::root())
        } else {
            Some(Self::canonical(&self.0[..idx]))
        }
    }

    /// Append a relative sub path, e.g. `"b"` or `"b/c"`.
    pub fn extend(&self, sub_path: &str) -> Result<Path> {
        if sub_path.is_empty() || sub_path.starts_with(SEPARATOR) {
            return Err(RepositoryError::InvalidPath(format!(
                "cannot extend {} with '{}'",
                self, sub_path
            )));
        }
        let uri = if self.is_root() {
            format!("/{}", sub_path)
        } else {
            format!("{}/{}", self.0, sub_path)
        };
        Path::from_string(&uri)
    }

    /// Ancestors ordered from the root down; never includes `self`.
    pub fn ancestors(&self) -> Vec<Path> {
        let mut out = Vec::new();
        if self.is_root() {
            return out;
        }
        out.push(Path::root());
        for (idx, c) in self.0.char_indices().skip(1) {
            if c == SEPARATOR {
                out.push(Self::canonical(&self.0[..idx]));
            }
        }
        out
    }

    /// Ancestors followed by `self`.
    pub fn paths(&self) -> Vec<Path> {
        let mut out = self.ancestors();
        out.push(self.clone());
        out
    }

    /// Strict ancestry: a path is never its own ancestor.
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        if self == other {
            return false;
        }
        if self.is_root() {
            return true;
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&*self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// Number of separators following the leading one; `/` and `/a` are
    /// both at depth 0, `/a/b/c` is at depth 2.
    pub fn depth(&self) -> usize {
        self.0.matches(SEPARATOR).count() - 1
    }

    /// Rewrite `self` so that the `from` prefix becomes `to`. Used when a
    /// subtree is copied or moved.
    pub fn rebase(&self, from: &Path, to: &Path) -> Result<Path> {
        if self == from {
            return Ok(to.clone());
        }
        if !from.is_ancestor_of(self) {
            return Err(RepositoryError::InvalidPath(format!(
                "{} is not below {}",
                self, from
            )));
        }
        let rest = if from.is_root() {
            &self.0[1..]
        } else {
            &self.0[from.0.len() + 1..]
        };
        to.extend(rest)
    }
}

fn validate(uri: &str) -> Result<()> {
    let invalid = |reason: &str| Err(RepositoryError::InvalidPath(format!("'{}': {}", uri, reason)));
    if uri.is_empty() {
        return invalid("empty path");
    }
    if !uri.starts_with(SEPARATOR) {
        return invalid("must start with '/'");
    }
    if uri.len() > MAX_LENGTH {
        return invalid("too long");
    }
    if uri == "/" {
        return Ok(());
    }
    if uri.ends_with(SEPARATOR) {
        return invalid("trailing '/'");
    }
    if uri.contains("//") {
        return invalid("empty segment");
    }
    if uri.contains("/../") || uri.contains("/./") {
        return invalid("relative segment");
    }
    if uri.ends_with("/..") || uri.ends_with("/.") {
        return invalid("relative segment");
    }
    if uri.contains('\u{0000}') {
        return invalid("NUL character");
    }
    Ok(())
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({})", self.0)
    }
}

impl std::str::FromStr for Path {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self> {
        Path::from_string(s)
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Path::from_string(&s).map_err(serde::de::Error::custom)
    }
}
