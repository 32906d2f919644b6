//! The stored unit of the repository and its auxiliary entities.
//!
//! A [`Resource`] handed out by the repository is always a private snapshot.
//! Changing it has no effect until it is submitted back through a store
//! operation.

pub mod comment;
pub mod lock;
pub mod property;
pub mod revision;
pub mod trash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::auth::acl::Acl;
use crate::auth::principal::Principal;
use crate::path::Path;
use lock::Lock;
use property::{Property, Value};

pub const COLLECTION_TYPE: &str = "collection";
pub const DOCUMENT_TYPE: &str = "file";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub i64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    id: Option<ResourceId>,
    uri: Path,
    resource_type: String,
    collection: bool,
    properties: BTreeMap<String, BTreeMap<String, Value>>,
    acl: Acl,
    acl_inherited_from: Option<ResourceId>,
    child_uris: Vec<Path>,
    lock: Option<Lock>,
    ancestor_ids: Option<Vec<ResourceId>>,
    owner: Principal,
    created_by: Principal,
    creation_time: DateTime<Utc>,
    modified_by: Principal,
    last_modified: DateTime<Utc>,
    content_length: u64,
    content_checksum: Option<String>,
    published: bool,
}

impl Resource {
    /// A not yet persisted resource owned by `principal`.
    pub fn new(uri: Path, collection: bool, principal: &Principal, now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            uri,
            resource_type: if collection { COLLECTION_TYPE } else { DOCUMENT_TYPE }.to_string(),
            collection,
            properties: BTreeMap::new(),
            acl: Acl::new(),
            acl_inherited_from: None,
            child_uris: Vec::new(),
            lock: None,
            ancestor_ids: None,
            owner: principal.clone(),
            created_by: principal.clone(),
            creation_time: now,
            modified_by: principal.clone(),
            last_modified: now,
            content_length: 0,
            content_checksum: None,
            published: true,
        }
    }

    pub fn id(&self) -> Option<ResourceId> {
        self.id
    }

    /// Assigned by the data accessor on first store.
    pub fn set_id(&mut self, id: ResourceId) {
        self.id = Some(id);
    }

    pub fn uri(&self) -> &Path {
        &self.uri
    }

    pub fn set_uri(&mut self, uri: Path) {
        self.uri = uri;
    }

    pub fn name(&self) -> &str {
        self.uri.name()
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn set_resource_type(&mut self, resource_type: impl Into<String>) {
        self.resource_type = resource_type.into();
    }

    pub fn is_collection(&self) -> bool {
        self.collection
    }

    // properties

    pub fn property(&self, namespace: &str, name: &str) -> Option<&Value> {
        self.properties.get(namespace)?.get(name)
    }

    pub fn set_property(&mut self, property: Property) {
        self.properties
            .entry(property.namespace)
            .or_default()
            .insert(property.name, property.value);
    }

    pub fn remove_property(&mut self, namespace: &str, name: &str) -> Option<Value> {
        let ns = self.properties.get_mut(namespace)?;
        let removed = ns.remove(name);
        if ns.is_empty() {
            self.properties.remove(namespace);
        }
        removed
    }

    pub fn properties(&self) -> impl Iterator<Item = Property> + '_ {
        self.properties.iter().flat_map(|(ns, props)| {
            props.iter().map(move |(name, value)| Property {
                namespace: ns.clone(),
                name: name.clone(),
                value: value.clone(),
            })
        })
    }

    /// Replace every user property with those of `other`.
    pub fn copy_properties_from(&mut self, other: &Resource) {
        self.properties = other.properties.clone();
    }

    // acl

    /// The effective Acl, whether owned or inherited.
    pub fn acl(&self) -> &Acl {
        &self.acl
    }

    pub fn is_inherited_acl(&self) -> bool {
        self.acl_inherited_from.is_some()
    }

    pub fn acl_inherited_from(&self) -> Option<ResourceId> {
        self.acl_inherited_from
    }

    /// Give the resource its own Acl.
    pub fn set_acl(&mut self, acl: Acl) {
        self.acl = acl;
        self.acl_inherited_from = None;
    }

    pub fn inherit_acl(&mut self, from: ResourceId, acl: Acl) {
        self.acl = acl;
        self.acl_inherited_from = Some(from);
    }

    /// The id descendants of this resource inherit their Acl from.
    pub fn acl_source(&self) -> Option<ResourceId> {
        self.acl_inherited_from.or(self.id)
    }

    // children

    pub fn child_uris(&self) -> &[Path] {
        &self.child_uris
    }

    pub fn child_count(&self) -> usize {
        self.child_uris.len()
    }

    pub fn add_child(&mut self, uri: Path) {
        if !self.child_uris.contains(&uri) {
            self.child_uris.push(uri);
        }
    }

    pub fn remove_child(&mut self, uri: &Path) -> bool {
        let before = self.child_uris.len();
        self.child_uris.retain(|c| c != uri);
        before != self.child_uris.len()
    }

    pub fn set_child_uris(&mut self, children: Vec<Path>) {
        self.child_uris = children;
    }

    // lock

    pub fn lock(&self) -> Option<&Lock> {
        self.lock.as_ref()
    }

    /// The lock, unless it has expired at `now`.
    pub fn active_lock(&self, now: DateTime<Utc>) -> Option<&Lock> {
        self.lock.as_ref().filter(|l| !l.is_expired(now))
    }

    pub fn set_lock(&mut self, lock: Option<Lock>) {
        self.lock = lock;
    }

    pub fn ancestor_ids(&self) -> Option<&[ResourceId]> {
        self.ancestor_ids.as_deref()
    }

    pub fn set_ancestor_ids(&mut self, ids: Option<Vec<ResourceId>>) {
        self.ancestor_ids = ids;
    }

    // system attributes

    pub fn owner(&self) -> &Principal {
        &self.owner
    }

    pub fn created_by(&self) -> &Principal {
        &self.created_by
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn modified_by(&self) -> &Principal {
        &self.modified_by
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn content_checksum(&self) -> Option<&str> {
        self.content_checksum.as_deref()
    }

    pub fn is_published(&self) -> bool {
        self.published
    }

    pub fn set_published(&mut self, published: bool) {
        self.published = published;
    }

    pub fn touch(&mut self, principal: &Principal, now: DateTime<Utc>) {
        self.modified_by = principal.clone();
        self.last_modified = now;
    }

    pub fn set_content_info(&mut self, length: u64, checksum: Option<String>) {
        self.content_length = length;
        self.content_checksum = checksum;
    }

    /// Reset ownership and timestamps, as done for a fresh copy.
    pub fn reset_system_properties(&mut self, principal: &Principal, now: DateTime<Utc>) {
        self.owner = principal.clone();
        self.created_by = principal.clone();
        self.creation_time = now;
        self.modified_by = principal.clone();
        self.last_modified = now;
    }
}
