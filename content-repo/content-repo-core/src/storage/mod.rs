//! Persistence collaborators consumed by the repository service.
//!
//! The repository sequences authorization before mutation and mutation
//! before persistence; atomicity of a single call is the implementation's
//! responsibility.

pub mod fs;
pub mod memory;


use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use crate::auth::principal::Principal;
use crate::path::Path;
use crate::resource::comment::Comment;
use crate::resource::revision::Revision;
use crate::resource::trash::RecoverableResource;
use crate::resource::{Resource, ResourceId};

/// Resource rows: tree structure, properties, Acls, locks, trash, comments.
///
/// Loaded resources always carry their effective Acl; inherited Acls are
/// resolved by the accessor.
#[async_trait]
pub trait DataAccessor: Send + Sync {
    async fn load(&self, uri: &Path) -> Result<Option<Resource>>;

    async fn load_children(&self, parent: &Resource) -> Result<Vec<Resource>>;

    /// Persist everything but the Acl state and, for stored resources, the
    /// child list. Assigns an id to new resources and returns the stored
    /// snapshot.
    async fn store(&self, resource: Resource) -> Result<Resource>;

    /// Append `child` to the child list of the collection at `parent`,
    /// recording `by` as its last modifier, in a single step. Returns the
    /// updated collection.
    async fn add_child(&self, parent: &Path, child: &Path, by: &Principal) -> Result<Resource>;

    /// Drop `child` from the child list of the collection at `parent`,
    /// recording `by` as its last modifier, in a single step.
    async fn remove_child(&self, parent: &Path, child: &Path, by: &Principal) -> Result<Resource>;

    /// Persist the Acl state (own Acl or inheritance pointer). Descendants
    /// inheriting through `resource` are re-pointed accordingly.
    async fn store_acl(&self, resource: Resource) -> Result<Resource>;

    /// Remove `resource` and its whole subtree.
    async fn delete(&self, resource: &Resource) -> Result<()>;

    /// Copy the subtree rooted at `source`. `copy` is the prepared root of
    /// the new subtree (uri, system properties and Acl state already set);
    /// descendants take their owner and timestamps from it. Without
    /// `preserve_acl` every copied descendant inherits.
    async fn copy(&self, source: &Resource, copy: Resource, preserve_acl: bool) -> Result<Resource>;

    /// Re-root the subtree at `source` under `destination`. Ids and Acl
    /// inheritance pointers are kept; the lock on `source` is dropped.
    async fn move_to(&self, source: &Resource, destination: &Path) -> Result<Resource>;

    /// Paths in the subtree rooted at `uri` (itself included) whose
    /// resources own their Acl.
    async fn discover_acls(&self, uri: &Path) -> Result<Vec<Path>>;

    /// Move the subtree at `resource` into the trash can of `parent`,
    /// together with its comments.
    async fn mark_deleted(&self, resource: &Resource, parent: &Resource, record: RecoverableResource) -> Result<()>;

    async fn get_recoverable_resources(&self, parent_id: ResourceId) -> Result<Vec<RecoverableResource>>;

    /// Restore a trashed subtree below `parent` and return its root.
    async fn recover(&self, parent: &Resource, record: &RecoverableResource) -> Result<Resource>;

    /// Drop a trash entry; returns the ids of every resource it held.
    async fn delete_recoverable(&self, record: &RecoverableResource) -> Result<Vec<ResourceId>>;

    async fn get_trash_can_overdue(&self, retention_days: u32, now: DateTime<Utc>) -> Result<Vec<RecoverableResource>>;

    /// Trash records whose parent no longer exists, neither live nor held in
    /// another trash entry.
    async fn get_trash_can_orphans(&self) -> Result<Vec<RecoverableResource>>;

    /// Drop every lock that expired at or before `now`; returns how many.
    async fn delete_expired_locks(&self, now: DateTime<Utc>) -> Result<usize>;

    async fn load_comments(&self, uri: &Path) -> Result<Vec<Comment>>;

    async fn store_comment(&self, comment: Comment) -> Result<Comment>;

    async fn delete_comment(&self, comment: &Comment) -> Result<()>;

    async fn delete_all_comments(&self, uri: &Path) -> Result<()>;
}

/// Byte content keyed by path, mirroring the structural operations.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn create_resource(&self, uri: &Path, collection: bool) -> Result<()>;

    /// Replace the content of a document; returns the number of bytes
    /// written.
    async fn store_content(&self, uri: &Path, content: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64>;

    async fn get_content(&self, uri: &Path) -> Result<Bytes>;

    async fn content_length(&self, uri: &Path) -> Result<u64>;

    /// Remove `uri` and everything below it.
    async fn delete_resource(&self, uri: &Path) -> Result<()>;

    async fn copy(&self, from: &Path, to: &Path) -> Result<()>;

    async fn move_to(&self, from: &Path, to: &Path) -> Result<()>;

    async fn trash(&self, uri: &Path, trash_id: &str) -> Result<()>;

    async fn recover(&self, destination: &Path, trash_id: &str) -> Result<()>;

    async fn delete_recoverable(&self, trash_id: &str) -> Result<()>;
}

/// Revision metadata and content blobs, per resource.
#[async_trait]
pub trait RevisionStore: Send + Sync {
    /// Revisions of `resource`, newest first.
    async fn list(&self, resource: ResourceId) -> Result<Vec<Revision>>;

    async fn allocate_id(&self) -> Result<i64>;

    async fn create(&self, resource: ResourceId, revision: &Revision, content: Bytes) -> Result<()>;

    /// Update metadata only.
    async fn update(&self, resource: ResourceId, revision: &Revision) -> Result<()>;

    async fn store_content(&self, resource: ResourceId, revision: &Revision, content: Bytes) -> Result<()>;

    async fn content(&self, resource: ResourceId, revision: &Revision) -> Result<Bytes>;

    async fn delete(&self, resource: ResourceId, revision: &Revision) -> Result<()>;

    async fn delete_all(&self, resource: ResourceId) -> Result<()>;
}
