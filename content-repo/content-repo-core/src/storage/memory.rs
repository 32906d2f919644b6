//! In-memory collaborators. Used by the server binary for ephemeral
//! repositories and throughout the tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{ContentStore, DataAccessor, RevisionStore};
use crate::auth::acl::Acl;
use crate::auth::principal::Principal;
use crate::path::Path;
use crate::resource::comment::Comment;
use crate::resource::revision::Revision;
use crate::resource::trash::RecoverableResource;
use crate::resource::{Resource, ResourceId};

fn in_subtree(root: &Path, uri: &Path) -> bool {
    root == uri || root.is_ancestor_of(uri)
}

fn rebase_children(resource: &mut Resource, from: &Path, to: &Path) -> Result<()> {
    let children = resource
        .child_uris()
        .iter()
        .map(|c| c.rebase(from, to))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    resource.set_child_uris(children);
    Ok(())
}

struct TrashEntry {
    record: RecoverableResource,
    rows: Vec<Resource>,
    comments: Vec<(Path, Vec<Comment>)>,
}

#[derive(Default)]
struct State {
    rows: BTreeMap<Path, Resource>,
    ids: HashMap<ResourceId, Path>,
    next_id: i64,
    trash: Vec<TrashEntry>,
    comments: HashMap<Path, Vec<Comment>>,
}

impl State {
    fn allocate(&mut self) -> ResourceId {
        self.next_id += 1;
        ResourceId(self.next_id)
    }

    fn subtree(&self, root: &Path) -> Vec<Path> {
        self.rows
            .keys()
            .filter(|uri| in_subtree(root, uri))
            .cloned()
            .collect()
    }

    /// Resolve the effective Acl and ancestor ids of a stored row.
    fn materialize(&self, row: &Resource) -> Resource {
        let mut out = row.clone();
        if let Some(from) = row.acl_inherited_from() {
            let acl = self
                .ids
                .get(&from)
                .and_then(|uri| self.rows.get(uri))
                .map(|owner| owner.acl().clone())
                .unwrap_or_default();
            out.inherit_acl(from, acl);
        }
        let ancestors = row
            .uri()
            .ancestors()
            .iter()
            .filter_map(|uri| self.rows.get(uri).and_then(|r| r.id()))
            .collect();
        out.set_ancestor_ids(Some(ancestors));
        out
    }

    fn insert(&mut self, mut row: Resource) -> Resource {
        if let Some(from) = row.acl_inherited_from() {
            row.inherit_acl(from, Acl::new());
        }
        if let Some(id) = row.id() {
            self.ids.insert(id, row.uri().clone());
        }
        row.set_ancestor_ids(None);
        self.rows.insert(row.uri().clone(), row.clone());
        row
    }

    fn repoint(&mut self, root: &Path, from: Option<ResourceId>, to: ResourceId) {
        for (uri, row) in self.rows.iter_mut() {
            if root.is_ancestor_of(uri) && row.acl_inherited_from().is_some() && row.acl_inherited_from() == from {
                row.inherit_acl(to, Acl::new());
            }
        }
    }

    /// Whether `id` names a live row or one held in a trash entry.
    fn knows(&self, id: ResourceId) -> bool {
        self.ids.contains_key(&id)
            || self
                .trash
                .iter()
                .any(|e| e.rows.iter().any(|row| row.id() == Some(id)))
    }

    fn collection_mut(&mut self, uri: &Path) -> Result<&mut Resource> {
        match self.rows.get_mut(uri) {
            Some(row) if row.is_collection() => Ok(row),
            Some(_) => Err(anyhow!("{} is not a collection", uri)),
            None => Err(anyhow!("nothing stored at {}", uri)),
        }
    }

    fn take_subtree(&mut self, root: &Path) -> Vec<Resource> {
        let mut taken = Vec::new();
        for uri in self.subtree(root) {
            if let Some(row) = self.rows.remove(&uri) {
                if let Some(id) = row.id() {
                    self.ids.remove(&id);
                }
                taken.push(row);
            }
        }
        taken
    }
}

/// Resource tree held in a `BTreeMap` keyed by path.
pub struct InMemoryDataAccessor {
    state: RwLock<State>,
}

impl InMemoryDataAccessor {
    /// A repository holding only the root collection, which owns `root_acl`.
    pub fn new(root_acl: Acl, owner: &Principal) -> Self {
        let mut state = State::default();
        let mut root = Resource::new(Path::root(), true, owner, Utc::now());
        root.set_id(state.allocate());
        root.set_acl(root_acl);
        state.insert(root);
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn resource_count(&self) -> usize {
        self.state.read().rows.len()
    }

    pub fn trash_count(&self) -> usize {
        self.state.read().trash.len()
    }
}

#[async_trait]
impl DataAccessor for InMemoryDataAccessor {
    async fn load(&self, uri: &Path) -> Result<Option<Resource>> {
        let state = self.state.read();
        Ok(state.rows.get(uri).map(|row| state.materialize(row)))
    }

    async fn load_children(&self, parent: &Resource) -> Result<Vec<Resource>> {
        let state = self.state.read();
        Ok(parent
            .child_uris()
            .iter()
            .filter_map(|uri| state.rows.get(uri))
            .map(|row| state.materialize(row))
            .collect())
    }

    async fn store(&self, mut resource: Resource) -> Result<Resource> {
        let mut state = self.state.write();
        match resource.id() {
            None => {
                if state.rows.contains_key(resource.uri()) {
                    return Err(anyhow!("resource already stored at {}", resource.uri()));
                }
                let id = state.allocate();
                resource.set_id(id);
            }
            Some(id) => {
                let existing = state
                    .ids
                    .get(&id)
                    .and_then(|uri| state.rows.get(uri))
                    .ok_or_else(|| anyhow!("no stored resource with id {}", id))?;
                if existing.uri() != resource.uri() {
                    return Err(anyhow!("resource {} is stored at {}, not {}", id, existing.uri(), resource.uri()));
                }
                resource.set_child_uris(existing.child_uris().to_vec());
                match existing.acl_inherited_from() {
                    Some(from) => resource.inherit_acl(from, Acl::new()),
                    None => resource.set_acl(existing.acl().clone()),
                }
            }
        }
        let row = state.insert(resource);
        Ok(state.materialize(&row))
    }

    async fn add_child(&self, parent: &Path, child: &Path, by: &Principal) -> Result<Resource> {
        let mut state = self.state.write();
        let row = state.collection_mut(parent)?;
        row.add_child(child.clone());
        row.touch(by, Utc::now());
        let row = row.clone();
        Ok(state.materialize(&row))
    }

    async fn remove_child(&self, parent: &Path, child: &Path, by: &Principal) -> Result<Resource> {
        let mut state = self.state.write();
        let row = state.collection_mut(parent)?;
        row.remove_child(child);
        row.touch(by, Utc::now());
        let row = row.clone();
        Ok(state.materialize(&row))
    }

    async fn store_acl(&self, mut resource: Resource) -> Result<Resource> {
        let mut state = self.state.write();
        let id = resource.id().ok_or_else(|| anyhow!("cannot store acl of unsaved resource"))?;
        let previous = state
            .rows
            .get(resource.uri())
            .filter(|row| row.id() == Some(id))
            .ok_or_else(|| anyhow!("no stored resource {} at {}", id, resource.uri()))?
            .clone();
        let uri = resource.uri().clone();
        match (previous.acl_inherited_from(), resource.acl_inherited_from()) {
            (Some(old_source), None) => state.repoint(&uri, Some(old_source), id),
            (None, Some(new_source)) => state.repoint(&uri, Some(id), new_source),
            _ => {}
        }
        let mut row = previous;
        match resource.acl_inherited_from() {
            Some(from) => row.inherit_acl(from, Acl::new()),
            None => row.set_acl(resource.acl().clone()),
        }
        resource = state.insert(row);
        Ok(state.materialize(&resource))
    }

    async fn delete(&self, resource: &Resource) -> Result<()> {
        let mut state = self.state.write();
        let removed = state.take_subtree(resource.uri());
        for row in removed {
            state.comments.remove(row.uri());
        }
        Ok(())
    }

    async fn copy(&self, source: &Resource, copy: Resource, preserve_acl: bool) -> Result<Resource> {
        let mut state = self.state.write();
        if state.rows.contains_key(copy.uri()) {
            return Err(anyhow!("copy destination {} is occupied", copy.uri()));
        }
        let from = source.uri().clone();
        let to = copy.uri().clone();
        let originals: Vec<Resource> = state
            .subtree(&from)
            .iter()
            .filter_map(|uri| state.rows.get(uri).cloned())
            .collect();

        let mut id_map = HashMap::new();
        let mut root = copy;
        let root_id = state.allocate();
        if let Some(old) = source.id() {
            id_map.insert(old, root_id);
        }
        root.set_id(root_id);
        rebase_children(&mut root, &from, &to)?;
        let root_source = root.acl_inherited_from().unwrap_or(root_id);
        let owner = root.owner().clone();
        let created = root.creation_time();
        let root = state.insert(root);

        for original in originals.into_iter().filter(|r| r.uri() != &from) {
            let mut row = original.clone();
            let id = state.allocate();
            if let Some(old) = original.id() {
                id_map.insert(old, id);
            }
            row.set_id(id);
            row.set_uri(original.uri().rebase(&from, &to)?);
            rebase_children(&mut row, &from, &to)?;
            row.reset_system_properties(&owner, created);
            row.set_lock(None);
            if !preserve_acl {
                row.inherit_acl(root_source, Acl::new());
            } else if let Some(old_source) = original.acl_inherited_from() {
                let source = id_map.get(&old_source).copied().unwrap_or(root_source);
                row.inherit_acl(source, Acl::new());
            }
            state.insert(row);
        }
        Ok(state.materialize(&root))
    }

    async fn move_to(&self, source: &Resource, destination: &Path) -> Result<Resource> {
        let mut state = self.state.write();
        if state.rows.contains_key(destination) {
            return Err(anyhow!("move destination {} is occupied", destination));
        }
        let from = source.uri().clone();
        let rows = state.take_subtree(&from);
        if rows.is_empty() {
            return Err(anyhow!("nothing stored at {}", from));
        }
        let mut moved_root = None;
        for mut row in rows {
            let old_uri = row.uri().clone();
            let new_uri = old_uri.rebase(&from, destination)?;
            row.set_uri(new_uri.clone());
            rebase_children(&mut row, &from, destination)?;
            if old_uri == from {
                row.set_lock(None);
            }
            if let Some(comments) = state.comments.remove(&old_uri) {
                let comments = comments
                    .into_iter()
                    .map(|mut c| {
                        c.uri = new_uri.clone();
                        c
                    })
                    .collect();
                state.comments.insert(new_uri.clone(), comments);
            }
            let row = state.insert(row);
            if old_uri == from {
                moved_root = Some(row);
            }
        }
        let root = moved_root.ok_or_else(|| anyhow!("moved subtree lost its root"))?;
        Ok(state.materialize(&root))
    }

    async fn discover_acls(&self, uri: &Path) -> Result<Vec<Path>> {
        let state = self.state.read();
        Ok(state
            .rows
            .iter()
            .filter(|(path, row)| in_subtree(uri, path) && !row.is_inherited_acl())
            .map(|(path, _)| path.clone())
            .collect())
    }

    async fn mark_deleted(&self, resource: &Resource, _parent: &Resource, record: RecoverableResource) -> Result<()> {
        let mut state = self.state.write();
        let uri = resource.uri().clone();
        let id = resource.id().ok_or_else(|| anyhow!("cannot trash unsaved resource"))?;
        if record.was_inherited_acl {
            let old_source = resource.acl_inherited_from();
            state.repoint(&uri, old_source, id);
        }
        let mut rows = state.take_subtree(&uri);
        if record.was_inherited_acl {
            if let Some(root) = rows.iter_mut().find(|r| r.uri() == &uri) {
                root.set_acl(resource.acl().clone());
            }
        }
        let comments = rows
            .iter()
            .filter_map(|row| state.comments.remove(row.uri()).map(|c| (row.uri().clone(), c)))
            .collect();
        state.trash.push(TrashEntry { record, rows, comments });
        Ok(())
    }

    async fn get_recoverable_resources(&self, parent_id: ResourceId) -> Result<Vec<RecoverableResource>> {
        let state = self.state.read();
        Ok(state
            .trash
            .iter()
            .filter(|e| e.record.parent_id == parent_id)
            .map(|e| e.record.clone())
            .collect())
    }

    async fn recover(&self, parent: &Resource, record: &RecoverableResource) -> Result<Resource> {
        let mut state = self.state.write();
        let target = parent.uri().extend(&record.name)?;
        if state.rows.contains_key(&target) {
            return Err(anyhow!("recover destination {} is occupied", target));
        }
        let idx = state
            .trash
            .iter()
            .position(|e| e.record.id == record.id && e.record.parent_id == record.parent_id)
            .ok_or_else(|| anyhow!("no trash entry {}", record.id))?;
        let entry = state.trash.remove(idx);
        let from = entry.record.uri.clone();
        let new_source = parent.acl_source();
        let mut recovered_root = None;
        for mut row in entry.rows {
            let is_root = row.uri() == &from;
            row.set_uri(row.uri().rebase(&from, &target)?);
            rebase_children(&mut row, &from, &target)?;
            if record.was_inherited_acl {
                if let Some(source) = new_source {
                    if is_root || row.acl_inherited_from() == Some(record.resource_id) {
                        row.inherit_acl(source, Acl::new());
                    }
                }
            }
            let row = state.insert(row);
            if is_root {
                recovered_root = Some(row);
            }
        }
        for (uri, comments) in entry.comments {
            let uri = uri.rebase(&from, &target)?;
            let comments = comments
                .into_iter()
                .map(|mut c| {
                    c.uri = uri.clone();
                    c
                })
                .collect();
            state.comments.insert(uri, comments);
        }
        let root = recovered_root.ok_or_else(|| anyhow!("trash entry {} has no root", record.id))?;
        Ok(state.materialize(&root))
    }

    async fn delete_recoverable(&self, record: &RecoverableResource) -> Result<Vec<ResourceId>> {
        let mut state = self.state.write();
        let mut ids = Vec::new();
        state.trash.retain(|e| {
            let matches = e.record.id == record.id && e.record.parent_id == record.parent_id;
            if matches {
                ids.extend(e.rows.iter().filter_map(|row| row.id()));
            }
            !matches
        });
        Ok(ids)
    }

    async fn get_trash_can_overdue(&self, retention_days: u32, now: DateTime<Utc>) -> Result<Vec<RecoverableResource>> {
        let state = self.state.read();
        Ok(state
            .trash
            .iter()
            .filter(|e| e.record.is_overdue(now, retention_days))
            .map(|e| e.record.clone())
            .collect())
    }

    async fn get_trash_can_orphans(&self) -> Result<Vec<RecoverableResource>> {
        let state = self.state.read();
        Ok(state
            .trash
            .iter()
            .filter(|e| !state.knows(e.record.parent_id))
            .map(|e| e.record.clone())
            .collect())
    }

    async fn delete_expired_locks(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.write();
        let mut removed = 0;
        for row in state.rows.values_mut() {
            if row.lock().map_or(false, |l| l.is_expired(now)) {
                row.set_lock(None);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn load_comments(&self, uri: &Path) -> Result<Vec<Comment>> {
        Ok(self.state.read().comments.get(uri).cloned().unwrap_or_default())
    }

    async fn store_comment(&self, comment: Comment) -> Result<Comment> {
        let mut state = self.state.write();
        let comments = state.comments.entry(comment.uri.clone()).or_default();
        match comments.iter_mut().find(|c| c.id == comment.id) {
            Some(existing) => *existing = comment.clone(),
            None => comments.push(comment.clone()),
        }
        Ok(comment)
    }

    async fn delete_comment(&self, comment: &Comment) -> Result<()> {
        let mut state = self.state.write();
        if let Some(comments) = state.comments.get_mut(&comment.uri) {
            comments.retain(|c| c.id != comment.id);
        }
        Ok(())
    }

    async fn delete_all_comments(&self, uri: &Path) -> Result<()> {
        self.state.write().comments.remove(uri);
        Ok(())
    }
}

#[derive(Clone)]
enum Node {
    Collection,
    Document(Bytes),
}

#[derive(Default)]
struct ContentState {
    nodes: BTreeMap<Path, Node>,
    trash: HashMap<String, (Path, Vec<(Path, Node)>)>,
}

impl ContentState {
    fn take_subtree(&mut self, root: &Path) -> Vec<(Path, Node)> {
        let keys: Vec<Path> = self.nodes.keys().filter(|k| in_subtree(root, k)).cloned().collect();
        keys.into_iter()
            .filter_map(|k| self.nodes.remove(&k).map(|n| (k, n)))
            .collect()
    }
}

/// Content blobs held in memory.
pub struct InMemoryContentStore {
    state: RwLock<ContentState>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        let mut state = ContentState::default();
        state.nodes.insert(Path::root(), Node::Collection);
        Self {
            state: RwLock::new(state),
        }
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn create_resource(&self, uri: &Path, collection: bool) -> Result<()> {
        let node = if collection {
            Node::Collection
        } else {
            Node::Document(Bytes::new())
        };
        self.state.write().nodes.insert(uri.clone(), node);
        Ok(())
    }

    async fn store_content(&self, uri: &Path, content: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        let mut buf = Vec::new();
        content.read_to_end(&mut buf).await?;
        let len = buf.len() as u64;
        let mut state = self.state.write();
        if matches!(state.nodes.get(uri), Some(Node::Collection)) {
            return Err(anyhow!("{} is a collection", uri));
        }
        state.nodes.insert(uri.clone(), Node::Document(Bytes::from(buf)));
        Ok(len)
    }

    async fn get_content(&self, uri: &Path) -> Result<Bytes> {
        match self.state.read().nodes.get(uri) {
            Some(Node::Document(bytes)) => Ok(bytes.clone()),
            Some(Node::Collection) => Err(anyhow!("{} is a collection", uri)),
            None => Err(anyhow!("no content at {}", uri)),
        }
    }

    async fn content_length(&self, uri: &Path) -> Result<u64> {
        match self.state.read().nodes.get(uri) {
            Some(Node::Document(bytes)) => Ok(bytes.len() as u64),
            Some(Node::Collection) => Ok(0),
            None => Err(anyhow!("no content at {}", uri)),
        }
    }

    async fn delete_resource(&self, uri: &Path) -> Result<()> {
        self.state.write().take_subtree(uri);
        Ok(())
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        let mut state = self.state.write();
        let copies = state
            .nodes
            .iter()
            .filter(|(k, _)| in_subtree(from, k))
            .map(|(k, n)| Ok((k.rebase(from, to)?, n.clone())))
            .collect::<Result<Vec<_>>>()?;
        state.nodes.extend(copies);
        Ok(())
    }

    async fn move_to(&self, from: &Path, to: &Path) -> Result<()> {
        let mut state = self.state.write();
        let moved = state.take_subtree(from);
        for (k, n) in moved {
            state.nodes.insert(k.rebase(from, to)?, n);
        }
        Ok(())
    }

    async fn trash(&self, uri: &Path, trash_id: &str) -> Result<()> {
        let mut state = self.state.write();
        let nodes = state.take_subtree(uri);
        state.trash.insert(trash_id.to_string(), (uri.clone(), nodes));
        Ok(())
    }

    async fn recover(&self, destination: &Path, trash_id: &str) -> Result<()> {
        let mut state = self.state.write();
        let (origin, nodes) = state
            .trash
            .remove(trash_id)
            .ok_or_else(|| anyhow!("no trashed content {}", trash_id))?;
        for (k, n) in nodes {
            state.nodes.insert(k.rebase(&origin, destination)?, n);
        }
        Ok(())
    }

    async fn delete_recoverable(&self, trash_id: &str) -> Result<()> {
        self.state.write().trash.remove(trash_id);
        Ok(())
    }
}

/// Revision blobs held in memory, oldest first per resource.
#[derive(Default)]
pub struct InMemoryRevisionStore {
    revisions: RwLock<HashMap<ResourceId, Vec<(Revision, Bytes)>>>,
    next_id: AtomicI64,
}

impl InMemoryRevisionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevisionStore for InMemoryRevisionStore {
    async fn list(&self, resource: ResourceId) -> Result<Vec<Revision>> {
        let revisions = self.revisions.read();
        let mut out: Vec<Revision> = revisions
            .get(&resource)
            .map(|revs| revs.iter().map(|(r, _)| r.clone()).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(out)
    }

    async fn allocate_id(&self) -> Result<i64> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn create(&self, resource: ResourceId, revision: &Revision, content: Bytes) -> Result<()> {
        let mut revisions = self.revisions.write();
        let list = revisions.entry(resource).or_default();
        if list.iter().any(|(r, _)| r.id == revision.id) {
            return Err(anyhow!("revision {} already exists", revision.id));
        }
        list.push((revision.clone(), content));
        Ok(())
    }

    async fn update(&self, resource: ResourceId, revision: &Revision) -> Result<()> {
        let mut revisions = self.revisions.write();
        let entry = revisions
            .get_mut(&resource)
            .and_then(|list| list.iter_mut().find(|(r, _)| r.id == revision.id))
            .ok_or_else(|| anyhow!("no revision {} for resource {}", revision.id, resource))?;
        entry.0 = revision.clone();
        Ok(())
    }

    async fn store_content(&self, resource: ResourceId, revision: &Revision, content: Bytes) -> Result<()> {
        let mut revisions = self.revisions.write();
        let entry = revisions
            .get_mut(&resource)
            .and_then(|list| list.iter_mut().find(|(r, _)| r.id == revision.id))
            .ok_or_else(|| anyhow!("no revision {} for resource {}", revision.id, resource))?;
        entry.1 = content;
        Ok(())
    }

    async fn content(&self, resource: ResourceId, revision: &Revision) -> Result<Bytes> {
        self.revisions
            .read()
            .get(&resource)
            .and_then(|list| list.iter().find(|(r, _)| r.id == revision.id))
            .map(|(_, c)| c.clone())
            .ok_or_else(|| anyhow!("no revision {} for resource {}", revision.id, resource))
    }

    async fn delete(&self, resource: ResourceId, revision: &Revision) -> Result<()> {
        if let Some(list) = self.revisions.write().get_mut(&resource) {
            list.retain(|(r, _)| r.id != revision.id);
        }
        Ok(())
    }

    async fn delete_all(&self, resource: ResourceId) -> Result<()> {
        self.revisions.write().remove(&resource);
        Ok(())
    }
}
