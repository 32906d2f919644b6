//! The repository service.
//!
//! Every mutating operation follows the same sequence: resolve the caller
//! from its token, load the target (and its parent or destination), check
//! locks, authorize, check fan-out, mutate a private snapshot, persist it,
//! and publish events for every resource that changed. Nothing is
//! persisted before all checks have passed.

pub mod content;
mod comments;
mod locks;
mod revisions;
mod trash;

#[cfg(test)]
mod tests;

use anyhow::anyhow;
use bytes::Bytes;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, info};

use crate::auth::acl::Acl;
use crate::auth::manager::{AuthorizationManager, RepositoryAction};
use crate::auth::principal::Principal;
use crate::auth::privilege::Privilege;
use crate::auth::roles::PrincipalManager;
use crate::auth::token::TokenManager;
use crate::config::RepositoryConfig;
use crate::error::{RepositoryError, Result};
use crate::events::{EventBus, RepositoryEvent};
use crate::path::Path;
use crate::resource::Resource;
use crate::storage::{ContentStore, DataAccessor, RevisionStore};

/// Edit applied to a collection's child list.
enum ChildChange<'a> {
    Add(&'a Path),
    Remove(&'a Path),
    Rename { from: &'a Path, to: &'a Path },
}

pub struct Repository {
    dao: Arc<dyn DataAccessor>,
    content: Arc<dyn ContentStore>,
    revisions: Arc<dyn RevisionStore>,
    tokens: Arc<dyn TokenManager>,
    authz: AuthorizationManager,
    events: EventBus,
    config: RepositoryConfig,
    spool_dir: Option<PathBuf>,
}

impl Repository {
    pub fn new(
        dao: Arc<dyn DataAccessor>,
        content: Arc<dyn ContentStore>,
        revisions: Arc<dyn RevisionStore>,
        tokens: Arc<dyn TokenManager>,
        principals: Arc<dyn PrincipalManager>,
        config: RepositoryConfig,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let authz = AuthorizationManager::new(principals, dao.clone(), config.blacklist()?, config.read_only);
        Ok(Self {
            dao,
            content,
            revisions,
            tokens,
            authz,
            events: EventBus::new(),
            config,
            spool_dir: None,
        })
    }

    /// Directory for temporary spool files; the system temp dir otherwise.
    pub fn with_spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = Some(dir.into());
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn authorization(&self) -> &AuthorizationManager {
        &self.authz
    }

    async fn principal(&self, token: Option<&str>) -> Option<Principal> {
        match token {
            Some(token) => self.tokens.principal(token).await,
            None => None,
        }
    }

    async fn load_existing(&self, uri: &Path) -> Result<Resource> {
        self.dao
            .load(uri)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(uri.clone()))
    }

    async fn load_parent(&self, uri: &Path) -> Result<Resource> {
        let parent = uri
            .parent()
            .ok_or_else(|| RepositoryError::illegal("the root resource has no parent"))?;
        self.load_existing(&parent).await
    }

    async fn load_collection(&self, uri: &Path) -> Result<Resource> {
        let resource = self.load_existing(uri).await?;
        if !resource.is_collection() {
            return Err(RepositoryError::illegal(format!("{} is not a collection", uri)));
        }
        Ok(resource)
    }

    /// Mutations need a principal, and a live lock held by someone else
    /// blocks them.
    fn check_lock<'a>(&self, resource: &Resource, principal: Option<&'a Principal>) -> Result<&'a Principal> {
        let principal = principal.ok_or(RepositoryError::Unauthenticated)?;
        if let Some(lock) = resource.active_lock(Utc::now()) {
            if lock.principal() != principal {
                return Err(RepositoryError::Locked(resource.uri().clone()));
            }
        }
        Ok(principal)
    }

    fn check_fan_out(&self, parent: &Resource) -> Result<()> {
        if parent.child_count() >= self.config.max_children {
            return Err(RepositoryError::illegal(format!(
                "{} already has the maximum of {} children",
                parent.uri(),
                self.config.max_children
            )));
        }
        Ok(())
    }

    /// Apply `change` to a collection's child list and announce it. The
    /// accessor edits the stored list, so `parent` only serves as the
    /// before-image.
    async fn update_parent(&self, parent: Resource, principal: &Principal, change: ChildChange<'_>) -> Result<Resource> {
        let uri = parent.uri();
        let after = match change {
            ChildChange::Add(child) => self.dao.add_child(uri, child, principal).await?,
            ChildChange::Remove(child) => self.dao.remove_child(uri, child, principal).await?,
            ChildChange::Rename { from, to } => {
                self.dao.remove_child(uri, from, principal).await?;
                self.dao.add_child(uri, to, principal).await?
            }
        };
        self.events.send(RepositoryEvent::PropertiesModified {
            before: parent,
            after: after.clone(),
            by: Some(principal.clone()),
        });
        Ok(after)
    }

    fn write_action(resource: &Resource) -> RepositoryAction {
        if resource.is_published() {
            RepositoryAction::Write
        } else {
            RepositoryAction::ReadWriteUnpublished
        }
    }

    /// Every resource in the subtree rooted at `resource`, itself first.
    async fn subtree(&self, resource: &Resource) -> Result<Vec<Resource>> {
        let mut out = vec![resource.clone()];
        let mut next = 0;
        while next < out.len() {
            if out[next].is_collection() {
                let children = self.dao.load_children(&out[next]).await?;
                out.extend(children);
            }
            next += 1;
        }
        Ok(out)
    }

    /// Irrevocably remove a subtree with its content and revisions.
    async fn purge(&self, resource: &Resource, principal: Option<&Principal>) -> Result<()> {
        for member in self.subtree(resource).await? {
            if let Some(id) = member.id() {
                self.revisions.delete_all(id).await?;
            }
        }
        self.dao.delete(resource).await?;
        self.content.delete_resource(resource.uri()).await?;
        self.events.send(RepositoryEvent::Deleted {
            uri: resource.uri().clone(),
            resource: resource.clone(),
            by: principal.cloned(),
        });
        Ok(())
    }

    // reading

    pub async fn exists(&self, uri: &Path) -> Result<bool> {
        Ok(self.dao.load(uri).await?.is_some())
    }

    /// Load `uri` for reading, or for processing when `for_processing` is set.
    pub async fn retrieve(&self, token: Option<&str>, uri: &Path, for_processing: bool) -> Result<Resource> {
        let principal = self.principal(token).await;
        let resource = self.load_existing(uri).await?;
        let action = if for_processing {
            RepositoryAction::ReadProcessed
        } else {
            RepositoryAction::Read
        };
        self.authz.authorize(action, &resource, principal.as_ref()).await?;
        Ok(resource)
    }

    /// Children of a collection the caller may read.
    pub async fn list_children(&self, token: Option<&str>, uri: &Path, for_processing: bool) -> Result<Vec<Resource>> {
        let principal = self.principal(token).await;
        let collection = self.load_collection(uri).await?;
        let action = if for_processing {
            RepositoryAction::ReadProcessed
        } else {
            RepositoryAction::Read
        };
        self.authz.authorize(action, &collection, principal.as_ref()).await?;
        let mut readable = Vec::new();
        for child in self.dao.load_children(&collection).await? {
            if self.authz.is_authorized(action, &child, principal.as_ref()).await {
                readable.push(child);
            }
        }
        Ok(readable)
    }

    pub async fn is_authorized(&self, token: Option<&str>, uri: &Path, action: RepositoryAction) -> Result<bool> {
        let principal = self.principal(token).await;
        let resource = self.load_existing(uri).await?;
        Ok(self.authz.is_authorized(action, &resource, principal.as_ref()).await)
    }

    pub fn is_read_only(&self) -> bool {
        self.authz.is_read_only()
    }

    pub async fn set_read_only(&self, token: Option<&str>, read_only: bool) -> Result<()> {
        let principal = self.principal(token).await;
        self.authz.set_read_only(principal.as_ref(), read_only).await
    }

    // structure

    pub async fn create_document(&self, token: Option<&str>, uri: &Path, published: bool) -> Result<Resource> {
        self.create(token, uri, false, published).await
    }

    pub async fn create_collection(&self, token: Option<&str>, uri: &Path) -> Result<Resource> {
        self.create(token, uri, true, true).await
    }

    async fn create(&self, token: Option<&str>, uri: &Path, collection: bool, published: bool) -> Result<Resource> {
        let principal = self.principal(token).await;
        if self.dao.load(uri).await?.is_some() {
            return Err(RepositoryError::illegal(format!("{} already exists", uri)));
        }
        let parent = self.load_parent(uri).await?;
        if !parent.is_collection() {
            return Err(RepositoryError::illegal(format!("{} is not a collection", parent.uri())));
        }
        let principal = self.check_lock(&parent, principal.as_ref())?;
        let action = if published {
            RepositoryAction::Create
        } else {
            RepositoryAction::CreateUnpublished
        };
        self.authz.authorize(action, &parent, Some(principal)).await?;
        self.check_fan_out(&parent)?;

        let mut resource = Resource::new(uri.clone(), collection, principal, Utc::now());
        resource.set_published(published);
        let source = parent
            .acl_source()
            .ok_or_else(|| anyhow!("parent {} has no id", parent.uri()))?;
        resource.inherit_acl(source, parent.acl().clone());

        let created = self.dao.store(resource).await?;
        self.content.create_resource(uri, collection).await?;
        self.update_parent(parent, principal, ChildChange::Add(uri)).await?;

        info!(uri = %uri, collection, by = %principal, "resource created");
        self.events.send(RepositoryEvent::Created {
            resource: created.clone(),
            by: Some(principal.clone()),
        });
        Ok(created)
    }

    /// Copy the subtree at `source` to `destination`.
    pub async fn copy(
        &self,
        token: Option<&str>,
        source: &Path,
        destination: &Path,
        overwrite: bool,
        preserve_acl: bool,
    ) -> Result<Resource> {
        AuthorizationManager::check_copy_move_paths(source, destination)?;
        let principal = self.principal(token).await;
        let src = self.load_existing(source).await?;
        let dest_parent = self.load_parent(destination).await?;
        if !dest_parent.is_collection() {
            return Err(RepositoryError::illegal(format!("{} is not a collection", dest_parent.uri())));
        }
        let existing = self.dao.load(destination).await?;
        if existing.is_some() && !overwrite {
            return Err(RepositoryError::Overwrite(destination.clone()));
        }

        let principal = self.check_lock(&dest_parent, principal.as_ref())?;
        if let Some(existing) = &existing {
            self.check_lock(existing, Some(principal))?;
        }
        self.authz
            .authorize_copy(&src, &dest_parent, existing.as_ref(), Some(principal))
            .await?;
        if existing.is_none() {
            self.check_fan_out(&dest_parent)?;
        }

        if let Some(existing) = &existing {
            self.purge(existing, Some(principal)).await?;
        }

        let mut copy = src.clone();
        copy.set_uri(destination.clone());
        copy.reset_system_properties(principal, Utc::now());
        copy.set_lock(None);
        if !(preserve_acl && !src.is_inherited_acl()) {
            let inherit_from = dest_parent
                .acl_source()
                .ok_or_else(|| anyhow!("parent {} has no id", dest_parent.uri()))?;
            copy.inherit_acl(inherit_from, dest_parent.acl().clone());
        }
        let copied = self.dao.copy(&src, copy, preserve_acl).await?;
        self.content.copy(source, destination).await?;
        self.update_parent(dest_parent, principal, ChildChange::Add(destination))
            .await?;

        info!(from = %source, to = %destination, preserve_acl, by = %principal, "resource copied");
        self.events.send(RepositoryEvent::Created {
            resource: copied.clone(),
            by: Some(principal.clone()),
        });
        Ok(copied)
    }

    /// Re-parent the subtree at `source` to `destination`, keeping ids and
    /// Acl inheritance.
    pub async fn move_resource(
        &self,
        token: Option<&str>,
        source: &Path,
        destination: &Path,
        overwrite: bool,
    ) -> Result<Resource> {
        AuthorizationManager::check_copy_move_paths(source, destination)?;
        let principal = self.principal(token).await;
        let src = self.load_existing(source).await?;
        let src_parent = self.load_parent(source).await?;
        let dest_parent = self.load_parent(destination).await?;
        if !dest_parent.is_collection() {
            return Err(RepositoryError::illegal(format!("{} is not a collection", dest_parent.uri())));
        }
        let existing = self.dao.load(destination).await?;
        if existing.is_some() && !overwrite {
            return Err(RepositoryError::Overwrite(destination.clone()));
        }

        let principal = self.check_lock(&src, principal.as_ref())?;
        self.check_lock(&src_parent, Some(principal))?;
        self.check_lock(&dest_parent, Some(principal))?;
        if let Some(existing) = &existing {
            self.check_lock(existing, Some(principal))?;
        }
        self.authz
            .authorize_move(&src, &dest_parent, existing.as_ref(), Some(principal))
            .await?;
        let same_parent = src_parent.uri() == dest_parent.uri();
        if existing.is_none() && !same_parent {
            self.check_fan_out(&dest_parent)?;
        }

        if let Some(existing) = &existing {
            self.purge(existing, Some(principal)).await?;
        }

        let moved = self.dao.move_to(&src, destination).await?;
        self.content.move_to(source, destination).await?;
        if same_parent {
            let rename = ChildChange::Rename {
                from: source,
                to: destination,
            };
            self.update_parent(src_parent, principal, rename).await?;
        } else {
            self.update_parent(src_parent, principal, ChildChange::Remove(source))
                .await?;
            self.update_parent(dest_parent, principal, ChildChange::Add(destination))
                .await?;
        }

        info!(from = %source, to = %destination, by = %principal, "resource moved");
        self.events.send(RepositoryEvent::Created {
            resource: moved.clone(),
            by: Some(principal.clone()),
        });
        self.events.send(RepositoryEvent::Deleted {
            uri: source.clone(),
            resource: src,
            by: Some(principal.clone()),
        });
        Ok(moved)
    }

    /// Delete `uri` and its subtree. A restorable delete moves it into the
    /// parent's trash can instead of removing it.
    pub async fn delete(&self, token: Option<&str>, uri: &Path, restorable: bool) -> Result<()> {
        if uri.is_root() {
            return Err(RepositoryError::illegal("cannot delete the root resource"));
        }
        let principal = self.principal(token).await;
        let resource = self.load_existing(uri).await?;
        let parent = self.load_parent(uri).await?;
        let principal = self.check_lock(&resource, principal.as_ref())?;
        self.check_lock(&parent, Some(principal))?;
        self.authz
            .authorize(RepositoryAction::delete_for(&resource), &resource, Some(principal))
            .await?;

        if restorable {
            self.trash(&resource, &parent, principal).await?;
        } else {
            self.purge(&resource, Some(principal)).await?;
        }
        self.update_parent(parent, principal, ChildChange::Remove(uri)).await?;
        info!(uri = %uri, restorable, by = %principal, "resource deleted");
        Ok(())
    }

    // properties and content

    /// Store the user properties and resource type of `resource`. System
    /// attributes, Acl, lock and children are kept from the stored copy.
    pub async fn store(&self, token: Option<&str>, resource: &Resource) -> Result<Resource> {
        let principal = self.principal(token).await;
        let original = self.load_existing(resource.uri()).await?;
        if original.id() != resource.id() {
            return Err(RepositoryError::illegal(format!(
                "{} no longer refers to the submitted resource",
                resource.uri()
            )));
        }
        let principal = self.check_lock(&original, principal.as_ref())?;
        self.authz
            .authorize(Self::write_action(&original), &original, Some(principal))
            .await?;

        let mut updated = original.clone();
        updated.copy_properties_from(resource);
        updated.set_resource_type(resource.resource_type());
        updated.touch(principal, Utc::now());
        let after = self.dao.store(updated).await?;

        debug!(uri = %after.uri(), by = %principal, "properties stored");
        self.events.send(RepositoryEvent::PropertiesModified {
            before: original,
            after: after.clone(),
            by: Some(principal.clone()),
        });
        Ok(after)
    }

    /// Replace the content of a document, recording its length and SHA-256
    /// checksum.
    pub async fn store_content<R>(&self, token: Option<&str>, uri: &Path, content: R) -> Result<Resource>
    where
        R: AsyncRead + Send + Unpin,
    {
        let principal = self.principal(token).await;
        let mut resource = self.load_existing(uri).await?;
        if resource.is_collection() {
            return Err(RepositoryError::illegal(format!("{} is a collection", uri)));
        }
        let principal = self.check_lock(&resource, principal.as_ref())?;
        self.authz
            .authorize(Self::write_action(&resource), &resource, Some(principal))
            .await?;

        let spooled = content::spool(content, self.spool_dir.as_deref()).await?;
        let mut replay = spooled.open().await?;
        self.content.store_content(uri, &mut replay).await?;

        resource.set_content_info(spooled.length, Some(spooled.checksum.clone()));
        resource.touch(principal, Utc::now());
        let stored = self.dao.store(resource).await?;

        info!(uri = %uri, length = spooled.length, checksum = %spooled.checksum, by = %principal, "content stored");
        self.events.send(RepositoryEvent::ContentModified {
            resource: stored.clone(),
            by: Some(principal.clone()),
        });
        Ok(stored)
    }

    pub async fn get_content(&self, token: Option<&str>, uri: &Path, for_processing: bool) -> Result<Bytes> {
        let resource = self.retrieve(token, uri, for_processing).await?;
        if resource.is_collection() {
            return Err(RepositoryError::illegal(format!("{} is a collection", uri)));
        }
        Ok(self.content.get_content(uri).await?)
    }

    pub async fn set_published(&self, token: Option<&str>, uri: &Path, published: bool) -> Result<Resource> {
        let principal = self.principal(token).await;
        let original = self.load_existing(uri).await?;
        let principal = self.check_lock(&original, principal.as_ref())?;
        self.authz
            .authorize(RepositoryAction::PublishUnpublish, &original, Some(principal))
            .await?;

        let mut updated = original.clone();
        updated.set_published(published);
        updated.touch(principal, Utc::now());
        let after = self.dao.store(updated).await?;
        info!(uri = %uri, published, by = %principal, "publish state changed");
        self.events.send(RepositoryEvent::PropertiesModified {
            before: original,
            after: after.clone(),
            by: Some(principal.clone()),
        });
        Ok(after)
    }

    // acl

    /// Give `uri` its own Acl. Entries not present in the current effective
    /// Acl are validated; existing ones are kept as they are.
    pub async fn store_acl(&self, token: Option<&str>, uri: &Path, acl: Acl) -> Result<Resource> {
        let principal = self.principal(token).await;
        let original = self.load_existing(uri).await?;
        let principal = self.check_lock(&original, principal.as_ref())?;
        self.authz
            .authorize(RepositoryAction::WriteAcl, &original, Some(principal))
            .await?;
        self.authz.validate_acl(&acl, original.acl()).await?;

        let mut updated = original.clone();
        updated.set_acl(acl);
        let after = self.dao.store_acl(updated).await?;
        info!(uri = %uri, by = %principal, "acl stored");
        self.events.send(RepositoryEvent::AclModified {
            before: original,
            after: after.clone(),
            by: Some(principal.clone()),
        });
        Ok(after)
    }

    /// Drop the Acl of `uri` so it inherits from its parent again.
    pub async fn delete_acl(&self, token: Option<&str>, uri: &Path) -> Result<Resource> {
        if uri.is_root() {
            return Err(RepositoryError::illegal("the root resource must own its acl"));
        }
        let principal = self.principal(token).await;
        let original = self.load_existing(uri).await?;
        if original.is_inherited_acl() {
            return Err(RepositoryError::illegal(format!("{} already inherits its acl", uri)));
        }
        let parent = self.load_parent(uri).await?;
        let principal = self.check_lock(&original, principal.as_ref())?;
        self.authz
            .authorize(RepositoryAction::WriteAcl, &original, Some(principal))
            .await?;

        let mut updated = original.clone();
        let source = parent
            .acl_source()
            .ok_or_else(|| anyhow!("parent {} has no id", parent.uri()))?;
        updated.inherit_acl(source, parent.acl().clone());
        let after = self.dao.store_acl(updated).await?;
        info!(uri = %uri, by = %principal, "acl deleted");
        self.events.send(RepositoryEvent::AclModified {
            before: original,
            after: after.clone(),
            by: Some(principal.clone()),
        });
        Ok(after)
    }

    pub async fn is_valid_acl_entry(&self, privilege: Privilege, principal: &Principal) -> bool {
        self.authz.is_valid_acl_entry(privilege, principal).await
    }
}
