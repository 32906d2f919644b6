//! Authorization policy over resources, principals and repository actions.
//!
//! Acl checks return an [`Authorization`] outcome instead of failing, so
//! composite rules are plain boolean combinations. Only the public
//! `authorize*` entry points turn outcomes into [`RepositoryError`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::acl::Acl;
use super::blacklist::PrincipalBlacklist;
use super::principal::Principal;
use super::privilege::Privilege;
use super::roles::{PrincipalManager, Role};
use crate::error::{RepositoryError, Result};
use crate::path::Path;
use crate::resource::Resource;
use crate::storage::DataAccessor;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RepositoryAction {
    ReadProcessed,
    Read,
    Create,
    CreateUnpublished,
    Write,
    ReadWrite,
    ReadWriteUnpublished,
    Delete,
    DeleteUnpublished,
    Unlock,
    AddComment,
    EditComment,
    WriteAcl,
    All,
    PublishUnpublish,
    RepositoryAdminRoleAction,
    RepositoryRootRoleAction,
    Uneditable,
}

impl RepositoryAction {
    /// Actions refused for non-root principals while the repository is
    /// read-only.
    pub fn is_mutating(self) -> bool {
        use RepositoryAction::*;
        !matches!(
            self,
            ReadProcessed | Read | RepositoryAdminRoleAction | RepositoryRootRoleAction
        )
    }

    fn is_read(self) -> bool {
        matches!(self, RepositoryAction::ReadProcessed | RepositoryAction::Read)
    }

    /// Deletion action applicable to `resource` given its published state.
    pub fn delete_for(resource: &Resource) -> Self {
        if resource.is_published() {
            RepositoryAction::Delete
        } else {
            RepositoryAction::DeleteUnpublished
        }
    }
}

/// Result of an Acl check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Authorization {
    Granted,
    /// Denied, and no principal was supplied.
    Unauthenticated,
    Forbidden,
}

impl Authorization {
    pub fn is_granted(self) -> bool {
        self == Authorization::Granted
    }

    /// `self` if granted, otherwise `other` if granted, otherwise the
    /// first denial.
    pub fn or(self, other: Authorization) -> Authorization {
        if self.is_granted() || !other.is_granted() {
            self
        } else {
            other
        }
    }

    fn denied(principal: Option<&Principal>) -> Authorization {
        match principal {
            Some(_) => Authorization::Forbidden,
            None => Authorization::Unauthenticated,
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Authorization::Granted => Ok(()),
            Authorization::Unauthenticated => Err(RepositoryError::Unauthenticated),
            Authorization::Forbidden => Err(RepositoryError::Forbidden),
        }
    }
}

pub struct AuthorizationManager {
    principals: Arc<dyn PrincipalManager>,
    dao: Arc<dyn DataAccessor>,
    blacklist: PrincipalBlacklist,
    read_only: AtomicBool,
}

impl AuthorizationManager {
    pub fn new(
        principals: Arc<dyn PrincipalManager>,
        dao: Arc<dyn DataAccessor>,
        blacklist: PrincipalBlacklist,
        read_only: bool,
    ) -> Self {
        Self {
            principals,
            dao,
            blacklist,
            read_only: AtomicBool::new(read_only),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    /// Toggle read-only mode. Root only.
    pub async fn set_read_only(&self, principal: Option<&Principal>, read_only: bool) -> Result<()> {
        if !self.has_role(principal, Role::Root).await {
            return Authorization::denied(principal).into_result();
        }
        self.read_only.store(read_only, Ordering::SeqCst);
        info!(read_only, by = ?principal, "repository read-only mode changed");
        Ok(())
    }

    pub async fn has_role(&self, principal: Option<&Principal>, role: Role) -> bool {
        match principal {
            Some(p) => self.principals.has_role(p, role).await,
            None => false,
        }
    }

    /// Check `acl` for any of `privileges`, in order.
    ///
    /// An `everyone` entry grants even without a principal. Direct entries
    /// are tried before group entries; blacklisted entries never grant.
    pub async fn authorize_acl(
        &self,
        acl: &Acl,
        principal: Option<&Principal>,
        privileges: &[Privilege],
    ) -> Authorization {
        for &privilege in privileges {
            if acl.grants_everyone(privilege) {
                return Authorization::Granted;
            }
            let Some(p) = principal else { continue };
            if acl.contains(privilege, p) && !self.blacklist.is_blacklisted(privilege, p) {
                return Authorization::Granted;
            }
        }
        let Some(p) = principal else {
            return Authorization::Unauthenticated;
        };
        for &privilege in privileges {
            for group in acl.principals(privilege).filter(|g| g.is_group()) {
                if self.blacklist.is_blacklisted(privilege, group) {
                    continue;
                }
                if self.principals.is_member(p, group).await {
                    return Authorization::Granted;
                }
            }
        }
        Authorization::Forbidden
    }

    /// Whether `principal` holds `privilege` (or anything implying it) on
    /// `resource`.
    pub async fn has_privilege(
        &self,
        resource: &Resource,
        principal: Option<&Principal>,
        privilege: Privilege,
    ) -> Authorization {
        self.authorize_acl(resource.acl(), principal, privilege.implied_by()).await
    }

    async fn parent_of(&self, resource: &Resource) -> Result<Resource> {
        let parent = resource
            .uri()
            .parent()
            .ok_or_else(|| RepositoryError::illegal("root has no parent"))?;
        self.dao
            .load(&parent)
            .await?
            .ok_or(RepositoryError::NotFound(parent))
    }

    async fn check(
        &self,
        action: RepositoryAction,
        resource: &Resource,
        principal: Option<&Principal>,
    ) -> Result<Authorization> {
        use RepositoryAction::*;

        if action == Uneditable {
            return Ok(Authorization::Forbidden);
        }
        if matches!(action, Delete | DeleteUnpublished) && resource.uri().is_root() {
            return Err(RepositoryError::illegal("cannot delete the root resource"));
        }
        let is_root = self.has_role(principal, Role::Root).await;
        if action.is_mutating() && self.is_read_only() && !is_root {
            return Err(RepositoryError::ReadOnly);
        }
        if is_root {
            return Ok(Authorization::Granted);
        }
        if (action.is_read() || action == RepositoryAdminRoleAction)
            && self.has_role(principal, Role::ReadEverything).await
        {
            return Ok(Authorization::Granted);
        }

        let outcome = match action {
            ReadProcessed | Read => {
                let privilege = if !resource.is_published() {
                    Privilege::ReadWriteUnpublished
                } else if action == Read {
                    Privilege::Read
                } else {
                    Privilege::ReadProcessed
                };
                self.has_privilege(resource, principal, privilege).await
            }
            Create | Write | ReadWrite | PublishUnpublish => {
                self.has_privilege(resource, principal, Privilege::ReadWrite).await
            }
            CreateUnpublished | ReadWriteUnpublished => {
                self.has_privilege(resource, principal, Privilege::ReadWriteUnpublished)
                    .await
            }
            Delete | DeleteUnpublished => {
                let on_parent = if action == Delete {
                    Privilege::ReadWrite
                } else {
                    Privilege::ReadWriteUnpublished
                };
                let parent = self.parent_of(resource).await?;
                let via_parent = self.has_privilege(&parent, principal, on_parent).await;
                if via_parent.is_granted() {
                    via_parent
                } else {
                    via_parent.or(self.has_privilege(resource, principal, Privilege::All).await)
                }
            }
            Unlock => {
                let owns_lock = match (resource.lock(), principal) {
                    (Some(lock), Some(p)) => lock.principal() == p,
                    _ => false,
                };
                if owns_lock {
                    Authorization::Granted
                } else {
                    self.has_privilege(resource, principal, Privilege::All).await
                }
            }
            AddComment => self.has_privilege(resource, principal, Privilege::AddComment).await,
            EditComment | WriteAcl | All => {
                self.has_privilege(resource, principal, Privilege::All).await
            }
            RepositoryAdminRoleAction | RepositoryRootRoleAction | Uneditable => {
                Authorization::denied(principal)
            }
        };
        Ok(outcome)
    }

    /// Authorize `action` on `resource`, failing with the matching error.
    pub async fn authorize(
        &self,
        action: RepositoryAction,
        resource: &Resource,
        principal: Option<&Principal>,
    ) -> Result<()> {
        let outcome = self.check(action, resource, principal).await?;
        if !outcome.is_granted() {
            debug!(?action, uri = %resource.uri(), ?principal, ?outcome, "authorization denied");
        }
        outcome.into_result()
    }

    /// Like [`authorize`](Self::authorize) but never fails; structural and
    /// internal errors count as "not authorized".
    pub async fn is_authorized(
        &self,
        action: RepositoryAction,
        resource: &Resource,
        principal: Option<&Principal>,
    ) -> bool {
        matches!(self.check(action, resource, principal).await, Ok(Authorization::Granted))
    }

    /// Structural preconditions of copy and move, checked before any load
    /// or Acl lookup.
    pub fn check_copy_move_paths(source: &Path, destination: &Path) -> Result<()> {
        if source.is_root() {
            return Err(RepositoryError::illegal("cannot copy or move the root resource"));
        }
        if destination.is_root() {
            return Err(RepositoryError::illegal("destination cannot be the root resource"));
        }
        if source == destination {
            return Err(RepositoryError::illegal("source and destination are the same"));
        }
        if source.is_ancestor_of(destination) {
            return Err(RepositoryError::illegal(format!(
                "cannot place {} below itself at {}",
                source, destination
            )));
        }
        Ok(())
    }

    /// Copy requires read on the source subtree (every Acl-owning
    /// descendant included), create on the destination parent and, when
    /// overwriting, delete on the existing destination.
    pub async fn authorize_copy(
        &self,
        source: &Resource,
        destination_parent: &Resource,
        overwritten: Option<&Resource>,
        principal: Option<&Principal>,
    ) -> Result<()> {
        self.authorize(RepositoryAction::Read, source, principal).await?;

        for uri in self.dao.discover_acls(source.uri()).await? {
            if &uri == source.uri() {
                continue;
            }
            let Some(descendant) = self.dao.load(&uri).await? else {
                continue;
            };
            match self.authorize(RepositoryAction::Read, &descendant, principal).await {
                Ok(()) => {}
                Err(e) if e.is_authorization() => {
                    return Err(RepositoryError::FailedDependency(format!(
                        "not allowed to read {}",
                        uri
                    )))
                }
                Err(e) => return Err(e),
            }
        }

        let create = if source.is_collection() {
            RepositoryAction::Create
        } else {
            RepositoryAction::CreateUnpublished
        };
        self.authorize(create, destination_parent, principal).await?;

        if let Some(existing) = overwritten {
            self.authorize(RepositoryAction::delete_for(existing), existing, principal)
                .await?;
        }
        Ok(())
    }

    /// Move requires delete on the source, and on the destination parent
    /// either `All` (when the moved subtree owns any Acl) or create.
    pub async fn authorize_move(
        &self,
        source: &Resource,
        destination_parent: &Resource,
        overwritten: Option<&Resource>,
        principal: Option<&Principal>,
    ) -> Result<()> {
        self.authorize(RepositoryAction::Delete, source, principal).await?;

        let carries_acls = !self.dao.discover_acls(source.uri()).await?.is_empty();
        let on_destination = if carries_acls {
            RepositoryAction::All
        } else {
            RepositoryAction::Create
        };
        self.authorize(on_destination, destination_parent, principal).await?;

        if let Some(existing) = overwritten {
            self.authorize(RepositoryAction::delete_for(existing), existing, principal)
                .await?;
        }
        Ok(())
    }

    /// Whether `principal` may be newly granted `privilege` in an Acl.
    pub async fn is_valid_acl_entry(&self, privilege: Privilege, principal: &Principal) -> bool {
        if principal.is_everyone() {
            return matches!(privilege, Privilege::Read | Privilege::ReadProcessed);
        }
        if self.blacklist.is_blacklisted(privilege, principal) {
            return false;
        }
        if principal.is_group() {
            self.principals.group_exists(principal).await
        } else {
            self.principals.principal_exists(principal).await
        }
    }

    /// Validate the entries `updated` adds on top of `original`. Entries
    /// already present in `original` are accepted as they are.
    pub async fn validate_acl(&self, updated: &Acl, original: &Acl) -> Result<()> {
        for (privilege, principal) in updated.added_since(original) {
            if !self.is_valid_acl_entry(privilege, &principal).await {
                return Err(RepositoryError::illegal(format!(
                    "invalid acl entry: {} may not be granted {}",
                    principal, privilege
                )));
            }
        }
        Ok(())
    }
}
