use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{info, warn};

use super::{ChildChange, Repository};
use crate::auth::manager::RepositoryAction;
use crate::auth::principal::Principal;
use crate::error::{RepositoryError, Result};
use crate::events::RepositoryEvent;
use crate::path::Path;
use crate::resource::trash::RecoverableResource;
use crate::resource::Resource;

impl Repository {
    /// Move `resource` into the trash can of `parent`. An inherited Acl is
    /// snapshotted onto the trashed resource.
    pub(super) async fn trash(&self, resource: &Resource, parent: &Resource, principal: &Principal) -> Result<()> {
        let (Some(id), Some(parent_id)) = (resource.id(), parent.id()) else {
            return Err(anyhow::anyhow!("cannot trash {} without stored ids", resource.uri()).into());
        };
        let record = RecoverableResource {
            id: RecoverableResource::trash_id(id),
            resource_id: id,
            parent_id,
            name: resource.name().to_string(),
            uri: resource.uri().clone(),
            deleted_by: principal.clone(),
            deleted_time: Utc::now(),
            was_inherited_acl: resource.is_inherited_acl(),
            collection: resource.is_collection(),
            resource_type: resource.resource_type().to_string(),
        };
        let trash_id = record.id.clone();
        self.dao.mark_deleted(resource, parent, record).await?;
        self.content.trash(resource.uri(), &trash_id).await?;
        self.events.send(RepositoryEvent::Deleted {
            uri: resource.uri().clone(),
            resource: resource.clone(),
            by: Some(principal.clone()),
        });
        Ok(())
    }

    /// Trash records of the collection at `uri`.
    pub async fn get_recoverable_resources(&self, token: Option<&str>, uri: &Path) -> Result<Vec<RecoverableResource>> {
        let principal = self.principal(token).await;
        let parent = self.load_collection(uri).await?;
        self.authz
            .authorize(RepositoryAction::Read, &parent, principal.as_ref())
            .await?;
        let Some(id) = parent.id() else {
            return Ok(Vec::new());
        };
        Ok(self.dao.get_recoverable_resources(id).await?)
    }

    /// Restore a trashed resource under its former parent at `uri`.
    pub async fn recover(&self, token: Option<&str>, uri: &Path, record: &RecoverableResource) -> Result<Resource> {
        let principal = self.principal(token).await;
        let parent = self.load_collection(uri).await?;
        let principal = self.check_lock(&parent, principal.as_ref())?;
        self.authz
            .authorize(RepositoryAction::Create, &parent, Some(principal))
            .await?;

        let target = uri.extend(&record.name)?;
        if self.dao.load(&target).await?.is_some() {
            return Err(RepositoryError::Overwrite(target));
        }
        self.check_fan_out(&parent)?;
        let known = match parent.id() {
            Some(id) => self.dao.get_recoverable_resources(id).await?,
            None => Vec::new(),
        };
        if !known.iter().any(|r| r.id == record.id) {
            return Err(RepositoryError::illegal(format!(
                "{} is not in the trash can of {}",
                record.id, uri
            )));
        }

        let recovered = self.dao.recover(&parent, record).await?;
        self.content.recover(&target, &record.id).await?;
        self.update_parent(parent, principal, ChildChange::Add(&target))
            .await?;

        info!(uri = %target, trash_id = %record.id, by = %principal, "resource recovered");
        self.events.send(RepositoryEvent::Created {
            resource: recovered.clone(),
            by: Some(principal.clone()),
        });
        Ok(recovered)
    }

    /// Permanently remove a trash record of the collection at `uri`.
    pub async fn delete_recoverable(&self, token: Option<&str>, uri: &Path, record: &RecoverableResource) -> Result<()> {
        let principal = self.principal(token).await;
        let parent = self.load_collection(uri).await?;
        let principal = self.check_lock(&parent, principal.as_ref())?;
        self.authz
            .authorize(RepositoryAction::Write, &parent, Some(principal))
            .await?;
        if parent.id() != Some(record.parent_id) {
            return Err(RepositoryError::illegal(format!(
                "{} is not in the trash can of {}",
                record.id, uri
            )));
        }
        self.discard(record).await?;
        info!(trash_id = %record.id, by = %principal, "trash record deleted");
        Ok(())
    }

    /// Drop a trash record with the content and revisions of every resource
    /// in the trashed subtree.
    async fn discard(&self, record: &RecoverableResource) -> Result<()> {
        let mut ids = self.dao.delete_recoverable(record).await?;
        if !ids.contains(&record.resource_id) {
            ids.push(record.resource_id);
        }
        self.content.delete_recoverable(&record.id).await?;
        for id in ids {
            self.revisions.delete_all(id).await?;
        }
        Ok(())
    }

    /// Remove trash records past the retention window or whose parent is
    /// gone. Returns how many were removed.
    pub async fn purge_trash(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut records = self
            .dao
            .get_trash_can_overdue(self.config.trash_retention_days, now)
            .await?;
        records.extend(self.dao.get_trash_can_orphans().await?);

        let mut seen = HashSet::new();
        let mut purged = 0;
        for record in records {
            if !seen.insert((record.id.clone(), record.parent_id)) {
                continue;
            }
            match self.discard(&record).await {
                Ok(()) => purged += 1,
                Err(e) => warn!(trash_id = %record.id, error = %e, "failed to purge trash record"),
            }
        }
        Ok(purged)
    }
}
